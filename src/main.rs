//! ircline: connect to an IRC server and log every line it sends.
//!
//! - Optional one-shot ident responder for servers that query port 113
//! - Raw lines can be sent right after connecting with `--send`
//! - Ctrl-C disposes the connection without a disconnect notification

use ircline::config::Config;
use ircline::protocols::ident::IdentServer;
use ircline::protocols::irc::{ConnectionReader, HandlerError, LineHandler};
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Logs every received line.
struct LogLines;

impl LineHandler for LogLines {
    fn handle_line(&mut self, line: &str) -> Result<(), HandlerError> {
        info!(line, "<<");
        Ok(())
    }

    fn on_disconnect(&mut self) {
        warn!("Connection lost");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        server = %config.server,
        encoding = config.encoding.name(),
        idle_timeout = config.idle_timeout,
        ident = config.ident_enabled,
        "Starting ircline"
    );

    // Must be listening before the server connects back
    let _ident = config
        .ident_enabled
        .then(|| IdentServer::start(config.login.clone(), &config.ident_config()));

    let stream = TcpStream::connect(&config.server).await?;
    info!(peer = %stream.peer_addr()?, "Connected");

    let handle = ConnectionReader::from_stream(stream, LogLines, config.reader_config()).start();
    for line in &config.send {
        handle.send_raw_line(line).await?;
    }

    let control = handle.control();
    let joined = handle.join();
    tokio::pin!(joined);

    let state = tokio::select! {
        state = &mut joined => state,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, disposing connection");
            control.dispose();
            joined.await
        }
    };

    info!(state = ?state, "Connection finished");
    Ok(())
}
