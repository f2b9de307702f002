//! # OpenWire client demo
//!
//! A small command-line client exercising the library end to end: connect,
//! open a session, and either send one message or block for one. Useful for
//! poking a real broker by hand; not part of the library's public surface.

use anyhow::Result;
use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, Subcommand,
};
use openwire_client_core::client::AckMode;
use openwire_client_core::config::{connect, ConnectionOptions};
use openwire_client_core::model::{DeliveryMode, Destination, Message};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod logging;
use logging::ColorizedFormatter;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// OpenWire client demo - connect to a broker and send or receive one message
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = styles())]
struct Args {
    /// Connection URI (spec §6): `tcp://host:port`, `ssl://host:port`, or
    /// `failover:(uri1,uri2,...)`.
    #[arg(short = 'u', long, default_value = "tcp://127.0.0.1:61616")]
    uri: String,

    /// Client id presented during the handshake.
    #[arg(long)]
    client_id: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress the colorized stdout layer.
    #[arg(short, long)]
    quiet: bool,

    /// Write detailed logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: DemoCommand,
}

#[derive(Subcommand, Debug)]
enum DemoCommand {
    /// Send one text message and exit.
    Send {
        /// Destination name, e.g. `queue://Q.T1` or a bare name (defaults to queue).
        #[arg(long)]
        destination: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        persistent: bool,
        #[arg(long, default_value_t = Message::DEFAULT_PRIORITY)]
        priority: u8,
    },
    /// Block for one message and print it.
    Receive {
        #[arg(long)]
        destination: String,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_log_layer;
    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("openwire-client.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "openwire-client.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry().with(detailed_log_layer).with(stdout_log).init();
    let _log_guard = guard;

    let mut options = ConnectionOptions::default();
    options.client_id = args.client_id.clone();

    info!(uri = %args.uri, "connecting");
    let connection = connect(&args.uri, options).await?;
    connection.start().await?;
    let session = connection.create_session(AckMode::Auto).await?;

    match args.command {
        DemoCommand::Send { destination, body, persistent, priority } => {
            let destination = Destination::parse(&destination);
            let producer = session.create_producer(Some(destination.clone()), None).await?;
            let mut message = Message::text(body);
            message.delivery_mode = if persistent { DeliveryMode::Persistent } else { DeliveryMode::NonPersistent };
            message.priority = priority.min(9);
            producer.send(message).await?;
            info!(%destination, "message sent");
        }
        DemoCommand::Receive { destination, timeout_secs } => {
            let destination = Destination::parse(&destination);
            let consumer = session.create_consumer(destination.clone(), 1000, false, None, false, 4).await?;
            match consumer.receive_timed(Duration::from_secs(timeout_secs)).await {
                Some(message) => info!(%destination, body = ?message.text_body(), "message received"),
                None => warn!(%destination, timeout_secs, "no message received before timeout"),
            }
        }
    }

    connection.close().await?;
    Ok(())
}
