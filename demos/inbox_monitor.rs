// ABOUTME: Long-running example printing every SMS the modem receives
// ABOUTME: Uses SmsHandler with push notifications and the inbox poller as fallback

//! # Inbox Monitor
//!
//! Prints each inbound SMS as JSON until interrupted. Messages are left on
//! the SIM unless `--delete` is given.
//!
//! ```bash
//! cargo run --example inbox_monitor -- --device /dev/ttyUSB2 --poll-interval 15
//!
//! # Poll only, deleting what was read
//! cargo run --example inbox_monitor -- --no-realtime --delete
//! ```

use argh::FromArgs;
use serialsms::{
    HandlerConfig, ModemResult, ModemSession, PollerConfig, SerialConfig, SmsHandler, SmsMessage,
    handler_fn,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Print inbound SMS messages from a serial modem
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the serial device of the modem (default: /dev/ttyUSB2)
    #[argh(option)]
    device: Option<String>,

    /// seconds between inbox polls (default: 10)
    #[argh(option, default = "10")]
    poll_interval: u64,

    /// rely on polling only
    #[argh(switch)]
    no_realtime: bool,

    /// delete messages from the SIM once printed
    #[argh(switch)]
    delete: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let level = if cli_args.debugging {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = SerialConfig::new(
        cli_args
            .device
            .unwrap_or_else(|| SerialConfig::default().device),
    );
    let session = ModemSession::open(&config).await?;

    let printer = handler_fn(|message: SmsMessage| async move {
        println!("{}", serde_json::to_string_pretty(&message)?);
        ModemResult::Ok(())
    });

    let handler = SmsHandler::new(
        session.channel().clone(),
        Arc::new(printer),
        HandlerConfig::default()
            .with_realtime(!cli_args.no_realtime)
            .with_poller(
                PollerConfig::new(Duration::from_secs(cli_args.poll_interval))
                    .with_delete_after_read(cli_args.delete),
            ),
    );
    handler.start().await;
    info!(
        realtime = handler.realtime_enabled(),
        interval = ?handler.poller().interval(),
        "Monitoring inbox, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;

    handler.stop();
    session.close().await?;
    Ok(())
}
