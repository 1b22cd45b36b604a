// ABOUTME: Modem worker process: opens the serial modem and bridges it to Redis
// ABOUTME: Sends jobs from the outgoing list and publishes inbound SMS on the incoming channel

use argh::FromArgs;
use serialsms::queue::redis::{RedisPublisher, RedisQueue};
use serialsms::{Config, ModemSession, ModemWorker};
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// SMS modem worker
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// serial device path (overrides SERIAL_DEVICE_PORT)
    #[argh(option)]
    device: Option<String>,

    /// baud rate (overrides SERIAL_BAUD_RATE)
    #[argh(option, short = 'b')]
    baud_rate: Option<u32>,
}

#[tokio::main]
async fn main() -> serialsms::Result<()> {
    let cli_args: CliArgs = argh::from_env();
    let mut config = Config::from_env();

    let level = if cli_args.debugging {
        Level::DEBUG
    } else {
        config.log_level
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(device) = cli_args.device {
        config.serial.device = device;
    }
    if let Some(baud_rate) = cli_args.baud_rate {
        config.serial.baud_rate = baud_rate;
    }

    info!(
        device = %config.serial.device,
        baud_rate = config.serial.baud_rate,
        realtime = config.handler.enable_realtime,
        poll_interval = ?config.handler.poller.interval,
        "Starting modem worker"
    );

    let session = ModemSession::open(&config.serial).await.inspect_err(|e| {
        error!(error = %e, "Failed to initialize modem");
    })?;

    let queue = Arc::new(RedisQueue::connect(&config.queue.redis_url, config.queue.retry).await?);
    let publisher = Arc::new(RedisPublisher::connect(&config.queue.redis_url).await?);

    let worker = ModemWorker::new(
        session.channel().clone(),
        Arc::clone(&queue),
        publisher,
        config.handler,
    );
    worker.start().await;

    if config.test_mode {
        match config.test_phone_number.as_deref() {
            Some(number) => {
                info!(to = number, "Test mode, sending test messages");
                worker.send_test_messages(number).await;
            }
            None => warn!("Test mode enabled but TEST_PHONE_NUMBER is not set, skipping test messages"),
        }
    }

    shutdown_signal().await;
    info!("Shutting down");

    queue.close();
    worker.stop().await;
    session.close().await?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
