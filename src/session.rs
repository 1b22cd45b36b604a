// ABOUTME: Modem session tying one serial device to its command channel
// ABOUTME: Opens the port, waits for the device to settle and runs the initialization sequence

use crate::channel::CommandChannel;
use crate::config::SerialConfig;
use crate::connection;
use crate::error::ModemResult;
use tracing::info;

/// One open and initialized serial modem
///
/// There is one session per device path; the process owns the device for
/// the session's lifetime.
#[derive(Debug, Clone)]
pub struct ModemSession {
    device: String,
    channel: CommandChannel,
}

impl ModemSession {
    /// Opens the serial device, waits the configured settle delay and
    /// initializes the modem.
    pub async fn open(config: &SerialConfig) -> ModemResult<Self> {
        info!(device = %config.device, baud_rate = config.baud_rate, "Opening serial port");
        let port = connection::open_serial(&config.device, config.baud_rate)?;

        if !config.init_delay.is_zero() {
            info!(delay = ?config.init_delay, "Waiting for modem to settle");
            tokio::time::sleep(config.init_delay).await;
        }

        let channel = CommandChannel::new(port, config.command_timeout);
        channel.initialize().await?;

        Ok(Self {
            device: config.device.clone(),
            channel,
        })
    }

    /// The session's command channel
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_ready(&self) -> bool {
        self.channel.is_ready()
    }

    pub async fn close(&self) -> ModemResult<()> {
        self.channel.close().await?;
        info!(device = %self.device, "Modem session closed");
        Ok(())
    }
}
