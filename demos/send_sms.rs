// ABOUTME: Example application sending one SMS through a serial GSM modem
// ABOUTME: Opens and initializes the modem with ModemSession, then sends and closes

use argh::FromArgs;
use serialsms::{ModemSession, SerialConfig};
use std::error::Error;
use std::time::Duration;

/// Example application to show the simplest case of sending an SMS message
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the serial device of the modem (default: /dev/ttyUSB2)
    #[argh(option)]
    device: Option<String>,

    /// the baud rate (default: 115200)
    #[argh(option, short = 'b')]
    baud_rate: Option<u32>,

    /// time to wait for each AT command, in milliseconds (default: 5000)
    #[argh(option)]
    timeout: Option<u64>,

    /// the message to send
    #[argh(option, short = 'm')]
    message: String,

    /// the recipient telephone number
    #[argh(option, short = 't')]
    to: String,
}

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

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

    let mut config = SerialConfig::default();
    if let Some(device) = cli_args.device {
        config.device = device;
    }
    if let Some(baud_rate) = cli_args.baud_rate {
        config = config.with_baud_rate(baud_rate);
    }
    if let Some(timeout) = cli_args.timeout {
        config = config.with_command_timeout(Duration::from_millis(timeout));
    }

    let session = ModemSession::open(&config).await.map_err(|e| {
        eprintln!("Modem setup failed: {e}");
        Box::<dyn Error>::from(e.to_string())
    })?;

    println!("Modem on {} ready", session.device());

    let result = session
        .channel()
        .send_sms(&cli_args.to, &cli_args.message)
        .await;

    if let Err(e) = session.close().await {
        eprintln!("Warning: Close failed: {e}");
    }

    match result {
        Ok(segments) => {
            println!("Message sent successfully in {segments} segment(s)");
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to send message: {e}");
            Err(Box::<dyn Error>::from(e.to_string()))
        }
    }
}
