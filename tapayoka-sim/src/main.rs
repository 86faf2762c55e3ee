//! Simulated Tapayoka device for developing the app without BLE hardware

use std::sync::Arc;

use clap::Parser;
use ed25519_dalek::SigningKey;
use tapayoka_proto::{CommandStatus, parse_wallet_address};
use tapayoka_sim::{Behavior, Device, Server};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tapayoka-sim")]
#[command(about = "Simulated Tapayoka vendor device (WebSocket transport)")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8765")]
    bind: String,

    /// Firmware version to report
    #[arg(short, long, default_value = "0.1.0")]
    firmware: String,

    /// Device signing key, 64 hex chars (random if omitted)
    #[arg(long, env = "TAPAYOKA_SIM_SECRET_KEY")]
    secret_key: Option<String>,

    /// Device wallet address, 0x + 40 hex chars (random if omitted)
    #[arg(short, long)]
    wallet: Option<String>,

    /// Never reply to requests
    #[arg(long)]
    silent: bool,

    /// Send unrelated frames before every reply
    #[arg(long)]
    noise: bool,

    /// Answer every command with this status (e.g. ERROR, BUSY)
    #[arg(long)]
    status: Option<String>,

    /// Close each connection after its first reply
    #[arg(long)]
    close_after_reply: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tapayoka_sim=info")),
        )
        .init();

    let cli = Cli::parse();

    let signing_key = match &cli.secret_key {
        Some(hex) => {
            let bytes: [u8; 32] = data_encoding::HEXLOWER_PERMISSIVE
                .decode(hex.trim().as_bytes())?
                .try_into()
                .map_err(|_| "secret key must be 32 bytes")?;
            SigningKey::from_bytes(&bytes)
        }
        None => SigningKey::generate(&mut rand::rngs::OsRng),
    };
    let wallet = match &cli.wallet {
        Some(address) => parse_wallet_address(address)?,
        None => rand::random(),
    };

    let device = Arc::new(Device::new(signing_key, wallet, cli.firmware));
    device.set_behavior(Behavior {
        silent: cli.silent,
        noise: cli.noise,
        forced_status: cli.status.map(CommandStatus::from),
        close_after_reply: cli.close_after_reply,
    });

    let server = Server::bind(&cli.bind, device.clone()).await?;
    println!("Device wallet: {}", device.wallet_address());
    println!("Device key:    {}", device.public_key_hex());
    println!("Listening on {}", server.url()?);
    println!("Trust it with TAPAYOKA_TRUSTED_KEYS={}", device.public_key_hex());

    server.run().await?;
    Ok(())
}
