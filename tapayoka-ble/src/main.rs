//! Provisioning tool for Tapayoka devices
//!
//! Scans for devices, shows their attested info and binds them to a server
//! wallet, over BLE or (without radio hardware) WebSocket.

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tapayoka_ble_controller::{
    AttestationError, AttestationVerifier, Config, DeviceInfo, ProvisionOutcome, TransportKind,
    UnconfirmedReason, VerifiedDeviceInfo, provision_and_confirm, select,
};
use tapayoka_proto::parse_wallet_address;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tapayoka-ble")]
#[command(about = "Provisioning tool for Tapayoka vendor devices")]
struct Cli {
    /// Transport to use: ble or ws (default from TAPAYOKA_TRANSPORT, else ble)
    #[arg(short, long)]
    transport: Option<String>,

    /// Device endpoint for the ws transport
    #[arg(long)]
    ws_url: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Trusted device public key (hex), may be repeated
    #[arg(long = "trusted-key")]
    trusted_keys: Vec<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for Tapayoka devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Read and verify a device's info
    Info {
        /// Device id from scan (address, or endpoint URL for ws)
        #[arg(short, long)]
        device: String,
    },
    /// Bind a device to a server wallet
    Setup {
        /// Device id from scan (address, or endpoint URL for ws)
        #[arg(short, long)]
        device: String,
        /// Server wallet address (0x + 40 hex chars)
        #[arg(short, long)]
        address: String,
        /// Skip reading the device info back after the command
        #[arg(long)]
        no_confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let verifier = AttestationVerifier::from_hex_keys(config.trusted_keys.as_slice())?;
    let transport = select(&config);

    match cli.command {
        Commands::Scan { duration } => {
            let timeout = duration.map(Duration::from_secs).unwrap_or(config.scan_timeout);
            if !cli.json {
                println!("Scanning for Tapayoka devices ({} seconds)...", timeout.as_secs());
            }
            let devices = transport.scan(timeout).await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                println!("\nFound {} devices:", devices.len());
                for device in &devices {
                    println!(
                        "  {} ({}) RSSI: {} dBm wallet: {}...",
                        device.name, device.id, device.rssi, device.wallet_address_prefix
                    );
                }
            }
        }
        Commands::Info { device } => {
            let Some(info) = transport.read_device_info(&device).await else {
                return Err(format!("could not read device info from {device}").into());
            };
            let attestation = verifier.verify(&info);
            if cli.json {
                let report = info_report(&info, &attestation);
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_info(&info);
                match attestation {
                    Ok(verified) => {
                        println!("Attestation: verified for {}", verified.wallet_address())
                    }
                    Err(e) => println!(
                        "Attestation: NOT verified ({e}), treat the fields above as unauthenticated"
                    ),
                }
            }
        }
        Commands::Setup {
            device,
            address,
            no_confirm,
        } => {
            parse_wallet_address(&address)?;
            println!("Sending SETUP_SERVER to {device}...");

            if no_confirm {
                if transport.setup_server_wallet(&device, &address).await {
                    println!("Command acknowledged (not confirmed).");
                } else {
                    return Err("device did not acknowledge the command".into());
                }
                return Ok(());
            }

            let verifier = (!verifier.is_empty()).then_some(&verifier);
            match provision_and_confirm(transport.as_ref(), &device, &address, verifier).await {
                ProvisionOutcome::Confirmed(info) => {
                    println!("Device provisioned.");
                    print_info(&info);
                }
                ProvisionOutcome::NotAcknowledged => {
                    return Err("device did not acknowledge the command".into());
                }
                ProvisionOutcome::Unconfirmed(UnconfirmedReason::ReadFailed) => {
                    return Err(
                        "command acknowledged but device info could not be read back".into(),
                    );
                }
                ProvisionOutcome::Unconfirmed(UnconfirmedReason::FlagNotSet(_)) => {
                    return Err(
                        "command acknowledged but device still reports no server wallet".into(),
                    );
                }
                ProvisionOutcome::Unconfirmed(UnconfirmedReason::Attestation(e)) => {
                    return Err(format!("command acknowledged but attestation failed: {e}").into());
                }
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::from_env()?;
    if let Some(transport) = &cli.transport {
        config.transport = transport.parse::<TransportKind>()?;
    }
    if let Some(url) = &cli.ws_url {
        config.ws_device_url = url.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        config.request_timeout = Duration::from_millis(ms);
    }
    config.trusted_keys.extend(cli.trusted_keys.iter().cloned());
    Ok(config)
}

/// `info --json` output: the device info and whether its attestation held
fn info_report(
    info: &DeviceInfo,
    attestation: &Result<VerifiedDeviceInfo, AttestationError>,
) -> Value {
    let attestation = match attestation {
        Ok(_) => json!({ "verified": true }),
        Err(e) => json!({ "verified": false, "error": e.to_string() }),
    };
    json!({ "deviceInfo": info, "attestation": attestation })
}

fn print_info(info: &DeviceInfo) {
    println!("  Wallet:        {}", info.wallet_address);
    println!("  Firmware:      {}", info.firmware_version);
    println!("  Server wallet: {}", if info.has_server_wallet { "yes" } else { "no" });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DeviceInfo {
        DeviceInfo {
            wallet_address: format!("0x{}", "ab".repeat(20)),
            firmware_version: "1.0.0".to_string(),
            has_server_wallet: false,
            signed_payload: r#"{"v":1}"#.to_string(),
            signature: "abcd".to_string(),
        }
    }

    #[test]
    fn json_info_report_is_one_document() {
        let info = info();
        let unverified = AttestationVerifier::default().verify(&info);
        let report = info_report(&info, &unverified);

        let text = serde_json::to_string_pretty(&report).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["deviceInfo"]["walletAddress"], info.wallet_address);
        assert_eq!(parsed["deviceInfo"]["hasServerWallet"], false);
        assert_eq!(parsed["attestation"]["verified"], false);
        assert_eq!(parsed["attestation"]["error"], "no trusted device keys configured");
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::parse_from([
            "tapayoka-ble",
            "--transport",
            "ws",
            "--ws-url",
            "ws://127.0.0.1:9000",
            "--timeout-ms",
            "250",
            "info",
            "--device",
            "ws://127.0.0.1:9000",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.transport, TransportKind::Ws);
        assert_eq!(config.ws_device_url, "ws://127.0.0.1:9000");
        assert_eq!(config.request_timeout, Duration::from_millis(250));
    }
}
