//! Connect to a Telegram DC, generate an auth key and exchange a few
//! encrypted service calls through [`tether_sender::Sender`].
//!
//! # Run
//! ```text
//! RUST_LOG=debug cargo run -p tether-connect -- [ADDR] [--transport KIND]
//! ```
//!
//! `KIND` is one of `abridged`, `intermediate`, `full` or `obfuscated`.

use std::sync::Arc;

use tether_sender::{AuthKeyCallback, ObfuscatedFraming, Sender, SenderConfig, TcpConnector, TransportKind};
use tether_tl_types::{enums, functions};

/// Test DC2. Production DCs work too.
const DEFAULT_ADDR: &str = "149.154.167.40:80";

#[derive(Debug, PartialEq)]
struct Args {
    addr: String,
    transport: TransportKind,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut addr = None;
    let mut transport = TransportKind::Abridged;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--transport" | "-t" => {
                let kind = args.next().ok_or("--transport needs a value")?;
                transport = match kind.as_str() {
                    "abridged" => TransportKind::Abridged,
                    "intermediate" => TransportKind::Intermediate,
                    "full" => TransportKind::Full,
                    "obfuscated" => {
                        TransportKind::Obfuscated { secret: None, inner: ObfuscatedFraming::Abridged }
                    }
                    other => return Err(format!("unknown transport {other:?}")),
                };
            }
            flag if flag.starts_with('-') => return Err(format!("unknown flag {flag:?}")),
            _ if addr.is_some() => return Err(format!("unexpected argument {arg:?}")),
            _ => addr = Some(arg),
        }
    }
    Ok(Args { addr: addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()), transport })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = parse_args(std::env::args().skip(1))?;

    println!("Connecting to {} ({:?}) …", args.addr, args.transport);
    let on_auth_key: AuthKeyCallback = Arc::new(|auth| match auth {
        Some(auth) => println!(
            "✓ Auth key {:02x?}…, clock offset {}s",
            &auth.auth_key[..8],
            auth.time_offset
        ),
        None => println!("✗ Server dropped our auth key"),
    });
    let connector = TcpConnector { transport: args.transport, ..Default::default() };
    let sender =
        Sender::connect(connector, args.addr, None, Some(on_auth_key), SenderConfig::default()).await?;
    println!("✓ Connected");

    let ping_id = tether_crypto::random_i64();
    let enums::Pong::Pong(pong) = sender.invoke_typed(&functions::Ping { ping_id }).await?;
    log::info!("pong for msg {}", pong.msg_id);
    println!("✓ Pong, ping_id matches: {}", pong.ping_id == ping_id);

    let enums::FutureSalts::FutureSalts(salts) =
        sender.invoke_typed(&functions::GetFutureSalts { num: 3 }).await?;
    println!("✓ {} future salts, server time {}", salts.salts.0.len(), salts.now);
    for salt in &salts.salts.0 {
        println!("    {:#018x} valid {}..{}", salt.salt, salt.valid_since, salt.valid_until);
    }

    sender.disconnect().await;
    println!("✓ Disconnected");
    Ok(())
}
