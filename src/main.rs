use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use umbral_proxy::service::{DecryptRequest, RekeyRequest};
use umbral_proxy::{ProxyService, ServiceConfig};

/// Runs an owner -> recipient re-encryption round trip against the configured store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML service configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long)]
    log_level: Option<String>,

    /// Message the owner encrypts
    #[arg(short, long, default_value = "HELLO")]
    message: String,

    /// Fragments needed to decrypt
    #[arg(short, long, default_value_t = 2)]
    threshold: usize,

    /// Fragments issued
    #[arg(short = 'n', long, default_value_t = 3)]
    shares: usize,

    /// Lifetime of the grant in seconds
    #[arg(long, default_value_t = 3600)]
    ttl: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let log_level: tracing::Level = config.log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    let service = ProxyService::from_config(&config)?;
    let sweeper = service.start_sweeper();

    let owner = service.prepare("alice").await?;
    service.prepare("bob").await?;
    tracing::info!(public_key = %owner.public_key, "owner ready");

    let encrypted = service.encrypt("alice", args.message.as_bytes()).await?;
    let rekey = service
        .rekey(RekeyRequest {
            owner_id: "alice".into(),
            recipient_id: "bob".into(),
            resource_id: "demo".into(),
            expiry: chrono::Utc::now() + chrono::Duration::seconds(args.ttl),
            threshold: args.threshold,
            shares: args.shares,
        })
        .await?;

    let cfrags = service
        .reencrypt(&rekey.rekey_id, &encrypted.capsule, &encrypted.ciphertext)
        .await?;

    let plaintext = service
        .decrypt(DecryptRequest {
            recipient_id: "bob".into(),
            owner_id: "alice".into(),
            capsule: encrypted.capsule,
            ciphertext: encrypted.ciphertext,
            cfrags: cfrags.into_iter().take(args.threshold).collect(),
        })
        .await?;
    println!("{}", String::from_utf8_lossy(&plaintext));

    service.revoke(&rekey.rekey_id).await?;
    let health = service.health().await;
    tracing::info!(status = %health.status, "done");

    if let Some(handle) = sweeper {
        handle.abort();
    }
    Ok(())
}
