//! HSM agent - SSH certificate signing with hardware-held keys

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use hsm_agent::{
    config::Args,
    keys::{HardwareKey, KeyRegistry, SoftwareKey},
    logging, CertificateEngine, Supervisor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json)?;

    if let Some(serial) = &args.generate_key {
        std::fs::create_dir_all(&args.key_dir)
            .with_context(|| format!("Failed to create key directory {}", args.key_dir.display()))?;
        let key = SoftwareKey::generate(serial.as_str());
        let path = key.save(&args.key_dir)?;
        info!(serial = %serial, path = %path.display(), "Generated software key");
        println!("{}", key.public_key_openssh()?);
        return Ok(());
    }

    let config = args.resolve()?;
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  HSM Agent - SSH Certificate Signing");
    info!("======================================");
    info!("Hosts: {}", config.hosts.len());
    info!("Max certificate TTL: {}s", config.max_ttl);
    info!("Key directory: {}", config.key_dir.display());
    info!("Queue size: {}", config.settings.queue_size);
    info!("Max in flight: {}", config.settings.max_in_flight);
    info!("======================================");

    let keys = SoftwareKey::load_dir(&config.key_dir)
        .with_context(|| format!("Failed to discover keys in {}", config.key_dir.display()))?;
    if keys.is_empty() {
        anyhow::bail!("No signing keys found in {}", config.key_dir.display());
    }

    for key in &keys {
        match key.public_key_openssh() {
            Ok(public_key) => info!(serial = %key.serial(), "CA key: {}", public_key),
            Err(e) => warn!(serial = %key.serial(), error = %e, "Failed to encode public key"),
        }
    }

    let keys: Vec<Arc<dyn HardwareKey>> = keys
        .into_iter()
        .map(|key| Arc::new(key) as Arc<dyn HardwareKey>)
        .collect();
    let registry = Arc::new(KeyRegistry::new(keys)?);
    info!("Key registry: {} key(s)", registry.len());

    let engine = Arc::new(CertificateEngine::new(registry, config.max_ttl));
    let supervisor = Supervisor::new(&config.hosts, engine, config.settings.clone());
    if supervisor.is_empty() {
        anyhow::bail!("No valid hosts configured");
    }

    let handles = supervisor.spawn_all();
    info!("Supervising {} session(s)", handles.len());

    shutdown_signal().await;
    info!("Received shutdown signal");

    for handle in &handles {
        handle.abort();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    info!("HSM agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
