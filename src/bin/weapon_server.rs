//! weapon-server - HTTP detection service
//!
//! This daemon:
//! 1. Loads configuration from `WEAPON_CONFIG` and `WEAPON_*` overrides
//! 2. Loads the ONNX detector
//! 3. Serves `POST /detect` until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use weapon_detector::{
    api::{ApiConfig, ApiServer},
    ServerConfig, WeaponDetector,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json). Overrides WEAPON_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Serve with the stub backend, which never detects anything.
    #[arg(long)]
    stub: bool,
    /// Skip the warm-up inference at startup.
    #[arg(long)]
    no_warm_up: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ServerConfig::load_from(path)?,
        None => ServerConfig::load()?,
    };

    let mut detector = build_detector(&config, args.stub)?;
    if !args.no_warm_up {
        detector.warm_up()?;
    }

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_request_bytes: config.max_request_bytes,
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, detector).spawn()?;
    log::info!("web interface available at http://{}", api_handle.addr);
    log::info!("api endpoint available at http://{}/detect", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("weapon-server waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}

fn build_detector(config: &ServerConfig, stub: bool) -> Result<WeaponDetector> {
    if stub {
        log::warn!("serving with the stub backend; no weapons will be reported");
        return Ok(WeaponDetector::from_settings(
            weapon_detector::detect::StubBackend::new(),
            &config.pipeline,
        ));
    }
    load_model(config)
}

#[cfg(feature = "backend-tract")]
fn load_model(config: &ServerConfig) -> Result<WeaponDetector> {
    WeaponDetector::load_onnx(&config.model, &config.pipeline)
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(config: &ServerConfig) -> Result<WeaponDetector> {
    Err(anyhow!(
        "cannot load {}: built without the backend-tract feature (rebuild with --features backend-tract or pass --stub)",
        config.model.path.display()
    ))
}
