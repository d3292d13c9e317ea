//! detect-image - run the detection pipeline on local image files

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use weapon_detector::ui::{Ui, UiMode};
use weapon_detector::{ServerConfig, WeaponDetector};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Images to analyse.
    #[arg(required = true)]
    images: Vec<PathBuf>,
    /// Config file (.toml or .json). Overrides WEAPON_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// ONNX model path.
    #[arg(long, env = "WEAPON_MODEL_PATH")]
    model: Option<PathBuf>,
    /// Print remapped model output without the acceptance policy.
    #[arg(long)]
    raw: bool,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::for_stderr(args.ui);
    let mut config = match &args.config {
        Some(path) => ServerConfig::load_from(path)?,
        None => ServerConfig::load()?,
    };
    if let Some(model) = &args.model {
        config.model.path = model.clone();
    }

    let mut detector = {
        let _stage = ui.stage("loading model");
        load_model(&config)?
    };

    for path in &args.images {
        let output = if args.raw {
            let image = image::open(path)
                .map_err(|err| anyhow!("failed to read image {}: {}", path.display(), err))?;
            let detections = detector.detect_raw(&image)?;
            to_json(&detections, args.pretty)?
        } else {
            let result = detector.detect_path(path)?;
            to_json(&result, args.pretty)?
        };
        if args.images.len() > 1 {
            println!("{}: {}", path.display(), output);
        } else {
            println!("{output}");
        }
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(out)
}

#[cfg(feature = "backend-tract")]
fn load_model(config: &ServerConfig) -> Result<WeaponDetector> {
    WeaponDetector::load_onnx(&config.model, &config.pipeline)
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(config: &ServerConfig) -> Result<WeaponDetector> {
    Err(anyhow!(
        "cannot load {}: built without the backend-tract feature",
        config.model.path.display()
    ))
}
