//! detect-client - post local images to a running weapon-server

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use weapon_detector::api::{encode_data_url, mime_for_path};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Images to send.
    #[arg(required = true)]
    images: Vec<PathBuf>,
    /// Detection endpoint.
    #[arg(long, env = "WEAPON_DETECT_URL", default_value = "http://127.0.0.1:5001/detect")]
    url: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut failures = 0usize;
    for path in &args.images {
        println!("\nTesting image: {}", path.display());
        match post_image(&args.url, path) {
            Ok((status, body)) => {
                println!("Response ({status}): {body}");
                if status != 200 {
                    failures += 1;
                }
            }
            Err(err) => {
                log::error!("{}: {:#}", path.display(), err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} requests failed", failures, args.images.len()));
    }
    Ok(())
}

fn post_image(url: &str, path: &Path) -> Result<(u16, serde_json::Value)> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let payload = serde_json::json!({ "image": encode_data_url(&bytes, mime_for_path(path)) });

    let response = match ureq::post(url)
        .set("Content-Type", "application/json")
        .send_json(payload)
    {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => return Err(err).with_context(|| format!("post to {}", url)),
    };
    let status = response.status();
    let body = response
        .into_json::<serde_json::Value>()
        .context("decode response body")?;
    Ok((status, body))
}
