//! organize-dataset - split per-class image folders into train/val sets

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use weapon_detector::dataset::{organize_with, OrganizeOptions};
use weapon_detector::ui::{Ui, UiMode};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory with one folder per class.
    #[arg(long, default_value = "weapon-dataset")]
    base_dir: PathBuf,
    /// Output directory for images/ and labels/ (defaults to --base-dir).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Fraction of each class used for training.
    #[arg(long, default_value_t = 0.8)]
    train_ratio: f64,
    /// Class folder names in label-index order.
    #[arg(long, value_delimiter = ',', default_value = "drill,knife")]
    classes: Vec<String>,
    /// Optional deterministic shuffle seed.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::for_stderr(args.ui);
    let options = OrganizeOptions {
        base_dir: args.base_dir,
        output_dir: args.out,
        classes: args.classes,
        train_ratio: args.train_ratio,
    };
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let report = {
        let _stage = ui.stage("organizing dataset");
        let mut bar: Option<(String, indicatif::ProgressBar)> = None;
        let report = organize_with(&options, &mut rng, |event| {
            let stale = bar.as_ref().map_or(true, |(class, _)| class != event.class);
            if stale {
                if let Some((_, done)) = bar.take() {
                    done.finish();
                }
                let fresh = ui.progress(event.class_total as u64, event.class);
                bar = Some((event.class.to_string(), fresh));
            }
            if let Some((_, current)) = &bar {
                current.set_position(event.position as u64);
                current.set_message(format!("{} -> {}", event.file.display(), event.split.as_str()));
            }
        })?;
        if let Some((_, done)) = bar.take() {
            done.finish();
        }
        report
    };

    for class in &report.classes {
        println!(
            "{} (label {}): {} train, {} val",
            class.class, class.index, class.train, class.val
        );
    }
    for skipped in &report.skipped {
        println!("{skipped}: skipped");
    }
    println!("Dataset organization complete! {} images", report.total());
    Ok(())
}
