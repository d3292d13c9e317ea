//! Training-set layout: split per-class image folders into the
//! `images/{train,val}` + `labels/{train,val}` tree expected by YOLO-style
//! trainers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::detect::WeaponClass;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const SPLITS: [Split; 2] = [Split::Train, Split::Val];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrganizeOptions {
    /// Directory holding one sub-folder per class.
    pub base_dir: PathBuf,
    /// Where `images/` and `labels/` are created. Defaults to `base_dir`.
    pub output_dir: Option<PathBuf>,
    /// Class folder names; the position is the label index.
    pub classes: Vec<String>,
    pub train_ratio: f64,
}

impl OrganizeOptions {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            output_dir: None,
            classes: WeaponClass::ALL
                .iter()
                .map(|class| class.as_str().to_string())
                .collect(),
            train_ratio: 0.8,
        }
    }

    fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.base_dir)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClassSplit {
    pub class: String,
    pub index: usize,
    pub train: usize,
    pub val: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct OrganizeReport {
    pub classes: Vec<ClassSplit>,
    /// Class folders that were missing or held no images.
    pub skipped: Vec<String>,
}

impl OrganizeReport {
    pub fn total(&self) -> usize {
        self.classes.iter().map(|c| c.train + c.val).sum()
    }
}

/// One copied image, reported while [`organize_with`] runs.
#[derive(Debug)]
pub struct CopyEvent<'a> {
    pub class: &'a str,
    pub split: Split,
    pub file: &'a Path,
    /// Position within this class, starting at 1.
    pub position: usize,
    pub class_total: usize,
}

pub fn organize<R: Rng + ?Sized>(options: &OrganizeOptions, rng: &mut R) -> Result<OrganizeReport> {
    organize_with(options, rng, |_| {})
}

/// Like [`organize`], calling `on_copy` after every image is written.
pub fn organize_with<R, F>(
    options: &OrganizeOptions,
    rng: &mut R,
    mut on_copy: F,
) -> Result<OrganizeReport>
where
    R: Rng + ?Sized,
    F: FnMut(CopyEvent<'_>),
{
    if !(0.0..=1.0).contains(&options.train_ratio) {
        return Err(anyhow!(
            "train ratio must be within [0, 1], got {}",
            options.train_ratio
        ));
    }

    let out = options.output_dir();
    for split in SPLITS {
        for kind in ["images", "labels"] {
            let dir = out.join(kind).join(split.as_str());
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
    }

    let mut report = OrganizeReport::default();
    for (index, class) in options.classes.iter().enumerate() {
        let source = options.base_dir.join(class);
        if !source.is_dir() {
            log::warn!("{} does not exist, skipping", source.display());
            report.skipped.push(class.clone());
            continue;
        }

        let mut images = collect_images(&source)?;
        if images.is_empty() {
            log::warn!("no images found in {}", source.display());
            report.skipped.push(class.clone());
            continue;
        }
        log::info!("found {} images for {}", images.len(), class);

        images.shuffle(rng);
        let split_at = (images.len() as f64 * options.train_ratio).floor() as usize;
        let class_total = images.len();

        for (position, image) in images.iter().enumerate() {
            let split = if position < split_at {
                Split::Train
            } else {
                Split::Val
            };
            copy_with_label(image, out, split, index)?;
            on_copy(CopyEvent {
                class,
                split,
                file: image,
                position: position + 1,
                class_total,
            });
        }

        log::info!(
            "{}: {} train, {} val",
            class,
            split_at,
            class_total - split_at
        );
        report.classes.push(ClassSplit {
            class: class.clone(),
            index,
            train: split_at,
            val: class_total - split_at,
        });
    }

    Ok(report)
}

/// Image files directly inside `dir`, sorted by name.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn copy_with_label(image: &Path, out: &Path, split: Split, class_index: usize) -> Result<()> {
    let name = image
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", image.display()))?;
    let stem = image
        .file_stem()
        .ok_or_else(|| anyhow!("{} has no file stem", image.display()))?;

    let dest = out.join("images").join(split.as_str()).join(name);
    fs::copy(image, &dest)
        .with_context(|| format!("failed to copy {} to {}", image.display(), dest.display()))?;

    let mut label_name = stem.to_os_string();
    label_name.push(".txt");
    let label = out.join("labels").join(split.as_str()).join(label_name);
    fs::write(&label, placeholder_label(class_index))
        .with_context(|| format!("failed to write {}", label.display()))?;
    log::debug!("copied {} to {}", image.display(), split.as_str());
    Ok(())
}

/// Whole-image box in normalised YOLO format.
pub fn placeholder_label(class_index: usize) -> String {
    format!("{} 0.5 0.5 1.0 1.0", class_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(is_image(Path::new("a.JPG")));
        assert!(is_image(Path::new("a.jpeg")));
        assert!(is_image(Path::new("a.Png")));
        assert!(!is_image(Path::new("a.gif")));
        assert!(!is_image(Path::new("jpg")));
    }

    #[test]
    fn label_is_full_image_box() {
        assert_eq!(placeholder_label(1), "1 0.5 0.5 1.0 1.0");
    }

    #[test]
    fn ratio_out_of_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = OrganizeOptions::new(dir.path());
        options.train_ratio = 1.5;
        let mut rng = StdRng::seed_from_u64(1);
        assert!(organize(&options, &mut rng).is_err());
    }
}
