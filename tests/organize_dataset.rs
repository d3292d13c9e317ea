use std::fs;
use std::path::Path;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::tempdir;

use weapon_detector::dataset::{organize, organize_with, OrganizeOptions, Split};

fn touch_images(dir: &Path, names: &[&str]) -> Result<()> {
    fs::create_dir_all(dir)?;
    for name in names {
        fs::write(dir.join(name), name.as_bytes())?;
    }
    Ok(())
}

fn count(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[test]
fn splits_each_class_and_writes_labels() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path();
    touch_images(
        &base.join("knife"),
        &["k0.jpg", "k1.JPEG", "k2.png", "k3.jpg", "k4.jpg", "notes.txt"],
    )?;
    touch_images(&base.join("drill"), &["d0.jpeg", "d1.jpeg", "d2.jpeg"])?;

    let mut rng = StdRng::seed_from_u64(7);
    let report = organize(&OrganizeOptions::new(base), &mut rng)?;

    let knife = report.classes.iter().find(|c| c.class == "knife").unwrap();
    assert_eq!(knife.index, 1);
    assert_eq!((knife.train, knife.val), (4, 1));
    let drill = report.classes.iter().find(|c| c.class == "drill").unwrap();
    assert_eq!((drill.train, drill.val), (2, 1));
    assert_eq!(report.total(), 8);
    assert!(report.skipped.is_empty());

    assert_eq!(count(&base.join("images/train")), 6);
    assert_eq!(count(&base.join("images/val")), 2);
    assert_eq!(count(&base.join("labels/train")), 6);
    assert_eq!(count(&base.join("labels/val")), 2);

    let label_dir = if base.join("labels/train/d0.txt").exists() {
        "labels/train"
    } else {
        "labels/val"
    };
    assert_eq!(
        fs::read_to_string(base.join(label_dir).join("d0.txt"))?,
        "0 0.5 0.5 1.0 1.0"
    );
    assert!(!base.join("images/train/notes.txt").exists());

    Ok(())
}

#[test]
fn missing_and_empty_classes_are_skipped() -> Result<()> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("drill"))?;

    let mut rng = StdRng::seed_from_u64(1);
    let report = organize(&OrganizeOptions::new(dir.path()), &mut rng)?;
    assert!(report.classes.is_empty());
    assert_eq!(report.skipped, vec!["drill".to_string(), "knife".to_string()]);
    assert!(dir.path().join("images/train").is_dir());

    Ok(())
}

#[test]
fn same_seed_gives_same_split() -> Result<()> {
    let names = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg"];
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let dir = tempdir()?;
        touch_images(&dir.path().join("knife"), &names)?;
        let mut options = OrganizeOptions::new(dir.path());
        options.classes = vec!["knife".to_string()];
        options.train_ratio = 0.5;

        let mut val = Vec::new();
        let mut rng = StdRng::seed_from_u64(42);
        organize_with(&options, &mut rng, |event| {
            if event.split == Split::Val {
                val.push(event.file.file_name().unwrap().to_owned());
            }
        })?;
        assert_eq!(val.len(), 3);
        outcomes.push(val);
    }
    assert_eq!(outcomes[0], outcomes[1]);

    Ok(())
}

#[test]
fn separate_output_directory() -> Result<()> {
    let src = tempdir()?;
    let out = tempdir()?;
    touch_images(&src.path().join("knife"), &["only.png"])?;

    let mut options = OrganizeOptions::new(src.path());
    options.output_dir = Some(out.path().to_path_buf());
    let mut rng = StdRng::seed_from_u64(3);
    let report = organize(&options, &mut rng)?;

    // floor(1 * 0.8) = 0 training images
    assert_eq!(report.classes[0].train, 0);
    assert!(out.path().join("images/val/only.png").exists());
    assert!(out.path().join("labels/val/only.txt").exists());
    assert!(!src.path().join("images").exists());

    Ok(())
}
