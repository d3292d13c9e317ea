//! Weapon Detector
//!
//! This crate detects handheld weapons (drills and knives) in still images
//! and serves the detector over a small HTTP endpoint.
//!
//! # Architecture
//!
//! Every image goes through the same pipeline:
//!
//! 1. **Letterbox**: fit the image onto a fixed square canvas without
//!    distortion, padding the remainder with grey.
//! 2. **Enhance**: a mild contrast lift and 3x3 blur on the canvas.
//! 3. **Infer**: a [`detect::DetectorBackend`] returns class-tagged boxes in
//!    canvas coordinates.
//! 4. **Filter**: boxes are mapped back onto the source image and gated by a
//!    global confidence floor plus per-class confidence, area and aspect
//!    rules.
//!
//! # Module Structure
//!
//! - `preprocess`: letterbox and enhancement
//! - `detect`: result types and inference backends (stub, tract ONNX)
//! - `postprocess`: remapping and the acceptance policy
//! - `detector`: the pipeline tying the stages together
//! - `api`: HTTP server and image payload helpers
//! - `config`: file + environment configuration
//! - `dataset`: train/val dataset layout for model training
//! - `ui`: terminal progress for the command-line tools

pub mod api;
pub mod config;
pub mod dataset;
pub mod detect;
pub mod detector;
pub mod postprocess;
pub mod preprocess;
pub mod ui;

pub use config::{ModelSettings, PipelineSettings, ServerConfig};
pub use detect::{BoundingBox, Detection, DetectionResult, DetectorBackend, WeaponClass};
pub use detector::WeaponDetector;
pub use postprocess::{ClassRule, FilterPolicy};
pub use preprocess::{Enhancement, Letterbox, LetterboxTransform};
