use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::postprocess::{ClassRule, FilterPolicy};
use crate::preprocess::{Enhancement, Letterbox, DEFAULT_FILL, DEFAULT_TARGET_SIZE};

const DEFAULT_API_ADDR: &str = "127.0.0.1:5001";
const DEFAULT_MODEL_PATH: &str = "model/weapon-detector.onnx";
const DEFAULT_MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MODEL_CONFIDENCE: f32 = 0.4;
const DEFAULT_MODEL_IOU: f32 = 0.7;
const DEFAULT_MAX_DETECTIONS: usize = 300;

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    api: Option<ApiConfigFile>,
    model: Option<ModelConfigFile>,
    preprocess: Option<PreprocessConfigFile>,
    filter: Option<FilterConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_request_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    confidence: Option<f32>,
    iou: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PreprocessConfigFile {
    target_size: Option<u32>,
    fill: Option<[u8; 3]>,
    enhance: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    min_confidence: Option<f32>,
    drill: Option<ClassRuleFile>,
    knife: Option<ClassRuleFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassRuleFile {
    min_confidence: Option<f32>,
    min_area: Option<f32>,
    min_aspect: Option<f32>,
    max_aspect: Option<f32>,
}

impl ClassRuleFile {
    fn merge_into(self, base: ClassRule) -> ClassRule {
        ClassRule {
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
            min_area: self.min_area.unwrap_or(base.min_area),
            min_aspect: self.min_aspect.unwrap_or(base.min_aspect),
            max_aspect: self.max_aspect.unwrap_or(base.max_aspect),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_addr: String,
    pub max_request_bytes: usize,
    pub model: ModelSettings,
    pub pipeline: PipelineSettings,
}

/// Settings handed to the model backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub confidence: f32,
    pub iou: f32,
    pub max_detections: usize,
}

/// Everything the pipeline does around the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub letterbox: Letterbox,
    pub enhancement: Option<Enhancement>,
    pub filter: FilterPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            letterbox: Letterbox::default(),
            enhancement: Some(Enhancement::default()),
            filter: FilterPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WEAPON_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, ignoring `WEAPON_CONFIG` but still applying
    /// environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServerConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let preprocess = file.preprocess.unwrap_or_default();
        let filter = file.filter.unwrap_or_default();

        let defaults = FilterPolicy::default();
        let policy = FilterPolicy {
            min_confidence: filter.min_confidence.unwrap_or(defaults.min_confidence),
            drill: filter
                .drill
                .unwrap_or_default()
                .merge_into(defaults.drill),
            knife: filter
                .knife
                .unwrap_or_default()
                .merge_into(defaults.knife),
        };

        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_request_bytes: api.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES),
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                confidence: model.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE),
                iou: model.iou.unwrap_or(DEFAULT_MODEL_IOU),
                max_detections: model.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
            },
            pipeline: PipelineSettings {
                letterbox: Letterbox {
                    target_size: preprocess.target_size.unwrap_or(DEFAULT_TARGET_SIZE),
                    fill: preprocess.fill.unwrap_or(DEFAULT_FILL),
                },
                enhancement: if preprocess.enhance.unwrap_or(true) {
                    Some(Enhancement::default())
                } else {
                    None
                },
                filter: policy,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("WEAPON_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("WEAPON_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        if let Ok(size) = std::env::var("WEAPON_TARGET_SIZE") {
            self.pipeline.letterbox.target_size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("WEAPON_TARGET_SIZE must be a positive integer"))?;
        }
        if let Ok(floor) = std::env::var("WEAPON_MIN_CONFIDENCE") {
            self.pipeline.filter.min_confidence = floor
                .trim()
                .parse()
                .map_err(|_| anyhow!("WEAPON_MIN_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(limit) = std::env::var("WEAPON_MAX_REQUEST_BYTES") {
            self.max_request_bytes = limit
                .trim()
                .parse()
                .map_err(|_| anyhow!("WEAPON_MAX_REQUEST_BYTES must be an integer byte count"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.letterbox.target_size == 0 {
            return Err(anyhow!("preprocess.target_size must be greater than zero"));
        }
        if self.max_request_bytes == 0 {
            return Err(anyhow!("api.max_request_bytes must be greater than zero"));
        }
        check_unit("model.confidence", self.model.confidence)?;
        check_unit("model.iou", self.model.iou)?;
        if self.model.max_detections == 0 {
            return Err(anyhow!("model.max_detections must be greater than zero"));
        }

        let filter = &self.pipeline.filter;
        check_unit("filter.min_confidence", filter.min_confidence)?;
        for (name, rule) in [("drill", &filter.drill), ("knife", &filter.knife)] {
            check_unit(&format!("filter.{name}.min_confidence"), rule.min_confidence)?;
            if !(rule.min_area >= 0.0) {
                return Err(anyhow!("filter.{name}.min_area must be non-negative"));
            }
            if !(rule.min_aspect > 0.0) || !(rule.min_aspect <= rule.max_aspect) {
                return Err(anyhow!(
                    "filter.{name} aspect range [{}, {}] must be positive and ordered",
                    rule.min_aspect,
                    rule.max_aspect
                ));
            }
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(anyhow!("{} must be within [0, 1], got {}", name, value))
    }
}

fn read_config_file(path: &Path) -> Result<ServerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
