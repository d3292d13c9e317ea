use std::io::Write;
use std::sync::Mutex;

use tempfile::Builder;

use weapon_detector::config::ServerConfig;
use weapon_detector::ClassRule;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "WEAPON_CONFIG",
        "WEAPON_API_ADDR",
        "WEAPON_MODEL_PATH",
        "WEAPON_TARGET_SIZE",
        "WEAPON_MIN_CONFIDENCE",
        "WEAPON_MAX_REQUEST_BYTES",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_any_configuration() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServerConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:5001");
    assert_eq!(cfg.pipeline.letterbox.target_size, 640);
    assert_eq!(cfg.pipeline.filter.min_confidence, 0.4);
    assert_eq!(cfg.pipeline.filter.knife, ClassRule::KNIFE);
    assert!(cfg.pipeline.enhancement.is_some());
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "api": { "addr": "0.0.0.0:9000", "max_request_bytes": 2048 },
            "model": { "path": "models/best.onnx", "confidence": 0.25 },
            "filter": { "drill": { "min_area": 1500 } }
        }"#,
    );

    std::env::set_var("WEAPON_CONFIG", file.path());
    std::env::set_var("WEAPON_MODEL_PATH", "/opt/models/weapons.onnx");
    std::env::set_var("WEAPON_MIN_CONFIDENCE", "0.55");

    let cfg = ServerConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.max_request_bytes, 2048);
    assert_eq!(cfg.model.path.to_str(), Some("/opt/models/weapons.onnx"));
    assert_eq!(cfg.model.confidence, 0.25);
    assert_eq!(cfg.pipeline.filter.min_confidence, 0.55);
    assert_eq!(cfg.pipeline.filter.drill.min_area, 1500.0);
    assert_eq!(cfg.pipeline.filter.drill.max_aspect, 2.0);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[api]
addr = "127.0.0.1:6000"

[preprocess]
target_size = 416
fill = [0, 0, 0]
enhance = false

[filter.knife]
min_confidence = 0.6
"#,
    );

    let cfg = ServerConfig::load_from(file.path()).expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:6000");
    assert_eq!(cfg.pipeline.letterbox.target_size, 416);
    assert_eq!(cfg.pipeline.letterbox.fill, [0, 0, 0]);
    assert!(cfg.pipeline.enhancement.is_none());
    assert_eq!(cfg.pipeline.filter.knife.min_confidence, 0.6);
    assert_eq!(cfg.pipeline.filter.knife.min_area, 1000.0);
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("WEAPON_TARGET_SIZE", "0");
    assert!(ServerConfig::load().is_err());

    std::env::set_var("WEAPON_TARGET_SIZE", "big");
    assert!(ServerConfig::load().is_err());
    clear_env();

    std::env::set_var("WEAPON_MIN_CONFIDENCE", "1.2");
    let err = ServerConfig::load().unwrap_err();
    assert!(err.to_string().contains("filter.min_confidence"));

    clear_env();
}

#[test]
fn rejects_malformed_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".json", "{ not json");
    std::env::set_var("WEAPON_CONFIG", file.path());
    let err = ServerConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
