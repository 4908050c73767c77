use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use rover_vision::config::RoverConfig;
use rover_vision::{DetectorKind, EncodedFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ROVER_CONFIG",
        "ROVER_API_ADDR",
        "ROVER_API_TOKEN_PATH",
        "ROVER_CAMERA_DEVICE",
        "ROVER_SNAPSHOT_DIR",
        "ROVER_DETECTOR",
        "ROVER_RESIZE_PERCENT",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let token_path = file.path().with_extension("token");
    let json = format!(
        r#"{{
            "camera": {{
                "device": "stub://front",
                "width": 320,
                "height": 240,
                "target_fps": 12
            }},
            "pipeline": {{
                "resize_percent": 50,
                "format": "jpeg",
                "jpeg_quality": 70
            }},
            "detector": {{
                "kind": "fixed",
                "confidence_threshold": 0.6,
                "fixed": [
                    {{ "bbox": {{ "x": 1, "y": 2, "w": 3, "h": 4 }}, "label": "cone", "confidence": 0.8 }}
                ]
            }},
            "api": {{
                "addr": "0.0.0.0:9000",
                "token_path": "{}"
            }},
            "snapshots": {{ "dir": "/var/lib/rover/snaps" }},
            "stream": {{ "queue_depth": 3 }}
        }}"#,
        token_path.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("ROVER_CONFIG", file.path());
    std::env::set_var("ROVER_CAMERA_DEVICE", "stub://rear");
    std::env::set_var("ROVER_RESIZE_PERCENT", "80");

    let cfg = RoverConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "stub://rear");
    assert_eq!(cfg.camera.width, 320);
    assert_eq!(cfg.camera.height, 240);
    assert_eq!(cfg.camera.target_fps, 12);
    assert_eq!(cfg.pipeline.resize_percent, 80);
    assert_eq!(cfg.pipeline.format, EncodedFormat::Jpeg);
    assert_eq!(cfg.pipeline.jpeg_quality, 70);
    assert_eq!(cfg.detector.kind, DetectorKind::Fixed);
    assert_eq!(cfg.detector.confidence_threshold, 0.6);
    assert_eq!(cfg.detector.overlap_threshold, 0.3);
    assert_eq!(cfg.detector.fixed.len(), 1);
    assert_eq!(cfg.detector.fixed[0].label, "cone");
    assert_eq!(cfg.api.addr, "0.0.0.0:9000");
    assert_eq!(cfg.api.token_path.unwrap(), token_path);
    assert_eq!(cfg.snapshot_dir, PathBuf::from("/var/lib/rover/snaps"));
    assert_eq!(cfg.stream_queue_depth, 3);

    clear_env();
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RoverConfig::load().expect("load defaults");
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.api.addr, "127.0.0.1:5500");
    assert_eq!(cfg.pipeline.resize_percent, 80);
    assert_eq!(cfg.pipeline.format, EncodedFormat::Png);
    assert_eq!(cfg.detector.kind, DetectorKind::Disabled);
    assert!(!cfg.detector.enabled_at_start);

    clear_env();
}

#[test]
fn invalid_env_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ROVER_RESIZE_PERCENT", "0");
    assert!(RoverConfig::load().is_err());
    std::env::set_var("ROVER_RESIZE_PERCENT", "eighty");
    assert!(RoverConfig::load().is_err());
    clear_env();

    std::env::set_var("ROVER_DETECTOR", "sift");
    assert!(RoverConfig::load().is_err());

    clear_env();
}

#[test]
fn malformed_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("ROVER_CONFIG", file.path());
    assert!(RoverConfig::load().is_err());

    clear_env();
}
