use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use yolo_stream::config::CameraDriverKind;
use yolo_stream::{
    controller_from_config, AppConfig, BackendKind, ModelVariant, SourceKind, SourceSpec,
    StreamError, StreamState, TickOutcome,
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "YOLO_STREAM_CONFIG",
        "YOLO_STREAM_VARIANT",
        "YOLO_STREAM_CONFIDENCE",
        "YOLO_STREAM_IOU",
        "YOLO_STREAM_WEIGHTS_DIR",
        "YOLO_STREAM_SOURCE",
        "YOLO_STREAM_STRIDE",
        "YOLO_STREAM_INTERVAL_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn error_code(err: &anyhow::Error) -> Option<&'static str> {
    StreamError::classify(err).map(StreamError::code)
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AppConfig::load().expect("load defaults");
    assert_eq!(cfg.model.variant, ModelVariant::Nano);
    assert_eq!(cfg.model.confidence, 0.5);
    assert_eq!(cfg.backend, BackendKind::Contrast);
    assert_eq!(cfg.source.kind, SourceKind::Video);
    assert!(cfg.source.path.starts_with("stub://"));
    assert_eq!(cfg.sampling.stride, 1);
    assert_eq!(cfg.sampling.min_interval, Duration::from_millis(2_000));
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "model": { "variant": "large", "confidence": 0.4, "iou": 0.6, "weights_dir": "/opt/yolo" },
        "source": { "kind": "camera", "camera_driver": "synthetic", "width": 320, "height": 240 },
        "sampling": { "stride": 3, "min_interval_ms": 750 },
        "render": { "thickness": 4 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("YOLO_STREAM_CONFIG", file.path());
    std::env::set_var("YOLO_STREAM_VARIANT", "s");
    std::env::set_var("YOLO_STREAM_STRIDE", "6");

    let cfg = AppConfig::load().expect("load config");
    assert_eq!(cfg.model.variant, ModelVariant::Small);
    assert_eq!(cfg.model.confidence, 0.4);
    assert_eq!(cfg.model.iou, 0.6);
    assert_eq!(cfg.weights_dir.to_str(), Some("/opt/yolo"));
    assert_eq!(cfg.source.kind, SourceKind::Camera);
    assert_eq!(cfg.source.camera_driver, CameraDriverKind::Synthetic);
    assert_eq!(cfg.source.camera.width, 320);
    assert_eq!(cfg.source.camera.height, 240);
    assert_eq!(cfg.sampling.stride, 6);
    assert_eq!(cfg.sampling.min_interval, Duration::from_millis(750));
    assert_eq!(cfg.render.thickness, 4);
    assert!(matches!(cfg.source_spec(), SourceSpec::Camera(_)));

    clear_env();
}

#[test]
fn loads_toml_file_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[model]
variant = "extra_large"
confidence = 0.35

[source]
kind = "single_capture"
path = "captures/latest.jpg"
repeat = true

[sampling]
min_interval_ms = 5000
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = AppConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.model.variant, ModelVariant::ExtraLarge);
    assert_eq!(cfg.model.confidence, 0.35);
    match cfg.source_spec() {
        SourceSpec::Snapshot(capture) => {
            assert_eq!(capture.location, "captures/latest.jpg");
            assert!(capture.repeat);
        }
        other => panic!("unexpected source: {:?}", other),
    }
    assert_eq!(cfg.stream_config().min_interval, Duration::from_millis(5_000));
}

#[test]
fn rejects_out_of_range_and_unknown_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("YOLO_STREAM_CONFIDENCE", "1.5");
    let err = AppConfig::load().unwrap_err();
    assert_eq!(error_code(&err), Some("INVALID_CONFIG"));
    clear_env();

    std::env::set_var("YOLO_STREAM_STRIDE", "0");
    let err = AppConfig::load().unwrap_err();
    assert_eq!(error_code(&err), Some("INVALID_CONFIG"));
    clear_env();

    std::env::set_var("YOLO_STREAM_IOU", "wide");
    let err = AppConfig::load().unwrap_err();
    assert_eq!(error_code(&err), Some("INVALID_CONFIG"));
    clear_env();

    std::env::set_var("YOLO_STREAM_VARIANT", "gigantic");
    assert!(AppConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "model": { "variant": "nano", "precision": "fp16" } }"#)
        .expect("write config");
    let err = AppConfig::load_from(Some(file.path())).unwrap_err();
    assert_eq!(error_code(&err), Some("INVALID_CONFIG"));
}

#[test]
fn configured_controller_runs_synthetic_video() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("YOLO_STREAM_SOURCE", "stub://clip?frames=6&width=48&height=32");
    std::env::set_var("YOLO_STREAM_STRIDE", "2");
    let cfg = AppConfig::load().expect("load config");
    clear_env();

    let mut controller = controller_from_config(&cfg).expect("controller");
    controller.start(&cfg.stream_config()).expect("start");
    assert_eq!(controller.state(), StreamState::Active);

    let report = controller
        .run(None, |outcome| {
            if let TickOutcome::Processed(rendered) = outcome {
                assert_eq!(rendered.sequence % 2, 0);
            }
            Ok(())
        })
        .expect("run");
    assert_eq!(report.processed, 3);
    assert_eq!(report.skipped, 3);
    assert_eq!(controller.state(), StreamState::Idle);
}
