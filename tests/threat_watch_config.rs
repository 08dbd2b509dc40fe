use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use threat_watch::{Facing, ImageFormat, PipelineConfig, ServiceConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "THREAT_WATCH_CONFIG",
        "THREAT_WATCH_DEVICE",
        "THREAT_WATCH_FACING",
        "THREAT_WATCH_DETECT_URL",
        "THREAT_WATCH_STAGING_MS",
        "THREAT_WATCH_MIN_INTERVAL_MS",
        "THREAT_WATCH_EVERY_NTH",
        "THREAT_WATCH_DAMAGE_THRESHOLD",
        "DETECT_SERVICE_CONFIG",
        "DETECT_SERVICE_ADDR",
        "DETECT_SERVICE_INVOKE_URL",
        "DETECT_SERVICE_MODEL",
        "DETECT_SERVICE_CORS_ORIGINS",
        "API_KEY",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_pipeline_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "capture": {
                "device": "stub://porch",
                "width": 1280,
                "height": 720,
                "frame_rate": 15,
                "facing": "user"
            },
            "sampler": {
                "min_interval_ms": 250,
                "every_nth": 5
            },
            "encoder": {
                "width": 320,
                "height": 240,
                "format": "jpeg",
                "jpeg_quality": 70
            },
            "detection": {
                "endpoint": "http://10.0.0.5:8000/detect-threat/",
                "staging_delay_ms": 2000,
                "timeout_ms": 5000
            },
            "alerts": {
                "damage_threshold": 50
            },
            "snapshot_interval_secs": 30
        }"#,
    );

    std::env::set_var("THREAT_WATCH_CONFIG", file.path());
    std::env::set_var("THREAT_WATCH_DEVICE", "stub://garage");
    std::env::set_var("THREAT_WATCH_EVERY_NTH", "2");
    std::env::set_var("THREAT_WATCH_DAMAGE_THRESHOLD", "90");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.capture.device, "stub://garage");
    assert_eq!(cfg.capture.width, 1280);
    assert_eq!(cfg.capture.height, 720);
    assert_eq!(cfg.capture.frame_rate, 15);
    assert_eq!(cfg.capture.facing, Facing::User);
    assert_eq!(cfg.sampler.min_interval, Duration::from_millis(250));
    assert_eq!(cfg.sampler.every_nth, 2);
    assert_eq!(cfg.encoder.width, 320);
    assert_eq!(cfg.encoder.format, ImageFormat::Jpeg);
    assert_eq!(cfg.encoder.jpeg_quality, 70);
    assert_eq!(cfg.detection.endpoint, "http://10.0.0.5:8000/detect-threat/");
    assert_eq!(cfg.detection.staging_delay, Duration::from_secs(2));
    assert_eq!(cfg.detection.timeout, Duration::from_secs(5));
    assert_eq!(cfg.damage_threshold, 90);
    assert_eq!(cfg.snapshot_interval, Duration::from_secs(30));

    clear_env();
}

#[test]
fn pipeline_defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load defaults");
    assert_eq!(cfg.capture.device, "stub://camera");
    assert_eq!(cfg.sampler.every_nth, 3);
    assert_eq!(cfg.sampler.min_interval, Duration::from_millis(100));
    assert_eq!(cfg.detection.staging_delay, Duration::from_secs(10));
    assert_eq!(cfg.damage_threshold, 70);

    clear_env();
}

#[test]
fn rejects_invalid_pipeline_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("THREAT_WATCH_EVERY_NTH", "0");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("THREAT_WATCH_STAGING_MS", "soon");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("THREAT_WATCH_DETECT_URL", "mqtt://broker/detect");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "capture": { "width": "wide" } }"#);
    std::env::set_var("THREAT_WATCH_CONFIG", file.path());
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("THREAT_WATCH_CONFIG", "/nonexistent/threat_watch.json");
    assert!(PipelineConfig::load().is_err());
    clear_env();
}

#[test]
fn loads_service_config_with_api_key_from_env_only() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "addr": "127.0.0.1:9100",
            "upstream": {
                "invoke_url": "http://127.0.0.1:9200/v1/chat/completions",
                "model": "local/vision",
                "timeout_secs": 15
            },
            "cache": { "ttl_secs": 60, "capacity": 10 },
            "max_base64_bytes": 100000,
            "cors_origins": ["http://dashboard.local"]
        }"#,
    );
    std::env::set_var("DETECT_SERVICE_CONFIG", file.path());
    std::env::set_var("DETECT_SERVICE_ADDR", "127.0.0.1:9101");
    std::env::set_var("API_KEY", "nvapi-test");

    let cfg = ServiceConfig::load().expect("load service config");
    assert_eq!(cfg.addr, "127.0.0.1:9101");
    assert_eq!(cfg.invoke_url, "http://127.0.0.1:9200/v1/chat/completions");
    assert_eq!(cfg.model, "local/vision");
    assert_eq!(cfg.upstream_timeout, Duration::from_secs(15));
    assert_eq!(cfg.cache_ttl, Duration::from_secs(60));
    assert_eq!(cfg.cache_capacity, 10);
    assert_eq!(cfg.max_base64_bytes, 100_000);
    assert_eq!(cfg.cors_origins, vec!["http://dashboard.local"]);
    assert_eq!(cfg.api_key.as_deref(), Some("nvapi-test"));

    std::env::set_var("DETECT_SERVICE_CORS_ORIGINS", "http://a.local, http://b.local");
    let cfg = ServiceConfig::load().expect("reload service config");
    assert_eq!(cfg.cors_origins, vec!["http://a.local", "http://b.local"]);

    std::env::set_var("DETECT_SERVICE_ADDR", "not-an-addr");
    assert!(ServiceConfig::load().is_err());

    clear_env();
}
