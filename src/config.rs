use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::alert::DEFAULT_DAMAGE_THRESHOLD;
use crate::capture::{CaptureConfig, Facing};
use crate::detect::DEFAULT_STAGING_DELAY;
use crate::encode::{EncoderConfig, ImageFormat};
use crate::sampler::{SamplerConfig, DEFAULT_EVERY_NTH, DEFAULT_MIN_INTERVAL};

const DEFAULT_DEVICE: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FRAME_RATE: u32 = 30;
const DEFAULT_DETECT_URL: &str = "http://127.0.0.1:8000/detect-threat/";
const DEFAULT_DETECT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_SNAPSHOT_SECS: u64 = 5;

const DEFAULT_SERVICE_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_INVOKE_URL: &str =
    "https://ai.api.nvidia.com/v1/gr/meta/llama-3.2-90b-vision-instruct/chat/completions";
const DEFAULT_MODEL: &str = "meta/llama-3.2-90b-vision-instruct";
const DEFAULT_CACHE_TTL_SECS: u64 = 600;
const DEFAULT_CACHE_CAPACITY: usize = 100;
const DEFAULT_MAX_BASE64_BYTES: usize = 170_000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

// -------------------- Pipeline --------------------

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    capture: Option<CaptureConfigFile>,
    sampler: Option<SamplerConfigFile>,
    encoder: Option<EncoderConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerts: Option<AlertsConfigFile>,
    snapshot_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    frame_rate: Option<u32>,
    facing: Option<Facing>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplerConfigFile {
    min_interval_ms: Option<u64>,
    every_nth: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EncoderConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    format: Option<ImageFormat>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    endpoint: Option<String>,
    staging_delay_ms: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    damage_threshold: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionSettings {
    /// `http(s)://` service endpoint or a `stub://` transport.
    pub endpoint: String,
    pub staging_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub sampler: SamplerConfig,
    pub encoder: EncoderConfig,
    pub detection: DetectionSettings,
    pub damage_threshold: u32,
    /// How often the daemon logs a pipeline snapshot.
    pub snapshot_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Load from `THREAT_WATCH_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("THREAT_WATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let sampler = file.sampler.unwrap_or_default();
        let encoder = file.encoder.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        Self {
            capture: CaptureConfig {
                device: capture.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
                width: capture.width.unwrap_or(DEFAULT_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_HEIGHT),
                frame_rate: capture.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
                facing: capture.facing.unwrap_or_default(),
            },
            sampler: SamplerConfig {
                min_interval: sampler
                    .min_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_MIN_INTERVAL),
                every_nth: sampler.every_nth.unwrap_or(DEFAULT_EVERY_NTH),
            },
            encoder: EncoderConfig {
                width: encoder.width.unwrap_or(DEFAULT_WIDTH),
                height: encoder.height.unwrap_or(DEFAULT_HEIGHT),
                format: encoder.format.unwrap_or_default(),
                jpeg_quality: encoder.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            detection: DetectionSettings {
                endpoint: detection
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_DETECT_URL.to_string()),
                staging_delay: detection
                    .staging_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_STAGING_DELAY),
                timeout: Duration::from_millis(
                    detection.timeout_ms.unwrap_or(DEFAULT_DETECT_TIMEOUT_MS),
                ),
            },
            damage_threshold: alerts.damage_threshold.unwrap_or(DEFAULT_DAMAGE_THRESHOLD),
            snapshot_interval: Duration::from_secs(
                file.snapshot_interval_secs.unwrap_or(DEFAULT_SNAPSHOT_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_nonempty("THREAT_WATCH_DEVICE") {
            self.capture.device = device;
        }
        if let Some(facing) = env_nonempty("THREAT_WATCH_FACING") {
            self.capture.facing = facing.parse()?;
        }
        if let Some(url) = env_nonempty("THREAT_WATCH_DETECT_URL") {
            self.detection.endpoint = url;
        }
        if let Some(ms) = env_u64("THREAT_WATCH_STAGING_MS")? {
            self.detection.staging_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("THREAT_WATCH_MIN_INTERVAL_MS")? {
            self.sampler.min_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("THREAT_WATCH_EVERY_NTH")? {
            self.sampler.every_nth = n;
        }
        if let Some(threshold) = env_u64("THREAT_WATCH_DAMAGE_THRESHOLD")? {
            self.damage_threshold = u32::try_from(threshold)
                .map_err(|_| anyhow!("THREAT_WATCH_DAMAGE_THRESHOLD is out of range"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.frame_rate == 0 {
            return Err(anyhow!("capture frame_rate must be greater than zero"));
        }
        if self.encoder.width == 0 || self.encoder.height == 0 {
            return Err(anyhow!("encoder width and height must be greater than zero"));
        }
        if !(1..=100).contains(&self.encoder.jpeg_quality) {
            return Err(anyhow!("encoder jpeg_quality must be between 1 and 100"));
        }
        if self.sampler.every_nth == 0 {
            return Err(anyhow!("sampler every_nth must be at least 1"));
        }
        if self.detection.timeout.is_zero() {
            return Err(anyhow!("detection timeout must be greater than zero"));
        }
        let endpoint = Url::parse(&self.detection.endpoint)
            .map_err(|e| anyhow!("invalid detection endpoint {}: {}", self.detection.endpoint, e))?;
        if !matches!(endpoint.scheme(), "http" | "https" | "stub") {
            return Err(anyhow!(
                "detection endpoint must be http(s):// or stub://, got {}",
                self.detection.endpoint
            ));
        }
        Ok(())
    }
}

// -------------------- Detection service --------------------

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    addr: Option<String>,
    upstream: Option<UpstreamConfigFile>,
    cache: Option<CacheConfigFile>,
    max_base64_bytes: Option<usize>,
    max_upload_bytes: Option<usize>,
    cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct UpstreamConfigFile {
    invoke_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CacheConfigFile {
    ttl_secs: Option<u64>,
    capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub addr: String,
    pub invoke_url: String,
    pub model: String,
    /// Bearer key for the upstream model. Read from `API_KEY` only, never from the file.
    pub api_key: Option<String>,
    pub upstream_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub max_base64_bytes: usize,
    pub max_upload_bytes: usize,
    /// Browser origins allowed to call the service.
    pub cors_origins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

impl ServiceConfig {
    /// Load from `DETECT_SERVICE_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_SERVICE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let upstream = file.upstream.unwrap_or_default();
        let cache = file.cache.unwrap_or_default();
        Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_SERVICE_ADDR.to_string()),
            invoke_url: upstream
                .invoke_url
                .unwrap_or_else(|| DEFAULT_INVOKE_URL.to_string()),
            model: upstream.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: None,
            upstream_timeout: Duration::from_secs(
                upstream.timeout_secs.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            ),
            cache_ttl: Duration::from_secs(cache.ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            cache_capacity: cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            max_base64_bytes: file.max_base64_bytes.unwrap_or(DEFAULT_MAX_BASE64_BYTES),
            max_upload_bytes: file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            cors_origins: file.cors_origins.unwrap_or_else(|| {
                DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect()
            }),
        }
    }

    fn apply_env(&mut self) {
        if let Some(addr) = env_nonempty("DETECT_SERVICE_ADDR") {
            self.addr = addr;
        }
        if let Some(url) = env_nonempty("DETECT_SERVICE_INVOKE_URL") {
            self.invoke_url = url;
        }
        if let Some(model) = env_nonempty("DETECT_SERVICE_MODEL") {
            self.model = model;
        }
        if let Some(origins) = env_nonempty("DETECT_SERVICE_CORS_ORIGINS") {
            self.cors_origins = split_csv(&origins);
        }
        self.api_key = env_nonempty("API_KEY");
    }

    pub fn validate(&self) -> Result<()> {
        self.addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid service addr {}: {}", self.addr, e))?;
        Url::parse(&self.invoke_url)
            .map_err(|e| anyhow!("invalid upstream invoke_url {}: {}", self.invoke_url, e))?;
        if self.cache_capacity == 0 {
            return Err(anyhow!("cache capacity must be greater than zero"));
        }
        if self.max_base64_bytes == 0 {
            return Err(anyhow!("max_base64_bytes must be greater than zero"));
        }
        Ok(())
    }
}

// -------------------- helpers --------------------

fn read_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match env_nonempty(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.capture.width, 640);
        assert_eq!(cfg.capture.height, 480);
        assert_eq!(cfg.capture.frame_rate, 30);
        assert_eq!(cfg.capture.facing, Facing::Environment);
        assert_eq!(cfg.sampler.min_interval, Duration::from_millis(100));
        assert_eq!(cfg.sampler.every_nth, 3);
        assert_eq!(cfg.detection.staging_delay, Duration::from_secs(10));
        assert_eq!(cfg.detection.endpoint, DEFAULT_DETECT_URL);
        assert_eq!(cfg.damage_threshold, 70);
        cfg.validate().unwrap();

        let svc = ServiceConfig::default();
        assert_eq!(svc.addr, "127.0.0.1:8000");
        assert_eq!(svc.cache_ttl, Duration::from_secs(600));
        assert_eq!(svc.cache_capacity, 100);
        assert_eq!(svc.max_base64_bytes, 170_000);
        svc.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = PipelineConfig::default();
        cfg.sampler.every_nth = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.detection.endpoint = "ftp://example.com".to_string();
        assert!(cfg.validate().is_err());

        let mut svc = ServiceConfig::default();
        svc.addr = "localhost".to_string();
        assert!(svc.validate().is_err());
    }
}
