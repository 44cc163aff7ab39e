//! Configuration: JSON file, environment overrides, startup validation.
//!
//! Resolution order is file < environment; everything is validated once at
//! startup and rejected with `ConfigurationInvalid` before any pipeline
//! component is built. A missing config file is not an error: the default
//! configuration is written to the requested path so operators have a
//! concrete file to edit.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::PipelineSettings;
use crate::source::{CaptureSettings, SourceDescriptor, MIN_CAPTURE_DIMENSION};
use crate::zones::Zone;
use crate::PipelineError;

const DEFAULT_MODEL_PATH: &str = "stub";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// COCO class 0 is "person".
const DEFAULT_TARGET_CLASSES: &[u32] = &[0];
const DEFAULT_SOURCE: &str = "stub://front_gate";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_QUEUE_SIZE: usize = 8;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_INFERENCE_INTERVAL: u32 = 1;
const DEFAULT_HEALTH_LOG_SECS: u64 = 30;
const DEFAULT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_HISTORY_DB: &str = "zonewatch.db";
const DEFAULT_SNAPSHOT_DIR: &str = "logs/alerts";
const DEFAULT_FRAMES_DIR: &str = "logs/frames";
const DEFAULT_BENCHMARK_DIR: &str = "logs/benchmarks";
const DEFAULT_FRAME_SAVE_INTERVAL: u32 = 10;

#[derive(Debug, Serialize, Deserialize, Default)]
struct ConfigFile {
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    system: Option<SystemConfigFile>,
    zones: Option<Vec<Zone>>,
    alerts: Option<AlertConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<String>,
    confidence_threshold: Option<f32>,
    target_classes: Option<Vec<u32>>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct SystemConfigFile {
    queue_size: Option<usize>,
    target_fps: Option<u32>,
    inference_interval: Option<u32>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct AlertConfigFile {
    enabled: Option<bool>,
    cooldown_seconds: Option<u64>,
    history_db: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    webhook: Option<WebhookConfigFile>,
    telegram: Option<TelegramConfigFile>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct WebhookConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct TelegramConfigFile {
    bot_token: Option<String>,
    chat_id: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OutputConfigFile {
    save_detection_frames: Option<bool>,
    detection_frames_dir: Option<PathBuf>,
    frame_save_interval: Option<u32>,
    benchmark_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelConfig,
    pub camera: CameraConfig,
    pub system: SystemConfig,
    pub zones: Vec<Zone>,
    pub alerts: AlertConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub path: String,
    pub confidence_threshold: f32,
    pub target_classes: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub queue_size: usize,
    /// `None` disables the capture rate cap.
    pub target_fps: Option<u32>,
    pub inference_interval: u32,
    pub health_log_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    pub cooldown: Duration,
    pub history_db: PathBuf,
    pub snapshot_dir: PathBuf,
    pub webhook: Option<WebhookConfig>,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub save_detection_frames: bool,
    pub detection_frames_dir: PathBuf,
    pub frame_save_interval: u32,
    pub benchmark_dir: PathBuf,
}

impl Config {
    /// Load from `path`, writing the default configuration there first if
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            write_default_config(path)?;
            log::info!("wrote default configuration to {}", path.display());
        }
        let file = read_config_file(path)?;
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let system = file.system.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let output = file.output.unwrap_or_default();

        Self {
            model: ModelConfig {
                path: model.path.unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
                confidence_threshold: model
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                target_classes: model
                    .target_classes
                    .unwrap_or_else(|| DEFAULT_TARGET_CLASSES.to_vec()),
            },
            camera: CameraConfig {
                source: camera.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
                max_retries: camera.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                retry_backoff: Duration::from_millis(
                    camera.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
                ),
            },
            system: SystemConfig {
                queue_size: system.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
                target_fps: Some(system.target_fps.unwrap_or(DEFAULT_TARGET_FPS))
                    .filter(|fps| *fps > 0),
                inference_interval: system
                    .inference_interval
                    .unwrap_or(DEFAULT_INFERENCE_INTERVAL),
                health_log_interval: Duration::from_secs(
                    system.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
                ),
            },
            zones: file.zones.unwrap_or_else(default_zones),
            alerts: AlertConfig {
                enabled: alerts.enabled.unwrap_or(true),
                cooldown: Duration::from_secs(
                    alerts.cooldown_seconds.unwrap_or(DEFAULT_COOLDOWN_SECS),
                ),
                history_db: alerts
                    .history_db
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_DB)),
                snapshot_dir: alerts
                    .snapshot_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
                webhook: alerts.webhook.and_then(|webhook| {
                    webhook.url.map(|url| WebhookConfig {
                        url,
                        timeout: Duration::from_millis(webhook.timeout_ms.unwrap_or(5000)),
                    })
                }),
                // Partial telegram sections surface as empty fields so
                // validation rejects them instead of silently dropping them.
                telegram: alerts.telegram.map(|telegram| TelegramConfig {
                    bot_token: telegram.bot_token.unwrap_or_default(),
                    chat_id: telegram.chat_id.unwrap_or_default(),
                    timeout: Duration::from_millis(telegram.timeout_ms.unwrap_or(5000)),
                }),
            },
            output: OutputConfig {
                save_detection_frames: output.save_detection_frames.unwrap_or(false),
                detection_frames_dir: output
                    .detection_frames_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAMES_DIR)),
                frame_save_interval: output
                    .frame_save_interval
                    .unwrap_or(DEFAULT_FRAME_SAVE_INTERVAL),
                benchmark_dir: output
                    .benchmark_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BENCHMARK_DIR)),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("ZONEWATCH_SOURCE") {
            if !source.trim().is_empty() {
                self.camera.source = source;
            }
        }
        if let Ok(model) = std::env::var("ZONEWATCH_MODEL") {
            if !model.trim().is_empty() {
                self.model.path = model;
            }
        }
        if let Ok(url) = std::env::var("ZONEWATCH_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                let timeout = self
                    .alerts
                    .webhook
                    .as_ref()
                    .map(|w| w.timeout)
                    .unwrap_or(Duration::from_millis(5000));
                self.alerts.webhook = Some(WebhookConfig { url, timeout });
            }
        }
        let telegram_token = std::env::var("ZONEWATCH_TELEGRAM_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let telegram_chat = std::env::var("ZONEWATCH_TELEGRAM_CHAT")
            .ok()
            .filter(|v| !v.trim().is_empty());
        if telegram_token.is_some() || telegram_chat.is_some() {
            let mut telegram = self.alerts.telegram.clone().unwrap_or(TelegramConfig {
                bot_token: String::new(),
                chat_id: String::new(),
                timeout: Duration::from_millis(5000),
            });
            if let Some(token) = telegram_token {
                telegram.bot_token = token;
            }
            if let Some(chat) = telegram_chat {
                telegram.chat_id = chat;
            }
            self.alerts.telegram = Some(telegram);
        }
        if let Ok(cooldown) = std::env::var("ZONEWATCH_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                PipelineError::ConfigurationInvalid(
                    "ZONEWATCH_COOLDOWN_SECS must be an integer number of seconds".to_string(),
                )
            })?;
            self.alerts.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(fps) = std::env::var("ZONEWATCH_TARGET_FPS") {
            let fps: u32 = fps.parse().map_err(|_| {
                PipelineError::ConfigurationInvalid(
                    "ZONEWATCH_TARGET_FPS must be an integer".to_string(),
                )
            })?;
            self.system.target_fps = Some(fps).filter(|fps| *fps > 0);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model.confidence_threshold) {
            return Err(PipelineError::ConfigurationInvalid(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.model.confidence_threshold
            ))
            .into());
        }
        if self.camera.width < MIN_CAPTURE_DIMENSION || self.camera.height < MIN_CAPTURE_DIMENSION
        {
            return Err(PipelineError::ConfigurationInvalid(format!(
                "capture resolution {}x{} is too small",
                self.camera.width, self.camera.height
            ))
            .into());
        }
        if self.system.queue_size == 0 {
            return Err(PipelineError::ConfigurationInvalid(
                "queue_size must be at least 1".to_string(),
            )
            .into());
        }
        if self.system.inference_interval == 0 {
            return Err(PipelineError::ConfigurationInvalid(
                "inference_interval must be at least 1".to_string(),
            )
            .into());
        }
        if self.alerts.enabled && self.alerts.cooldown.as_secs() == 0 {
            return Err(PipelineError::ConfigurationInvalid(
                "alert cooldown must be at least one second".to_string(),
            )
            .into());
        }
        if let Some(webhook) = &self.alerts.webhook {
            if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
                return Err(PipelineError::ConfigurationInvalid(format!(
                    "webhook url must be http(s), got {}",
                    webhook.url
                ))
                .into());
            }
        }
        if let Some(telegram) = &self.alerts.telegram {
            if telegram.bot_token.trim().is_empty() || telegram.chat_id.trim().is_empty() {
                return Err(PipelineError::ConfigurationInvalid(
                    "telegram channel requires both bot_token and chat_id".to_string(),
                )
                .into());
            }
        }
        if self.output.frame_save_interval == 0 {
            return Err(PipelineError::ConfigurationInvalid(
                "frame_save_interval must be at least 1".to_string(),
            )
            .into());
        }

        let mut seen = std::collections::BTreeSet::new();
        for zone in &self.zones {
            zone.validate()?;
            if !seen.insert(zone.id.as_str()) {
                return Err(PipelineError::ConfigurationInvalid(format!(
                    "duplicate zone id {}",
                    zone.id
                ))
                .into());
            }
        }
        Ok(())
    }

    pub fn source_descriptor(&self) -> SourceDescriptor {
        SourceDescriptor::parse(&self.camera.source)
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            width: self.camera.width,
            height: self.camera.height,
            max_retries: self.camera.max_retries,
            retry_backoff: self.camera.retry_backoff,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            capture: self.capture_settings(),
            queue_capacity: self.system.queue_size,
            target_fps: self.system.target_fps,
            inference_interval: self.system.inference_interval,
            save_detection_frames: self.output.save_detection_frames,
            detection_frames_dir: self.output.detection_frames_dir.clone(),
            frame_save_interval: self.output.frame_save_interval,
            health_log_interval: self.system.health_log_interval,
        }
    }
}

/// Two-zone starter layout in 640x480 coordinates: the lower half of the
/// view and a driveway strip on the right.
fn default_zones() -> Vec<Zone> {
    vec![
        Zone {
            id: "front_yard".to_string(),
            name: "Front yard".to_string(),
            polygon: vec![(0.0, 240.0), (640.0, 240.0), (640.0, 480.0), (0.0, 480.0)],
            alert_enabled: true,
            color: [255, 0, 0],
        },
        Zone {
            id: "driveway".to_string(),
            name: "Driveway".to_string(),
            polygon: vec![(480.0, 0.0), (640.0, 0.0), (640.0, 240.0), (480.0, 240.0)],
            alert_enabled: false,
            color: [0, 128, 255],
        },
    ]
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::ConfigurationInvalid(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    let cfg = serde_json::from_str(&raw).map_err(|e| {
        PipelineError::ConfigurationInvalid(format!(
            "invalid config file {}: {e}",
            path.display()
        ))
    })?;
    Ok(cfg)
}

fn write_default_config(path: &Path) -> Result<()> {
    let file = ConfigFile {
        model: Some(ModelConfigFile {
            path: Some(DEFAULT_MODEL_PATH.to_string()),
            confidence_threshold: Some(DEFAULT_CONFIDENCE_THRESHOLD),
            target_classes: Some(DEFAULT_TARGET_CLASSES.to_vec()),
        }),
        camera: Some(CameraConfigFile {
            source: Some(DEFAULT_SOURCE.to_string()),
            width: Some(DEFAULT_WIDTH),
            height: Some(DEFAULT_HEIGHT),
            max_retries: Some(DEFAULT_MAX_RETRIES),
            retry_backoff_ms: Some(DEFAULT_RETRY_BACKOFF_MS),
        }),
        system: Some(SystemConfigFile {
            queue_size: Some(DEFAULT_QUEUE_SIZE),
            target_fps: Some(DEFAULT_TARGET_FPS),
            inference_interval: Some(DEFAULT_INFERENCE_INTERVAL),
            health_log_secs: Some(DEFAULT_HEALTH_LOG_SECS),
        }),
        zones: Some(default_zones()),
        alerts: Some(AlertConfigFile {
            enabled: Some(true),
            cooldown_seconds: Some(DEFAULT_COOLDOWN_SECS),
            history_db: Some(PathBuf::from(DEFAULT_HISTORY_DB)),
            snapshot_dir: Some(PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            webhook: None,
            telegram: None,
        }),
        output: Some(OutputConfigFile {
            save_detection_frames: Some(false),
            detection_frames_dir: Some(PathBuf::from(DEFAULT_FRAMES_DIR)),
            frame_save_interval: Some(DEFAULT_FRAME_SAVE_INTERVAL),
            benchmark_dir: Some(PathBuf::from(DEFAULT_BENCHMARK_DIR)),
        }),
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::ConfigurationInvalid(format!(
                    "failed to create config dir {}: {e}",
                    parent.display()
                ))
            })?;
        }
    }
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json).map_err(|e| {
        PipelineError::ConfigurationInvalid(format!(
            "failed to write default config {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}
