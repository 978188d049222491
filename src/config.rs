use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CAM0_DEVICE: &str = "stub://cam0";
const DEFAULT_CAM1_DEVICE: &str = "stub://cam1";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_FPS: u32 = 20;
const DEFAULT_REOPEN_INTERVAL_SECS: f64 = 2.0;
const DEFAULT_THRESHOLD: f32 = 0.5;
const DEFAULT_TICK_HZ: f64 = 20.0;
const DEFAULT_MQTT_HOST: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_CLIENT_ID: &str = "officewatchd";

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    cameras: Option<Vec<CameraConfigFile>>,
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: String,
    device: String,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    reopen_interval_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_accelerator: Option<PathBuf>,
    model_cpu: Option<PathBuf>,
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    tick_hz: Option<f64>,
    grace_period_secs: Option<f64>,
    quiet_period_secs: Option<f64>,
    stream_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    addr: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OfficewatchConfig {
    pub cameras: Vec<CameraSettings>,
    pub capture: CaptureSettings,
    pub detection: DetectionSettings,
    pub pipeline: PipelineSettings,
    pub mqtt: MqttSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub id: String,
    pub device: String,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub reopen_interval_secs: f64,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub model_accelerator: Option<PathBuf>,
    pub model_cpu: Option<PathBuf>,
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub tick_hz: f64,
    pub grace_period_secs: f64,
    pub quiet_period_secs: f64,
    pub stream_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl OfficewatchConfig {
    /// Load configuration: TOML file named by `OFFICEWATCH_CONFIG` (when
    /// set), then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OFFICEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit path (CLI override), then env and validation.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let cameras = file
            .cameras
            .map(|cams| {
                cams.into_iter()
                    .map(|c| CameraSettings {
                        id: c.id,
                        device: c.device,
                    })
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    CameraSettings {
                        id: "0".to_string(),
                        device: DEFAULT_CAM0_DEVICE.to_string(),
                    },
                    CameraSettings {
                        id: "1".to_string(),
                        device: DEFAULT_CAM1_DEVICE.to_string(),
                    },
                ]
            });
        let capture = CaptureSettings {
            width: file
                .capture
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .capture
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_HEIGHT),
            target_fps: file
                .capture
                .as_ref()
                .and_then(|c| c.target_fps)
                .unwrap_or(DEFAULT_CAPTURE_FPS),
            reopen_interval_secs: file
                .capture
                .as_ref()
                .and_then(|c| c.reopen_interval_secs)
                .unwrap_or(DEFAULT_REOPEN_INTERVAL_SECS),
        };
        let detection = DetectionSettings {
            model_accelerator: file.detection.as_ref().and_then(|d| d.model_accelerator.clone()),
            model_cpu: file.detection.as_ref().and_then(|d| d.model_cpu.clone()),
            threshold: file
                .detection
                .as_ref()
                .and_then(|d| d.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
        };
        let pipeline = PipelineSettings {
            tick_hz: file
                .pipeline
                .as_ref()
                .and_then(|p| p.tick_hz)
                .unwrap_or(DEFAULT_TICK_HZ),
            grace_period_secs: file
                .pipeline
                .as_ref()
                .and_then(|p| p.grace_period_secs)
                .unwrap_or(crate::presence::DEFAULT_GRACE_PERIOD_SECS),
            quiet_period_secs: file
                .pipeline
                .as_ref()
                .and_then(|p| p.quiet_period_secs)
                .unwrap_or(crate::logbuf::DEFAULT_QUIET_PERIOD_SECS),
            stream_enabled: file
                .pipeline
                .as_ref()
                .and_then(|p| p.stream_enabled)
                .unwrap_or(true),
        };
        let (host, port) = match file.mqtt.as_ref().and_then(|m| m.addr.as_deref()) {
            Some(addr) => split_host_port(addr)?,
            None => (DEFAULT_MQTT_HOST.to_string(), DEFAULT_MQTT_PORT),
        };
        let mqtt = MqttSettings {
            host,
            port,
            client_id: file
                .mqtt
                .and_then(|m| m.client_id)
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
        };
        Ok(Self {
            cameras,
            capture,
            detection,
            pipeline,
            mqtt,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("OFFICEWATCH_MQTT_ADDR") {
            if !addr.trim().is_empty() {
                let (host, port) = split_host_port(&addr)?;
                self.mqtt.host = host;
                self.mqtt.port = port;
            }
        }
        if let Ok(device) = std::env::var("OFFICEWATCH_CAM0") {
            if !device.trim().is_empty() {
                if let Some(cam) = self.cameras.first_mut() {
                    cam.device = device;
                }
            }
        }
        if let Ok(device) = std::env::var("OFFICEWATCH_CAM1") {
            if !device.trim().is_empty() {
                if let Some(cam) = self.cameras.get_mut(1) {
                    cam.device = device;
                }
            }
        }
        if let Ok(threshold) = std::env::var("OFFICEWATCH_THRESHOLD") {
            let value: f32 = threshold
                .parse()
                .map_err(|_| anyhow!("OFFICEWATCH_THRESHOLD must be a float"))?;
            self.detection.threshold = value;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.cameras.len() != 2 {
            return Err(anyhow!(
                "exactly two cameras must be configured, found {}",
                self.cameras.len()
            ));
        }
        for cam in &mut self.cameras {
            crate::validate_camera_id(&cam.id)?;
            cam.id = cam.id.to_lowercase();
        }
        if self.cameras[0].id == self.cameras[1].id {
            return Err(anyhow!("camera ids must be distinct"));
        }
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(anyhow!("detection threshold must be in [0, 1]"));
        }
        if self.capture.target_fps == 0 {
            return Err(anyhow!("capture target_fps must be greater than zero"));
        }
        if self.capture.reopen_interval_secs <= 0.0 {
            return Err(anyhow!("reopen interval must be greater than zero"));
        }
        if self.pipeline.tick_hz <= 0.0 {
            return Err(anyhow!("tick rate must be greater than zero"));
        }
        if self.pipeline.grace_period_secs <= 0.0 || self.pipeline.quiet_period_secs <= 0.0 {
            return Err(anyhow!("grace and quiet periods must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg: ConfigFile = toml::from_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(cfg)
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing port in MQTT address {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    if host.is_empty() {
        return Err(anyhow!("missing host in MQTT address {}", addr));
    }
    Ok((host.to_string(), port))
}
