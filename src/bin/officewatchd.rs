//! officewatchd - dual-camera presence watcher daemon.
//!
//! Wires the pipeline together:
//! 1. Two capture sources with background reconnect (stub:// or V4L2)
//! 2. The detection engine over whatever backends initialized
//! 3. Presence debounce and log batching
//! 4. MQTT publishing of alerts, detection logs, and annotated streams

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use officewatch::capture::RetryPolicy;
use officewatch::config::CaptureSettings;
use officewatch::pipeline::PipelineConfig;
use officewatch::{
    CaptureSource, DetectionEngine, FrameGrabber, InferenceBackend, MqttPublisher,
    OfficewatchConfig, PipelineScheduler, SyntheticGrabber,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Dual-camera presence watcher")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "OFFICEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override camera 0 device (e.g. /dev/video0 or stub://cam0).
    #[arg(long)]
    cam0: Option<String>,

    /// Override camera 1 device.
    #[arg(long)]
    cam1: Option<String>,

    /// Override the detection confidence threshold.
    #[arg(long)]
    threshold: Option<f32>,

    /// Override the MQTT broker address (host:port).
    #[arg(long, env = "OFFICEWATCH_MQTT_ADDR")]
    mqtt_addr: Option<String>,

    /// Disable annotated stream publishing.
    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => OfficewatchConfig::load_from(path)?,
        None => OfficewatchConfig::load()?,
    };
    apply_args(&mut cfg, &args)?;

    log::info!(
        "officewatchd {} starting: cameras [{} -> {}, {} -> {}]",
        env!("CARGO_PKG_VERSION"),
        cfg.cameras[0].id,
        cfg.cameras[0].device,
        cfg.cameras[1].id,
        cfg.cameras[1].device,
    );

    let retry = RetryPolicy {
        reopen_interval: Duration::from_secs_f64(cfg.capture.reopen_interval_secs),
    };
    let mut cameras = Vec::with_capacity(cfg.cameras.len());
    for cam in &cfg.cameras {
        let grabber = build_grabber(&cam.device, &cfg.capture)?;
        cameras.push(CaptureSource::new(
            cam.id.clone(),
            grabber,
            cfg.capture.target_fps,
            retry,
        )?);
    }

    let (accelerator, cpu) = build_backends(&cfg)?;
    let engine = DetectionEngine::new(accelerator, cpu, cfg.detection.threshold)
        .context("no usable inference backend; refusing to start blind")?;

    let publisher = MqttPublisher::new(
        cfg.mqtt.host.clone(),
        cfg.mqtt.port,
        cfg.mqtt.client_id.clone(),
    );

    let pipeline_cfg = PipelineConfig {
        tick_hz: cfg.pipeline.tick_hz,
        grace_period_secs: cfg.pipeline.grace_period_secs,
        quiet_period_secs: cfg.pipeline.quiet_period_secs,
        stream_enabled: cfg.pipeline.stream_enabled,
    };
    let mut scheduler =
        PipelineScheduler::new(cameras, engine, Box::new(publisher), pipeline_cfg);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Release);
    })
    .context("install signal handler")?;

    scheduler.run(&shutdown)
}

fn apply_args(cfg: &mut OfficewatchConfig, args: &Args) -> Result<()> {
    if let Some(device) = &args.cam0 {
        cfg.cameras[0].device = device.clone();
    }
    if let Some(device) = &args.cam1 {
        cfg.cameras[1].device = device.clone();
    }
    if let Some(threshold) = args.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("--threshold must be in [0, 1]");
        }
        cfg.detection.threshold = threshold;
    }
    if let Some(addr) = &args.mqtt_addr {
        let (host, port) = addr
            .rsplit_once(':')
            .context("--mqtt-addr must be host:port")?;
        cfg.mqtt.host = host.to_string();
        cfg.mqtt.port = port.parse().context("invalid MQTT port")?;
    }
    if args.headless {
        cfg.pipeline.stream_enabled = false;
    }
    Ok(())
}

fn build_grabber(device: &str, capture: &CaptureSettings) -> Result<Box<dyn FrameGrabber>> {
    if device.starts_with("stub://") {
        return Ok(Box::new(SyntheticGrabber::new(
            device,
            capture.width,
            capture.height,
        )));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(officewatch::capture::V4l2Grabber::new(
            device,
            capture.width,
            capture.height,
            capture.target_fps,
        )))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        anyhow::bail!(
            "device {} requires a build with the ingest-v4l2 feature",
            device
        )
    }
}

/// Initialize whatever backend handles this build can provide.
///
/// Accelerator delegates are vendor artifacts loaded by a platform
/// integration, not this crate; library users inject them through
/// `DetectionEngine::new`. The daemon provides the CPU side: a tract ONNX
/// model when built with `backend-tract` and a model path is configured,
/// otherwise the scene-change stub so a model-less build still runs.
fn build_backends(
    cfg: &OfficewatchConfig,
) -> Result<(Option<Box<dyn InferenceBackend>>, Option<Box<dyn InferenceBackend>>)> {
    #[cfg(feature = "backend-tract")]
    if let Some(model_path) = &cfg.detection.model_cpu {
        let backend = officewatch::detect::TractBackend::new(model_path)
            .with_context(|| format!("load CPU model {}", model_path.display()))?;
        return Ok((None, Some(Box::new(backend))));
    }

    if cfg.detection.model_cpu.is_some() {
        log::warn!("model_cpu configured but this build lacks backend-tract; using stub backend");
    }
    Ok((
        None,
        Some(Box::new(officewatch::detect::StubBackend::new())),
    ))
}
