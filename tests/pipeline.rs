//! End-to-end scheduler scenarios with scripted backends, synthetic
//! cameras, and a recording publisher. Ticks are driven with a synthetic
//! clock, so no test sleeps through a real grace or quiet period.

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use officewatch::capture::RetryPolicy;
use officewatch::detect::{RawDetection, PERSON_CLASS_ID};
use officewatch::pipeline::{AlertEvent, PipelineConfig};
use officewatch::publish::{TOPIC_ALERT, TOPIC_DETECTION_LOG};
use officewatch::{
    AlertPublisher, BoundingBox, CaptureSource, ConnectionStatus, DetectionEngine, Frame,
    FrameGrabber, InferenceBackend, LogBatch, Payload, PipelineScheduler, QosLevel,
    SyntheticGrabber,
};

const TICK: f64 = 0.05; // 20 Hz

/// Backend that replays a scripted list of per-invoke outputs, then
/// reports nothing.
struct ScriptedBackend {
    script: VecDeque<Vec<RawDetection>>,
    current: Vec<RawDetection>,
}

impl ScriptedBackend {
    fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script: script.into(),
            current: Vec::new(),
        }
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn set_input(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        self.current = self.script.pop_front().unwrap_or_default();
        Ok(())
    }

    fn get_outputs(&mut self) -> Result<Vec<RawDetection>> {
        Ok(self.current.clone())
    }
}

#[derive(Clone)]
struct RecordingPublisher {
    messages: Arc<Mutex<Vec<(String, Payload, QosLevel)>>>,
}

impl RecordingPublisher {
    fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn alerts(&self) -> Vec<AlertEvent> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(topic, _, _)| topic == TOPIC_ALERT)
            .map(|(_, payload, _)| match payload {
                Payload::Structured(json) => serde_json::from_str(json).expect("alert json"),
                Payload::Binary(_) => panic!("alert published as binary"),
            })
            .collect()
    }

    fn log_batches(&self) -> Vec<LogBatch> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(topic, _, _)| topic == TOPIC_DETECTION_LOG)
            .map(|(_, payload, _)| match payload {
                Payload::Structured(json) => serde_json::from_str(json).expect("batch json"),
                Payload::Binary(_) => panic!("log batch published as binary"),
            })
            .collect()
    }

    fn stream_frames(&self, camera_id: &str) -> Vec<Vec<u8>> {
        let topic = officewatch::publish::stream_topic(camera_id);
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == &topic)
            .map(|(_, payload, qos)| {
                assert_eq!(*qos, QosLevel::AtMostOnce, "streams are best-effort");
                match payload {
                    Payload::Binary(bytes) => bytes.clone(),
                    Payload::Structured(_) => panic!("stream published as text"),
                }
            })
            .collect()
    }
}

impl AlertPublisher for RecordingPublisher {
    fn connect(&mut self) -> bool {
        true
    }

    fn publish(&mut self, topic: &str, payload: Payload, qos: QosLevel) -> bool {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, qos));
        true
    }

    fn disconnect(&mut self) {}
}

/// Grabber whose open always fails, simulating a camera that never comes
/// back.
struct DeadGrabber;

impl FrameGrabber for DeadGrabber {
    fn describe(&self) -> String {
        "dead://camera".to_string()
    }

    fn open(&mut self) -> Result<()> {
        anyhow::bail!("no such device")
    }

    fn grab(&mut self) -> Result<Frame> {
        anyhow::bail!("not open")
    }

    fn close(&mut self) {}
}

fn person_at(score: f32) -> RawDetection {
    RawDetection {
        class_id: PERSON_CLASS_ID,
        score,
        bbox: BoundingBox::new(10, 10, 50, 50),
    }
}

fn started_camera(id: &str) -> CaptureSource {
    let grabber = SyntheticGrabber::new(format!("stub://{id}"), 640, 480);
    let mut source = CaptureSource::new(
        id,
        Box::new(grabber),
        100,
        RetryPolicy {
            reopen_interval: Duration::from_millis(20),
        },
    )
    .expect("camera");
    source.start();
    source
}

fn wait_for_frames(source: &CaptureSource) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if source.read().is_some() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("camera produced no frames");
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        tick_hz: 20.0,
        grace_period_secs: 2.5,
        quiet_period_secs: 5.0,
        stream_enabled: true,
    }
}

#[test]
fn presence_episode_produces_one_alert_pair_and_one_log_batch() {
    // Detections on ticks 1-10, nothing afterwards.
    let mut script = vec![vec![person_at(0.9)]; 10];
    script.extend(std::iter::repeat_with(Vec::new).take(200));
    let engine = DetectionEngine::new(
        None,
        Some(Box::new(ScriptedBackend::new(script))),
        0.5,
    )
    .unwrap();

    let camera = started_camera("0");
    wait_for_frames(&camera);

    let publisher = RecordingPublisher::new();
    let mut scheduler = PipelineScheduler::new(
        vec![camera],
        engine,
        Box::new(publisher.clone()),
        test_config(),
    );

    // 150 ticks = 7.5s of synthetic time: covers the grace period (gone
    // past tick 60) and the quiet period (flush past tick 110).
    for n in 1..=150u32 {
        scheduler.tick(n as f64 * TICK);
    }

    let alerts = publisher.alerts();
    assert_eq!(alerts.len(), 2, "exactly one enter and one exit");

    let detected = &alerts[0];
    assert_eq!(detected.event, "PERSON_DETECTED");
    assert_eq!(detected.camera_id, "0");
    assert!((detected.timestamp - TICK).abs() < 1e-9, "fires on tick 1");
    assert_eq!(detected.confidence, Some(0.9));
    // Model-space (10,10,50,50) rescaled to 640x480 from 300x300.
    assert_eq!(detected.bbox, Some(BoundingBox::new(21, 16, 106, 80)));

    let gone = &alerts[1];
    assert_eq!(gone.event, "PERSON_GONE");
    // Last seen at tick 10 (t=0.5); gone strictly after 2.5s more.
    assert!(gone.timestamp > 3.0);
    assert!(gone.timestamp <= 3.0 + 2.0 * TICK, "gone within a tick of the grace deadline");
    assert_eq!(gone.confidence, None);

    let batches = publisher.log_batches();
    assert_eq!(batches.len(), 1, "one batch per presence episode");
    assert_eq!(batches[0].record_count(), 10);
    assert_eq!(batches[0].records_by_camera["0"].len(), 10);
    // Flush requires quiet: last detection at t=0.5, flush past t=5.5.
    assert!(batches[0].period_end > 5.5);

    // Streams flow every processed tick, as JPEG.
    let frames = publisher.stream_frames("0");
    assert_eq!(frames.len(), 150);
    assert_eq!(&frames[0][..2], &[0xff, 0xd8]);
}

#[test]
fn disconnected_camera_never_stalls_the_other() {
    let script = vec![vec![person_at(0.8)]; 5];
    let engine = DetectionEngine::new(
        None,
        Some(Box::new(ScriptedBackend::new(script))),
        0.5,
    )
    .unwrap();

    let cam0 = started_camera("0");
    wait_for_frames(&cam0);

    let mut cam1 = CaptureSource::new(
        "1",
        Box::new(DeadGrabber),
        100,
        RetryPolicy {
            reopen_interval: Duration::from_millis(20),
        },
    )
    .unwrap();
    cam1.start();
    // Give the dead camera a chance to fail its first open.
    std::thread::sleep(Duration::from_millis(50));

    let publisher = RecordingPublisher::new();
    let mut scheduler = PipelineScheduler::new(
        vec![cam0, cam1],
        engine,
        Box::new(publisher.clone()),
        test_config(),
    );

    for n in 1..=10u32 {
        scheduler.tick(n as f64 * TICK);
    }

    // Camera 0 alerted; camera 1 contributed nothing and is reported down.
    let alerts = publisher.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].camera_id, "0");
    assert!(publisher.stream_frames("1").is_empty());

    let states = scheduler.camera_states();
    assert_eq!(states[0].connection_status, ConnectionStatus::Streaming);
    assert_eq!(states[1].connection_status, ConnectionStatus::Disconnected);
    assert!(states[1].last_frame_time.is_none());
}

#[test]
fn headless_mode_publishes_no_stream_frames() {
    let engine = DetectionEngine::new(
        None,
        Some(Box::new(ScriptedBackend::new(vec![]))),
        0.5,
    )
    .unwrap();

    let camera = started_camera("0");
    wait_for_frames(&camera);

    let publisher = RecordingPublisher::new();
    let config = PipelineConfig {
        stream_enabled: false,
        ..test_config()
    };
    let mut scheduler =
        PipelineScheduler::new(vec![camera], engine, Box::new(publisher.clone()), config);

    for n in 1..=20u32 {
        scheduler.tick(n as f64 * TICK);
    }

    assert!(publisher.stream_frames("0").is_empty());
    assert!(publisher.alerts().is_empty());
}

#[test]
fn flicker_inside_grace_window_stays_one_episode() {
    // Seen, one missed tick, seen again: the miss must not split the
    // episode or fire an exit.
    let script = vec![
        vec![person_at(0.9)],
        vec![],
        vec![person_at(0.9)],
        vec![person_at(0.9)],
    ];
    let engine = DetectionEngine::new(
        None,
        Some(Box::new(ScriptedBackend::new(script))),
        0.5,
    )
    .unwrap();

    let camera = started_camera("0");
    wait_for_frames(&camera);

    let publisher = RecordingPublisher::new();
    let mut scheduler = PipelineScheduler::new(
        vec![camera],
        engine,
        Box::new(publisher.clone()),
        test_config(),
    );

    for n in 1..=4u32 {
        scheduler.tick(n as f64 * TICK);
    }

    let alerts = publisher.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].event, "PERSON_DETECTED");
}
