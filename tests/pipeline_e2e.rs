//! End-to-end pipeline runs against the synthetic source and a scripted
//! detector: capture through inference, zone evaluation, debounce, and
//! dispatch with real snapshot and history persistence.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use zonewatch::{
    AlertChannel, AlertController, AlertDispatcher, BoundingBox, CameraSource, CaptureSettings,
    InferenceAdapter, Pipeline, PipelineError, PipelineSettings, RawDetection, RunLimits,
    ScriptedBackend, SourceDescriptor, SqliteAlertHistory, Zone, ZoneEvaluator,
};

struct RecordingChannel {
    sends: Arc<AtomicUsize>,
    subjects: Arc<Mutex<Vec<String>>>,
}

impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn send(&self, subject: &str, _body: &str, snapshot: &Path) -> Result<()> {
        assert!(snapshot.exists(), "snapshot persisted before notification");
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.subjects.lock().unwrap().push(subject.to_string());
        Ok(())
    }
}

fn stub_source(frames: u64) -> CameraSource {
    let mut source = CameraSource::open(
        &SourceDescriptor::Network("stub://e2e".to_string()),
        CaptureSettings {
            width: 32,
            height: 24,
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
        },
    )
    .expect("open stub source");
    source.limit_frames(frames);
    source
}

fn person_detection() -> RawDetection {
    // Bottom-center lands at (5, 10), inside the test zone.
    RawDetection {
        class_id: 0,
        confidence: 0.9,
        bbox: BoundingBox {
            x_min: 0.0,
            y_min: 0.0,
            x_max: 10.0,
            y_max: 10.0,
        },
    }
}

fn gate_zone() -> Zone {
    Zone {
        id: "gate".to_string(),
        name: "Front gate".to_string(),
        polygon: vec![(0.0, 0.0), (20.0, 0.0), (20.0, 20.0), (0.0, 20.0)],
        alert_enabled: true,
        color: [255, 0, 0],
    }
}

#[test]
fn continuous_intrusion_yields_exactly_one_alert() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("alerts.db");
    let snapshot_dir = dir.path().join("snapshots");

    let frames = 40u64;
    let script = vec![vec![person_detection()]; frames as usize];
    let adapter = InferenceAdapter::new(Box::new(ScriptedBackend::new(script)), 0.5, vec![0]);
    let evaluator = ZoneEvaluator::new(vec![gate_zone()]).unwrap();
    let controller = AlertController::new(evaluator.zones(), Duration::from_secs(60));

    let sends = Arc::new(AtomicUsize::new(0));
    let subjects = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = AlertDispatcher::new(
        vec![Box::new(RecordingChannel {
            sends: sends.clone(),
            subjects: subjects.clone(),
        })],
        Box::new(SqliteAlertHistory::open(&db_path).unwrap()),
        &snapshot_dir,
    );

    let pipeline = Pipeline::new(
        stub_source(frames),
        adapter,
        evaluator,
        controller,
        dispatcher,
        PipelineSettings::default(),
    );
    let summary = pipeline
        .run(
            Arc::new(std::sync::atomic::AtomicBool::new(false)),
            RunLimits::default(),
        )
        .unwrap();

    assert_eq!(summary.frames_captured, frames);
    // The intruder is present every frame; the cooldown debounces to one alert.
    assert_eq!(summary.alerts_dispatched, 1);
    assert_eq!(summary.dispatch_failures, 0);
    assert_eq!(sends.load(Ordering::SeqCst), 1);
    assert!(subjects.lock().unwrap()[0].contains("gate"));

    let snapshots: Vec<_> = std::fs::read_dir(&snapshot_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].extension().unwrap(), "jpg");

    // The history record survives reopening the database.
    let history = SqliteAlertHistory::open(&db_path).unwrap();
    let records = zonewatch::AlertHistoryStore::recent(&history, 10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].zone_id, "gate");
    assert!(records[0].channels[0].delivered);
    assert!(Path::new(&records[0].snapshot_path).exists());
}

#[test]
fn accelerator_fault_terminates_the_run() {
    let dir = tempfile::tempdir().unwrap();

    let adapter = InferenceAdapter::new(
        Box::new(ScriptedBackend::new(Vec::new()).fail_at_call(0)),
        0.5,
        vec![0],
    );
    let evaluator = ZoneEvaluator::new(vec![gate_zone()]).unwrap();
    let controller = AlertController::new(evaluator.zones(), Duration::from_secs(60));
    let dispatcher = AlertDispatcher::new(
        Vec::new(),
        Box::new(SqliteAlertHistory::open(&dir.path().join("alerts.db")).unwrap()),
        dir.path().join("snapshots"),
    );

    let pipeline = Pipeline::new(
        stub_source(u64::MAX),
        adapter,
        evaluator,
        controller,
        dispatcher,
        PipelineSettings::default(),
    );
    let err = pipeline
        .run(
            Arc::new(std::sync::atomic::AtomicBool::new(false)),
            RunLimits::default(),
        )
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::InferenceFailure(_))
    ));
}

#[test]
fn detection_frames_are_saved_with_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let frames_dir = dir.path().join("frames");

    let frames = 10u64;
    let script = vec![vec![person_detection()]; frames as usize];
    let adapter = InferenceAdapter::new(Box::new(ScriptedBackend::new(script)), 0.5, vec![0]);
    let evaluator = ZoneEvaluator::new(vec![gate_zone()]).unwrap();
    let controller = AlertController::new(evaluator.zones(), Duration::from_secs(60));
    let dispatcher = AlertDispatcher::new(
        Vec::new(),
        Box::new(SqliteAlertHistory::open(&dir.path().join("alerts.db")).unwrap()),
        dir.path().join("snapshots"),
    );

    let settings = PipelineSettings {
        save_detection_frames: true,
        detection_frames_dir: frames_dir.clone(),
        frame_save_interval: 1,
        ..PipelineSettings::default()
    };
    let pipeline = Pipeline::new(
        stub_source(frames),
        adapter,
        evaluator,
        controller,
        dispatcher,
        settings,
    );
    let summary = pipeline
        .run(
            Arc::new(std::sync::atomic::AtomicBool::new(false)),
            RunLimits::default(),
        )
        .unwrap();
    assert!(summary.frames_processed > 0);
    assert!(summary.frames_saved >= 1, "sink persisted at least one frame");

    let mut jpgs = 0;
    let mut sidecars = 0;
    for entry in std::fs::read_dir(&frames_dir).unwrap() {
        let path = entry.unwrap().path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("jpg") => jpgs += 1,
            Some("json") => sidecars += 1,
            _ => {}
        }
    }
    assert_eq!(jpgs, summary.frames_saved as usize);
    assert_eq!(jpgs, sidecars, "every frame carries a JSON sidecar");
}
