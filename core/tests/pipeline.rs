use flow_sentinel_core::config::{CaptureConfig, CaptureStrategy, ModelConfig};
use flow_sentinel_core::features::{FeatureSchema, FeatureVector, FlowStatistics};
use flow_sentinel_core::model::{Artifacts, Classifier, ClassifierAdapter, LabelEncoder, RawLabel};
use flow_sentinel_core::network::{CaptureBackend, CaptureHandle, PacketObservation, TransportFields};
use flow_sentinel_core::pipeline::{Pipeline, ScanOutcome};
use flow_sentinel_core::verdict::{interpret, Severity};
use flow_sentinel_core::{FailureKind, Result, SentinelError};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = r#"[
    "Max Packet Length",
    "Avg Bwd Segment Size",
    "Packet Length Variance",
    "Destination Port",
    "Average Packet Size",
    "Subflow Fwd Bytes",
    "Total Length of Fwd Packets",
    "Fwd Header Length"
]"#;

// Port 22 => SSH-Patator; otherwise Max Packet Length > 1000 => PortScan; else BENIGN.
struct PortAndLengthRules;

impl Classifier for PortAndLengthRules {
    fn n_features(&self) -> usize {
        8
    }

    fn classes(&self) -> &[RawLabel] {
        &[0, 1, 2]
    }

    fn predict(&self, features: &[f64]) -> Result<RawLabel> {
        let proba = self.predict_proba(features)?.unwrap_or_default();
        Ok(if proba[2] == 1.0 { 2 } else if proba[1] > 0.5 { 1 } else { 0 })
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Option<Vec<f64>>> {
        let proba = if features[3] == 22.0 {
            vec![0.0, 0.0, 1.0]
        } else if features[0] > 1000.0 {
            vec![0.0, 0.9, 0.1]
        } else {
            vec![0.8, 0.1, 0.1]
        };
        Ok(Some(proba))
    }
}

// Max Packet Length > 1000 => MALICIOUS.
struct BinaryLengthRule;

impl Classifier for BinaryLengthRule {
    fn n_features(&self) -> usize {
        8
    }

    fn classes(&self) -> &[RawLabel] {
        &[0, 1]
    }

    fn predict(&self, features: &[f64]) -> Result<RawLabel> {
        Ok(if features[0] > 1000.0 { 1 } else { 0 })
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Option<Vec<f64>>> {
        Ok(Some(if features[0] > 1000.0 { vec![0.1, 0.9] } else { vec![0.75, 0.25] }))
    }
}

const LABELS: &str = r#"["BENIGN", "PortScan", "SSH-Patator"]"#;

struct Step {
    length: u32,
    port: Option<u16>,
}

fn step(length: u32, port: Option<u16>) -> Step {
    Step { length, port }
}

enum Script {
    Packets(Vec<Step>),
    FailAfter(Vec<Step>, &'static str),
    RefuseOpen(&'static str),
}

struct ScriptedBackend {
    script: Mutex<Option<Script>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        })
    }
}

struct ScriptedHandle {
    packets: std::vec::IntoIter<Step>,
    failure: Option<&'static str>,
    closes: Arc<AtomicUsize>,
}

impl CaptureBackend for ScriptedBackend {
    fn open(&self, interface: &str, _config: &CaptureConfig) -> Result<Box<dyn CaptureHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (packets, failure) = match self.script.lock().unwrap().take() {
            Some(Script::Packets(steps)) => (steps, None),
            Some(Script::FailAfter(steps, reason)) => (steps, Some(reason)),
            Some(Script::RefuseOpen(reason)) => {
                return Err(SentinelError::Capture(format!("{}: {}", interface, reason)))
            }
            None => (Vec::new(), None),
        };
        Ok(Box::new(ScriptedHandle {
            packets: packets.into_iter(),
            failure,
            closes: self.closes.clone(),
        }))
    }
}

impl CaptureHandle for ScriptedHandle {
    fn next_packet(&mut self) -> Result<Option<PacketObservation>> {
        if let Some(step) = self.packets.next() {
            let transport = step.port.map(|destination_port| TransportFields {
                source_port: 49152,
                destination_port,
            });
            return Ok(Some(PacketObservation::new(step.length, transport)));
        }
        if let Some(reason) = self.failure.take() {
            return Err(SentinelError::Capture(reason.to_string()));
        }
        std::thread::sleep(Duration::from_millis(2));
        Ok(None)
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn write_artifacts(dir: &Path, with_labels: bool) -> ModelConfig {
    std::fs::write(dir.join("features.json"), SCHEMA).unwrap();
    std::fs::write(dir.join("labels.json"), LABELS).unwrap();
    ModelConfig {
        model_path: dir.join("model.onnx"),
        schema_path: dir.join("features.json"),
        label_encoder_path: if with_labels { Some(dir.join("labels.json")) } else { None },
    }
}

fn capture(strategy: CaptureStrategy, max_packets: Option<usize>) -> CaptureConfig {
    CaptureConfig {
        interface: "wlan0".to_string(),
        window_secs: 1,
        max_packets,
        strategy,
        ..CaptureConfig::default()
    }
}

fn load() -> (tempfile::TempDir, Arc<Artifacts>) {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), true);
    let schema = FeatureSchema::from_file(&config.schema_path).unwrap();
    let encoder = LabelEncoder::from_file(config.label_encoder_path.as_deref().unwrap()).unwrap();
    let classifier = ClassifierAdapter::new(Box::new(PortAndLengthRules), Some(Box::new(encoder)));
    let artifacts = Arc::new(Artifacts::new(schema, classifier).unwrap());
    (dir, artifacts)
}

#[test]
fn scan_flags_large_packets_as_port_scan() {
    let (_dir, artifacts) = load();
    let backend = ScriptedBackend::new(Script::Packets(vec![
        step(60, Some(443)),
        step(1500, Some(80)),
        step(60, None),
        step(1500, None),
    ]));
    let pipeline = Pipeline::new(artifacts.clone(), backend.clone());

    let outcome = pipeline.scan(&capture(CaptureStrategy::Streaming, Some(4)), None);
    let report = match outcome {
        ScanOutcome::Completed(report) => report,
        ScanOutcome::Failed(failure) => panic!("scan failed: {}", failure.message),
    };

    assert_eq!(report.verdict.severity, Severity::Alert);
    assert_eq!(report.verdict.attack_type.as_deref(), Some("PortScan"));
    assert_eq!(report.verdict.confidence, Some(0.9));

    let value = |name: &str| report.features.iter().find(|f| f.name == name).unwrap().value;
    assert_eq!(value("Max Packet Length"), 1500.0);
    assert_eq!(value("Average Packet Size"), 780.0);
    assert_eq!(value("Packet Length Variance"), 518400.0);
    assert_eq!(value("Destination Port"), 443.0);
    assert_eq!(value("Subflow Fwd Bytes"), 3120.0);
    assert_eq!(value("Total Length of Fwd Packets"), 3120.0);
    assert_eq!(value("Avg Bwd Segment Size"), 0.0);
    assert_eq!(value("Fwd Header Length"), 0.0);
    assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn block_then_drain_yields_same_verdict_as_streaming() {
    let (_dir, artifacts) = load();
    let packets = || vec![step(60, Some(22)), step(80, Some(22)), step(70, None)];

    let streaming = Pipeline::new(artifacts.clone(), ScriptedBackend::new(Script::Packets(packets())))
        .scan(&capture(CaptureStrategy::Streaming, None), None);
    let blocking = Pipeline::new(artifacts.clone(), ScriptedBackend::new(Script::Packets(packets())))
        .scan(&capture(CaptureStrategy::BlockThenDrain, None), None);

    assert_eq!(streaming.verdict(), blocking.verdict());
    assert_eq!(
        streaming.verdict().and_then(|v| v.attack_type.clone()).as_deref(),
        Some("SSH-Patator")
    );
}

#[test]
fn permission_fault_reports_capture_error_and_releases_once() {
    let (_dir, artifacts) = load();
    let backend = ScriptedBackend::new(Script::FailAfter(
        vec![step(60, None)],
        "permission denied opening raw socket",
    ));
    let pipeline = Pipeline::new(artifacts, backend.clone());

    let outcome = pipeline.scan(&capture(CaptureStrategy::Streaming, None), None);

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Capture));
    assert!(outcome.verdict().is_none());
    assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
    assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_interface_is_capture_error() {
    let (_dir, artifacts) = load();
    let backend = ScriptedBackend::new(Script::RefuseOpen("interface not found"));
    let outcome = Pipeline::new(artifacts, backend.clone())
        .scan(&capture(CaptureStrategy::BlockThenDrain, None), None);

    match outcome {
        ScanOutcome::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Capture);
            assert!(failure.message.contains("wlan0"));
        }
        ScanOutcome::Completed(_) => panic!("expected a capture failure"),
    }
    assert_eq!(backend.closes.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_or_one_packet_is_insufficient_data() {
    let (_dir, artifacts) = load();
    for packets in [vec![], vec![step(60, Some(80))]] {
        let pipeline = Pipeline::new(artifacts.clone(), ScriptedBackend::new(Script::Packets(packets)));
        let outcome = pipeline.scan(&capture(CaptureStrategy::Streaming, None), None);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::InsufficientData));
    }
}

#[test]
fn binary_mode_without_label_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), false);
    let schema = FeatureSchema::from_file(&config.schema_path).unwrap();
    let artifacts = Arc::new(
        Artifacts::new(schema, ClassifierAdapter::new(Box::new(BinaryLengthRule), None)).unwrap(),
    );

    let backend = ScriptedBackend::new(Script::Packets(vec![step(100, None), step(120, None)]));
    let outcome = Pipeline::new(artifacts, backend).scan(&capture(CaptureStrategy::Streaming, Some(2)), None);

    let verdict = outcome.verdict().cloned().unwrap();
    assert_eq!(verdict.severity, Severity::Benign);
    assert_eq!(verdict.confidence, Some(0.75));
}

#[test]
fn multi_class_model_without_encoder_fails_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), false);
    let schema = FeatureSchema::from_file(&config.schema_path).unwrap();

    let err = Artifacts::new(schema, ClassifierAdapter::new(Box::new(PortAndLengthRules), None))
        .err()
        .unwrap();
    assert_eq!(err.kind(), FailureKind::ArtifactLoad);
}

#[test]
fn pickled_model_is_rejected_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), true);
    std::fs::write(&config.model_path, b"\x80\x04\x95 not an onnx graph").unwrap();

    let err = Artifacts::load(&config).err().unwrap();
    assert_eq!(err.kind(), FailureKind::ArtifactLoad);
}

#[test]
fn missing_artifact_fails_before_any_scan() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_artifacts(dir.path(), true);
    config.label_encoder_path = Some(dir.path().join("absent.pkl"));

    let err = Artifacts::load(&config).err().unwrap();
    assert_eq!(err.kind(), FailureKind::ArtifactLoad);
}

#[test]
fn classification_is_deterministic() {
    let (_dir, artifacts) = load();
    let schema: &FeatureSchema = &artifacts.schema;
    let packets: Vec<PacketObservation> = [60u32, 1500, 60, 1500]
        .iter()
        .map(|&l| PacketObservation::new(l, None))
        .collect();
    let stats = FlowStatistics::from_packets(&packets);

    let first = interpret(&artifacts.classifier.predict(&FeatureVector::build(schema, &stats)).unwrap());
    for _ in 0..10 {
        let again = interpret(&artifacts.classifier.predict(&FeatureVector::build(schema, &stats)).unwrap());
        assert_eq!(again, first);
    }
}

#[test]
fn async_scan_completes_off_thread() {
    let (_dir, artifacts) = load();
    let backend = ScriptedBackend::new(Script::Packets(vec![step(100, None), step(200, None)]));
    let pipeline = Arc::new(Pipeline::new(artifacts, backend));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let outcome = runtime.block_on(pipeline.scan_async(capture(CaptureStrategy::Streaming, Some(2)), None));
    assert_eq!(outcome.verdict().map(|v| v.severity), Some(Severity::Benign));
}

#[test]
fn recorded_port_scan_sample() {
    let (_dir, artifacts) = load();
    let pipeline = Pipeline::new(artifacts, ScriptedBackend::new(Script::Packets(vec![])));
    let record = serde_json::from_str(
        r#"{"Max Packet Length": 6.0, "Destination Port": 42510.0, "Fwd Header Length": 24.0, "Bwd Header Length": null}"#,
    )
    .unwrap();

    let result = pipeline.classify_record(&record).unwrap();
    assert_eq!(result.verdict.severity, Severity::Benign);
    assert_eq!(result.features.len(), 8);
}

#[test]
fn worker_thread_scan_delivers_over_channel() {
    let (_dir, artifacts) = load();
    let backend = ScriptedBackend::new(Script::Packets(vec![step(1400, None), step(1400, None)]));
    let pipeline = Arc::new(Pipeline::new(artifacts, backend));

    let rx = pipeline.spawn_scan(capture(CaptureStrategy::Streaming, Some(2)), None);
    let outcome = tokio_test::block_on(async move { rx.recv_timeout(Duration::from_secs(5)).unwrap() });
    assert_eq!(outcome.verdict().and_then(|v| v.attack_type.clone()).as_deref(), Some("PortScan"));
}
