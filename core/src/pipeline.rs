//! One scan: capture a window, fold it into flow statistics, build the
//! feature vector, classify it and interpret the result.
//!
//! Every failure is turned into a [`ScanOutcome::Failed`] at this boundary.

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use crate::config::{CaptureConfig, CaptureStrategy};
use crate::error::FailureKind;
use crate::features::{FeatureVector, FlowStatistics, NamedFeature, MIN_PACKETS};
use crate::model::{Artifacts, Prediction};
use crate::network::packet_capture::{CaptureBackend, CaptureSession, StopReason};
use crate::utils::{current_timestamp, generate_session_id};
use crate::verdict::{interpret, Verdict};
use crate::{Result, SentinelError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub session_id: String,
    pub timestamp: u64,
    pub interface: String,
    pub strategy: CaptureStrategy,
    pub stop_reason: StopReason,
    pub packets_captured: usize,
    pub capture_secs: f64,
    pub features: Vec<NamedFeature>,
    pub prediction: Prediction,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFailure {
    pub session_id: String,
    pub timestamp: u64,
    pub interface: String,
    pub kind: FailureKind,
    pub message: String,
    pub hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed(ScanReport),
    Failed(ScanFailure),
}

impl ScanOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            ScanOutcome::Completed(report) => &report.session_id,
            ScanOutcome::Failed(failure) => &failure.session_id,
        }
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            ScanOutcome::Completed(report) => Some(&report.verdict),
            ScanOutcome::Failed(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ScanOutcome::Completed(_) => None,
            ScanOutcome::Failed(failure) => Some(failure.kind),
        }
    }

    fn failed(session_id: String, interface: &str, err: &SentinelError) -> Self {
        let kind = err.kind();
        ScanOutcome::Failed(ScanFailure {
            session_id,
            timestamp: current_timestamp(),
            interface: interface.to_string(),
            kind,
            message: err.to_string(),
            hint: kind.operator_hint().to_string(),
        })
    }
}

/// Outcome of classifying a recorded feature set instead of live traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineClassification {
    pub features: Vec<NamedFeature>,
    pub prediction: Prediction,
    pub verdict: Verdict,
}

/// Capture-only diagnostics, no model involved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub interface: String,
    pub strategy: CaptureStrategy,
    pub stop_reason: StopReason,
    pub packets_captured: usize,
    pub tcp_packets: usize,
    pub capture_secs: f64,
    pub analysable: bool,
}

pub struct Pipeline {
    artifacts: Arc<Artifacts>,
    backend: Arc<dyn CaptureBackend>,
}

impl Pipeline {
    pub fn new(artifacts: Arc<Artifacts>, backend: Arc<dyn CaptureBackend>) -> Self {
        Self { artifacts, backend }
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Runs one scan on the calling thread, blocking it for the capture window.
    pub fn scan(&self, capture: &CaptureConfig, stop: Option<Arc<AtomicBool>>) -> ScanOutcome {
        let session_id = generate_session_id();
        match self.try_scan(&session_id, capture, stop) {
            Ok(report) => {
                log::info!("Scan {} finished: {:?}", session_id, report.verdict.severity);
                ScanOutcome::Completed(report)
            }
            Err(e) => {
                log::error!("Scan {} failed: {}", session_id, e);
                ScanOutcome::failed(session_id, &capture.interface, &e)
            }
        }
    }

    fn try_scan(&self, session_id: &str, capture: &CaptureConfig, stop: Option<Arc<AtomicBool>>) -> Result<ScanReport> {
        let mut stats = FlowStatistics::new();

        let mut session = CaptureSession::new(self.backend.as_ref(), &capture.interface, capture);
        if let Some(stop) = stop {
            session = session.with_stop_flag(stop);
        }
        let captured = session.run(|packet| stats.fold(packet))?;

        log::info!("Processed {} packets", stats.count());
        stats.ensure_sufficient()?;

        let schema = &self.artifacts.schema;
        let vector = FeatureVector::build(schema, &stats);
        let prediction = self.artifacts.classifier.predict(&vector)?;
        let verdict = interpret(&prediction);

        Ok(ScanReport {
            session_id: session_id.to_string(),
            timestamp: current_timestamp(),
            interface: capture.interface.clone(),
            strategy: captured.strategy,
            stop_reason: captured.stop_reason,
            packets_captured: captured.packets.len(),
            capture_secs: captured.elapsed.as_secs_f64(),
            features: vector.named(schema),
            prediction,
            verdict,
        })
    }

    /// Runs the scan on a worker thread and delivers the outcome over a channel.
    pub fn spawn_scan(self: &Arc<Self>, capture: CaptureConfig, stop: Option<Arc<AtomicBool>>) -> Receiver<ScanOutcome> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let pipeline = Arc::clone(self);

        std::thread::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.scan(&capture, stop)))
                .unwrap_or_else(|_| {
                    let err = SentinelError::Capture("scan worker panicked".to_string());
                    ScanOutcome::failed(generate_session_id(), &capture.interface, &err)
                });
            if tx.send(outcome).is_err() {
                log::warn!("Scan receiver dropped before the outcome was delivered");
            }
        });

        rx
    }

    /// Runs the scan on tokio's blocking pool.
    pub async fn scan_async(self: &Arc<Self>, capture: CaptureConfig, stop: Option<Arc<AtomicBool>>) -> ScanOutcome {
        let pipeline = Arc::clone(self);
        let interface = capture.interface.clone();

        match tokio::task::spawn_blocking(move || pipeline.scan(&capture, stop)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = SentinelError::Capture(format!("scan task failed: {}", e));
                ScanOutcome::failed(generate_session_id(), &interface, &err)
            }
        }
    }

    /// Classifies a recorded feature set. Features the schema lists but the
    /// record lacks are treated as 0.0.
    pub fn classify_record(&self, record: &HashMap<String, Option<f64>>) -> Result<OfflineClassification> {
        let schema = &self.artifacts.schema;
        let vector = FeatureVector::from_record(schema, record);
        let prediction = self.artifacts.classifier.predict(&vector)?;
        let verdict = interpret(&prediction);
        Ok(OfflineClassification {
            features: vector.named(schema),
            prediction,
            verdict,
        })
    }
}

/// Captures one window and reports what was seen.
pub fn probe(backend: &dyn CaptureBackend, capture: &CaptureConfig) -> Result<ProbeReport> {
    let mut tcp_packets = 0;
    let session = CaptureSession::new(backend, &capture.interface, capture);
    let captured = session.run(|packet| {
        if packet.transport.is_some() {
            tcp_packets += 1;
        }
    })?;

    Ok(ProbeReport {
        interface: capture.interface.clone(),
        strategy: captured.strategy,
        stop_reason: captured.stop_reason,
        packets_captured: captured.packets.len(),
        tcp_packets,
        capture_secs: captured.elapsed.as_secs_f64(),
        analysable: captured.packets.len() >= MIN_PACKETS,
    })
}
