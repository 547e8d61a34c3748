use crate::network::packet_capture::{PacketObservation, TransportFields};
use crate::{Result, SentinelError};

/// Fewest packets a window must hold before its statistics are meaningful.
pub const MIN_PACKETS: usize = 2;

/// Running aggregate over one capture window.
///
/// Folding is O(1) amortised per packet; anything heavier (variance) is
/// computed on demand from the recorded lengths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowStatistics {
    count: usize,
    sum_length: f64,
    max_length: f64,
    lengths: Vec<f64>,
    first_transport: Option<TransportFields>,
}

impl FlowStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_packets<'a, I>(packets: I) -> Self
    where
        I: IntoIterator<Item = &'a PacketObservation>,
    {
        let mut stats = Self::new();
        for packet in packets {
            stats.fold(packet);
        }
        stats
    }

    pub fn fold(&mut self, packet: &PacketObservation) {
        let length = packet.length as f64;
        self.count += 1;
        self.sum_length += length;
        if self.count == 1 || length > self.max_length {
            self.max_length = length;
        }
        self.lengths.push(length);

        if self.first_transport.is_none() {
            self.first_transport = packet.transport;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum_length(&self) -> f64 {
        self.sum_length
    }

    pub fn max_length(&self) -> f64 {
        self.max_length
    }

    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    pub fn first_transport(&self) -> Option<TransportFields> {
        self.first_transport
    }

    /// Mean packet length; NaN when nothing was folded.
    pub fn mean_length(&self) -> f64 {
        self.sum_length / self.count as f64
    }

    /// Population variance (divisor = count) of the recorded lengths.
    pub fn variance(&self) -> f64 {
        if self.lengths.is_empty() {
            return f64::NAN;
        }
        let mean = self.mean_length();
        self.lengths
            .iter()
            .map(|&x| {
                let diff = x - mean;
                diff * diff
            })
            .sum::<f64>()
            / self.count as f64
    }

    /// Fails with `InsufficientData` unless at least [`MIN_PACKETS`] were folded.
    pub fn ensure_sufficient(&self) -> Result<()> {
        if self.count < MIN_PACKETS {
            return Err(SentinelError::InsufficientData { captured: self.count });
        }
        Ok(())
    }
}
