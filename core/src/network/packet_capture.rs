use pnet::datalink::{self, DataLinkReceiver, NetworkInterface};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use crate::config::{CaptureConfig, CaptureStrategy};
use crate::{Result, SentinelError};

/// Transport-layer fields, present only when the frame carried a parsed TCP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFields {
    pub source_port: u16,
    pub destination_port: u16,
}

/// One captured frame. Never mutated after capture.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketObservation {
    pub length: u32,
    pub timestamp: Instant,
    pub transport: Option<TransportFields>,
}

impl PacketObservation {
    pub fn new(length: u32, transport: Option<TransportFields>) -> Self {
        Self {
            length,
            timestamp: Instant::now(),
            transport,
        }
    }

    /// Builds an observation from a raw Ethernet frame.
    pub fn from_frame(frame: &[u8]) -> Self {
        Self::new(frame.len() as u32, parse_transport(frame))
    }
}

fn parse_transport(frame: &[u8]) -> Option<TransportFields> {
    let ethernet = EthernetPacket::new(frame)?;
    match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => {
            let ipv4 = Ipv4Packet::new(ethernet.payload())?;
            tcp_fields(ipv4.get_next_level_protocol(), ipv4.payload())
        }
        EtherTypes::Ipv6 => {
            let ipv6 = Ipv6Packet::new(ethernet.payload())?;
            tcp_fields(ipv6.get_next_header(), ipv6.payload())
        }
        _ => None,
    }
}

fn tcp_fields(protocol: IpNextHeaderProtocol, payload: &[u8]) -> Option<TransportFields> {
    if protocol != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let tcp = TcpPacket::new(payload)?;
    Some(TransportFields {
        source_port: tcp.get_source(),
        destination_port: tcp.get_destination(),
    })
}

/// An open, single-pass packet source.
pub trait CaptureHandle: Send {
    /// Returns the next packet, or `None` when the backend's poll interval
    /// elapsed without traffic.
    fn next_packet(&mut self) -> Result<Option<PacketObservation>>;

    /// Releases the underlying capture resource.
    fn close(&mut self);
}

/// Something that can open a capture on a named interface.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, interface: &str, config: &CaptureConfig) -> Result<Box<dyn CaptureHandle>>;
}

/// Live capture through a pnet datalink channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct PnetBackend;

impl PnetBackend {
    fn find_interface(name: &str) -> Result<NetworkInterface> {
        datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| SentinelError::Capture(format!("Interface {} not found", name)))
    }
}

impl CaptureBackend for PnetBackend {
    fn open(&self, interface: &str, config: &CaptureConfig) -> Result<Box<dyn CaptureHandle>> {
        let iface = Self::find_interface(interface)?;
        let channel_config = datalink::Config {
            read_timeout: Some(config.read_timeout()),
            read_buffer_size: config.buffer_size,
            promiscuous: config.promiscuous,
            ..Default::default()
        };

        match datalink::channel(&iface, channel_config) {
            Ok(datalink::Channel::Ethernet(_, rx)) => {
                log::debug!("Opened datalink channel on {}", interface);
                Ok(Box::new(PnetHandle { rx: Some(rx) }))
            }
            Ok(_) => Err(SentinelError::Capture(format!(
                "Unhandled channel type on interface {}",
                interface
            ))),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(SentinelError::Capture(format!(
                "Insufficient privileges to capture on {}: {}",
                interface, e
            ))),
            Err(e) => Err(SentinelError::Capture(format!(
                "Failed to create datalink channel on {}: {}",
                interface, e
            ))),
        }
    }
}

struct PnetHandle {
    rx: Option<Box<dyn DataLinkReceiver>>,
}

impl CaptureHandle for PnetHandle {
    fn next_packet(&mut self) -> Result<Option<PacketObservation>> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| SentinelError::Capture("Capture already closed".to_string()))?;

        match rx.next() {
            Ok(frame) => Ok(Some(PacketObservation::from_frame(frame))),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(e) => Err(SentinelError::Capture(format!("Error receiving packet: {}", e))),
        }
    }

    fn close(&mut self) {
        // Dropping the receiver closes the socket.
        self.rx.take();
    }
}

/// Closes the handle when the scope that opened it ends, whichever way it ends.
struct OpenCapture {
    handle: Box<dyn CaptureHandle>,
}

impl Drop for OpenCapture {
    fn drop(&mut self) {
        self.handle.close();
        log::debug!("Capture resource released");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    WindowElapsed,
    PacketBudget,
    Cancelled,
}

/// The finished capture: an immutable, ordered collection materialised once.
#[derive(Debug, Clone)]
pub struct CapturedPackets {
    pub packets: Vec<PacketObservation>,
    pub elapsed: Duration,
    pub strategy: CaptureStrategy,
    pub stop_reason: StopReason,
}

/// A single bounded capture on one interface.
pub struct CaptureSession<'a> {
    backend: &'a dyn CaptureBackend,
    interface: String,
    config: CaptureConfig,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a> CaptureSession<'a> {
    pub fn new(backend: &'a dyn CaptureBackend, interface: &str, config: &CaptureConfig) -> Self {
        Self {
            backend,
            interface: interface.to_string(),
            config: config.clone(),
            stop: None,
        }
    }

    /// Installs an external stop flag. Only the streaming strategy observes it;
    /// a block-then-drain capture always runs for its full window.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Runs the capture and hands every packet to `on_packet` in arrival order.
    ///
    /// With [`CaptureStrategy::Streaming`] the callback runs on the delivery path,
    /// so it must stay cheap. With [`CaptureStrategy::BlockThenDrain`] it runs over
    /// the buffered packets after the capture resource has been released.
    pub fn run<F>(&self, on_packet: F) -> Result<CapturedPackets>
    where
        F: FnMut(&PacketObservation),
    {
        log::info!(
            "Capturing on {} for {:?} ({:?})",
            self.interface,
            self.config.window(),
            self.config.strategy
        );

        match self.config.strategy {
            CaptureStrategy::Streaming => self.stream(on_packet),
            CaptureStrategy::BlockThenDrain => {
                let captured = self.block_then_drain()?;
                captured.packets.iter().for_each(on_packet);
                Ok(captured)
            }
        }
    }

    fn open(&self) -> Result<OpenCapture> {
        let handle = self.backend.open(&self.interface, &self.config)?;
        Ok(OpenCapture { handle })
    }

    fn budget_reached(&self, count: usize) -> bool {
        matches!(self.config.max_packets, Some(max) if count >= max)
    }

    fn window_elapsed(&self, start_time: Instant) -> bool {
        start_time.elapsed() >= self.config.window()
    }

    fn cancelled(&self) -> bool {
        self.stop
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn stream<F>(&self, mut on_packet: F) -> Result<CapturedPackets>
    where
        F: FnMut(&PacketObservation),
    {
        let mut packets = Vec::new();
        let start_time = Instant::now();

        let stop_reason = {
            let mut capture = self.open()?;
            loop {
                if let Some(packet) = capture.handle.next_packet()? {
                    on_packet(&packet);
                    packets.push(packet);

                    if self.budget_reached(packets.len()) {
                        log::info!("Reached maximum packet count: {}", packets.len());
                        break StopReason::PacketBudget;
                    }
                }

                if self.window_elapsed(start_time) {
                    log::info!("Capture window elapsed");
                    break StopReason::WindowElapsed;
                }

                if self.cancelled() {
                    log::warn!("Capture cancelled after {} packets", packets.len());
                    break StopReason::Cancelled;
                }
            }
        };

        Ok(CapturedPackets {
            packets,
            elapsed: start_time.elapsed(),
            strategy: CaptureStrategy::Streaming,
            stop_reason,
        })
    }

    fn block_then_drain(&self) -> Result<CapturedPackets> {
        let mut buffer = Vec::new();
        let start_time = Instant::now();

        let stop_reason = {
            let mut capture = self.open()?;
            loop {
                if let Some(packet) = capture.handle.next_packet()? {
                    buffer.push(packet);
                    if self.budget_reached(buffer.len()) {
                        break StopReason::PacketBudget;
                    }
                }
                if self.window_elapsed(start_time) {
                    break StopReason::WindowElapsed;
                }
            }
        };

        log::info!("Capture complete: {} packets buffered", buffer.len());

        Ok(CapturedPackets {
            packets: buffer,
            elapsed: start_time.elapsed(),
            strategy: CaptureStrategy::BlockThenDrain,
            stop_reason,
        })
    }
}
