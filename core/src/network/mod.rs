pub mod packet_capture;

pub use packet_capture::{
    CaptureBackend, CaptureHandle, CaptureSession, CapturedPackets, PacketObservation, PnetBackend,
    StopReason, TransportFields,
};
