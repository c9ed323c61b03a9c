//! Heartbeat packets exchanged by simulated chains

use bach_peering::{DecodeError, PacketCodec};
use bach_primitives::NodeRid;
use bytes::Bytes;

/// Numbered heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Round the heartbeat was sent in
    pub seq: u64,
}

/// Big-endian u64 on the wire
pub struct HeartbeatCodec;

impl PacketCodec<Heartbeat> for HeartbeatCodec {
    fn encode(&self, packet: &Heartbeat) -> Bytes {
        Bytes::copy_from_slice(&packet.seq.to_be_bytes())
    }

    fn decode(&self, _sender: &NodeRid, data: &[u8]) -> Result<Heartbeat, DecodeError> {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| DecodeError::BadMessage(format!("heartbeat must be 8 bytes, got {}", data.len())))?;
        Ok(Heartbeat {
            seq: u64::from_be_bytes(bytes),
        })
    }
}
