//! Frame transport abstraction and the in-memory duplex used by tests.
//!
//! The session core does not own sockets; it talks to a transport handle
//! that moves length-framed payloads. The in-memory pair runs the real
//! 4-byte big-endian framing through [`FrameReader`] so the frame layer is
//! exercised end to end.

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use skybridge_wire::{encode_frame, FrameReader};
use tokio::sync::mpsc;

/// A bidirectional, ordered, reliable frame pipe.
#[async_trait]
pub trait FrameTransport: Send {
    /// Sends one payload, framed.
    async fn send_frame(&mut self, payload: &[u8]) -> Result<()>;

    /// Receives the next payload. `None` means the peer closed.
    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// One end of an in-memory duplex.
pub struct MemoryTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    reader: FrameReader,
}

/// Creates a connected pair of in-memory transports.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (tx_a, rx_b) = mpsc::channel(64);
    let (tx_b, rx_a) = mpsc::channel(64);
    (
        MemoryTransport { tx: tx_a, rx: rx_a, reader: FrameReader::new() },
        MemoryTransport { tx: tx_b, rx: rx_b, reader: FrameReader::new() },
    )
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload)?;
        // Deliver in small chunks so the receiver exercises reassembly.
        for chunk in frame.chunks(1024) {
            self.tx
                .send(chunk.to_vec())
                .await
                .map_err(|_| SessionError::ConnectionClosed)?;
        }
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.reader.next_frame()? {
                return Ok(Some(frame));
            }
            match self.rx.recv().await {
                Some(chunk) => self.reader.push(&chunk),
                None => return Ok(None),
            }
        }
    }
}
