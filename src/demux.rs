use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::modbus_tcp::MBAP_HEADER_LEN;

/// Offset of the MBAP length field plus its own size.
const LENGTH_FIELD_END: usize = 6;
/// Unit id + function code.
const MIN_DECLARED_LEN: usize = 2;
/// Unit id + largest PDU.
const MAX_DECLARED_LEN: usize = 254;

/// What to do with a trailing frame shorter than its declared length.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialFrameMode {
    /// Drop it. Matches the historical behaviour of the engine, and loses
    /// data whenever the transport segments a frame.
    Discard,
    /// Keep it until the rest arrives.
    #[default]
    Accumulate,
}

fn declared_end(buf: &[u8]) -> usize {
    u16::from_be_bytes([buf[4], buf[5]]) as usize + LENGTH_FIELD_END
}

/// Stateless split of one chunk. Anything that does not form a complete
/// frame is discarded.
pub fn split_frames(chunk: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut rest = chunk;
    while rest.len() > MBAP_HEADER_LEN {
        let end = declared_end(rest);
        if rest.len() < end {
            trace!("Discarding partial frame: have {} bytes, declared {}", rest.len(), end);
            break;
        }
        let (frame, tail) = rest.split_at(end);
        frames.push(frame.to_vec());
        rest = tail;
    }
    frames
}

/// Stateful demultiplexer for one channel.
///
/// In `Accumulate` mode at most one incomplete frame is held back, so the
/// buffer never reaches a full MBAP frame (260 bytes).
#[derive(Debug)]
pub struct StreamDemux {
    mode: PartialFrameMode,
    buffer: BytesMut,
}

impl Default for StreamDemux {
    fn default() -> Self {
        Self::new(PartialFrameMode::default())
    }
}

impl StreamDemux {
    pub fn new(mode: PartialFrameMode) -> Self {
        Self { mode, buffer: BytesMut::new() }
    }

    pub fn mode(&self) -> PartialFrameMode {
        self.mode
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feeds a chunk and returns every frame it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        match self.mode {
            PartialFrameMode::Discard => split_frames(chunk).into_iter().map(Bytes::from).collect(),
            PartialFrameMode::Accumulate => self.accumulate(chunk),
        }
    }

    fn accumulate(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while self.buffer.len() >= LENGTH_FIELD_END {
            let declared = declared_end(&self.buffer) - LENGTH_FIELD_END;
            if !(MIN_DECLARED_LEN..=MAX_DECLARED_LEN).contains(&declared) {
                warn!("Corrupt MBAP length {}, dropping {} buffered bytes", declared, self.buffer.len());
                self.buffer.clear();
                break;
            }
            let end = declared + LENGTH_FIELD_END;
            if self.buffer.len() < end {
                trace!("Waiting for {} more bytes", end - self.buffer.len());
                break;
            }
            frames.push(self.buffer.split_to(end).freeze());
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus_tcp::MAX_TCP_FRAME;

    fn read_holding_frame(tid: u8) -> Vec<u8> {
        vec![0x00, tid, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02]
    }

    #[test]
    fn short_chunk_yields_nothing() {
        assert!(split_frames(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01]).is_empty());
    }

    #[test]
    fn exact_chunk_is_one_frame() {
        let frame = read_holding_frame(1);
        assert_eq!(split_frames(&frame), vec![frame]);
    }

    #[test]
    fn coalesced_chunk_splits() {
        let mut chunk = read_holding_frame(1);
        chunk.extend(read_holding_frame(2));
        let frames = split_frames(&chunk);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1][1], 2);
    }

    #[test]
    fn discard_mode_drops_tail() {
        let mut chunk = read_holding_frame(1);
        chunk.extend(&read_holding_frame(2)[..9]);
        let mut demux = StreamDemux::new(PartialFrameMode::Discard);
        assert_eq!(demux.push(&chunk).len(), 1);
        assert_eq!(demux.buffered(), 0);
        assert!(demux.push(&read_holding_frame(2)[9..]).is_empty());
    }

    #[test]
    fn accumulate_mode_joins_segments() {
        let frame = read_holding_frame(7);
        let mut demux = StreamDemux::default();
        assert!(demux.push(&frame[..3]).is_empty());
        assert!(demux.push(&frame[3..10]).is_empty());
        assert_eq!(demux.buffered(), 10);
        let frames = demux.push(&frame[10..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), frame.as_slice());
        assert_eq!(demux.buffered(), 0);
    }

    #[test]
    fn accumulate_mode_clears_on_corrupt_length() {
        let mut demux = StreamDemux::default();
        assert!(demux.push(&[0x00, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0x01, 0x03]).is_empty());
        assert_eq!(demux.buffered(), 0);
    }

    #[test]
    fn accumulate_mode_holds_back_less_than_one_frame() {
        let mut stream = Vec::new();
        for tid in 0..40 {
            stream.extend(read_holding_frame(tid));
        }
        let mut demux = StreamDemux::default();
        let mut received = 0;
        for chunk in stream.chunks(7) {
            received += demux.push(chunk).len();
            assert!(demux.buffered() < MAX_TCP_FRAME);
        }
        assert_eq!(received, 40);
        assert_eq!(demux.buffered(), 0);
    }

    #[test]
    fn largest_frame_survives_segmentation() {
        let mut frame = vec![0x00, 0x09, 0x00, 0x00, 0x00, 0xFE, 0x01, 0x10];
        frame.resize(MAX_TCP_FRAME, 0xAB);
        let mut next = read_holding_frame(10);
        let mut demux = StreamDemux::default();
        assert!(demux.push(&frame[..200]).is_empty());
        assert_eq!(demux.buffered(), 200);

        let mut tail = frame[200..].to_vec();
        tail.append(&mut next);
        let frames = demux.push(&tail);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), MAX_TCP_FRAME);
        assert_eq!(frames[1].as_ref(), read_holding_frame(10).as_slice());
    }
}
