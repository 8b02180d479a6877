pub mod codec;
pub mod scheduler;

pub use codec::{
    CodecError, CodecResult, FRAME_BYTES, FRAME_DURATION_MS, FrameChunker, MULAW_SILENCE,
    TELEPHONY_SAMPLE_RATE, chunk, decode, decode_base64, encode, pcm16_from_le_bytes,
    pcm16_to_le_bytes, resample,
};
pub use scheduler::{FrameScheduler, FrameVerdict, SchedulerStats};

use tokio::time::Instant;

/// One 20 ms mu-law frame received from the telephony leg.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub seq: u64,
    pub received_at: Instant,
    pub payload: [u8; FRAME_BYTES],
}

impl AudioFrame {
    /// Split validated wire bytes into frames, numbering from `first_seq`.
    pub fn from_wire(first_seq: u64, wire: &[u8], received_at: Instant) -> Vec<AudioFrame> {
        wire.chunks_exact(FRAME_BYTES)
            .enumerate()
            .map(|(i, piece)| {
                let mut payload = [MULAW_SILENCE; FRAME_BYTES];
                payload.copy_from_slice(piece);
                AudioFrame {
                    seq: first_seq + i as u64,
                    received_at,
                    payload,
                }
            })
            .collect()
    }
}
