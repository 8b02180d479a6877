//! G.711 mu-law frame codec.
//!
//! Telephony legs carry 8 kHz mu-law audio in 20 ms frames (160 bytes). Providers
//! speak PCM 16-bit signed, usually at a higher sample rate. This module holds the
//! pure conversions between the two:
//!
//! - [`decode`] / [`encode`]: mu-law wire bytes <-> PCM16 samples
//! - [`chunk`] and [`FrameChunker`]: fixed 160-byte framing with silence padding
//! - [`resample`]: sample-rate conversion used by provider adapters
//! - little-endian PCM16 byte helpers for provider payloads

use base64::prelude::*;
use thiserror::Error;

/// Telephony sample rate in Hz.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Frame duration in milliseconds.
pub const FRAME_DURATION_MS: u64 = 20;

/// Bytes (and samples) per 20 ms mu-law frame at 8 kHz.
pub const FRAME_BYTES: usize = 160;

/// Mu-law encoding of a zero sample.
pub const MULAW_SILENCE: u8 = 0xFF;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while decoding telephony or provider audio.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The payload carried no audio bytes
    #[error("Empty audio payload")]
    EmptyPayload,

    /// The payload is not a whole number of frames
    #[error("Malformed frame length: {len} bytes is not a multiple of {frame_bytes}")]
    MalformedLength { len: usize, frame_bytes: usize },

    /// PCM16 payload with an odd number of bytes
    #[error("PCM16 payload has odd length: {0} bytes")]
    OddPcmLength(usize),

    /// Media payload was not valid base64
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

// =============================================================================
// Mu-law tables
// =============================================================================

const fn mulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = (u & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

const fn build_decode_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = mulaw_to_linear(i as u8);
        i += 1;
    }
    table
}

static DECODE_TABLE: [i16; 256] = build_decode_table();

/// Encode a single PCM16 sample as mu-law.
#[inline]
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign: u8 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    if magnitude > MULAW_CLIP {
        magnitude = MULAW_CLIP;
    }
    magnitude += MULAW_BIAS;

    let mut exponent: u8 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((magnitude >> (exponent as i32 + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

/// Decode a single mu-law byte.
#[inline]
pub fn mulaw_sample(byte: u8) -> i16 {
    DECODE_TABLE[byte as usize]
}

// =============================================================================
// Frame conversion
// =============================================================================

/// Decode mu-law wire bytes into PCM16 samples.
///
/// The payload must be a non-empty whole number of 160-byte frames.
pub fn decode(wire: &[u8]) -> CodecResult<Vec<i16>> {
    validate_wire_length(wire.len())?;
    Ok(wire.iter().map(|&b| mulaw_sample(b)).collect())
}

/// Decode a base64 telephony media payload into mu-law wire bytes.
pub fn decode_base64(payload: &str) -> CodecResult<Vec<u8>> {
    let wire = BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
    validate_wire_length(wire.len())?;
    Ok(wire)
}

fn validate_wire_length(len: usize) -> CodecResult<()> {
    if len == 0 {
        return Err(CodecError::EmptyPayload);
    }
    if len % FRAME_BYTES != 0 {
        return Err(CodecError::MalformedLength {
            len,
            frame_bytes: FRAME_BYTES,
        });
    }
    Ok(())
}

/// Encode PCM16 samples into mu-law frames.
///
/// A trailing partial frame is padded with mu-law silence, never dropped.
pub fn encode(pcm: &[i16]) -> Vec<[u8; FRAME_BYTES]> {
    let mut chunker = FrameChunker::new();
    let mut frames = chunker.push(pcm);
    frames.extend(chunker.flush());
    frames
}

/// Split an already-encoded mu-law stream into fixed frames of `frame_bytes`.
///
/// The last frame is padded with silence so every item has the same length.
pub fn chunk(stream: &[u8], frame_bytes: usize) -> impl Iterator<Item = Vec<u8>> + '_ {
    let frame_bytes = frame_bytes.max(1);
    stream.chunks(frame_bytes).map(move |piece| {
        let mut frame = piece.to_vec();
        frame.resize(frame_bytes, MULAW_SILENCE);
        frame
    })
}

/// Streaming PCM16 → mu-law framer.
///
/// Keeps the partial remainder between pushes so provider audio that arrives in
/// arbitrary chunk sizes still leaves as exact 20 ms frames. A chunker belongs to a
/// single response; start a new one at every response boundary.
#[derive(Debug, Default)]
pub struct FrameChunker {
    pending: Vec<u8>,
}

impl FrameChunker {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(FRAME_BYTES),
        }
    }

    /// Encode `pcm` and return every complete frame now available.
    pub fn push(&mut self, pcm: &[i16]) -> Vec<[u8; FRAME_BYTES]> {
        let mut frames = Vec::with_capacity((self.pending.len() + pcm.len()) / FRAME_BYTES);
        for &sample in pcm {
            self.pending.push(linear_to_mulaw(sample));
            if self.pending.len() == FRAME_BYTES {
                let mut frame = [MULAW_SILENCE; FRAME_BYTES];
                frame.copy_from_slice(&self.pending);
                frames.push(frame);
                self.pending.clear();
            }
        }
        frames
    }

    /// Emit the buffered remainder padded with silence, if any.
    pub fn flush(&mut self) -> Option<[u8; FRAME_BYTES]> {
        if self.pending.is_empty() {
            return None;
        }
        let mut frame = [MULAW_SILENCE; FRAME_BYTES];
        frame[..self.pending.len()].copy_from_slice(&self.pending);
        self.pending.clear();
        Some(frame)
    }

    /// Number of encoded bytes waiting for a full frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// =============================================================================
// PCM helpers
// =============================================================================

/// Parse little-endian PCM16 bytes.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> CodecResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddPcmLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Serialize PCM16 samples as little-endian bytes.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Convert PCM16 samples between sample rates.
///
/// Integer downsampling ratios average each group of samples (a box filter, which
/// keeps aliasing down for 24 kHz → 8 kHz); everything else uses linear
/// interpolation.
pub fn resample(samples: &[i16], from_hz: u32, to_hz: u32) -> Vec<i16> {
    if samples.is_empty() || from_hz == to_hz || from_hz == 0 || to_hz == 0 {
        return samples.to_vec();
    }

    if from_hz > to_hz && from_hz % to_hz == 0 {
        let ratio = (from_hz / to_hz) as usize;
        return samples
            .chunks(ratio)
            .map(|group| {
                let sum: i32 = group.iter().map(|&s| s as i32).sum();
                (sum / group.len() as i32) as i16
            })
            .collect();
    }

    let out_len = (samples.len() as u64 * to_hz as u64 / from_hz as u64) as usize;
    let step = from_hz as f64 / to_hz as f64;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let s0 = samples[idx] as f64;
            let s1 = samples[next] as f64;
            (s0 + (s1 - s0) * frac).round() as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_decode_vectors() {
        assert_eq!(mulaw_sample(0xFF), 0);
        assert_eq!(mulaw_sample(0x7F), 0);
        assert_eq!(mulaw_sample(0x00), -32124);
        assert_eq!(mulaw_sample(0x80), 32124);
        assert_eq!(mulaw_sample(0xF0), 120);
        assert_eq!(mulaw_sample(0x70), -120);
    }

    #[test]
    fn test_known_encode_vectors() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(linear_to_mulaw(32767), 0x80);
        assert_eq!(linear_to_mulaw(-32768), 0x00);
        assert_eq!(linear_to_mulaw(120), 0xF0);
        assert_eq!(linear_to_mulaw(-120), 0x70);
    }

    #[test]
    fn test_every_code_survives_decode_encode() {
        // 0x7F is negative zero and canonicalises to 0xFF.
        for byte in (0u8..=255).filter(|&b| b != 0x7F) {
            assert_eq!(linear_to_mulaw(mulaw_sample(byte)), byte, "code {byte:#04x}");
        }
    }

    #[test]
    fn test_decode_rejects_malformed_length() {
        assert_eq!(decode(&[]), Err(CodecError::EmptyPayload));
        assert_eq!(
            decode(&[0xFF; 100]),
            Err(CodecError::MalformedLength {
                len: 100,
                frame_bytes: FRAME_BYTES
            })
        );
        assert_eq!(decode(&[0xFF; 320]).unwrap().len(), 320);
    }

    #[test]
    fn test_decode_base64_payload() {
        let payload = BASE64_STANDARD.encode([0xFFu8; FRAME_BYTES]);
        assert_eq!(decode_base64(&payload).unwrap(), vec![0xFF; FRAME_BYTES]);

        assert!(matches!(
            decode_base64("not base64!!"),
            Err(CodecError::InvalidBase64(_))
        ));
        let short = BASE64_STANDARD.encode([0xFFu8; 10]);
        assert!(matches!(
            decode_base64(&short),
            Err(CodecError::MalformedLength { len: 10, .. })
        ));
    }

    #[test]
    fn test_encode_pads_partial_frame_with_silence() {
        let pcm = vec![1000i16; FRAME_BYTES + 10];
        let frames = encode(&pcm);
        assert_eq!(frames.len(), 2);
        let tail = &frames[1];
        assert!(tail[..10].iter().all(|&b| b == linear_to_mulaw(1000)));
        assert!(tail[10..].iter().all(|&b| b == MULAW_SILENCE));
    }

    #[test]
    fn test_chunker_carries_remainder_across_pushes() {
        let mut chunker = FrameChunker::new();
        assert!(chunker.push(&[0i16; 100]).is_empty());
        assert_eq!(chunker.pending_len(), 100);

        let frames = chunker.push(&[0i16; 100]);
        assert_eq!(frames.len(), 1);
        assert_eq!(chunker.pending_len(), 40);

        let tail = chunker.flush().unwrap();
        assert!(tail.iter().all(|&b| b == MULAW_SILENCE));
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn test_chunk_stream() {
        let stream = vec![0x10u8; 400];
        let frames: Vec<_> = chunk(&stream, FRAME_BYTES).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == FRAME_BYTES));
        assert_eq!(frames[2][79], 0x10);
        assert_eq!(frames[2][80], MULAW_SILENCE);
    }

    #[test]
    fn test_pcm16_le_bytes() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = pcm16_to_le_bytes(&samples);
        assert_eq!(bytes.len(), 10);
        assert_eq!(pcm16_from_le_bytes(&bytes).unwrap(), samples);
        assert_eq!(pcm16_from_le_bytes(&[0u8; 3]), Err(CodecError::OddPcmLength(3)));
    }

    #[test]
    fn test_resample_up_and_down() {
        let telephony = vec![100i16; FRAME_BYTES];
        let provider = resample(&telephony, 8000, 24000);
        assert_eq!(provider.len(), FRAME_BYTES * 3);
        assert!(provider.iter().all(|&s| s == 100));

        let back = resample(&provider, 24000, 8000);
        assert_eq!(back.len(), FRAME_BYTES);
        assert!(back.iter().all(|&s| s == 100));
    }

    #[test]
    fn test_resample_interpolates() {
        let up = resample(&[0, 300], 8000, 24000);
        assert_eq!(up, vec![0, 100, 200, 300, 300, 300]);
        assert_eq!(resample(&[], 8000, 24000), Vec::<i16>::new());
    }
}
