//! Energy-based utterance segmentation for the sequential pipeline.
//!
//! Caller audio is cut into utterances with an RMS gate: a run of voiced frames
//! opens an utterance, a run of quiet frames (or the length cap) closes it. A
//! short pre-roll is kept so word onsets are not clipped.

use std::collections::VecDeque;

use crate::core::audio::TELEPHONY_SAMPLE_RATE;

const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

/// Frames kept ahead of the speech onset.
const PRE_ROLL_FRAMES: usize = 10;

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// RMS energy threshold (0.0 to 1.0)
    pub rms_threshold: f32,
    /// Voiced audio needed before an utterance opens
    pub min_speech_ms: u32,
    /// Quiet audio that closes an utterance
    pub silence_ms: u32,
    /// Utterances are cut at this length
    pub max_utterance_ms: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 0.02,
            min_speech_ms: 200,
            silence_ms: 600,
            max_utterance_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Nothing to report
    Pending,
    SpeechStarted,
    /// A finished utterance, PCM16 at 8 kHz
    Utterance(Vec<i16>),
}

#[derive(Debug)]
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    in_speech: bool,
    voiced_run_ms: u32,
    silence_run_ms: u32,
    pre_roll: VecDeque<Vec<i16>>,
    buffer: Vec<i16>,
}

/// RMS energy of PCM samples, normalized to 0.0-1.0.
pub fn rms_energy(pcm: &[i16]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = pcm
        .iter()
        .map(|&s| {
            let sample = s as f32 * PCM_TO_FLOAT_SCALE;
            sample * sample
        })
        .sum();
    (sum_squares / pcm.len() as f32).sqrt()
}

fn duration_ms(samples: usize) -> u32 {
    (samples as u64 * 1000 / TELEPHONY_SAMPLE_RATE as u64) as u32
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            in_speech: false,
            voiced_run_ms: 0,
            silence_run_ms: 0,
            pre_roll: VecDeque::with_capacity(PRE_ROLL_FRAMES),
            buffer: Vec::new(),
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Feed one frame of caller audio.
    pub fn push(&mut self, frame: &[i16]) -> Segment {
        let frame_ms = duration_ms(frame.len());
        let voiced = rms_energy(frame) >= self.config.rms_threshold;

        if !self.in_speech {
            if self.pre_roll.len() == PRE_ROLL_FRAMES {
                self.pre_roll.pop_front();
            }
            self.pre_roll.push_back(frame.to_vec());

            if !voiced {
                self.voiced_run_ms = 0;
                return Segment::Pending;
            }
            self.voiced_run_ms += frame_ms;
            if self.voiced_run_ms < self.config.min_speech_ms {
                return Segment::Pending;
            }

            self.in_speech = true;
            self.silence_run_ms = 0;
            self.buffer = self.pre_roll.drain(..).flatten().collect();
            return Segment::SpeechStarted;
        }

        self.buffer.extend_from_slice(frame);
        if voiced {
            self.silence_run_ms = 0;
        } else {
            self.silence_run_ms += frame_ms;
        }

        if self.silence_run_ms >= self.config.silence_ms
            || duration_ms(self.buffer.len()) >= self.config.max_utterance_ms
        {
            self.in_speech = false;
            self.voiced_run_ms = 0;
            self.silence_run_ms = 0;
            return Segment::Utterance(std::mem::take(&mut self.buffer));
        }
        Segment::Pending
    }
}
