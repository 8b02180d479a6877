//! Paced telephony writer.
//!
//! Drains the outbound queue at real-time pace, one 20 ms frame per tick, and
//! reports when assistant audio starts and stops actually leaving the gateway.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::CallOutput;
use super::outbound::SharedOutboundQueue;
use super::recorder::SharedRecorder;
use crate::core::audio::FRAME_DURATION_MS;
use crate::core::audio::codec::mulaw_sample;

/// Playback feedback for the call task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// First frame of a response was written
    Started { response_id: String },
    /// The queue ran dry after writing frames of this response
    Drained { response_id: String },
}

pub struct TelephonyWriter {
    pub call_id: String,
    pub queue: SharedOutboundQueue,
    pub output: mpsc::Sender<CallOutput>,
    pub playback: mpsc::Sender<PlaybackEvent>,
    pub recorder: Option<SharedRecorder>,
    pub token: CancellationToken,
}

impl TelephonyWriter {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval(Duration::from_millis(FRAME_DURATION_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current: Option<String> = None;
        let mut frames_sent: u64 = 0;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    let next = self.queue.lock().pop();
                    match next {
                        Some(frame) => {
                            if current.as_deref() != Some(frame.response_id.as_str()) {
                                current = Some(frame.response_id.clone());
                                let started = PlaybackEvent::Started {
                                    response_id: frame.response_id.clone(),
                                };
                                if self.playback.send(started).await.is_err() {
                                    break;
                                }
                            }

                            if let Some(recorder) = &self.recorder {
                                let pcm: Vec<i16> =
                                    frame.payload.iter().map(|&b| mulaw_sample(b)).collect();
                                recorder.lock().write_assistant(Instant::now(), &pcm);
                            }

                            if self.output.send(CallOutput::Media(frame.payload)).await.is_err() {
                                break;
                            }
                            frames_sent += 1;
                        }
                        None => {
                            if let Some(response_id) = current.take()
                                && self
                                    .playback
                                    .send(PlaybackEvent::Drained { response_id })
                                    .await
                                    .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!(call_id = %self.call_id, frames_sent, "Telephony writer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::FRAME_BYTES;
    use crate::core::call::outbound::{OutboundFrame, OutboundQueue};

    #[tokio::test(start_paused = true)]
    async fn test_writer_paces_and_reports_playback() {
        let queue = OutboundQueue::shared("call", 16);
        {
            let mut q = queue.lock();
            for i in 0..3u8 {
                q.push(OutboundFrame {
                    response_id: "r1".into(),
                    payload: [i; FRAME_BYTES],
                });
            }
        }
        let (output_tx, mut output_rx) = mpsc::channel(16);
        let (playback_tx, mut playback_rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let handle = TelephonyWriter {
            call_id: "call".into(),
            queue: queue.clone(),
            output: output_tx,
            playback: playback_tx,
            recorder: None,
            token: token.clone(),
        }
        .spawn();

        assert_eq!(
            playback_rx.recv().await,
            Some(PlaybackEvent::Started {
                response_id: "r1".into()
            })
        );

        let start = Instant::now();
        for i in 0..3u8 {
            match output_rx.recv().await {
                Some(CallOutput::Media(payload)) => assert_eq!(payload[0], i),
                other => panic!("unexpected output {other:?}"),
            }
        }
        assert!(Instant::now() - start >= Duration::from_millis(40));

        assert_eq!(
            playback_rx.recv().await,
            Some(PlaybackEvent::Drained {
                response_id: "r1".into()
            })
        );

        token.cancel();
        handle.await.unwrap();
    }
}
