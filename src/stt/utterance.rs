//! Single-utterance recognizer over a batch transcription API
//!
//! Decodes the μ-law stream, endpoints one utterance locally and sends it
//! as a WAV upload. Emits an interim event at speech onset and one final
//! transcript per session.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    DetectorStep, RecognitionConfig, RecognitionEngine, SpeechToText, TranscriptEvent,
    TranscriptSender, UtteranceDetector,
};
use crate::audio::{codec, samples_to_wav};
use crate::Result;

/// Endpointing recognizer backed by [`SpeechToText`]
#[derive(Debug)]
pub struct UtteranceRecognizer {
    stt: SpeechToText,
}

impl UtteranceRecognizer {
    #[must_use]
    pub const fn new(stt: SpeechToText) -> Self {
        Self { stt }
    }
}

#[async_trait]
impl RecognitionEngine for UtteranceRecognizer {
    async fn recognize(
        &self,
        config: &RecognitionConfig,
        mut audio: mpsc::Receiver<Vec<u8>>,
        transcripts: TranscriptSender,
    ) -> Result<()> {
        let mut detector = UtteranceDetector::new();

        loop {
            let Some(chunk) = audio.recv().await else {
                // Session closed before an utterance completed
                return Ok(());
            };

            match detector.push(&codec::decode_samples(&chunk)) {
                DetectorStep::Continue => {}
                DetectorStep::SpeechStarted => {
                    if config.interim_results {
                        transcripts.send(TranscriptEvent::interim(""));
                    }
                }
                DetectorStep::Complete => {
                    let utterance = detector.take_utterance();
                    let wav = samples_to_wav(&utterance, config.sample_rate_hz)?;
                    let transcription = self
                        .stt
                        .transcribe(&wav, &config.language, config.punctuation)
                        .await?;

                    let text = transcription.text.trim();
                    if !text.is_empty() {
                        transcripts.send(TranscriptEvent {
                            text: text.to_string(),
                            is_final: true,
                            confidence: transcription.confidence,
                        });
                        if config.single_utterance {
                            return Ok(());
                        }
                    } else if config.single_utterance {
                        tracing::debug!(generation = transcripts.generation(), "utterance had no words");
                        return Ok(());
                    }
                }
            }
        }
    }
}
