//! Speech recognition over a frame source
//!
//! Utterances are segmented locally by signal energy, encoded as WAV and
//! handed to a cloud [`Transcriber`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::capture::samples_to_wav;
use super::device::{AudioChunk, INPUT_SAMPLE_RATE, Microphone};
use crate::Result;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to trigger (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Why a `listen` call produced no transcript
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecognizerError {
    /// No speech started within the listen timeout
    #[error("no speech before timeout")]
    Timeout,

    /// Speech was captured but nothing intelligible came back
    #[error("speech was unintelligible")]
    Unintelligible,

    /// The transcription service failed
    #[error("recognition service error: {0}")]
    Service(String),

    /// The frame source is gone; no further audio will arrive
    #[error("audio source closed")]
    SourceClosed,
}

impl RecognizerError {
    /// Whether the caller should simply listen again without logging
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unintelligible)
    }
}

/// Produces recognized text from the microphone
#[async_trait]
pub trait SpeechRecognizer: Send {
    /// Wait up to `timeout` for speech to start, then return its transcript
    async fn listen(&mut self, timeout: Duration) -> std::result::Result<String, RecognizerError>;
}

/// Turns WAV audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if the transcription request fails
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;
}

/// Somewhere frames can be pulled from
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is closed
    async fn next_frame(&mut self) -> Option<AudioChunk>;
}

#[async_trait]
impl FrameSource for Microphone {
    async fn next_frame(&mut self) -> Option<AudioChunk> {
        match self.read_frame().await {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!(error = %e, "microphone read failed");
                None
            }
        }
    }
}

#[async_trait]
impl FrameSource for mpsc::Receiver<AudioChunk> {
    async fn next_frame(&mut self) -> Option<AudioChunk> {
        self.recv().await
    }
}

/// State of the utterance segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Detected speech, accumulating
    Listening,
}

/// What a block of samples did to the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Still waiting for speech
    Waiting,
    /// Inside an utterance
    Speaking,
    /// Enough speech followed by enough silence
    Complete,
}

/// Energy-based utterance segmentation
#[derive(Debug)]
pub struct UtteranceSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceSegmenter {
    /// Create an idle segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            speech_samples: 0,
            silence_counter: 0,
        }
    }

    /// Feed samples
    pub fn push(&mut self, samples: &[f32]) -> SegmentEvent {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.speech_samples = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                    return SegmentEvent::Speaking;
                }
                SegmentEvent::Waiting
            }
            SegmenterState::Listening => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter <= SILENCE_SAMPLES {
                    return SegmentEvent::Speaking;
                }

                // Trailing silence does not count toward the minimum
                if self.speech_samples > MIN_SPEECH_SAMPLES {
                    tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                    return SegmentEvent::Complete;
                }

                tracing::trace!(voiced = self.speech_samples, "too little speech, resetting");
                self.reset();
                SegmentEvent::Waiting
            }
        }
    }

    /// Get the accumulated speech buffer
    #[must_use]
    pub fn speech_buffer(&self) -> &[f32] {
        &self.speech_buffer
    }

    /// Take the speech buffer and return to idle
    pub fn take_speech_buffer(&mut self) -> Vec<f32> {
        let buffer = std::mem::take(&mut self.speech_buffer);
        self.reset();
        buffer
    }

    /// Reset to idle
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

/// Recognizer that segments frames locally and transcribes in the cloud
pub struct CloudRecognizer<S> {
    source: S,
    transcriber: Arc<dyn Transcriber>,
    segmenter: UtteranceSegmenter,
    phrase_time_limit: Duration,
}

impl<S: FrameSource> CloudRecognizer<S> {
    /// Create a recognizer reading from `source`
    pub fn new(source: S, transcriber: Arc<dyn Transcriber>, phrase_time_limit: Duration) -> Self {
        Self {
            source,
            transcriber,
            segmenter: UtteranceSegmenter::new(),
            phrase_time_limit,
        }
    }

    /// Give the frame source back
    pub fn into_source(self) -> S {
        self.source
    }

    /// Read frames until an utterance is complete
    async fn capture_utterance(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Vec<f32>, RecognizerError> {
        self.segmenter.reset();

        let timeout_samples = samples_in(timeout);
        let limit_samples = samples_in(self.phrase_time_limit);
        let mut waited = 0usize;

        loop {
            let frame = self
                .source
                .next_frame()
                .await
                .ok_or(RecognizerError::SourceClosed)?;
            let samples = frame.to_f32();

            match self.segmenter.push(&samples) {
                SegmentEvent::Waiting => {
                    waited += samples.len();
                    if waited >= timeout_samples {
                        return Err(RecognizerError::Timeout);
                    }
                }
                SegmentEvent::Speaking => {
                    if self.segmenter.speech_buffer().len() >= limit_samples {
                        tracing::debug!("phrase time limit reached");
                        break;
                    }
                }
                SegmentEvent::Complete => break,
            }
        }

        Ok(self.segmenter.take_speech_buffer())
    }
}

#[async_trait]
impl<S: FrameSource> SpeechRecognizer for CloudRecognizer<S> {
    async fn listen(&mut self, timeout: Duration) -> std::result::Result<String, RecognizerError> {
        let speech = self.capture_utterance(timeout).await?;

        let wav = samples_to_wav(&speech, INPUT_SAMPLE_RATE)
            .map_err(|e| RecognizerError::Service(e.to_string()))?;
        let text = self
            .transcriber
            .transcribe(wav)
            .await
            .map_err(|e| RecognizerError::Service(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(RecognizerError::Unintelligible);
        }
        tracing::debug!(transcript = text, "recognized speech");
        Ok(text.to_string())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn samples_in(duration: Duration) -> usize {
    (duration.as_secs_f64() * f64::from(INPUT_SAMPLE_RATE)) as usize
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::voice::device::{FRAME_SAMPLES, f32_to_i16};

    struct ScriptedFrames(VecDeque<AudioChunk>);

    #[async_trait]
    impl FrameSource for ScriptedFrames {
        async fn next_frame(&mut self) -> Option<AudioChunk> {
            self.0.pop_front()
        }
    }

    struct FixedTranscriber {
        text: String,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
            assert_eq!(&wav[0..4], b"RIFF");
            *self.calls.lock().unwrap() += 1;
            Ok(self.text.clone())
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn tone_frame() -> AudioChunk {
        let samples: Vec<i16> = (0..FRAME_SAMPLES)
            .map(|i| {
                let t = i as f32 / INPUT_SAMPLE_RATE as f32;
                f32_to_i16(0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin())
            })
            .collect();
        AudioChunk::from_samples(&samples)
    }

    fn silent_frame() -> AudioChunk {
        AudioChunk::from_samples(&[0; FRAME_SAMPLES])
    }

    fn frames(tone: usize, silence: usize) -> ScriptedFrames {
        let mut script = VecDeque::new();
        script.extend(std::iter::repeat_with(tone_frame).take(tone));
        script.extend(std::iter::repeat_with(silent_frame).take(silence));
        ScriptedFrames(script)
    }

    fn recognizer(source: ScriptedFrames, text: &str) -> CloudRecognizer<ScriptedFrames> {
        let transcriber = Arc::new(FixedTranscriber {
            text: text.to_string(),
            calls: Mutex::new(0),
        });
        CloudRecognizer::new(source, transcriber, Duration::from_secs(3))
    }

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn test_segmenter_completes_after_trailing_silence() {
        let mut segmenter = UtteranceSegmenter::new();
        let tone = tone_frame().to_f32();
        let silence = silent_frame().to_f32();

        assert_eq!(segmenter.push(&silence), SegmentEvent::Waiting);
        assert_eq!(segmenter.push(&tone), SegmentEvent::Speaking);
        assert_eq!(segmenter.state(), SegmenterState::Listening);

        for _ in 0..10 {
            segmenter.push(&tone);
        }
        let mut event = SegmentEvent::Speaking;
        for _ in 0..20 {
            event = segmenter.push(&silence);
            if event == SegmentEvent::Complete {
                break;
            }
        }
        assert_eq!(event, SegmentEvent::Complete);
    }

    #[test]
    fn test_short_noise_resets_without_completing() {
        let mut segmenter = UtteranceSegmenter::new();
        let tone = tone_frame().to_f32();
        let silence = silent_frame().to_f32();

        assert_eq!(segmenter.push(&tone), SegmentEvent::Speaking);
        let events: Vec<SegmentEvent> = (0..40).map(|_| segmenter.push(&silence)).collect();

        assert!(!events.contains(&SegmentEvent::Complete));
        assert_eq!(events.last(), Some(&SegmentEvent::Waiting));
        assert_eq!(segmenter.state(), SegmenterState::Idle);
        assert!(segmenter.speech_buffer().is_empty());
    }

    #[tokio::test]
    async fn test_short_noise_is_not_transcribed() {
        let transcriber = Arc::new(FixedTranscriber {
            text: "noise".to_string(),
            calls: Mutex::new(0),
        });
        let mut recognizer =
            CloudRecognizer::new(frames(1, 60), transcriber.clone(), Duration::from_secs(3));

        let result = recognizer.listen(Duration::from_secs(1)).await;

        assert_eq!(result, Err(RecognizerError::Timeout));
        assert_eq!(*transcriber.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_take_speech_buffer_resets() {
        let mut segmenter = UtteranceSegmenter::new();
        let tone = tone_frame().to_f32();
        segmenter.push(&tone);

        let taken = segmenter.take_speech_buffer();
        assert_eq!(taken.len(), tone.len());
        assert!(segmenter.speech_buffer().is_empty());
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }

    #[tokio::test]
    async fn test_listen_times_out_on_silence() {
        // 1s of silence is 31.25 frames
        let mut recognizer = recognizer(frames(0, 40), "ignored");
        let result = recognizer.listen(Duration::from_secs(1)).await;
        assert_eq!(result, Err(RecognizerError::Timeout));
    }

    #[tokio::test]
    async fn test_listen_transcribes_utterance() {
        let mut recognizer = recognizer(frames(20, 20), "  Hi Voice ");
        let text = recognizer.listen(Duration::from_secs(1)).await.unwrap();
        assert_eq!(text, "Hi Voice");
    }

    #[tokio::test]
    async fn test_empty_transcript_is_unintelligible() {
        let mut recognizer = recognizer(frames(20, 20), "   ");
        let result = recognizer.listen(Duration::from_secs(1)).await;
        assert_eq!(result, Err(RecognizerError::Unintelligible));
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_exhausted_source_is_closed() {
        let mut recognizer = recognizer(frames(5, 0), "ignored");
        let result = recognizer.listen(Duration::from_secs(1)).await;
        assert_eq!(result, Err(RecognizerError::SourceClosed));
    }

    #[tokio::test]
    async fn test_phrase_time_limit_cuts_long_speech() {
        // 200 frames of tone is ~6.4s, the limit is 3s
        let mut recognizer = recognizer(frames(200, 0), "long");
        assert_eq!(recognizer.listen(Duration::from_secs(1)).await.unwrap(), "long");
    }
}
