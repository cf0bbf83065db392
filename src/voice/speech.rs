//! Interruptible spoken output
//!
//! Replies are split into sentences and spoken one at a time while a stop
//! monitor listens on the microphone. Hearing a stop phrase cancels the
//! shared token: the current sentence is cut off, the rest are skipped and
//! a short acknowledgment is spoken once.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::recognizer::{RecognizerError, SpeechRecognizer};
use super::wake_word::PhraseSet;
use crate::Result;

/// Renders text to mono f32 samples at the output rate
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`
    ///
    /// # Errors
    ///
    /// Returns error if the synthesis request or decoding fails
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>>;
}

/// Plays whole utterances and can be hard-stopped
#[async_trait]
pub trait SpeechOutput: Send {
    /// Play `samples`, returning early once `stop` is cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the output device fails
    async fn play(&mut self, samples: Vec<f32>, stop: &CancellationToken) -> Result<PlaybackEnd>;
}

/// How one utterance's playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Played to the end
    Finished,
    /// Cut off by the stop token
    Stopped,
}

/// How a spoken reply ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Every sentence was spoken
    Completed,
    /// A stop phrase cut the reply short
    Interrupted {
        /// Sentences never started
        skipped: usize,
    },
}

/// Split text into sentences on `.`, `!` and `?`
///
/// Terminators stay attached; a terminator only ends a sentence when
/// followed by whitespace or the end of the text, so `3.5` stays whole.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|next| next.is_whitespace());
        if at_boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Speak `sentences` in order until done or `stop` is cancelled
///
/// # Errors
///
/// Returns error if synthesis or playback fails
pub async fn speak_sentences(
    synthesizer: &dyn SpeechSynthesizer,
    output: &mut dyn SpeechOutput,
    sentences: &[String],
    stop: &CancellationToken,
) -> Result<SpeakOutcome> {
    for (index, sentence) in sentences.iter().enumerate() {
        if stop.is_cancelled() {
            return Ok(SpeakOutcome::Interrupted {
                skipped: sentences.len() - index,
            });
        }

        let samples = synthesizer.synthesize(sentence).await?;
        if stop.is_cancelled() {
            return Ok(SpeakOutcome::Interrupted {
                skipped: sentences.len() - index,
            });
        }

        tracing::debug!(index, sentence = %sentence, "speaking");
        if output.play(samples, stop).await? == PlaybackEnd::Stopped {
            return Ok(SpeakOutcome::Interrupted {
                skipped: sentences.len() - index - 1,
            });
        }
    }

    Ok(SpeakOutcome::Completed)
}

/// Listen for a stop phrase and cancel `stop` when one is heard
///
/// Returns once `stop` is cancelled (by anyone) or the audio source closes.
pub async fn monitor_stop(
    recognizer: &mut dyn SpeechRecognizer,
    stop_phrases: &PhraseSet,
    stop: &CancellationToken,
    timeout: Duration,
) {
    while !stop.is_cancelled() {
        let heard = tokio::select! {
            () = stop.cancelled() => return,
            heard = recognizer.listen(timeout) => heard,
        };

        match heard {
            Ok(text) => {
                if let Some(phrase) = stop_phrases.find(&text) {
                    tracing::info!(phrase, transcript = %text, "stop phrase detected");
                    stop.cancel();
                    return;
                }
                tracing::debug!(transcript = %text, "ignored while speaking");
            }
            Err(RecognizerError::SourceClosed) => return,
            Err(e) if e.is_transient() => {}
            Err(e) => tracing::warn!(error = %e, "stop monitor recognizer error"),
        }
    }
}

/// Speaks replies with barge-in support
pub struct Speaker<'a> {
    /// Text to samples
    pub synthesizer: &'a dyn SpeechSynthesizer,
    /// Speakers
    pub output: &'a mut dyn SpeechOutput,
    /// Phrases that interrupt speech
    pub stop_phrases: &'a PhraseSet,
    /// Spoken once after an interruption
    pub acknowledgment: &'a str,
    /// Per-listen timeout for the stop monitor
    pub listen_timeout: Duration,
}

impl Speaker<'_> {
    /// Speak `text` without listening for interruptions
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    pub async fn say(&mut self, text: &str) -> Result<()> {
        let samples = self.synthesizer.synthesize(text).await?;
        self.output.play(samples, &CancellationToken::new()).await?;
        Ok(())
    }

    /// Speak `text` sentence by sentence while monitoring for a stop phrase
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    pub async fn speak_with_barge_in(
        &mut self,
        text: &str,
        recognizer: &mut dyn SpeechRecognizer,
    ) -> Result<SpeakOutcome> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Ok(SpeakOutcome::Completed);
        }

        let stop = CancellationToken::new();
        let outcome = {
            let speaking = speak_sentences(self.synthesizer, &mut *self.output, &sentences, &stop);
            tokio::pin!(speaking);
            let monitor = monitor_stop(recognizer, self.stop_phrases, &stop, self.listen_timeout);
            tokio::pin!(monitor);

            tokio::select! {
                biased;
                outcome = &mut speaking => outcome,
                () = &mut monitor => speaking.await,
            }
        };
        stop.cancel();

        let outcome = outcome?;
        if let SpeakOutcome::Interrupted { skipped } = outcome {
            tracing::info!(skipped, "speech interrupted");
            self.say(self.acknowledgment).await?;
        }
        Ok(outcome)
    }
}
