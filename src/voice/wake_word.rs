//! Wake and exit phrase detection
//!
//! Polls a [`SpeechRecognizer`] with short timeouts and matches each
//! transcript case-insensitively against a configured phrase set.

use std::time::Duration;

use super::recognizer::{RecognizerError, SpeechRecognizer};
use crate::session::Signal;
use crate::{Error, Result};

/// A normalized set of trigger phrases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseSet {
    phrases: Vec<String>,
}

impl PhraseSet {
    /// Create a phrase set
    ///
    /// Phrases are trimmed and lowercased; blank entries are dropped.
    ///
    /// # Errors
    ///
    /// Returns error if no non-blank phrase remains
    pub fn new<I, S>(phrases: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = normalize_phrases(phrases);
        if phrases.is_empty() {
            return Err(Error::Config("phrase set must not be empty".to_string()));
        }
        Ok(Self { phrases })
    }

    /// Return the first phrase contained in `transcript`
    #[must_use]
    pub fn find(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| normalized.contains(phrase.as_str()))
            .map(String::as_str)
    }

    /// Whether any phrase occurs in `transcript`
    #[must_use]
    pub fn matches(&self, transcript: &str) -> bool {
        self.find(transcript).is_some()
    }

    /// The configured phrases
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

/// Trim, lowercase and drop blank phrases
pub fn normalize_phrases<I, S>(phrases: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    phrases
        .into_iter()
        .map(|p| p.as_ref().trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Outcome of one recognition poll
enum Poll {
    Heard(String),
    Retry,
    Closed,
}

async fn poll_once<R: SpeechRecognizer + ?Sized>(
    recognizer: &mut R,
    timeout: Duration,
    detector: &'static str,
) -> Poll {
    match recognizer.listen(timeout).await {
        Ok(text) => Poll::Heard(text),
        Err(RecognizerError::SourceClosed) => {
            tracing::debug!(detector, "audio source closed");
            Poll::Closed
        }
        Err(e) if e.is_transient() => {
            tracing::trace!(detector, reason = %e, "nothing recognized");
            Poll::Retry
        }
        Err(e) => {
            tracing::warn!(detector, error = %e, "recognizer error");
            Poll::Retry
        }
    }
}

/// Listen until a wake phrase is heard, then raise `activated`
///
/// Returns `true` if this call observed activation, `false` if `exit` fired
/// first or the audio source closed.
pub async fn detect_wake<R: SpeechRecognizer + ?Sized>(
    recognizer: &mut R,
    phrases: &PhraseSet,
    activated: &Signal,
    exit: &Signal,
    timeout: Duration,
) -> bool {
    while !activated.is_set() && !exit.is_set() {
        let poll = tokio::select! {
            () = exit.wait() => break,
            () = activated.wait() => break,
            poll = poll_once(recognizer, timeout, "wake") => poll,
        };

        match poll {
            Poll::Heard(text) => {
                if let Some(phrase) = phrases.find(&text) {
                    tracing::info!(phrase, transcript = %text, "wake phrase detected");
                    activated.set();
                } else {
                    tracing::debug!(transcript = %text, "no wake phrase");
                }
            }
            Poll::Retry => {}
            Poll::Closed => return false,
        }
    }

    activated.is_set() && !exit.is_set()
}

/// Once `activated` is raised, listen until an exit phrase is heard, then raise `exit`
///
/// Exit phrases spoken before activation are never consumed here.
pub async fn detect_exit<R: SpeechRecognizer + ?Sized>(
    recognizer: &mut R,
    phrases: &PhraseSet,
    activated: &Signal,
    exit: &Signal,
    timeout: Duration,
) {
    tokio::select! {
        () = exit.wait() => return,
        () = activated.wait() => {}
    }

    tracing::info!(phrases = ?phrases.phrases(), "listening for exit phrase");

    while !exit.is_set() {
        let poll = tokio::select! {
            () = exit.wait() => break,
            poll = poll_once(recognizer, timeout, "exit") => poll,
        };

        match poll {
            Poll::Heard(text) => {
                if let Some(phrase) = phrases.find(&text) {
                    tracing::info!(phrase, transcript = %text, "exit phrase detected");
                    exit.set();
                }
            }
            Poll::Retry => {}
            Poll::Closed => return,
        }
    }
}
