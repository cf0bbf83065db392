//! Session lifecycle state and cross-task signals

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet connected
    Idle,
    /// Connected and handshaken, waiting for the wake phrase
    Armed,
    /// Streaming microphone audio to the model
    Active,
    /// Model audio is arriving; microphone frames are withheld
    Speaking,
    /// Shutting down
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Active => "active",
            Self::Speaking => "speaking",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// A one-way flag: once set it stays set, and waiters wake up
#[derive(Debug, Clone, Default)]
pub struct Signal(CancellationToken);

impl Signal {
    /// Create an unset signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; idempotent
    pub fn set(&self) {
        self.0.cancel();
    }

    /// Whether the signal has been raised
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Wait until the signal is raised
    pub async fn wait(&self) {
        self.0.cancelled().await;
    }
}

/// Everything the session's concurrent loops coordinate through
#[derive(Debug)]
pub struct SessionSignals {
    /// Wake phrase heard
    pub activated: Signal,
    /// Exit phrase heard, ctrl-c pressed or a loop failed
    pub exit_requested: Signal,
    model_speaking: AtomicBool,
    state: watch::Sender<SessionState>,
    failure: Mutex<Option<Error>>,
}

impl Default for SessionSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSignals {
    /// Fresh signals in the `Idle` state
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            activated: Signal::new(),
            exit_requested: Signal::new(),
            model_speaking: AtomicBool::new(false),
            state,
            failure: Mutex::new(None),
        }
    }

    /// Whether the model is currently producing audio
    #[must_use]
    pub fn model_speaking(&self) -> bool {
        self.model_speaking.load(Ordering::Acquire)
    }

    /// First audio of a model turn arrived
    pub fn begin_model_turn(&self) {
        if !self.model_speaking.swap(true, Ordering::AcqRel) {
            tracing::info!("model speaking");
            self.transition(SessionState::Speaking);
        }
    }

    /// The model finished its turn
    pub fn end_model_turn(&self) {
        if self.model_speaking.swap(false, Ordering::AcqRel) {
            tracing::info!("model turn complete");
        }
        if self.activated.is_set() {
            self.transition(SessionState::Active);
        }
    }

    /// Move to `next`; `Closing` is terminal
    pub fn transition(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next || *current == SessionState::Closing {
                return false;
            }
            tracing::debug!(from = %current, to = %next, "session state");
            *current = next;
            true
        });
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Record a fatal error and request shutdown; only the first error is kept
    pub fn fail(&self, error: Error) {
        tracing::error!(error = %error, "session failed");
        {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if failure.is_none() {
                *failure = Some(error);
            }
        }
        self.exit_requested.set();
    }

    /// Take the recorded failure, if any
    pub fn take_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
