//! Wake-gated duplex streaming session
//!
//! ```text
//!  microphone ──▶ wake loop ──(handoff)──▶ capture loop ──▶ live sender
//!                                            │ tee
//!                                            ▼
//!                                        exit loop
//!  live receiver ──▶ receive loop ──▶ playback queue ──▶ playback loop ──▶ speaker
//! ```
//!
//! All loops observe `exit_requested`; whichever source raises it (exit
//! phrase, ctrl-c, a fatal loop error) shuts the whole session down.

mod loops;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

pub use state::{SessionSignals, SessionState, Signal};

use crate::config::Config;
use crate::live::{Connector, LiveReceiver, LiveSender, handshake};
use crate::voice::{AudioDevice, Microphone, PhraseSet, PlaybackQueue, Transcriber};
use crate::Result;
use loops::{EXIT_FEED_CAPACITY, WakeLoop};

/// How long loops get to finish after shutdown starts
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Settings for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Live model id sent in the setup frame
    pub model: String,
    /// Phrases that activate streaming
    pub wake_phrases: PhraseSet,
    /// Phrases that end the session once active
    pub exit_phrases: PhraseSet,
    /// Per-listen wait for speech onset
    pub listen_timeout: Duration,
    /// Longest single utterance
    pub phrase_time_limit: Duration,
    /// Wait for the setup acknowledgment
    pub setup_timeout: Duration,
    /// Optional bound on queued model audio frames
    pub playback_queue_limit: Option<usize>,
    /// Time loops get to wind down before being aborted
    pub shutdown_grace: Duration,
}

impl SessionConfig {
    /// Build from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if a phrase set is empty
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            model: config.live.model.clone(),
            wake_phrases: PhraseSet::new(&config.phrases.wake)?,
            exit_phrases: PhraseSet::new(&config.phrases.exit)?,
            listen_timeout: config.listen.timeout(),
            phrase_time_limit: config.listen.phrase_time_limit(),
            setup_timeout: config.live.setup_timeout(),
            playback_queue_limit: config.live.playback_queue_limit,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }
}

/// One wake-gated conversation with the live model
pub struct Session {
    config: SessionConfig,
    device: Arc<dyn AudioDevice>,
    connector: Arc<dyn Connector>,
    transcriber: Arc<dyn Transcriber>,
    signals: Arc<SessionSignals>,
}

impl Session {
    /// Create a session; nothing is opened until [`run`](Self::run)
    #[must_use]
    pub fn new(
        config: SessionConfig,
        device: Arc<dyn AudioDevice>,
        connector: Arc<dyn Connector>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            config,
            device,
            connector,
            transcriber,
            signals: Arc::new(SessionSignals::new()),
        }
    }

    /// Observe lifecycle state changes
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.signals.subscribe()
    }

    /// Handle that ends the session when set, e.g. from a ctrl-c handler
    #[must_use]
    pub fn exit_signal(&self) -> Signal {
        self.signals.exit_requested.clone()
    }

    /// Connect, wait for the wake phrase, stream until an exit phrase
    ///
    /// # Errors
    ///
    /// Returns error if the connection or setup handshake fails, the audio
    /// device cannot be opened, or a loop hits a fatal error
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            device,
            connector,
            transcriber,
            signals,
        } = self;

        let (sink, source) = connector.connect().await?;
        let mut sender = LiveSender::new(sink);
        let mut receiver = LiveReceiver::new(source);

        handshake(
            &mut sender,
            &mut receiver,
            &config.model,
            config.setup_timeout,
        )
        .await?;
        tracing::info!(model = %config.model, "session ready");

        let microphone = match Microphone::open(device.as_ref()) {
            Ok(microphone) => microphone,
            Err(e) => {
                sender.close().await;
                return Err(e);
            }
        };
        signals.transition(SessionState::Armed);

        let queue = Arc::new(PlaybackQueue::with_limit(config.playback_queue_limit));
        let (handoff_tx, handoff_rx) = oneshot::channel();
        let (feed_tx, feed_rx) = mpsc::channel(EXIT_FEED_CAPACITY);

        let wake = tokio::spawn(loops::wake_loop(
            WakeLoop {
                microphone,
                transcriber: Arc::clone(&transcriber),
                phrases: config.wake_phrases.clone(),
                listen_timeout: config.listen_timeout,
                phrase_time_limit: config.phrase_time_limit,
                handoff: handoff_tx,
            },
            Arc::clone(&signals),
        ));
        let exit = tokio::spawn(loops::exit_loop(
            feed_rx,
            Arc::clone(&transcriber),
            config.exit_phrases.clone(),
            config.listen_timeout,
            config.phrase_time_limit,
            Arc::clone(&signals),
        ));
        let capture = tokio::spawn(loops::capture_loop(
            handoff_rx,
            sender,
            feed_tx,
            Arc::clone(&signals),
        ));
        let receive = tokio::spawn(loops::receive_loop(
            receiver,
            Arc::clone(&queue),
            Arc::clone(&signals),
        ));
        let playback = tokio::spawn(loops::playback_loop(
            Arc::clone(&device),
            Arc::clone(&queue),
            Arc::clone(&signals),
        ));

        signals.exit_requested.wait().await;
        signals.transition(SessionState::Closing);
        tracing::info!("shutting down");

        let dropped = queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded unplayed audio");
        }
        queue.close();

        let aborts = [
            wake.abort_handle(),
            exit.abort_handle(),
            capture.abort_handle(),
            receive.abort_handle(),
            playback.abort_handle(),
        ];
        let joined = tokio::time::timeout(config.shutdown_grace, async move {
            let sender = capture.await;
            for handle in [wake, exit, receive, playback] {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "session task failed");
                }
            }
            sender
        })
        .await;

        match joined {
            Ok(Ok(sender)) => sender.close().await,
            Ok(Err(e)) => tracing::warn!(error = %e, "capture task failed"),
            Err(_) => {
                tracing::warn!(grace = ?config.shutdown_grace, "tasks did not stop in time, aborting");
                for abort in &aborts {
                    abort.abort();
                }
            }
        }

        match signals.take_failure() {
            Some(e) => Err(e),
            None => {
                tracing::info!("goodbye");
                Ok(())
            }
        }
    }
}
