//! The session's concurrent loops
//!
//! Each loop runs as its own task and coordinates only through
//! [`SessionSignals`], the playback queue and the channels handed to it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::state::{SessionSignals, SessionState};
use crate::live::{LiveReceiver, LiveSender, ServerEvent};
use crate::voice::{
    AudioChunk, AudioDevice, CloudRecognizer, Loudspeaker, Microphone, PhraseSet, PlaybackQueue,
    Transcriber, detect_exit, detect_wake,
};
use crate::Error;

/// Frames buffered for the exit detector before new ones are dropped
pub const EXIT_FEED_CAPACITY: usize = 256;

/// Everything the wake loop needs
pub struct WakeLoop {
    pub microphone: Microphone,
    pub transcriber: Arc<dyn Transcriber>,
    pub phrases: PhraseSet,
    pub listen_timeout: Duration,
    pub phrase_time_limit: Duration,
    pub handoff: oneshot::Sender<Microphone>,
}

/// Listen for the wake phrase, then hand the microphone to the capture loop
pub async fn wake_loop(task: WakeLoop, signals: Arc<SessionSignals>) {
    let WakeLoop {
        microphone,
        transcriber,
        phrases,
        listen_timeout,
        phrase_time_limit,
        handoff,
    } = task;

    tracing::info!(phrases = ?phrases.phrases(), "waiting for wake phrase");

    let mut recognizer = CloudRecognizer::new(microphone, transcriber, phrase_time_limit);
    let woke = detect_wake(
        &mut recognizer,
        &phrases,
        &signals.activated,
        &signals.exit_requested,
        listen_timeout,
    )
    .await;
    let microphone = recognizer.into_source();

    if !woke {
        if !signals.exit_requested.is_set() {
            signals.fail(Error::Audio(
                "microphone closed before wake phrase".to_string(),
            ));
        }
        microphone.close().await;
        return;
    }

    // Audio that queued up during transcription is stale by now
    microphone.discard_pending().await;
    signals.transition(SessionState::Active);
    if let Err(microphone) = handoff.send(microphone) {
        microphone.close().await;
    }
}

/// Listen on the capture loop's tee for an exit phrase
pub async fn exit_loop(
    feed: mpsc::Receiver<AudioChunk>,
    transcriber: Arc<dyn Transcriber>,
    phrases: PhraseSet,
    listen_timeout: Duration,
    phrase_time_limit: Duration,
    signals: Arc<SessionSignals>,
) {
    let mut recognizer = CloudRecognizer::new(feed, transcriber, phrase_time_limit);
    detect_exit(
        &mut recognizer,
        &phrases,
        &signals.activated,
        &signals.exit_requested,
        listen_timeout,
    )
    .await;
}

/// Stream microphone frames to the model while it is not speaking
///
/// Every frame read, sent or suppressed, is also offered to the exit
/// detector. Returns the sender so the caller can close the connection.
pub async fn capture_loop(
    handoff: oneshot::Receiver<Microphone>,
    mut sender: LiveSender,
    feed: mpsc::Sender<AudioChunk>,
    signals: Arc<SessionSignals>,
) -> LiveSender {
    let microphone = tokio::select! {
        () = signals.exit_requested.wait() => return sender,
        microphone = handoff => match microphone {
            Ok(microphone) => microphone,
            Err(_) => return sender,
        },
    };

    tracing::info!("streaming microphone audio");
    let mut suppressed = 0u64;

    while !signals.exit_requested.is_set() {
        let frame = tokio::select! {
            () = signals.exit_requested.wait() => break,
            frame = microphone.read_frame() => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                signals.fail(e);
                break;
            }
        };

        if feed.try_send(frame.clone()).is_err() {
            tracing::trace!("exit detector behind, dropping frame");
        }

        if signals.model_speaking() {
            suppressed += 1;
            continue;
        }

        if let Err(e) = sender.send_audio(&frame).await {
            signals.fail(e);
            break;
        }
    }

    tracing::debug!(
        sent = sender.frames_sent(),
        suppressed,
        "capture loop finished"
    );
    microphone.close().await;
    sender
}

/// Route inbound model events into the playback queue and speaking flag
pub async fn receive_loop(
    mut receiver: LiveReceiver,
    queue: Arc<PlaybackQueue>,
    signals: Arc<SessionSignals>,
) {
    tokio::select! {
        () = signals.exit_requested.wait() => return,
        () = signals.activated.wait() => {}
    }

    loop {
        let event = tokio::select! {
            () = signals.exit_requested.wait() => break,
            event = receiver.next_event() => event,
        };

        match event {
            Some(Ok(ServerEvent::AudioDelta(pcm))) => {
                signals.begin_model_turn();
                tracing::trace!(bytes = pcm.len(), "model audio");
                if !queue.push(pcm).await {
                    break;
                }
            }
            Some(Ok(ServerEvent::TurnComplete)) => signals.end_model_turn(),
            Some(Ok(ServerEvent::SetupAck)) => {
                tracing::debug!("ignoring repeated setup acknowledgment");
            }
            Some(Ok(ServerEvent::Error(reason))) => {
                signals.fail(Error::Protocol(format!("server error: {reason}")));
                break;
            }
            Some(Err(e)) if e.is_fatal() => {
                signals.fail(e);
                break;
            }
            Some(Err(e)) => tracing::warn!(error = %e, "skipping undecodable message"),
            None => {
                if !signals.exit_requested.is_set() {
                    signals.fail(Error::Connection(
                        "live connection closed by server".to_string(),
                    ));
                }
                break;
            }
        }
    }
}

/// Play queued model audio in order
pub async fn playback_loop(
    device: Arc<dyn AudioDevice>,
    queue: Arc<PlaybackQueue>,
    signals: Arc<SessionSignals>,
) {
    tokio::select! {
        () = signals.exit_requested.wait() => return,
        () = signals.activated.wait() => {}
    }

    let speaker = match Loudspeaker::open(device.as_ref()) {
        Ok(speaker) => speaker,
        Err(e) => {
            signals.fail(e);
            return;
        }
    };

    loop {
        let frame = tokio::select! {
            () = signals.exit_requested.wait() => break,
            frame = queue.pop() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        if let Err(e) = speaker.write(frame).await {
            signals.fail(e);
            break;
        }
    }

    speaker.close().await;
}
