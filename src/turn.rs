//! Turn-based assistant with barge-in
//!
//! A half-duplex alternative to the live session: after the wake phrase,
//! each utterance is sent to a text model and the reply is spoken sentence
//! by sentence. Saying a stop phrase cuts the reply short.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::live::TextGenerator;
use crate::session::Signal;
use crate::voice::{
    PhraseSet, RecognizerError, SpeakOutcome, Speaker, SpeechOutput, SpeechRecognizer,
    SpeechSynthesizer, detect_wake,
};
use crate::{Error, Result};

/// Settings for the turn-based assistant
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Phrases that start the conversation
    pub wake_phrases: PhraseSet,
    /// Phrases that end the conversation
    pub exit_phrases: PhraseSet,
    /// Phrases that interrupt a spoken reply
    pub stop_phrases: PhraseSet,
    /// Spoken once after an interruption
    pub acknowledgment: String,
    /// Spoken after the wake phrase
    pub greeting: String,
    /// Spoken after an exit phrase
    pub farewell: String,
    /// Spoken when the model cannot be reached
    pub apology: String,
    /// Per-listen wait for speech onset
    pub listen_timeout: Duration,
}

impl TurnConfig {
    /// Build from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if a phrase set is empty
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            wake_phrases: PhraseSet::new(&config.phrases.wake)?,
            exit_phrases: PhraseSet::new(&config.phrases.exit)?,
            stop_phrases: PhraseSet::new(&config.phrases.stop)?,
            acknowledgment: config.phrases.acknowledgment.clone(),
            greeting: "Yes?".to_string(),
            farewell: "Goodbye.".to_string(),
            apology: "Sorry, I couldn't get a response.".to_string(),
            listen_timeout: config.listen.timeout(),
        })
    }
}

/// Wake-gated question and answer loop
pub struct TurnAssistant {
    config: TurnConfig,
    recognizer: Box<dyn SpeechRecognizer>,
    generator: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Box<dyn SpeechOutput>,
}

impl TurnAssistant {
    /// Create an assistant; nothing listens until [`run`](Self::run)
    #[must_use]
    pub fn new(
        config: TurnConfig,
        recognizer: Box<dyn SpeechRecognizer>,
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Box<dyn SpeechOutput>,
    ) -> Self {
        Self {
            config,
            recognizer,
            generator,
            synthesizer,
            output,
        }
    }

    /// Run until an exit phrase is heard or `exit` is raised
    ///
    /// # Errors
    ///
    /// Returns error if the microphone or speakers fail
    pub async fn run(self, exit: Signal) -> Result<()> {
        let Self {
            config,
            mut recognizer,
            generator,
            synthesizer,
            mut output,
        } = self;

        let activated = Signal::new();
        tracing::info!(phrases = ?config.wake_phrases.phrases(), "waiting for wake phrase");
        let woke = detect_wake(
            recognizer.as_mut(),
            &config.wake_phrases,
            &activated,
            &exit,
            config.listen_timeout,
        )
        .await;
        if !woke {
            return if exit.is_set() {
                Ok(())
            } else {
                Err(Error::Audio("microphone closed before wake phrase".to_string()))
            };
        }

        let mut speaker = Speaker {
            synthesizer: synthesizer.as_ref(),
            output: output.as_mut(),
            stop_phrases: &config.stop_phrases,
            acknowledgment: &config.acknowledgment,
            listen_timeout: config.listen_timeout,
        };
        speak_or_log(speaker.say(&config.greeting).await)?;

        while !exit.is_set() {
            let heard = tokio::select! {
                () = exit.wait() => break,
                heard = recognizer.listen(config.listen_timeout) => heard,
            };

            let text = match heard {
                Ok(text) => text,
                Err(RecognizerError::SourceClosed) => {
                    return Err(Error::Audio("microphone closed".to_string()));
                }
                Err(e) if e.is_transient() => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "recognizer error");
                    continue;
                }
            };

            if let Some(phrase) = config.exit_phrases.find(&text) {
                tracing::info!(phrase, "exit phrase detected");
                speak_or_log(speaker.say(&config.farewell).await)?;
                exit.set();
                break;
            }

            tracing::info!(prompt = %text, "user turn");
            let reply = match generator.generate(&text).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(error = %e, "generation failed");
                    speak_or_log(speaker.say(&config.apology).await)?;
                    continue;
                }
            };

            tracing::debug!(reply = %reply, "model reply");
            let outcome = speaker.speak_with_barge_in(&reply, recognizer.as_mut()).await;
            if matches!(outcome, Ok(SpeakOutcome::Completed)) {
                tracing::debug!("reply finished");
            }
            speak_or_log(outcome.map(|_| ()))?;
        }

        tracing::info!("goodbye");
        Ok(())
    }
}

/// Device failures end the loop; anything else is logged and skipped
fn speak_or_log(result: Result<()>) -> Result<()> {
    match result {
        Err(e @ Error::Audio(_)) => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "failed to speak");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::voice::PlaybackEnd;

    struct ScriptedRecognizer(VecDeque<&'static str>);

    #[async_trait]
    impl SpeechRecognizer for ScriptedRecognizer {
        async fn listen(&mut self, _timeout: Duration) -> std::result::Result<String, RecognizerError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.0
                .pop_front()
                .map(String::from)
                .ok_or(RecognizerError::SourceClosed)
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if prompt.contains("fail") {
                return Err(Error::Generation("unavailable".to_string()));
            }
            Ok("It is noon. Enjoy!".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingSynth(Mutex<Vec<String>>);

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynth {
        async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(vec![0.0; 10])
        }
    }

    struct InstantOutput;

    #[async_trait]
    impl SpeechOutput for InstantOutput {
        async fn play(&mut self, _samples: Vec<f32>, _stop: &CancellationToken) -> Result<PlaybackEnd> {
            Ok(PlaybackEnd::Finished)
        }
    }

    fn assistant(script: &[&'static str], synth: Arc<RecordingSynth>) -> TurnAssistant {
        let config = TurnConfig {
            wake_phrases: PhraseSet::new(["hi voice"]).unwrap(),
            exit_phrases: PhraseSet::new(["bye"]).unwrap(),
            stop_phrases: PhraseSet::new(["stop"]).unwrap(),
            acknowledgment: "Okay, stopping.".to_string(),
            greeting: "Yes?".to_string(),
            farewell: "Goodbye.".to_string(),
            apology: "Sorry.".to_string(),
            listen_timeout: Duration::from_secs(1),
        };
        TurnAssistant::new(
            config,
            Box::new(ScriptedRecognizer(script.iter().copied().collect())),
            Arc::new(EchoGenerator),
            synth,
            Box::new(InstantOutput),
        )
    }

    #[tokio::test]
    async fn test_wake_question_and_exit() {
        let synth = Arc::new(RecordingSynth::default());
        let exit = Signal::new();
        let assistant = assistant(
            &["what's up", "hi voice", "what time is it", "bye"],
            Arc::clone(&synth),
        );

        assistant.run(exit.clone()).await.unwrap();

        assert!(exit.is_set());
        assert_eq!(
            *synth.0.lock().unwrap(),
            vec!["Yes?", "It is noon.", "Enjoy!", "Goodbye."]
        );
    }

    #[tokio::test]
    async fn test_generation_failure_is_spoken() {
        let synth = Arc::new(RecordingSynth::default());
        let assistant = assistant(&["hi voice", "please fail", "bye"], Arc::clone(&synth));

        assistant.run(Signal::new()).await.unwrap();

        assert_eq!(*synth.0.lock().unwrap(), vec!["Yes?", "Sorry.", "Goodbye."]);
    }

    #[tokio::test]
    async fn test_exit_before_wake_returns_quietly() {
        let synth = Arc::new(RecordingSynth::default());
        let exit = Signal::new();
        exit.set();

        assistant(&["hi voice"], Arc::clone(&synth)).run(exit).await.unwrap();
        assert!(synth.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_microphone_is_an_error() {
        let synth = Arc::new(RecordingSynth::default());
        let result = assistant(&["hi voice"], synth).run(Signal::new()).await;
        assert!(matches!(result, Err(Error::Audio(_))));
    }
}
