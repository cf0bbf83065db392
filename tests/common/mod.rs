//! Shared test utilities
//!
//! Fakes for the audio device, live connection and transcriber so the
//! session can run end to end without hardware or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use tokio::sync::mpsc;

use hivoice::live::{Connector, LiveSink, LiveSource};
use hivoice::session::SessionConfig;
use hivoice::voice::{
    AudioChunk, AudioDevice, FRAME_SAMPLES, INPUT_SAMPLE_RATE, InputStream, OutputStream,
    PhraseSet, Transcriber, f32_to_i16,
};
use hivoice::{Error, Result};

pub const SETUP_COMPLETE: &str = r#"{"setupComplete":{}}"#;
pub const TURN_COMPLETE: &str = r#"{"serverContent":{"turnComplete":true}}"#;

/// One frame of a 440 Hz tone, loud enough to count as speech
#[allow(clippy::cast_precision_loss)]
pub fn tone_frame() -> AudioChunk {
    let samples: Vec<i16> = (0..FRAME_SAMPLES)
        .map(|i| {
            let t = i as f32 / INPUT_SAMPLE_RATE as f32;
            f32_to_i16(0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin())
        })
        .collect();
    AudioChunk::from_samples(&samples)
}

pub fn silent_frame() -> AudioChunk {
    AudioChunk::from_samples(&[0; FRAME_SAMPLES])
}

/// A spoken utterance: tone followed by enough silence to end it
pub fn utterance() -> Vec<AudioChunk> {
    let mut frames: Vec<AudioChunk> = std::iter::repeat_with(tone_frame).take(20).collect();
    frames.extend(std::iter::repeat_with(silent_frame).take(20));
    frames
}

/// An inbound model audio message carrying `len` bytes of PCM
pub fn audio_message(len: usize) -> String {
    let data = BASE64_STANDARD.encode(vec![1u8; len]);
    format!(r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm","data":"{data}"}}}}]}}}}}}"#)
}

/// Session settings with fast timeouts
pub fn session_config() -> SessionConfig {
    SessionConfig {
        model: "models/test-live".to_string(),
        wake_phrases: PhraseSet::new(["hi voice", "hey assistant"]).unwrap(),
        exit_phrases: PhraseSet::new(["bye", "exit"]).unwrap(),
        listen_timeout: Duration::from_secs(1),
        phrase_time_limit: Duration::from_secs(3),
        setup_timeout: Duration::from_millis(200),
        playback_queue_limit: None,
        shutdown_grace: Duration::from_secs(1),
    }
}

/// Audio device whose microphone plays a script and whose speaker records
#[derive(Default)]
pub struct FakeDevice {
    pub script: Arc<Mutex<VecDeque<AudioChunk>>>,
    pub written: Arc<Mutex<Vec<Vec<u8>>>>,
    pub inputs_opened: AtomicUsize,
    pub outputs_opened: AtomicUsize,
    pub input_closed: Arc<AtomicBool>,
    pub output_closed: Arc<AtomicBool>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue frames for the microphone; silence is read once the script runs dry
    pub fn speak(&self, frames: Vec<AudioChunk>) {
        self.script.lock().unwrap().extend(frames);
    }

    pub fn written_lengths(&self) -> Vec<usize> {
        self.written.lock().unwrap().iter().map(Vec::len).collect()
    }
}

struct FakeInput {
    script: Arc<Mutex<VecDeque<AudioChunk>>>,
    closed: Arc<AtomicBool>,
}

impl InputStream for FakeInput {
    fn read_frame(&mut self) -> Result<AudioChunk> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Audio("input closed".to_string()));
        }
        std::thread::sleep(Duration::from_millis(1));
        let frame = self.script.lock().unwrap().pop_front();
        Ok(frame.unwrap_or_else(silent_frame))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeOutput {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl OutputStream for FakeOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.written.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl AudioDevice for FakeDevice {
    fn open_input(&self, sample_rate: u32, frame_samples: usize) -> Result<Box<dyn InputStream>> {
        assert_eq!(sample_rate, INPUT_SAMPLE_RATE);
        assert_eq!(frame_samples, FRAME_SAMPLES);
        self.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            script: Arc::clone(&self.script),
            closed: Arc::clone(&self.input_closed),
        }))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn OutputStream>> {
        self.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeOutput {
            written: Arc::clone(&self.written),
            closed: Arc::clone(&self.output_closed),
        }))
    }
}

/// Live connection backed by in-memory channels
pub struct FakeConnector {
    pub sent: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    refuse: bool,
}

impl FakeConnector {
    /// Connector plus the handle used to push server messages
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            inbound: Mutex::new(Some(rx)),
            refuse: false,
        });
        (connector, tx)
    }

    /// Connector whose endpoint is unreachable
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            inbound: Mutex::new(None),
            refuse: true,
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn audio_frames_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| m.contains("realtime_input"))
            .count()
    }
}

struct FakeSink {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl LiveSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("closed".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeSource(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl LiveSource for FakeSource {
    async fn next_text(&mut self) -> Option<Result<String>> {
        self.0.recv().await.map(Ok)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<(Box<dyn LiveSink>, Box<dyn LiveSource>)> {
        if self.refuse {
            return Err(Error::Connection("connection refused".to_string()));
        }
        let inbound = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Connection("already connected".to_string()))?;
        Ok((
            Box::new(FakeSink {
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }),
            Box::new(FakeSource(inbound)),
        ))
    }
}

/// Returns queued transcripts (or service failures) in order, then nothing intelligible
#[derive(Default)]
pub struct ScriptedTranscriber {
    transcripts: Mutex<VecDeque<std::result::Result<String, String>>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(transcripts: &[&str]) -> Arc<Self> {
        let script: Vec<_> = transcripts.iter().map(|t| Ok(*t)).collect();
        Self::with_failures(&script)
    }

    /// `Err(reason)` entries make that call fail like an unreachable STT service
    pub fn with_failures(script: &[std::result::Result<&str, &str>]) -> Arc<Self> {
        Arc::new(Self {
            transcripts: Mutex::new(
                script
                    .iter()
                    .map(|entry| (*entry).map(String::from).map_err(String::from))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        assert_eq!(&wav[0..4], b"RIFF");
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.transcripts.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(Error::Stt(reason)),
            None => Ok(String::new()),
        }
    }
}
