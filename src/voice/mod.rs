//! Voice processing module
//!
//! Handles audio devices, speech recognition, wake/exit phrase detection,
//! the playback buffer and interruptible speech output.

mod capture;
pub mod device;
mod playback;
pub mod queue;
pub mod recognizer;
pub mod speech;
mod stt;
mod tts;
pub mod wake_word;

pub use capture::{CaptureStream, CpalDevice, samples_to_wav};
pub use device::{
    AudioChunk, AudioDevice, FRAME_SAMPLES, INPUT_SAMPLE_RATE, InputStream, Loudspeaker,
    Microphone, OUTPUT_SAMPLE_RATE, OutputStream, f32_to_i16, pcm_to_f32,
};
pub use playback::{AudioPlayback, PlaybackStream, decode_mp3, resample};
pub use queue::PlaybackQueue;
pub use recognizer::{
    CloudRecognizer, FrameSource, RecognizerError, SpeechRecognizer, Transcriber,
    UtteranceSegmenter,
};
pub use speech::{PlaybackEnd, SpeakOutcome, Speaker, SpeechOutput, SpeechSynthesizer};
pub use stt::{SpeechToText, SttProvider};
pub use tts::{TextToSpeech, TtsProvider};
pub use wake_word::{PhraseSet, detect_exit, detect_wake};
