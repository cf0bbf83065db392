//! Audio device interface
//!
//! The session only talks to hardware through [`AudioDevice`]; the cpal
//! back-end lives in `capture.rs` and `playback.rs`.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use crate::{Error, Result};

/// Sample rate of captured microphone audio
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of model audio sent to the speakers
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured frame
pub const FRAME_SAMPLES: usize = 512;

/// One PCM frame: 16-bit little-endian, mono
///
/// Cloning is cheap; the payload is reference counted and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk(Bytes);

impl AudioChunk {
    /// Wrap raw little-endian PCM bytes
    #[must_use]
    pub const fn from_bytes(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Encode i16 samples
    #[must_use]
    pub fn from_samples(samples: &[i16]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self(Bytes::from(bytes))
    }

    /// Raw PCM bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the underlying buffer
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Number of bytes in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the frame carries no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode to normalized f32 samples in [-1.0, 1.0]
    #[must_use]
    pub fn to_f32(&self) -> Vec<f32> {
        pcm_to_f32(&self.0)
    }
}

/// Convert a normalized f32 sample to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Decode little-endian i16 PCM bytes to f32; a trailing odd byte is ignored
#[must_use]
pub fn pcm_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// A readable microphone stream
pub trait InputStream: Send {
    /// Block until one full frame is available
    ///
    /// # Errors
    ///
    /// Returns error if the stream has failed or been closed
    fn read_frame(&mut self) -> Result<AudioChunk>;

    /// Drop audio captured but not yet read, returning the sample count
    fn discard_pending(&mut self) -> usize {
        0
    }

    /// Stop the stream and release the device
    fn close(&mut self);
}

/// A writable speaker stream
pub trait OutputStream: Send {
    /// Write PCM bytes, blocking until the device has accepted them
    ///
    /// # Errors
    ///
    /// Returns error if the stream has failed or been closed
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Drain pending audio, then stop the stream and release the device
    fn close(&mut self);
}

/// Opens hardware audio streams
pub trait AudioDevice: Send + Sync {
    /// Open the input device at `sample_rate`, delivering `frame_samples` per read
    ///
    /// # Errors
    ///
    /// Returns error if no suitable input device is available
    fn open_input(&self, sample_rate: u32, frame_samples: usize) -> Result<Box<dyn InputStream>>;

    /// Open the output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device is available
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputStream>>;
}

/// The single owned microphone handle
///
/// Not `Clone`: whoever holds it owns the input device. Reads run on the
/// blocking pool so they never stall the async scheduler.
pub struct Microphone {
    stream: Arc<Mutex<Box<dyn InputStream>>>,
}

impl Microphone {
    /// Open the input device with the session's capture format
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    pub fn open(device: &dyn AudioDevice) -> Result<Self> {
        let stream = device.open_input(INPUT_SAMPLE_RATE, FRAME_SAMPLES)?;
        tracing::debug!(
            sample_rate = INPUT_SAMPLE_RATE,
            frame_samples = FRAME_SAMPLES,
            "microphone opened"
        );
        Ok(Self {
            stream: Arc::new(Mutex::new(stream)),
        })
    }

    /// Read one frame
    ///
    /// # Errors
    ///
    /// Returns error if the read fails or the blocking task panics
    pub async fn read_frame(&self) -> Result<AudioChunk> {
        let stream = Arc::clone(&self.stream);
        tokio::task::spawn_blocking(move || {
            stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read_frame()
        })
        .await
        .map_err(|e| Error::Audio(format!("microphone read task failed: {e}")))?
    }

    /// Drop the backlog that queued up while nobody was reading
    pub async fn discard_pending(&self) {
        let stream = Arc::clone(&self.stream);
        let discarded = tokio::task::spawn_blocking(move || {
            stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .discard_pending()
        })
        .await;
        match discarded {
            Ok(0) => {}
            Ok(samples) => tracing::debug!(samples, "discarded stale microphone audio"),
            Err(e) => tracing::warn!(error = %e, "failed to discard microphone backlog"),
        }
    }

    /// Close the stream, waiting for any in-flight read to finish first
    pub async fn close(self) {
        let stream = self.stream;
        let closed = tokio::task::spawn_blocking(move || {
            stream.lock().unwrap_or_else(PoisonError::into_inner).close();
        })
        .await;
        if let Err(e) = closed {
            tracing::warn!(error = %e, "failed to close microphone");
        }
        tracing::debug!("microphone closed");
    }
}

/// The owned speaker handle
pub struct Loudspeaker {
    stream: Arc<Mutex<Box<dyn OutputStream>>>,
}

impl Loudspeaker {
    /// Open the output device with the model's playback format
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    pub fn open(device: &dyn AudioDevice) -> Result<Self> {
        let stream = device.open_output(OUTPUT_SAMPLE_RATE)?;
        tracing::debug!(sample_rate = OUTPUT_SAMPLE_RATE, "speaker opened");
        Ok(Self {
            stream: Arc::new(Mutex::new(stream)),
        })
    }

    /// Write one frame synchronously (on the blocking pool)
    ///
    /// # Errors
    ///
    /// Returns error if the write fails or the blocking task panics
    pub async fn write(&self, frame: Bytes) -> Result<()> {
        let stream = Arc::clone(&self.stream);
        tokio::task::spawn_blocking(move || {
            stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write(&frame)
        })
        .await
        .map_err(|e| Error::Audio(format!("speaker write task failed: {e}")))?
    }

    /// Drain and close the stream
    pub async fn close(self) {
        let stream = self.stream;
        let closed = tokio::task::spawn_blocking(move || {
            stream.lock().unwrap_or_else(PoisonError::into_inner).close();
        })
        .await;
        if let Err(e) = closed {
            tracing::warn!(error = %e, "failed to close speaker");
        }
        tracing::debug!("speaker closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_from_samples_is_little_endian() {
        let chunk = AudioChunk::from_samples(&[1, -2]);
        assert_eq!(chunk.as_bytes(), &[0x01, 0x00, 0xfe, 0xff]);
        assert_eq!(chunk.len(), 4);
    }

    #[test]
    fn test_pcm_to_f32_ignores_trailing_byte() {
        let samples = pcm_to_f32(&[0x00, 0x40, 0x7f]);
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
        assert_eq!(f32_to_i16(0.0), 0);
    }
}
