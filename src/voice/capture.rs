//! Audio capture from microphone

use std::collections::VecDeque;
use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use super::device::{
    AudioChunk, AudioDevice, InputStream, OutputStream, f32_to_i16,
};
use super::playback::PlaybackStream;
use crate::{Error, Result};

/// Callback buffers held before new input is dropped
const CAPTURE_BACKLOG: usize = 64;

/// The default cpal host's input and output devices
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalDevice;

impl CpalDevice {
    /// Create a handle to the default host
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioDevice for CpalDevice {
    fn open_input(&self, sample_rate: u32, frame_samples: usize) -> Result<Box<dyn InputStream>> {
        Ok(Box::new(CaptureStream::open(sample_rate, frame_samples)?))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputStream>> {
        Ok(Box::new(PlaybackStream::open(sample_rate)?))
    }
}

/// Captures fixed-size frames from the default input device
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread; this
/// handle only holds the receiving end of the sample channel. The channel is
/// bounded; input arriving while it is full is dropped.
pub struct CaptureStream {
    samples: mpsc::Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    frame_samples: usize,
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureStream {
    /// Start capturing from the default input device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(sample_rate: u32, frame_samples: usize) -> Result<Self> {
        let (sample_tx, sample_rx) = mpsc::sync_channel::<Vec<i16>>(CAPTURE_BACKLOG);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let worker = std::thread::Builder::new()
            .name("hivoice-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(sample_rate, sample_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::Audio(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns once the handle sends stop or is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        tracing::debug!("audio capture started");

        Ok(Self {
            samples: sample_rx,
            pending: VecDeque::with_capacity(frame_samples * 4),
            frame_samples,
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }
}

impl InputStream for CaptureStream {
    fn read_frame(&mut self) -> Result<AudioChunk> {
        while self.pending.len() < self.frame_samples {
            let chunk = self
                .samples
                .recv()
                .map_err(|_| Error::Audio("input stream closed".to_string()))?;
            self.pending.extend(chunk);
        }

        let frame: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
        Ok(AudioChunk::from_samples(&frame))
    }

    fn discard_pending(&mut self) -> usize {
        let mut discarded = self.pending.len();
        self.pending.clear();
        while let Ok(chunk) = self.samples.try_recv() {
            discarded += chunk.len();
        }
        discarded
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("capture thread panicked");
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_input_stream(sample_rate: u32, sample_tx: mpsc::SyncSender<Vec<i16>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio capture initialized"
    );

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let frame: Vec<i16> = data.iter().copied().map(f32_to_i16).collect();
                // Never block the audio callback
                let _ = sample_tx.try_send(frame);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(f32_to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
