//! Audio playback to speakers

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio_util::sync::CancellationToken;

use super::device::{OUTPUT_SAMPLE_RATE, OutputStream, pcm_to_f32};
use super::speech::{PlaybackEnd, SpeechOutput};
use crate::{Error, Result};

/// Poll interval while waiting on the output callback
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Extra time allowed beyond the nominal audio duration
const DRAIN_SLACK: Duration = Duration::from_millis(500);

/// Input frames per resampler pass
const RESAMPLE_CHUNK: usize = 1024;

fn default_output_device() -> Result<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))
}

fn output_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    Ok(supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config())
}

/// Nominal playback time of `samples` mono samples
fn duration_of(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_millis((samples as u64 * 1000) / u64::from(sample_rate.max(1)))
}

/// Streaming speaker output fed frame by frame
///
/// The cpal stream is owned by a worker thread; writes push samples into a
/// shared queue that the output callback drains.
pub struct PlaybackStream {
    queue: Arc<Mutex<VecDeque<f32>>>,
    sample_rate: u32,
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackStream {
    /// Start the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(sample_rate: u32) -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let callback_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("hivoice-playback".to_string())
            .spawn(move || {
                let stream = match build_streaming_output(sample_rate, callback_queue) {
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

                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio playback stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited during startup".to_string()))??;

        Ok(Self {
            queue,
            sample_rate,
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    fn queued(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Block until at most `low_water` samples remain queued
    fn wait_for_drain(&self, low_water: usize) {
        let deadline = Instant::now() + duration_of(self.queued(), self.sample_rate) + DRAIN_SLACK;
        while self.queued() > low_water {
            if Instant::now() > deadline {
                tracing::warn!(queued = self.queued(), "playback drain timed out");
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl OutputStream for PlaybackStream {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        if self.stop.is_none() {
            return Err(Error::Audio("output stream closed".to_string()));
        }

        let samples = pcm_to_f32(pcm);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(samples);

        // Keep roughly 50ms buffered so writes pace with the device
        self.wait_for_drain(self.sample_rate as usize / 20);
        Ok(())
    }

    fn close(&mut self) {
        if self.stop.is_none() {
            return;
        }
        self.wait_for_drain(0);

        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("playback thread panicked");
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_streaming_output(sample_rate: u32, queue: Arc<Mutex<VecDeque<f32>>>) -> Result<Stream> {
    let device = default_output_device()?;
    let config = output_config(&device, sample_rate)?;
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "streaming playback initialized"
    );

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Plays whole utterances to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let device = default_output_device()?;
        let config = output_config(&device, OUTPUT_SAMPLE_RATE)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = OUTPUT_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Play audio from MP3 bytes to completion
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_mp3(&mut self, mp3_data: &[u8]) -> Result<()> {
        let samples = decode_mp3(mp3_data)?;
        self.play(samples, &CancellationToken::new()).await?;
        Ok(())
    }
}

#[async_trait]
impl SpeechOutput for AudioPlayback {
    async fn play(&mut self, samples: Vec<f32>, stop: &CancellationToken) -> Result<PlaybackEnd> {
        let config = self.config.clone();
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || play_samples_blocking(&config, samples, &stop))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Play samples in a blocking manner, returning early if `stop` fires
fn play_samples_blocking(
    config: &StreamConfig,
    samples: Vec<f32>,
    stop: &CancellationToken,
) -> Result<PlaybackEnd> {
    if samples.is_empty() {
        return Ok(PlaybackEnd::Finished);
    }

    let device = default_output_device()?;
    let channels = config.channels as usize;
    let sample_count = samples.len();

    let finished = Arc::new(AtomicBool::new(false));
    let callback_finished = Arc::clone(&finished);
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(position).copied().unwrap_or_else(|| {
                        callback_finished.store(true, Ordering::Relaxed);
                        0.0
                    });
                    frame.fill(sample);
                    position = position.saturating_add(1);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let start = Instant::now();
    let timeout = duration_of(sample_count, OUTPUT_SAMPLE_RATE) + DRAIN_SLACK;

    let end = loop {
        if stop.is_cancelled() {
            break PlaybackEnd::Stopped;
        }
        if finished.load(Ordering::Relaxed) || start.elapsed() > timeout {
            break PlaybackEnd::Finished;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    drop(stream);
    tracing::debug!(samples = sample_count, ?end, "playback complete");

    Ok(end)
}

/// Decode MP3 bytes to mono f32 samples at [`OUTPUT_SAMPLE_RATE`]
///
/// Streams encoded at another rate (e.g. 44.1 kHz) are resampled.
///
/// # Errors
///
/// Returns error if the stream is not valid MP3 or cannot be resampled
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate.get_or_insert(frame.sample_rate);
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Tts(format!("MP3 decode error: {e}"))),
        }
    }

    let Some(rate) = sample_rate.and_then(|r| u32::try_from(r).ok()) else {
        return Ok(samples);
    };
    if rate != OUTPUT_SAMPLE_RATE {
        tracing::debug!(from = rate, to = OUTPUT_SAMPLE_RATE, "resampling decoded speech");
    }
    resample(&samples, rate, OUTPUT_SAMPLE_RATE)
}

/// Resample mono audio from `from_rate` to `to_rate`
///
/// # Errors
///
/// Returns error if either rate is zero or the resampler fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("failed to create resampler: {e}")))?;

    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    let mut block = vec![Vec::with_capacity(RESAMPLE_CHUNK)];
    let mut pos = 0;

    // Zero padding past the end flushes the resampler delay
    while out.len() < expected {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(samples.len());
        block[0].clear();
        block[0].extend_from_slice(&samples[pos..end]);
        block[0].resize(needed, 0.0);
        pos = end;

        let frames = resampler
            .process(&block, None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        out.extend_from_slice(&frames[0]);
    }

    out.truncate(expected);
    Ok(out)
}
