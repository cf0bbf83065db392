//! Hivoice - wake-word gated voice assistant for live generative models
//!
//! This library provides:
//! - Audio device access, speech recognition and wake/exit phrase detection
//! - A full-duplex streaming session against a live model websocket
//! - A turn-based assistant that can be interrupted mid-reply
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Session                          │
//! │   wake  │  exit  │  capture  │  receive  │ playback │
//! └──────┬───────────────┬───────────────┬──────────────┘
//!        │               │               │
//! ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────────────┐
//! │    Voice    │ │    Live     │ │   Playback queue    │
//! │ mic/STT/TTS │ │  websocket  │ │   (strict FIFO)     │
//! └─────────────┘ └─────────────┘ └─────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod session;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Session, SessionConfig, SessionState};
pub use turn::{TurnAssistant, TurnConfig};
