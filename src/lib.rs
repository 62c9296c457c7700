//! termweave - terminal session I/O coordination
//!
//! Reconciles a backend-held output log, keyboard and IME input, OSC side
//! channels and a snapshot cache into one consistent terminal display.

pub mod backend;
pub mod config;
pub mod core;
pub mod ui;

pub use backend::{Backend, BackendError, MemoryBackend};
pub use config::Config;
pub use crate::core::term::{TermSize, TerminalSurface, VtSurface};
pub use crate::core::{SessionController, SessionStatus};
