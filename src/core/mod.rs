//! Session I/O coordination.
//!
//! - **term**: terminal surface (VT parser + cell grid with scrollback)
//! - **output**: stream offset bookkeeping, held data, initial load
//! - **cache**: idle snapshot flushing
//! - **resize**: debounced resize and the one-time controller resync
//! - **osc**: out-of-band OSC 7 / OSC 9283 commands
//! - **session**: the controller wiring all of the above together
//!
//! # Architecture
//!
//! ```text
//! SessionController
//! ├── OutputStreamManager ──▶ TerminalSurface ──▶ EscapeSequenceRouter
//! ├── SessionCache (idle tick)
//! ├── ResizeCoordinator (debounce)
//! └── input: KeybindingRouter ▶ CompositionStateMachine ▶ InputFilter ▶ Backend
//! ```

pub mod cache;
pub mod osc;
pub mod output;
pub mod resize;
pub mod session;
pub mod term;

pub use cache::SessionCache;
pub use osc::{EscapeSequenceRouter, MetaTarget, OscEffect};
pub use output::OutputStreamManager;
pub use resize::{Debouncer, ResizeCoordinator, ResizeOutcome};
pub use session::{MultiInputHandler, SessionController, SessionStatus};
