//! Keyboard and input-method handling.
//!
//! - **keymapper**: chord routing to line-editor bytes, default key encoding
//! - **ime**: composition lifecycle
//! - **input_filter**: duplicate suppression for text bound to the shell

pub mod ime;
pub mod input_filter;
pub mod keymapper;

pub use ime::{CompositionState, CompositionStateMachine, ForceIdleReason};
pub use input_filter::{FilterDecision, InputFilter, PendingInput};
pub use keymapper::*;
