pub mod engine;
pub mod output;
pub mod tone;

pub use engine::ToneEngine;
pub use output::{default_backend, AudioBackend, AudioContext, ContextState, NullBackend};
