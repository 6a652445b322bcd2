//! Request orchestration on top of the demodulator and transcoder processes.

pub mod events;
pub mod orchestrator;
pub mod stream;

pub use events::{DecoderEvent, parse_symbol};
pub use orchestrator::{DecodeMode, Orchestrator};
pub use stream::StreamDecoder;
