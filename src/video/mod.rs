//! # Video Module
//!
//! Probing, the decoder and encoder process wrappers, and the frame types
//! that flow between them.

pub mod encoder;
pub mod probe;
pub mod process;
pub mod sink;
pub mod source;
pub mod types;

pub use encoder::{select_encoder, EncoderCapabilities, EncoderChoice, FfmpegEncoderProbe, StaticEncoders};
pub use probe::VideoProbe;
pub use process::{ManagedChild, ProcessLedger};
pub use sink::{EncodeSummary, FrameSink, SinkTarget};
pub use source::{DecoderOptions, FrameSource};
pub use types::{FrameBatch, FrameGeometry, FrameRate, RawFrame, VideoDescriptor};
