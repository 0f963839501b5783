//! voxrelay prelude: common types for quick start.

// Façade and provider abstractions
pub use crate::tts::{TtsBuilder, TtsProvider, TtsRelay};

// Unified request/response shapes
pub use crate::tts::{
    AudioChunk, AudioFormat, AudioResult, AudioStream, CancelToken, ProviderKind, TextStream,
    TtsOptions, TtsRequest,
};

// Errors
pub use crate::tts::{TtsError, TtsResult};

// Utils
pub use crate::init_logging;
