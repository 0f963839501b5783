//! # voxrelay-tts
//!
//! Unified bridge over text-to-speech vendor APIs for the voxrelay project.
//!
//! Three very different vendor surfaces (batch HTTP, server-streamed
//! responses, and bidirectional incremental synthesis over WebSockets) are
//! exposed behind one request/response shape.
//!
//! ## Architecture
//!
//! - [`TtsRelay`]: the façade. Validates requests, assigns request ids, and
//!   dispatches to a registered provider.
//! - [`TtsProvider`]: one vendor behind the unified shape, built via
//!   [`TtsBuilder`].
//! - [`ChunkRelay`]: the push→pull bridge carrying asynchronously arriving
//!   frames into an ordered, cancellable pull sequence.
//! - [`SentenceSegmenter`]: turns a caller's text stream into
//!   sentence-terminated or length-capped synthesis units.
//! - `session`: the duplex session driver shared by all WebSocket protocols.
//!
//! ## Example
//!
//! ```rust,ignore
//! use voxrelay_tts::{ProviderKind, TtsBuilder, TtsRelay, TtsRequest, TtsOptions};
//! use voxrelay_tts::backends::minimax::Minimax;
//!
//! # async fn run() -> voxrelay_tts::TtsResult<()> {
//! let provider = TtsBuilder::<Minimax>::new()
//!     .api_key(std::env::var("MINIMAX_API_KEY").unwrap())
//!     .group_id(std::env::var("MINIMAX_GROUP_ID").unwrap())
//!     .build()?;
//!
//! let mut relay = TtsRelay::new();
//! relay.register(ProviderKind::Minimax, provider);
//!
//! let audio = relay
//!     .synthesize(
//!         ProviderKind::Minimax,
//!         TtsRequest::new("你好，世界。"),
//!         TtsOptions::default(),
//!     )
//!     .await?;
//! println!("{} bytes of audio", audio.data.len());
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod builder;
pub mod error;
pub mod provider;
pub mod registry;
pub mod relay;
pub mod segment;
pub mod session;
pub mod types;

// Re-export main types
pub use builder::TtsBuilder;
pub use error::{TtsError, TtsResult};
pub use provider::{AudioStream, TextStream, TtsProvider};
pub use registry::TtsRelay;
pub use relay::ChunkRelay;
pub use segment::SentenceSegmenter;
pub use types::{
    AudioChunk, AudioFormat, AudioResult, CancelToken, IdGenerator, ProviderKind, TtsOptions,
    TtsRequest,
};
