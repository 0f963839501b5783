// Re-export for convenience
pub use async_trait::async_trait;
pub use voxrelay_tts::{self as tts, error as tts_error};
pub mod prelude;

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
/// This is a no-op if the feature is not enabled.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::try_init();
    }
}

// No unit tests: logging initialization is exercised by integration tests.
