//! Builder module for configuring and instantiating TTS providers.
//!
//! Provides a fluent interface for credentials and connection settings.
//! Each backend supplies its own `build()` on the typed builder and decides
//! which fields are required.

use crate::provider::TtsProvider;
use std::marker::PhantomData;

/// Builder for configuring and instantiating TTS providers.
pub struct TtsBuilder<P: TtsProvider> {
    pub(crate) backend: PhantomData<P>,
    /// API key for bearer/header authentication
    pub(crate) api_key: Option<String>,
    /// Base URL override (primarily for proxies and test servers)
    pub(crate) base_url: Option<String>,
    /// Minimax group id, appended to the request URL
    pub(crate) group_id: Option<String>,
    /// Tencent application id
    pub(crate) app_id: Option<String>,
    /// Tencent secret id (public half of the signing credential)
    pub(crate) secret_id: Option<String>,
    /// Tencent secret key (signing key, never sent on the wire)
    pub(crate) secret_key: Option<String>,
    /// Default voice applied when a request leaves `voice` unset
    pub(crate) default_voice: Option<String>,
    /// Default model applied when a request leaves `model` unset
    pub(crate) default_model: Option<String>,
}

impl<P: TtsProvider> Default for TtsBuilder<P> {
    fn default() -> Self {
        Self {
            backend: PhantomData,
            api_key: None,
            base_url: None,
            group_id: None,
            app_id: None,
            secret_id: None,
            secret_key: None,
            default_voice: None,
            default_model: None,
        }
    }
}

impl<P: TtsProvider> TtsBuilder<P> {
    /// Creates a new empty builder instance with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key for authentication.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL for API requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the Minimax group id.
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the Tencent application id.
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Sets the Tencent secret id.
    pub fn secret_id(mut self, secret_id: impl Into<String>) -> Self {
        self.secret_id = Some(secret_id.into());
        self
    }

    /// Sets the Tencent secret key.
    pub fn secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Sets the default voice for requests that do not specify one.
    pub fn default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = Some(voice.into());
        self
    }

    /// Sets the default model for requests that do not specify one.
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }
}
