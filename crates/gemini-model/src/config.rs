use std::fmt::Debug;

/// How requests are authorized.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) enum Credential {
    ApiKey(String),
    AccessToken(String),
}

/// Builder for [`GeminiConfig`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GeminiConfigBuilder {
    credential: Credential,
    base_url: Option<String>,
    embedding_model: Option<String>,
}

impl GeminiConfigBuilder {
    /// Creates a builder with the given API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self::with_credential(Credential::ApiKey(api_key.into()))
    }

    /// Creates a builder with an OAuth access token obtained from an
    /// interactive login.
    #[inline]
    pub fn with_access_token<S: Into<String>>(token: S) -> Self {
        Self::with_credential(Credential::AccessToken(token.into()))
    }

    #[inline]
    fn with_credential(credential: Credential) -> Self {
        Self {
            credential,
            base_url: None,
            embedding_model: None,
        }
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the model used by embedding requests.
    #[inline]
    pub fn with_embedding_model<S: Into<String>>(mut self, model: S) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> GeminiConfig {
        let base_url = self.base_url.unwrap_or_else(|| {
            "https://generativelanguage.googleapis.com/v1beta".to_string()
        });
        GeminiConfig {
            credential: self.credential,
            base_url: base_url.trim_end_matches('/').to_owned(),
            embedding_model: self
                .embedding_model
                .unwrap_or_else(|| "text-embedding-004".to_string()),
        }
    }
}

impl Debug for GeminiConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfigBuilder")
            .field("credential", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

/// Configuration for the Gemini provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GeminiConfig {
    pub(crate) credential: Credential,
    pub(crate) base_url: String,
    pub(crate) embedding_model: String,
}

impl Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("credential", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}
