//! Configuration for a normalization run.
//!
//! All knobs live in [`NormalizeConfig`], built via its builder. Keeping
//! every setting in one serialisable struct makes runs easy to log and two
//! runs easy to diff.

use serde::{Deserialize, Serialize};

use crate::error::DocNormError;

/// Default chunk byte budget: ~30 000 tokens at ~4 chars/token. Leaves room
/// in a 128K-token context for the system instruction and a response of
/// roughly equal size.
pub const DEFAULT_CHUNK_BUDGET_BYTES: usize = 120_000;

/// Configuration for one normalization run.
///
/// # Example
/// ```rust
/// use docnorm::NormalizeConfig;
///
/// let config = NormalizeConfig::builder()
///     .chunk_budget_bytes(60_000)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Maximum estimated serialized size of one chunk (content plus
    /// placeholder overhead), in bytes. A single entity larger than this
    /// becomes its own oversized chunk rather than being split.
    pub chunk_budget_bytes: usize,

    /// Rewrite-service model identifier. Default: "gpt-4o".
    pub model: String,

    /// Sampling temperature. Default: 0.2.
    ///
    /// Low temperature keeps the judge faithful to the text it was given;
    /// creativity here only manufactures diffs.
    pub temperature: f32,

    /// Maximum tokens the service may generate per chunk. `None` uses the
    /// provider default.
    pub max_tokens: Option<u32>,

    /// Custom system instruction. If `None`, uses the built-in judge prompt.
    pub system_prompt: Option<String>,

    /// Append the consolidated change-log section to the output document.
    /// Default: true.
    pub include_change_log: bool,

    /// Per-rewrite-call transport timeout in seconds. Default: 120.
    ///
    /// This is the only timeout in the system; no retry is layered above it
    /// because replaying a generative call is not idempotent.
    pub api_timeout_secs: u64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            chunk_budget_bytes: DEFAULT_CHUNK_BUDGET_BYTES,
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            max_tokens: None,
            system_prompt: None,
            include_change_log: true,
            api_timeout_secs: 120,
        }
    }
}

impl NormalizeConfig {
    /// Create a new builder.
    pub fn builder() -> NormalizeConfigBuilder {
        NormalizeConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`NormalizeConfig`].
#[derive(Debug)]
pub struct NormalizeConfigBuilder {
    config: NormalizeConfig,
}

impl NormalizeConfigBuilder {
    pub fn chunk_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.chunk_budget_bytes = bytes;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = Some(n);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn include_change_log(mut self, v: bool) -> Self {
        self.config.include_change_log = v;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<NormalizeConfig, DocNormError> {
        let c = &self.config;
        if c.chunk_budget_bytes < 256 {
            return Err(DocNormError::InvalidConfig(format!(
                "chunk budget must be at least 256 bytes, got {}",
                c.chunk_budget_bytes
            )));
        }
        if c.model.is_empty() {
            return Err(DocNormError::InvalidConfig("model must not be empty".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let c = NormalizeConfig::builder().build().unwrap();
        assert_eq!(c.chunk_budget_bytes, DEFAULT_CHUNK_BUDGET_BYTES);
        assert_eq!(c.model, "gpt-4o");
        assert!(c.include_change_log);
    }

    #[test]
    fn temperature_is_clamped() {
        let c = NormalizeConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn tiny_budget_rejected() {
        let err = NormalizeConfig::builder()
            .chunk_budget_bytes(10)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("chunk budget"));
    }
}
