//! Pipeline-level configuration.
//!
//! Only the tunables that are legitimately configuration rather than code
//! live here: everything else (handler wiring, ordering) is a structural
//! decision made in code through the mutation API (§4.3).

use serde::Deserialize;

use crate::error::PipelineError;

/// Tunables for a [`crate::pipeline::Pipeline`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// A soft cap on the number of non-sentinel contexts. `None` means
    /// unbounded. Exceeding the cap fails the offending `add` with a
    /// `programmer_error`-coded [`PipelineError`] rather than corrupting the
    /// list.
    pub max_depth: Option<usize>,

    /// Prefix used when an `add` call does not supply an explicit name.
    pub auto_name_prefix: String,

    /// When true, an inbound read that reaches the tail unobserved is also
    /// logged at `warn` (in addition to the embedded driver's recording
    /// behavior, which always happens regardless of this flag).
    pub warn_on_discarded_inbound: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            auto_name_prefix: "handler-".to_string(),
            warn_on_discarded_inbound: false,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Parses a `PipelineConfig` from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, PipelineError> {
        toml::from_str(source)
            .map_err(|e| PipelineError::new("config_parse_error", e.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    inner: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_depth(mut self, value: Option<usize>) -> Self {
        self.inner.max_depth = value;
        self
    }

    pub fn auto_name_prefix(mut self, value: impl Into<String>) -> Self {
        self.inner.auto_name_prefix = value.into();
        self
    }

    pub fn warn_on_discarded_inbound(mut self, value: bool) -> Self {
        self.inner.warn_on_discarded_inbound = value;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_unbounded() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_depth, None);
        assert_eq!(config.auto_name_prefix, "handler-");
    }

    #[test]
    fn parses_from_toml() {
        let config = PipelineConfig::from_toml_str("max_depth = 8\nauto_name_prefix = \"h-\"\n")
            .unwrap();
        assert_eq!(config.max_depth, Some(8));
        assert_eq!(config.auto_name_prefix, "h-");
    }
}
