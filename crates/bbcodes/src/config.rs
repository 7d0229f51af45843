//! Engine configuration.
//!
//! [`EngineConfig`] can be built in code or loaded from YAML:
//!
//! ```yaml
//! on_handler_error: placeholder   # propagate | original | placeholder
//! placeholder: "<!-- shortcode error -->"
//! handler_timeout_ms: 2000
//! unwrap_paragraphs: true
//! cache_patterns: true
//! ```
//!
//! Every field is optional; missing fields take their default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to splice in when a handler fails or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the call and return the error.
    Propagate,
    /// Keep the tag text as written.
    #[default]
    Original,
    /// Replace the tag with [`EngineConfig::placeholder`].
    Placeholder,
}

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub on_handler_error: FailurePolicy,
    /// Text used by [`FailurePolicy::Placeholder`].
    pub placeholder: String,
    /// Abandon a handler that runs longer than this many milliseconds.
    pub handler_timeout_ms: Option<u64>,
    /// Whether [`Engine::render_page`](crate::Engine::render_page) unwraps
    /// paragraph-wrapped tags before expanding them.
    pub unwrap_paragraphs: bool,
    /// Whether compiled tag patterns are kept between calls.
    pub cache_patterns: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            on_handler_error: FailurePolicy::default(),
            placeholder: String::new(),
            handler_timeout_ms: None,
            unwrap_paragraphs: true,
            cache_patterns: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the YAML is malformed or has
    /// unknown keys.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: None,
            message: e.to_string(),
        })
    }

    /// Loads a configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        })
    }

    pub fn on_handler_error(mut self, policy: FailurePolicy) -> Self {
        self.on_handler_error = policy;
        self
    }

    /// Uses `text` in place of failed tags.
    pub fn placeholder(mut self, text: impl Into<String>) -> Self {
        self.on_handler_error = FailurePolicy::Placeholder;
        self.placeholder = text.into();
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn unwrap_paragraphs(mut self, enabled: bool) -> Self {
        self.unwrap_paragraphs = enabled;
        self
    }

    pub fn cache_patterns(mut self, enabled: bool) -> Self {
        self.cache_patterns = enabled;
        self
    }

    /// The handler timeout, if one is set.
    pub fn timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}
