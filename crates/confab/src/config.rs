//! Server configuration (the channel-args of this core).
//!
//! Defaults first, environment second: `from_env` starts from `Default` and
//! lets `CONFAB_*` variables override individual knobs.

use serde::{Deserialize, Serialize};

/// Process default for the request slot pool.
pub const DEFAULT_MAX_REQUESTED_CALLS: u32 = 32768;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Size of the pre-allocated pool of request slots. Submitting more
    /// outstanding requests than this fails the excess with
    /// `success == false` rather than allocating.
    #[serde(default = "default_max_requested_calls")]
    pub max_requested_calls: u32,
}

fn default_max_requested_calls() -> u32 {
    DEFAULT_MAX_REQUESTED_CALLS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_requested_calls: DEFAULT_MAX_REQUESTED_CALLS,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CONFAB_MAX_REQUESTED_CALLS` when set and
    /// parseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("CONFAB_MAX_REQUESTED_CALLS") {
            match raw.parse() {
                Ok(n) => config.max_requested_calls = n,
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring unparseable CONFAB_MAX_REQUESTED_CALLS")
                }
            }
        }
        config
    }
}
