use std::env;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Environment variable holding the registry name.
pub const NAME_VAR: &str = "CHORUS_REGISTRY_NAME";
/// Environment variable holding the default protected-mode flag.
pub const PROTECTED_VAR: &str = "CHORUS_PROTECTED_MODE";

/// Registry settings.
///
/// Deserializable so hosts can embed it in their own configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Injected as `name` into events dispatched without one.
    pub name: Option<String>,
    /// Default for dispatches that don't choose a mode explicitly.
    pub protected_mode: bool,
}

impl RegistryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let protected_mode = match lookup(PROTECTED_VAR) {
            Some(raw) => parse_flag(&raw)
                .with_context(|| format!("{PROTECTED_VAR} must be a boolean flag"))?,
            None => false,
        };

        Ok(Self {
            name: lookup(NAME_VAR).filter(|name| !name.is_empty()),
            protected_mode,
        })
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("unrecognized flag value {other:?}"),
    }
}
