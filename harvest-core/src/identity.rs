//! How loaded rows are identified across runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strategy used to keep repeated loads from duplicating rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityModel {
    /// Rows are keyed by the feature's natural identifier. A uniqueness
    /// constraint backs the key and conflicting inserts are skipped, so any
    /// number of reloads converge on one row per feature.
    #[default]
    NaturalKey,
    /// Rows are appended without a uniqueness constraint. Suitable only when
    /// every window is loaded exactly once into a fresh table.
    WindowPartitioned,
}

impl IdentityModel {
    /// Whether the store must enforce uniqueness on the feature identifier.
    #[must_use]
    pub const fn requires_unique_key(self) -> bool {
        matches!(self, Self::NaturalKey)
    }

    /// Stable textual form used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NaturalKey => "natural-key",
            Self::WindowPartitioned => "window-partitioned",
        }
    }
}

impl fmt::Display for IdentityModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when an identity model name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown identity model `{0}` (expected `natural-key` or `window-partitioned`)")]
pub struct ParseIdentityModelError(pub String);

impl FromStr for IdentityModel {
    type Err = ParseIdentityModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "natural-key" => Ok(Self::NaturalKey),
            "window-partitioned" => Ok(Self::WindowPartitioned),
            _ => Err(ParseIdentityModelError(s.to_owned())),
        }
    }
}
