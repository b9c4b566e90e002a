//! Pipeline stage identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One named step of the pipeline.
///
/// Variants are declared in pipeline order, so `Ord` follows the forward
/// path from discovery to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Finds candidate input files.
    Discovery,
    /// Narrows the discovered files down to the ones to process.
    Selection,
    /// Parses the selected files.
    Parse,
    /// Computes statistics over parsed data. Optional.
    Analysis,
    /// Renders the final documents.
    Export,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::Discovery,
        Self::Selection,
        Self::Parse,
        Self::Analysis,
        Self::Export,
    ];

    /// Returns the stable snake_case name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Selection => "selection",
            Self::Parse => "parse",
            Self::Analysis => "analysis",
            Self::Export => "export",
        }
    }

    /// Returns the namespace tag prepended to this stage's artifact ids.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Discovery => "disc-",
            Self::Selection => "sel-",
            Self::Parse => "prs-",
            Self::Analysis => "ana-",
            Self::Export => "exp-",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stage name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown stage: '{0}'")]
pub struct ParseStageError(pub String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}
