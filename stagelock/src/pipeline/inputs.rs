//! Typed per-stage inputs.

use serde::{Deserialize, Serialize};

use crate::core::{Payload, Stage};

/// The inputs of one stage execution, tagged by stage.
///
/// Only the fields here feed the content-addressed identifier, so they must
/// cover everything that influences the stage's output and nothing volatile
/// such as wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageInputs {
    /// Scan a directory tree.
    Discovery {
        /// Directory to scan.
        root: String,
        /// Glob patterns to include.
        #[serde(default)]
        patterns: Vec<String>,
    },
    /// Choose files from the discovered set.
    Selection {
        /// Selected file paths.
        files: Vec<String>,
    },
    /// Parse the selected files.
    Parse {
        /// Files to parse.
        files: Vec<String>,
        /// Parser options.
        #[serde(default)]
        options: Payload,
    },
    /// Compute statistics.
    Analysis {
        /// Metrics to compute.
        metrics: Vec<String>,
        /// Analysis options.
        #[serde(default)]
        options: Payload,
    },
    /// Render the output documents.
    Export {
        /// Output format (e.g. "pdf", "html").
        format: String,
        /// Optional destination path.
        #[serde(default)]
        destination: Option<String>,
    },
}

impl StageInputs {
    /// Returns the stage these inputs belong to.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Discovery { .. } => Stage::Discovery,
            Self::Selection { .. } => Stage::Selection,
            Self::Parse { .. } => Stage::Parse,
            Self::Analysis { .. } => Stage::Analysis,
            Self::Export { .. } => Stage::Export,
        }
    }

    /// Flattens the inputs into the key-value mapping used for hashing.
    ///
    /// The mapping carries the stage tag alongside the fields.
    #[must_use]
    pub fn to_identity_map(&self) -> Payload {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }
}
