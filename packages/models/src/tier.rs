//! Abstract model tiers resolved to concrete providers at startup.

use std::fmt;

/// An abstract LLM class, resolved to a concrete provider/model by
/// configuration rather than hard-coded per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheap, low-latency model used for summarization and most per-table
    /// data generation calls.
    Fast,
    /// Higher-quality model used for narrative design, schema design, and
    /// system-instruction synthesis.
    Strong,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Strong => "strong",
        })
    }
}
