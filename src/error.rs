use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Extracting,
    Fusing,
    Deduplicating,
    Relabeling,
    AssigningSigners,
    Finalized,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Fusing => "fusing",
            Self::Deduplicating => "deduplicating",
            Self::Relabeling => "relabeling",
            Self::AssigningSigners => "assigning_signers",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid input document: {0}")]
    Input(String),

    #[error("oracle failed during {stage}: {message}")]
    Oracle { stage: Stage, message: String },

    #[error("{source_name} failed: {message}")]
    Source {
        source_name: &'static str,
        message: String,
    },

    #[error("resolution result violates an invariant: {0}")]
    Invariant(String),
}

impl ResolveError {
    pub fn oracle(stage: Stage, error: &anyhow::Error) -> Self {
        Self::Oracle {
            stage,
            message: format!("{error:#}"),
        }
    }

    pub fn source(source_name: &'static str, error: &anyhow::Error) -> Self {
        Self::Source {
            source_name,
            message: format!("{error:#}"),
        }
    }
}
