//! Run-ending failures of the agent loop

use std::path::PathBuf;

use scribe_core::ApiError;
use thiserror::Error;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_BUDGET_EXCEEDED: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model request failed: {source}")]
    Transport {
        #[source]
        source: ApiError,
        checkpoint: Option<PathBuf>,
    },

    #[error("iteration budget of {max_iterations} exhausted")]
    BudgetExceeded {
        max_iterations: usize,
        checkpoint: Option<PathBuf>,
    },

    #[error("interrupted")]
    Interrupted { checkpoint: Option<PathBuf> },
}

impl AgentError {
    /// Checkpoint to pass to `run --recover`, if one was written
    pub fn checkpoint(&self) -> Option<&PathBuf> {
        match self {
            Self::Transport { checkpoint, .. }
            | Self::BudgetExceeded { checkpoint, .. }
            | Self::Interrupted { checkpoint } => checkpoint.as_ref(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Transport { .. } => EXIT_FAILURE,
            Self::BudgetExceeded { .. } => EXIT_BUDGET_EXCEEDED,
            Self::Interrupted { .. } => EXIT_INTERRUPTED,
        }
    }
}
