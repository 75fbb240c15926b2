//! Error types for the questline engine.

/// Top-level error type for task lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Unknown category, template or target, or malformed input.
    #[error("validation error: {0}")]
    Validation(String),

    /// No such active task or template.
    #[error("not found: {0}")]
    NotFound(String),

    /// An update affected zero rows; the cache disagrees with the store.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// SQLite failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Reroll claim denied for this cycle.
    #[error("reroll quota exceeded for category {category} (max {max})")]
    QuotaExceeded {
        /// Category the claim was made against.
        category: String,
        /// Configured max rerolls per cycle.
        max: u32,
    },

    /// Player cannot afford the reroll cost.
    #[error("insufficient funds: need {required:.2}, have {balance:.2}")]
    InsufficientFunds {
        /// Configured reroll cost.
        required: f64,
        /// Balance reported by the economy collaborator.
        balance: f64,
    },

    /// Every task in the category is already completed.
    #[error("nothing to reroll in category {0}")]
    NothingToReroll(String),

    /// Feature switched off for the category.
    #[error("disabled: {0}")]
    Disabled(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Task snapshot (de)serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence queue stayed full for the whole submit wait.
    #[error("persistence queue saturated, dropped {0}")]
    QueueSaturated(String),

    /// Persistence queue is shut down or its consumer is gone.
    #[error("persistence queue closed: {0}")]
    QueueClosed(String),
}

impl TaskError {
    /// Short message safe to show to a player.
    ///
    /// The full error is meant for logs; this never leaks SQL or paths.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "That request is not valid.",
            Self::NotFound(_) => "That task could not be found.",
            Self::ConcurrencyConflict(_) => "That task changed, please try again.",
            Self::QuotaExceeded { .. } => "You have no rerolls left for this cycle.",
            Self::InsufficientFunds { .. } => "You cannot afford to reroll.",
            Self::NothingToReroll(_) => "All tasks are already completed.",
            Self::Disabled(_) => "That feature is disabled.",
            Self::Persistence(_)
            | Self::Config(_)
            | Self::Serde(_)
            | Self::Io(_)
            | Self::QueueSaturated(_)
            | Self::QueueClosed(_) => "Something went wrong, please try again later.",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TaskError>;
