/// Errors that can occur during gate evaluation.
///
/// A denial is not an error: it is reported through
/// [`GateDecision::Denied`](crate::GateDecision). These variants cover the
/// gate being unable to reach a decision at all.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GateError {
    /// The role directory could not be consulted.
    #[error("role lookup failed: {0}")]
    RoleLookup(String),

    /// A stage returned an unexpected error.
    #[error("stage error in '{stage}': {message}")]
    StageError { stage: String, message: String },

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// Create a stage error with a name and message.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageError {
            stage: stage.into(),
            message: message.into(),
        }
    }
}
