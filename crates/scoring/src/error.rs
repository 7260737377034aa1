use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rule document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid rule: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, RuleError>;
