use thiserror::Error;

#[derive(Error, Debug)]
pub enum HemlockError {
    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Generation failure: {0}")]
    Generation(String),

    #[error("Missing dependency: required artifact {artifact} does not exist")]
    MissingDependency { artifact: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
