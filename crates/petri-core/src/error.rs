use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no seed source configured: set PETRI_STATE_FILE, PETRI_LOAD_LATEST_STATE or PETRI_BIG_BANG_CONFIG")]
    NoSeedSource,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
