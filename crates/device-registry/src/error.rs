use thiserror::Error;

pub type Result<T, E = DirectoryError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("dictionary source failed: {0}")]
    Source(String),
}
