//! Interface to the files subsystem backing LIST_FILES and READ_FILE.

use crate::auth::Principal;
use crate::wire::FileInfo;
use async_trait::async_trait;
use thiserror::Error;

/// Failure taxonomy of file reads, mapped onto 400/403/404/500 by the
/// request plane.
#[derive(Debug, Error)]
pub enum FilesError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unknown(String),
}

#[async_trait]
pub trait Files: Send + Sync {
    async fn browse(
        &self,
        path: &str,
        principal: Option<&Principal>,
    ) -> Result<Vec<FileInfo>, FilesError>;

    async fn read(
        &self,
        offset: u64,
        length: Option<u64>,
        path: &str,
        principal: Option<&Principal>,
    ) -> Result<(u64, Vec<u8>), FilesError>;
}
