#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("Not implemented")]
    Unimplemented,
    #[error("IO: {0}")]
    Io(#[from] IoError),
    #[error("FS: {0}")]
    Fs(#[from] FsError),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    #[error("Read-only")]
    ReadOnly,
    #[error("No media")]
    NoMedia,
    #[error("Media changed")]
    MediaChanged,
    #[error("Device")]
    Device,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("Inconsistent")]
    Inconsistent,
    #[error("Not found")]
    NotFound,
    #[error("Write-protected")]
    WriteProtected,
    #[error("Access denied")]
    AccessDenied,
    #[error("Volume full")]
    VolumeFull,
    #[error("Out of resources")]
    OutOfResources,
    #[error("Invalid parameter")]
    InvalidParameter,
    #[error("Unsupported")]
    Unsupported,
    #[error("Delete failure")]
    DeleteFailure,
}

pub type Result<T> = core::result::Result<T, Error>;
