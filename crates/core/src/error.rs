use ssv_callback_id::{CallbackId, CallbackIdError};

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid callback id: {0}")]
    CallbackId(#[from] CallbackIdError),
    #[error("invalid text: {0}")]
    Text(#[from] ssv_types::TextError),

    #[error("payload not found: {0}")]
    PayloadNotFound(CallbackId),
    #[error("studies not part of payload {callback_id}: {ids:?}")]
    StudiesNotInPayload {
        callback_id: CallbackId,
        ids: Vec<String>,
    },
    #[error("failed to allocate a unique callback id after {0} attempts")]
    CallbackAllocation(usize),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write record file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read record file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to delete record file: {0}")]
    FileDelete(std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
    #[error("file storage error: {0}")]
    Files(#[from] ssv_files::FilesError),

    #[error("job request rejected: {0}")]
    InvalidJobRequest(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("validation queue closed")]
    QueueClosed,
}

pub type SubmissionResult<T> = std::result::Result<T, SubmissionError>;
