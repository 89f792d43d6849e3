use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(String),
    #[error("please attach a file before saving")]
    MissingAttachment,
    #[error("links must start with http:// or https://")]
    InvalidLink,
    #[error("please use your @vbithyd.ac.in email address")]
    EmailDomain,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("message is empty")]
    EmptyMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("document {0} not found")]
    NotFound(String),
    #[error("malformed document: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("file is empty")]
    EmptyFile,
    #[error("storage request failed: {0}")]
    Request(String),
    #[error("no retrieval url for {0}")]
    MissingUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("this email is already registered, please log in instead")]
    EmailInUse,
    #[error("session expired, please sign in again")]
    InvalidToken,
    #[error("{0}")]
    Rejected(String),
    #[error("identity request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("assistant is not configured")]
    Unconfigured,
    #[error("assistant request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("you are not allowed to change {0}")]
    Unauthorized(&'static str),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::Store(err.into())
    }
}
