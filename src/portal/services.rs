//! Contracts of the hosted services the portal talks to.
//!
//! The portal never owns data: identities, documents and files all live in
//! external services reached through these traits. Futures are `Send` so the
//! same code runs inside axum handlers.

use std::future::Future;

use bytes::Bytes;
use futures::stream::BoxStream;

use super::{
    error::{IdentityError, StoreError, UploadError},
    model::{Document, EntryId, Identity, Record},
};

/// Full snapshots of a collection, one item per change.
pub type SnapshotStream = BoxStream<'static, Result<Vec<Document>, StoreError>>;

pub trait IdentityService: Send + Sync {
    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Identity, IdentityError>> + Send;

    /// Creates the account and sends the verification email.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Identity, IdentityError>> + Send;

    fn sign_out(&self, identity: &Identity)
        -> impl Future<Output = Result<(), IdentityError>> + Send;

    fn send_password_reset(&self, email: &str)
        -> impl Future<Output = Result<(), IdentityError>> + Send;

    /// Resolves a previously issued id token back to its identity.
    fn lookup(&self, id_token: &str) -> impl Future<Output = Result<Identity, IdentityError>> + Send;
}

pub trait DocumentStore: Send + Sync {
    fn subscribe(&self, collection: &str) -> SnapshotStream;

    fn insert(
        &self,
        collection: &str,
        record: Record,
    ) -> impl Future<Output = Result<EntryId, StoreError>> + Send;

    /// Merges `patch` into the existing document; fails if it does not exist.
    fn update_by_id(
        &self,
        collection: &str,
        id: &EntryId,
        patch: Record,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_by_id(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_by_id(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    /// Creates or replaces the document at a caller-chosen id.
    fn put_by_id(
        &self,
        collection: &str,
        id: &EntryId,
        record: Record,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub path: String,
    pub download_token: Option<String>,
}

pub trait BlobStore: Send + Sync {
    fn put(
        &self,
        path: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> impl Future<Output = Result<BlobHandle, UploadError>> + Send;

    fn retrieval_url(
        &self,
        handle: &BlobHandle,
    ) -> impl Future<Output = Result<String, UploadError>> + Send;
}
