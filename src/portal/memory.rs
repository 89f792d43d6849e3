//! In-process implementations of the service contracts.
//!
//! Used by the development backend and throughout the tests. Every call that
//! would be a network request bumps a counter so callers can assert that a
//! refused operation never reached the service.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use bytes::Bytes;
use futures::{channel::mpsc, StreamExt};
use tracing::debug;
use uuid::Uuid;

use super::{
    error::{IdentityError, StoreError, UploadError},
    model::{Document, EntryId, Identity, Record, UserId},
    services::{BlobHandle, BlobStore, DocumentStore, IdentityService, SnapshotStream},
};

const MIN_PASSWORD_LEN: usize = 6;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Subscriber = mpsc::UnboundedSender<Result<Vec<Document>, StoreError>>;

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, Vec<Document>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
}

impl StoreState {
    fn publish(&mut self, collection: &str) {
        let snapshot = self
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default();

        if let Some(subscribers) = self.subscribers.get_mut(collection) {
            subscribers.retain(|tx| tx.unbounded_send(Ok(snapshot.clone())).is_ok());
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    requests: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Number of requests served so far, failed ones included.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Makes every following request fail until called again with `false`.
    pub fn fail_requests(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current contents of a collection, without counting as a request.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        lock(&self.state)
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Pushes an error to every subscriber of `collection` and forgets them.
    pub fn break_subscriptions(&self, collection: &str) {
        let mut state = lock(&self.state);
        for tx in state.subscribers.remove(collection).unwrap_or_default() {
            let _ = tx.unbounded_send(Err(StoreError::Request("connection lost".into())));
        }
    }

    fn begin(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Request("store unavailable".into()));
        }
        Ok(lock(&self.state))
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe(&self, collection: &str) -> SnapshotStream {
        let (tx, rx) = mpsc::unbounded();
        let mut state = lock(&self.state);
        let snapshot = state
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default();

        if tx.unbounded_send(Ok(snapshot)).is_ok() {
            state
                .subscribers
                .entry(collection.to_string())
                .or_default()
                .push(tx);
        }
        rx.boxed()
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<EntryId, StoreError> {
        let mut state = self.begin()?;
        let id = EntryId::new(Uuid::new_v4().simple().to_string());
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(Document {
                id: id.clone(),
                data: record,
            });
        state.publish(collection);
        debug!(collection, %id, "inserted document");
        Ok(id)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &EntryId,
        patch: Record,
    ) -> Result<(), StoreError> {
        let mut state = self.begin()?;
        let doc = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| &d.id == id))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        doc.data.extend(patch);
        state.publish(collection);
        Ok(())
    }

    async fn delete_by_id(&self, collection: &str, id: &EntryId) -> Result<(), StoreError> {
        let mut state = self.begin()?;
        if let Some(docs) = state.collections.get_mut(collection) {
            docs.retain(|d| &d.id != id);
        }
        state.publish(collection);
        Ok(())
    }

    async fn get_by_id(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> Result<Option<Document>, StoreError> {
        let state = self.begin()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| &d.id == id))
            .cloned())
    }

    async fn put_by_id(
        &self,
        collection: &str,
        id: &EntryId,
        record: Record,
    ) -> Result<(), StoreError> {
        let mut state = self.begin()?;
        let docs = state.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| &d.id == id) {
            Some(doc) => doc.data = record,
            None => docs.push(Document {
                id: id.clone(),
                data: record,
            }),
        }
        state.publish(collection);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Account {
    uid: UserId,
    password: String,
    verified: bool,
}

#[derive(Default)]
struct IdentityState {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    verification_emails: Vec<String>,
    reset_emails: Vec<String>,
}

impl IdentityState {
    fn issue(&mut self, email: &str) -> Result<Identity, IdentityError> {
        let account = self
            .accounts
            .get(email)
            .ok_or(IdentityError::InvalidCredentials)?
            .clone();
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone(), email.to_string());
        Ok(Identity {
            uid: account.uid,
            email: email.to_string(),
            email_verified: account.verified,
            id_token: token,
        })
    }
}

#[derive(Clone, Default)]
pub struct MemoryIdentity {
    state: Arc<Mutex<IdentityState>>,
    requests: Arc<AtomicUsize>,
}

impl MemoryIdentity {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Registers an account directly, skipping verification.
    pub fn register(&self, email: &str, password: &str) -> UserId {
        let uid = UserId::new(Uuid::new_v4().simple().to_string());
        lock(&self.state).accounts.insert(
            email.to_string(),
            Account {
                uid: uid.clone(),
                password: password.to_string(),
                verified: true,
            },
        );
        uid
    }

    pub fn verification_emails(&self) -> Vec<String> {
        lock(&self.state).verification_emails.clone()
    }

    pub fn reset_emails(&self) -> Vec<String> {
        lock(&self.state).reset_emails.clone()
    }

    fn begin(&self) -> MutexGuard<'_, IdentityState> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        lock(&self.state)
    }
}

impl IdentityService for MemoryIdentity {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        let mut state = self.begin();
        let matches = state
            .accounts
            .get(email)
            .is_some_and(|account| account.password == password);
        if !matches {
            return Err(IdentityError::InvalidCredentials);
        }
        state.issue(email)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        let mut state = self.begin();
        if state.accounts.contains_key(email) {
            return Err(IdentityError::EmailInUse);
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(IdentityError::Rejected(format!(
                "password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        state.accounts.insert(
            email.to_string(),
            Account {
                uid: UserId::new(Uuid::new_v4().simple().to_string()),
                password: password.to_string(),
                verified: false,
            },
        );
        state.verification_emails.push(email.to_string());
        state.issue(email)
    }

    async fn sign_out(&self, identity: &Identity) -> Result<(), IdentityError> {
        self.begin().tokens.remove(&identity.id_token);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), IdentityError> {
        let mut state = self.begin();
        if state.accounts.contains_key(email) {
            state.reset_emails.push(email.to_string());
        }
        Ok(())
    }

    async fn lookup(&self, id_token: &str) -> Result<Identity, IdentityError> {
        let state = self.begin();
        let email = state
            .tokens
            .get(id_token)
            .ok_or(IdentityError::InvalidToken)?;
        let account = state
            .accounts
            .get(email)
            .ok_or(IdentityError::InvalidToken)?;
        Ok(Identity {
            uid: account.uid.clone(),
            email: email.clone(),
            email_verified: account.verified,
            id_token: id_token.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct MemoryBlobs {
    base_url: Arc<str>,
    blobs: Arc<Mutex<HashMap<String, (String, Bytes)>>>,
    failing: Arc<AtomicBool>,
}

impl Default for MemoryBlobs {
    fn default() -> Self {
        Self::new("/blobs")
    }
}

impl MemoryBlobs {
    /// `base_url` is the prefix under which stored paths are served.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').into(),
            blobs: Default::default(),
            failing: Default::default(),
        }
    }

    pub fn get(&self, path: &str) -> Option<(String, Bytes)> {
        lock(&self.blobs).get(path).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.blobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_requests(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl BlobStore for MemoryBlobs {
    async fn put(
        &self,
        path: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<BlobHandle, UploadError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UploadError::Request("storage unavailable".into()));
        }
        lock(&self.blobs).insert(path.to_string(), (content_type.to_string(), bytes));
        Ok(BlobHandle {
            path: path.to_string(),
            download_token: None,
        })
    }

    async fn retrieval_url(&self, handle: &BlobHandle) -> Result<String, UploadError> {
        if !lock(&self.blobs).contains_key(&handle.path) {
            return Err(UploadError::MissingUrl(handle.path.clone()));
        }
        Ok(format!("{}/{}", self.base_url, handle.path))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn update_merges_into_existing_document() {
        let store = MemoryStore::default();
        let id = store
            .insert("notes", record(json!({ "title": "A", "description": "d" })))
            .await
            .unwrap();

        store
            .update_by_id("notes", &id, record(json!({ "title": "B" })))
            .await
            .unwrap();

        let doc = store.get_by_id("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.data["title"], json!("B"));
        assert_eq!(doc.data["description"], json!("d"));
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemoryStore::default();

        let err = store
            .update_by_id("notes", &EntryId::new("nope"), Record::new())
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn subscribers_get_the_current_snapshot_first() {
        let store = MemoryStore::default();
        store
            .insert("notes", record(json!({ "title": "A" })))
            .await
            .unwrap();

        let mut stream = store.subscribe("notes");

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn sign_up_sends_verification_and_rejects_duplicates() {
        let identity = MemoryIdentity::default();

        let created = identity
            .sign_up("a@vbithyd.ac.in", "secret1")
            .await
            .unwrap();
        let again = identity.sign_up("a@vbithyd.ac.in", "secret1").await;

        assert!(!created.email_verified);
        assert_eq!(identity.verification_emails(), ["a@vbithyd.ac.in"]);
        assert_eq!(again.unwrap_err(), IdentityError::EmailInUse);
    }

    #[tokio::test]
    async fn tokens_stop_resolving_after_sign_out() {
        let identity = MemoryIdentity::default();
        identity.register("a@vbithyd.ac.in", "secret1");
        let signed_in = identity
            .sign_in("a@vbithyd.ac.in", "secret1")
            .await
            .unwrap();

        assert!(identity.lookup(&signed_in.id_token).await.is_ok());
        identity.sign_out(&signed_in).await.unwrap();

        assert_eq!(
            identity.lookup(&signed_in.id_token).await.unwrap_err(),
            IdentityError::InvalidToken
        );
    }
}
