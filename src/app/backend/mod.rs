//! Server-side wiring: picks the service implementations from the
//! configuration and keeps one live list per content kind.

pub mod assistant;
pub mod firebase;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use axum::extract::FromRef;
use bytes::Bytes;
use itertools::Itertools;
use leptos::LeptosOptions;
use tracing::{info, warn};

use self::{
    assistant::{Assistant, ChatClient},
    firebase::{FirebaseAuth, FirebaseStorage, Firestore},
};
use crate::{
    config::{BackendConfig, PortalConfig},
    portal::{
        chat::{self, ChatMessage, Conversation},
        dispatcher::{MutationDispatcher, MutationLog},
        error::{IdentityError, StoreError, UploadError},
        live_list::{LiveList, SubscriptionHandle},
        memory::{MemoryBlobs, MemoryIdentity, MemoryStore},
        model::{
            ActivityCount, ContentEntry, ContentKind, Document, EntryId, Identity, Record, Session,
        },
        services::{BlobHandle, BlobStore, DocumentStore, IdentityService, SnapshotStream},
        session::{SessionProvider, PROFILES},
        upload::UploadPipeline,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("seeding admin account: {0}")]
    Seed(String),
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Firebase(Firestore),
}

impl DocumentStore for Store {
    fn subscribe(&self, collection: &str) -> SnapshotStream {
        match self {
            Store::Memory(store) => store.subscribe(collection),
            Store::Firebase(store) => store.subscribe(collection),
        }
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<EntryId, StoreError> {
        match self {
            Store::Memory(store) => store.insert(collection, record).await,
            Store::Firebase(store) => store.insert(collection, record).await,
        }
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &EntryId,
        patch: Record,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.update_by_id(collection, id, patch).await,
            Store::Firebase(store) => store.update_by_id(collection, id, patch).await,
        }
    }

    async fn delete_by_id(&self, collection: &str, id: &EntryId) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.delete_by_id(collection, id).await,
            Store::Firebase(store) => store.delete_by_id(collection, id).await,
        }
    }

    async fn get_by_id(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> Result<Option<Document>, StoreError> {
        match self {
            Store::Memory(store) => store.get_by_id(collection, id).await,
            Store::Firebase(store) => store.get_by_id(collection, id).await,
        }
    }

    async fn put_by_id(
        &self,
        collection: &str,
        id: &EntryId,
        record: Record,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.put_by_id(collection, id, record).await,
            Store::Firebase(store) => store.put_by_id(collection, id, record).await,
        }
    }
}

#[derive(Clone)]
pub enum Accounts {
    Memory(MemoryIdentity),
    Firebase(FirebaseAuth),
}

impl IdentityService for Accounts {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        match self {
            Accounts::Memory(accounts) => accounts.sign_in(email, password).await,
            Accounts::Firebase(accounts) => accounts.sign_in(email, password).await,
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        match self {
            Accounts::Memory(accounts) => accounts.sign_up(email, password).await,
            Accounts::Firebase(accounts) => accounts.sign_up(email, password).await,
        }
    }

    async fn sign_out(&self, identity: &Identity) -> Result<(), IdentityError> {
        match self {
            Accounts::Memory(accounts) => accounts.sign_out(identity).await,
            Accounts::Firebase(accounts) => accounts.sign_out(identity).await,
        }
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), IdentityError> {
        match self {
            Accounts::Memory(accounts) => accounts.send_password_reset(email).await,
            Accounts::Firebase(accounts) => accounts.send_password_reset(email).await,
        }
    }

    async fn lookup(&self, id_token: &str) -> Result<Identity, IdentityError> {
        match self {
            Accounts::Memory(accounts) => accounts.lookup(id_token).await,
            Accounts::Firebase(accounts) => accounts.lookup(id_token).await,
        }
    }
}

#[derive(Clone)]
pub enum Blobs {
    Memory(MemoryBlobs),
    Firebase(FirebaseStorage),
}

impl BlobStore for Blobs {
    async fn put(
        &self,
        path: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<BlobHandle, UploadError> {
        match self {
            Blobs::Memory(blobs) => blobs.put(path, content_type, bytes).await,
            Blobs::Firebase(blobs) => blobs.put(path, content_type, bytes).await,
        }
    }

    async fn retrieval_url(&self, handle: &BlobHandle) -> Result<String, UploadError> {
        match self {
            Blobs::Memory(blobs) => blobs.retrieval_url(handle).await,
            Blobs::Firebase(blobs) => blobs.retrieval_url(handle).await,
        }
    }
}

/// A mirrored collection and the mutation history shared by its dispatchers.
struct Workspace {
    list: LiveList,
    log: MutationLog,
    subscription: SubscriptionHandle,
}

fn follow(store: &Store, list: &LiveList) -> SubscriptionHandle {
    let (task, subscription) = list.subscribe(store);
    tokio::spawn(task);
    subscription
}

pub struct Backend {
    store: Store,
    accounts: Accounts,
    blobs: Blobs,
    assistant: Assistant,
    workspaces: HashMap<ContentKind, Mutex<Workspace>>,
}

impl Backend {
    /// Builds the services and subscribes every content list. Must run inside
    /// the tokio runtime, which drives the subscriptions.
    pub async fn start(config: &PortalConfig) -> Result<Self, BackendError> {
        let (store, accounts, blobs) = match &config.backend {
            BackendConfig::Memory { seed_admin } => {
                let store = MemoryStore::default();
                let accounts = MemoryIdentity::default();
                if let Some((email, password)) = seed_admin {
                    seed_admin_account(&accounts, &store, email, password).await?;
                }
                info!("using in-memory services");
                (
                    Store::Memory(store),
                    Accounts::Memory(accounts),
                    Blobs::Memory(MemoryBlobs::default()),
                )
            }
            BackendConfig::Firebase(firebase) => {
                let (auth, firestore, storage) =
                    firebase::clients(firebase, config.poll_interval)?;
                info!(project = %firebase.project_id, "using firebase services");
                (
                    Store::Firebase(firestore),
                    Accounts::Firebase(auth),
                    Blobs::Firebase(storage),
                )
            }
        };

        let assistant = match &config.assistant {
            Some(assistant) => Assistant::Remote(ChatClient::new(assistant)?),
            None => Assistant::Disabled,
        };

        let workspaces = ContentKind::ALL
            .into_iter()
            .map(|kind| {
                let list = LiveList::new(kind.schema());
                let workspace = Workspace {
                    subscription: follow(&store, &list),
                    list,
                    log: MutationLog::default(),
                };
                (kind, Mutex::new(workspace))
            })
            .collect();

        Ok(Self {
            store,
            accounts,
            blobs,
            assistant,
            workspaces,
        })
    }

    /// The kind's workspace, subscribed again first if its stream has ended.
    fn workspace(&self, kind: ContentKind) -> MutexGuard<'_, Workspace> {
        // every kind is subscribed in `start`
        let mut workspace = self.workspaces[&kind]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !workspace.subscription.is_following() {
            warn!(collection = kind.schema().collection, "list stopped updating, subscribing again");
            let list = workspace.list.resume();
            workspace.subscription = follow(&self.store, &list);
            workspace.list = list;
        }
        workspace
    }

    pub fn entries(&self, kind: ContentKind) -> Vec<ContentEntry> {
        self.workspace(kind).list.visible()
    }

    pub fn dispatcher(&self, kind: ContentKind) -> MutationDispatcher<Store> {
        let workspace = self.workspace(kind);
        MutationDispatcher::new(self.store.clone(), &workspace.list)
            .with_log(workspace.log.clone())
    }

    pub fn uploads(&self) -> UploadPipeline<Blobs> {
        UploadPipeline::new(self.blobs.clone())
    }

    /// A fresh provider per request; the session itself travels in a cookie.
    pub fn session_provider(&self) -> SessionProvider<Accounts, Store> {
        SessionProvider::new(self.accounts.clone(), self.store.clone())
    }

    pub async fn resolve_session(&self, id_token: Option<&str>) -> Option<Session> {
        let id_token = id_token?;
        self.session_provider()
            .restore(id_token)
            .await
            .session()
            .cloned()
    }

    /// Number of visible entries `session` created, per content kind.
    pub fn activity(&self, session: &Session) -> Vec<ActivityCount> {
        ContentKind::ALL
            .into_iter()
            .map(|kind| ActivityCount {
                kind,
                count: self
                    .entries(kind)
                    .iter()
                    .filter(|entry| entry.created_by.as_ref() == Some(&session.identity))
                    .count(),
            })
            .sorted_by_key(|activity| std::cmp::Reverse(activity.count))
            .collect()
    }

    pub async fn ask_assistant(&self, conversation: &Conversation) -> ChatMessage {
        chat::reply(&self.assistant, conversation).await
    }

    /// Stored bytes and content type for `/blobs/*path`, memory mode only.
    pub fn memory_blob(&self, path: &str) -> Option<(String, Bytes)> {
        match &self.blobs {
            Blobs::Memory(blobs) => blobs.get(path),
            Blobs::Firebase(_) => None,
        }
    }
}

async fn seed_admin_account(
    accounts: &MemoryIdentity,
    store: &MemoryStore,
    email: &str,
    password: &str,
) -> Result<(), BackendError> {
    let uid = accounts.register(email, password);
    let record = serde_json::json!({
        "firstName": "Admin",
        "email": email,
        "isAdmin": true,
        "createdAt": chrono::Utc::now(),
    });
    let record = match record {
        serde_json::Value::Object(record) => record,
        _ => Record::new(),
    };
    store
        .put_by_id(PROFILES, &EntryId::new(uid.as_ref()), record)
        .await
        .map_err(|err| BackendError::Seed(err.to_string()))?;
    warn!(%email, "seeded admin account, do not use in production");
    Ok(())
}

/// Router state: the Leptos options the routes need plus the backend.
#[derive(Clone)]
pub struct AppState {
    pub leptos_options: LeptosOptions,
    pub backend: Arc<Backend>,
}

impl FromRef<AppState> for LeptosOptions {
    fn from_ref(state: &AppState) -> Self {
        state.leptos_options.clone()
    }
}

impl FromRef<AppState> for Arc<Backend> {
    fn from_ref(state: &AppState) -> Self {
        state.backend.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PortalConfig,
        portal::form::{DraftField, FormController},
        portal::upload::PendingFile,
    };

    async fn memory_backend() -> Backend {
        let config = PortalConfig::from_lookup(|key| {
            (key == "PORTAL_SEED_ADMIN").then(|| "admin@vbithyd.ac.in:secret1".to_string())
        })
        .unwrap();
        Backend::start(&config).await.unwrap()
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn seeded_admin_can_publish_notes() {
        let backend = memory_backend().await;
        let provider = backend.session_provider();
        let auth = provider
            .sign_in("admin@vbithyd.ac.in", "secret1")
            .await
            .unwrap();
        assert!(auth.session.is_admin);

        let mut form = FormController::new(ContentKind::Notes.schema());
        form.open_for_create();
        form.update_field(DraftField::Title, "Unit 1");
        form.update_field(DraftField::Description, "Chapter 1 notes");
        form.attach_file(PendingFile {
            name: "unit1.pdf".into(),
            content_type: "application/pdf".into(),
            bytes: b"%PDF".to_vec(),
        });
        form.submit(
            Some(&auth.session),
            &backend.uploads(),
            &backend.dispatcher(ContentKind::Notes),
        )
        .await
        .unwrap();
        settle().await;

        let notes = backend.entries(ContentKind::Notes);
        assert_eq!(notes.len(), 1);
        let url = notes[0].attachment_url.clone().unwrap();
        let path = url.strip_prefix("/blobs/").unwrap();
        assert!(backend.memory_blob(path).is_some());

        let activity = backend.activity(&auth.session);
        assert_eq!(activity[0], ActivityCount { kind: ContentKind::Notes, count: 1 });
    }

    #[tokio::test]
    async fn lists_subscribe_again_after_their_stream_fails() {
        let backend = memory_backend().await;
        let store = match &backend.store {
            Store::Memory(store) => store.clone(),
            Store::Firebase(_) => panic!("memory backend expected"),
        };
        settle().await;

        store.break_subscriptions("notes");
        settle().await;
        let note = serde_json::json!({
            "title": "Unit 1",
            "description": "Chapter 1 notes",
            "attachmentUrl": "https://files/unit1.pdf",
        });
        store
            .insert("notes", note.as_object().cloned().unwrap())
            .await
            .unwrap();
        settle().await;

        // the first read after the failure takes the subscription up again
        backend.entries(ContentKind::Notes);
        settle().await;

        assert_eq!(backend.entries(ContentKind::Notes).len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_restored_from_tokens() {
        let backend = memory_backend().await;
        let auth = backend
            .session_provider()
            .sign_in("admin@vbithyd.ac.in", "secret1")
            .await
            .unwrap();

        let restored = backend.resolve_session(Some(&auth.id_token)).await;

        assert_eq!(restored, Some(auth.session));
        assert_eq!(backend.resolve_session(Some("forged")).await, None);
        assert_eq!(backend.resolve_session(None).await, None);
    }
}
