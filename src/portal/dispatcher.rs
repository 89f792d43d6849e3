use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    error::{PortalError, StoreError},
    live_list::{LiveList, WeakList},
    model::{ContentEntry, ContentSchema, EntryId, EntryPatch, EntryStatus, Session},
    services::DocumentStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationStatus {
    Absent,
    Pending,
    Complete,
    Failed,
}

/// Last known mutation status per entry, shared by every dispatcher of a list.
#[derive(Debug, Clone, Default)]
pub struct MutationLog {
    inner: Arc<Mutex<HashMap<EntryId, MutationStatus>>>,
}

impl MutationLog {
    pub fn status(&self, id: &EntryId) -> MutationStatus {
        self.lock()
            .get(id)
            .copied()
            .unwrap_or(MutationStatus::Absent)
    }

    fn record(&self, id: &EntryId, status: MutationStatus) {
        self.lock().insert(id.clone(), status);
    }

    fn forget(&self, id: &EntryId) {
        self.lock().remove(id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntryId, MutationStatus>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Issues create/update/delete requests for one collection and keeps the
/// local list in step with them.
pub struct MutationDispatcher<S> {
    store: S,
    schema: &'static ContentSchema,
    list: WeakList,
    log: MutationLog,
}

impl<S: DocumentStore> MutationDispatcher<S> {
    pub fn new(store: S, list: &LiveList) -> Self {
        Self {
            store,
            schema: list.schema(),
            list: list.downgrade(),
            log: MutationLog::default(),
        }
    }

    pub fn with_log(mut self, log: MutationLog) -> Self {
        self.log = log;
        self
    }

    pub fn schema(&self) -> &'static ContentSchema {
        self.schema
    }

    pub fn status(&self, id: &EntryId) -> MutationStatus {
        self.log.status(id)
    }

    /// Checks that `session` may create (`target` is `None`) or change `target`.
    ///
    /// Runs before any request is made, so a refusal costs nothing remote.
    pub fn authorize<'a>(
        &self,
        session: Option<&'a Session>,
        target: Option<&EntryId>,
    ) -> Result<&'a Session, PortalError> {
        let allowed = match target {
            None => self.schema.may_create(session),
            Some(id) => {
                let owner = self
                    .list
                    .upgrade()
                    .and_then(|list| list.get(id))
                    .and_then(|entry| entry.created_by);
                self.schema.may_modify(session, owner.as_ref())
            }
        };

        match session {
            Some(session) if allowed => Ok(session),
            _ => Err(PortalError::Unauthorized(self.schema.display_name)),
        }
    }

    /// The entry as the store holds it: from the mirror when present, else fetched.
    pub async fn stored(&self, id: &EntryId) -> Result<ContentEntry, PortalError> {
        if let Some(entry) = self.list.upgrade().and_then(|list| list.get(id)) {
            return Ok(entry);
        }
        let doc = self
            .store
            .get_by_id(self.schema.collection, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(ContentEntry::from_document(doc)?)
    }

    /// Persists a new entry. It shows up in the list right away under a
    /// placeholder id, which is swapped for the store's id once it answers.
    pub async fn create(
        &self,
        session: Option<&Session>,
        mut entry: ContentEntry,
    ) -> Result<EntryId, PortalError> {
        let session = self.authorize(session, None)?;
        let collection = self.schema.collection;

        entry.created_by = Some(session.identity.clone());
        entry.created_at = Utc::now();
        entry.updated_at = None;
        entry.status = EntryStatus::Complete;
        let record = entry.to_record()?;

        let placeholder = EntryId::placeholder();
        self.log.record(&placeholder, MutationStatus::Pending);
        if let Some(list) = self.list.upgrade() {
            list.insert_local(ContentEntry {
                id: placeholder.clone(),
                status: EntryStatus::Pending,
                ..entry.clone()
            });
        }

        match self.store.insert(collection, record).await {
            Ok(id) => {
                self.log.forget(&placeholder);
                self.log.record(&id, MutationStatus::Complete);
                if let Some(list) = self.list.upgrade() {
                    list.reconcile(&placeholder, ContentEntry { id: id.clone(), ..entry });
                }
                info!(collection, %id, by = %session.identity, "created entry");
                Ok(id)
            }
            Err(err) => {
                self.log.forget(&placeholder);
                if let Some(list) = self.list.upgrade() {
                    list.remove_local(&placeholder);
                }
                warn!(collection, %err, "create failed");
                Err(err.into())
            }
        }
    }

    /// Merges `patch` into the stored entry in place; the id never changes.
    pub async fn update(
        &self,
        session: Option<&Session>,
        id: &EntryId,
        patch: EntryPatch,
    ) -> Result<(), PortalError> {
        self.authorize(session, Some(id))?;
        let collection = self.schema.collection;

        if id.is_placeholder() {
            return Err(StoreError::NotFound(id.to_string()).into());
        }

        let at = Utc::now();
        self.log.record(id, MutationStatus::Pending);
        match self
            .store
            .update_by_id(collection, id, patch.to_record(at))
            .await
        {
            Ok(()) => {
                self.log.record(id, MutationStatus::Complete);
                if let Some(list) = self.list.upgrade() {
                    list.merge_local(id, |entry| patch.apply(entry, at));
                }
                info!(collection, %id, "updated entry");
                Ok(())
            }
            Err(err) => {
                self.log.record(id, MutationStatus::Failed);
                warn!(collection, %id, %err, "update failed");
                Err(err.into())
            }
        }
    }

    /// Removes the entry locally at once, then remotely. A failed remote delete
    /// is reported but the local removal stands until the next snapshot.
    pub async fn delete(&self, session: Option<&Session>, id: &EntryId) -> Result<(), PortalError> {
        self.authorize(session, Some(id))?;
        let collection = self.schema.collection;

        self.log.record(id, MutationStatus::Pending);
        if let Some(list) = self.list.upgrade() {
            list.remove_local(id);
        }

        if id.is_placeholder() {
            self.log.record(id, MutationStatus::Complete);
            return Ok(());
        }

        match self.store.delete_by_id(collection, id).await {
            Ok(()) => {
                self.log.record(id, MutationStatus::Complete);
                info!(collection, %id, "deleted entry");
                Ok(())
            }
            Err(err) => {
                self.log.record(id, MutationStatus::Failed);
                warn!(collection, %id, %err, "delete failed, local list keeps the removal");
                Err(err.into())
            }
        }
    }
}
