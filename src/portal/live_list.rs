use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
    },
};

use futures::{
    future::{AbortHandle, Abortable},
    FutureExt, StreamExt,
};
use itertools::Itertools;
use tracing::{debug, error, warn};

use super::{
    model::{ContentEntry, ContentSchema, Document, EntryId},
    services::{DocumentStore, SnapshotStream},
};

#[derive(Debug, Default)]
struct ListState {
    entries: Vec<ContentEntry>,
    retired: bool,
    snapshots: u64,
}

/// Local mirror of one remote collection.
///
/// The store stays the source of truth: every snapshot replaces the mirror
/// wholesale, and optimistic patches only live until the next snapshot.
#[derive(Debug, Clone)]
pub struct LiveList {
    schema: &'static ContentSchema,
    inner: Arc<RwLock<ListState>>,
}

/// Non-owning reference held by operations that may outlive their view.
#[derive(Debug, Clone)]
pub struct WeakList {
    schema: &'static ContentSchema,
    inner: Weak<RwLock<ListState>>,
}

/// Keeps a subscription alive. Dropping it stops the follow task and retires the list.
#[derive(Debug)]
pub struct SubscriptionHandle {
    abort: AbortHandle,
    list: WeakList,
    following: Arc<AtomicBool>,
}

impl LiveList {
    pub fn new(schema: &'static ContentSchema) -> Self {
        Self {
            schema,
            inner: Default::default(),
        }
    }

    pub fn schema(&self) -> &'static ContentSchema {
        self.schema
    }

    /// Starts mirroring `store`. The returned task must be spawned on an executor;
    /// it runs until the handle is dropped or the stream ends or fails.
    pub fn subscribe<S: DocumentStore>(
        &self,
        store: &S,
    ) -> (impl Future<Output = ()> + Send + 'static, SubscriptionHandle) {
        let stream = store.subscribe(self.schema.collection);
        let (abort, registration) = AbortHandle::new_pair();
        let collection = self.schema.collection;
        let following = Arc::new(AtomicBool::new(true));
        let ended = following.clone();

        let task = Abortable::new(follow(self.downgrade(), stream), registration).map(
            move |outcome| {
                ended.store(false, Ordering::Release);
                if outcome.is_err() {
                    debug!(collection, "subscription released");
                }
            },
        );

        (
            task,
            SubscriptionHandle {
                abort,
                list: self.downgrade(),
                following,
            },
        )
    }

    /// A new list starting from this one's entries, for subscribing again
    /// after this list's stream has ended.
    pub fn resume(&self) -> LiveList {
        let list = LiveList::new(self.schema);
        list.write().entries = self.read().entries.clone();
        list
    }

    /// Replaces the mirror with a full snapshot of the collection.
    pub fn apply_snapshot(&self, documents: Vec<Document>) {
        let collection = self.schema.collection;
        let entries = documents
            .into_iter()
            .filter_map(|doc| {
                let id = doc.id.clone();
                ContentEntry::from_document(doc)
                    .map_err(|err| warn!(collection, %id, %err, "skipping undecodable document"))
                    .ok()
            })
            .sorted_by(|a, b| b.created_at.cmp(&a.created_at))
            .collect();

        let mut state = self.write();
        state.entries = entries;
        state.snapshots += 1;
        debug!(
            collection,
            entries = state.entries.len(),
            snapshot = state.snapshots,
            "applied snapshot"
        );
    }

    /// Entries fit for rendering.
    pub fn visible(&self) -> Vec<ContentEntry> {
        self.read()
            .entries
            .iter()
            .filter(|entry| self.schema.is_displayable(entry))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &EntryId) -> Option<ContentEntry> {
        self.read().entries.iter().find(|e| &e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshots(&self) -> u64 {
        self.read().snapshots
    }

    pub fn is_retired(&self) -> bool {
        self.read().retired
    }

    pub fn retire(&self) {
        self.write().retired = true;
    }

    pub fn downgrade(&self) -> WeakList {
        WeakList {
            schema: self.schema,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Puts an entry at the front, replacing any entry with the same id.
    pub(crate) fn insert_local(&self, entry: ContentEntry) {
        let mut state = self.write();
        state.entries.retain(|e| e.id != entry.id);
        state.entries.insert(0, entry);
    }

    pub(crate) fn remove_local(&self, id: &EntryId) -> Option<ContentEntry> {
        let mut state = self.write();
        let index = state.entries.iter().position(|e| &e.id == id)?;
        Some(state.entries.remove(index))
    }

    /// Swaps an optimistic placeholder for the stored entry. A snapshot may have
    /// delivered the stored entry already, in which case the placeholder just goes.
    pub(crate) fn reconcile(&self, placeholder: &EntryId, stored: ContentEntry) {
        let mut state = self.write();
        let already_synced = state.entries.iter().any(|e| e.id == stored.id);
        match state.entries.iter().position(|e| &e.id == placeholder) {
            Some(index) if !already_synced => state.entries[index] = stored,
            Some(index) => {
                state.entries.remove(index);
            }
            None if !already_synced => state.entries.insert(0, stored),
            None => {}
        }
    }

    pub(crate) fn merge_local(&self, id: &EntryId, merge: impl FnOnce(&mut ContentEntry)) -> bool {
        let mut state = self.write();
        match state.entries.iter_mut().find(|e| &e.id == id) {
            Some(entry) => {
                merge(entry);
                true
            }
            None => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ListState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ListState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WeakList {
    pub fn schema(&self) -> &'static ContentSchema {
        self.schema
    }

    /// The list, if its view is still around to receive updates.
    pub fn upgrade(&self) -> Option<LiveList> {
        let list = LiveList {
            schema: self.schema,
            inner: self.inner.upgrade()?,
        };
        (!list.is_retired()).then_some(list)
    }
}

impl SubscriptionHandle {
    /// False once the follow task has finished, whether the stream ended,
    /// failed or was released.
    pub fn is_following(&self) -> bool {
        self.following.load(Ordering::Acquire)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.abort.abort();
        if let Some(list) = self.list.upgrade() {
            list.retire();
        }
    }
}

async fn follow(list: WeakList, mut stream: SnapshotStream) {
    let collection = list.schema().collection;

    while let Some(next) = stream.next().await {
        let Some(list) = list.upgrade() else {
            debug!(collection, "list dropped, ending subscription");
            break;
        };

        match next {
            Ok(documents) => list.apply_snapshot(documents),
            Err(err) => {
                error!(collection, %err, "subscription failed, list stops updating");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use crate::portal::{memory::MemoryStore, model::ContentKind};

    fn doc(id: &str, title: &str, minutes_ago: i64) -> Document {
        let created = Utc::now() - Duration::minutes(minutes_ago);
        Document {
            id: EntryId::new(id),
            data: json!({
                "title": title,
                "description": "desc",
                "attachmentUrl": format!("https://files/{id}.pdf"),
                "createdAt": created.to_rfc3339(),
            })
            .as_object()
            .cloned()
            .unwrap(),
        }
    }

    #[test]
    fn snapshots_replace_rather_than_merge() {
        let list = LiveList::new(ContentKind::Notes.schema());

        list.apply_snapshot(vec![doc("a", "A", 2), doc("b", "B", 1)]);
        list.apply_snapshot(vec![doc("b", "B", 1)]);
        list.apply_snapshot(vec![doc("b", "B", 1)]);

        assert_eq!(list.len(), 1);
        assert_eq!(list.snapshots(), 3);
    }

    #[test]
    fn newest_entries_come_first() {
        let list = LiveList::new(ContentKind::Notes.schema());

        list.apply_snapshot(vec![doc("old", "Old", 30), doc("new", "New", 1)]);

        let titles: Vec<_> = list.visible().into_iter().map(|e| e.title).collect();
        assert_eq!(titles, ["New", "Old"]);
    }

    #[test]
    fn incomplete_entries_are_hidden() {
        let list = LiveList::new(ContentKind::Notes.schema());
        let mut partial = doc("p", "Partial", 0);
        partial.data.remove("attachmentUrl");

        list.apply_snapshot(vec![doc("a", "A", 1), partial]);

        assert_eq!(list.len(), 2);
        let visible = list.visible();
        assert_eq!(visible.len(), 1);
        assert!(visible.iter().all(|e| {
            !e.title.is_empty()
                && !e.description.is_empty()
                && e.attachment_url.as_deref().is_some_and(|u| !u.is_empty())
        }));
    }

    #[test]
    fn reconcile_does_not_duplicate_synced_entries() {
        let list = LiveList::new(ContentKind::Notes.schema());
        let placeholder = EntryId::placeholder();
        let mut pending = ContentEntry::new("A", "desc").with_attachment("https://f/a.pdf");
        pending.id = placeholder.clone();
        list.insert_local(pending.clone());

        // the store's snapshot overtook the insert response
        list.apply_snapshot(vec![doc("a", "A", 0)]);
        list.insert_local(pending);
        let mut stored = ContentEntry::new("A", "desc").with_attachment("https://f/a.pdf");
        stored.id = EntryId::new("a");
        list.reconcile(&placeholder, stored);

        assert_eq!(list.len(), 1);
        assert!(list.get(&EntryId::new("a")).is_some());
    }

    #[tokio::test]
    async fn follows_store_until_handle_is_dropped() {
        let store = MemoryStore::default();
        let list = LiveList::new(ContentKind::Notes.schema());
        let (task, handle) = list.subscribe(&store);
        let task = tokio::spawn(task);

        store
            .insert("notes", doc("x", "Unit 1", 0).data)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(list.visible().len(), 1);

        drop(handle);
        task.await.unwrap();
        assert!(list.is_retired());
        assert!(list.downgrade().upgrade().is_none());

        store
            .insert("notes", doc("y", "Unit 2", 0).data)
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn stream_errors_stop_updates() {
        let store = MemoryStore::default();
        let list = LiveList::new(ContentKind::Notes.schema());
        let (task, handle) = list.subscribe(&store);
        let task = tokio::spawn(task);
        assert!(handle.is_following());

        store.break_subscriptions("notes");
        task.await.unwrap();
        assert!(!handle.is_following());

        store
            .insert("notes", doc("x", "Unit 1", 0).data)
            .await
            .unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn resumed_lists_start_from_the_old_entries() {
        let list = LiveList::new(ContentKind::Notes.schema());
        list.apply_snapshot(vec![doc("a", "A", 1)]);

        let resumed = list.resume();
        list.retire();

        assert_eq!(resumed.visible(), list.visible());
        assert!(!resumed.is_retired());
        assert_eq!(resumed.snapshots(), 0);
    }
}
