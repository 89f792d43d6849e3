use std::time::Duration;

use campus_portal::portal::{
    form::{DraftField, FormController},
    live_list::{LiveList, SubscriptionHandle},
    memory::{MemoryBlobs, MemoryIdentity, MemoryStore},
    model::{ContentEntry, ContentKind, EntryId, Session, SessionState},
    services::DocumentStore,
    session::{SessionProvider, SignUpForm, PROFILES},
    upload::{PendingFile, UploadPipeline},
    MutationDispatcher, PortalError, ValidationError,
};
use serde_json::json;

const ADMIN: &str = "admin@vbithyd.ac.in";

struct Portal {
    store: MemoryStore,
    identity: MemoryIdentity,
    blobs: MemoryBlobs,
}

impl Portal {
    fn new() -> Self {
        Self {
            store: MemoryStore::default(),
            identity: MemoryIdentity::default(),
            blobs: MemoryBlobs::default(),
        }
    }

    fn sessions(&self) -> SessionProvider<MemoryIdentity, MemoryStore> {
        SessionProvider::new(self.identity.clone(), self.store.clone())
    }

    async fn admin(&self) -> Session {
        let uid = self.identity.register(ADMIN, "secret1");
        let profile = json!({ "email": ADMIN, "isAdmin": true });
        self.store
            .put_by_id(
                PROFILES,
                &EntryId::new(uid.as_ref()),
                profile.as_object().cloned().unwrap(),
            )
            .await
            .unwrap();
        self.sessions()
            .sign_in(ADMIN, "secret1")
            .await
            .unwrap()
            .session
    }

    /// A mirrored list; it stays live while the handle is held.
    fn live(&self, kind: ContentKind) -> (LiveList, SubscriptionHandle) {
        let list = LiveList::new(kind.schema());
        let (task, handle) = list.subscribe(&self.store);
        tokio::spawn(task);
        (list, handle)
    }
}

fn pdf(name: &str) -> PendingFile {
    PendingFile {
        name: name.into(),
        content_type: "application/pdf".into(),
        bytes: b"%PDF-1.4".to_vec(),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn admin_publishes_a_note_that_everyone_sees() {
    let portal = Portal::new();
    let admin = portal.admin().await;
    let (list, _handle) = portal.live(ContentKind::Notes);
    let uploads = UploadPipeline::new(portal.blobs.clone());
    let dispatcher = MutationDispatcher::new(portal.store.clone(), &list);

    let mut form = FormController::new(ContentKind::Notes.schema());
    form.open_for_create();
    form.update_field(DraftField::Title, "Unit 1");
    form.update_field(DraftField::Description, "Chapter 1 notes");
    form.attach_file(pdf("unit1.pdf"));
    let id = form
        .submit(Some(&admin), &uploads, &dispatcher)
        .await
        .unwrap();
    settle().await;

    let visible = list.visible();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, id);
    assert_eq!(visible[0].title, "Unit 1");

    // a second visitor's mirror sees the same entry
    let (reader, _reader_handle) = portal.live(ContentKind::Notes);
    settle().await;
    assert_eq!(reader.visible(), visible);
}

#[tokio::test]
async fn anonymous_visitors_can_read_but_not_write() {
    let portal = Portal::new();
    let admin = portal.admin().await;
    let (list, _handle) = portal.live(ContentKind::PreviousPapers);
    let dispatcher = MutationDispatcher::new(portal.store.clone(), &list);
    let entry = ContentEntry {
        details: Some("R22".into()),
        ..ContentEntry::new("DBMS", "Mid-term 1").with_attachment("https://files/dbms.pdf")
    };
    let id = dispatcher.create(Some(&admin), entry.clone()).await.unwrap();
    settle().await;
    let requests = portal.store.request_count();

    let create = dispatcher.create(None, entry).await;
    let delete = dispatcher.delete(None, &id).await;

    assert!(matches!(create, Err(PortalError::Unauthorized(_))));
    assert!(matches!(delete, Err(PortalError::Unauthorized(_))));
    assert_eq!(portal.store.request_count(), requests);
    assert_eq!(list.visible().len(), 1);
}

#[tokio::test]
async fn gmail_sign_up_is_refused_before_any_request() {
    let portal = Portal::new();
    let sessions = portal.sessions();

    let err = sessions
        .sign_up(&SignUpForm {
            first_name: "Ravi".into(),
            email: "student@gmail.com".into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(err, PortalError::Validation(ValidationError::EmailDomain));
    assert_eq!(portal.identity.request_count(), 0);
    assert_eq!(sessions.state(), SessionState::SignedOut);
}

#[tokio::test]
async fn deleted_entries_disappear_at_once() {
    let portal = Portal::new();
    let admin = portal.admin().await;
    let (list, _handle) = portal.live(ContentKind::MockTests);
    let dispatcher = MutationDispatcher::new(portal.store.clone(), &list);
    let mut ids = Vec::new();
    for subject in ["DBMS", "OS", "CN"] {
        let entry = ContentEntry::new(subject, "Practice test")
            .with_attachment(format!("https://tests.example/{subject}"));
        ids.push(dispatcher.create(Some(&admin), entry).await.unwrap());
    }
    settle().await;

    dispatcher.delete(Some(&admin), &ids[1]).await.unwrap();

    let titles: Vec<_> = list.visible().into_iter().map(|e| e.title).collect();
    assert_eq!(titles.len(), 2);
    assert!(!titles.contains(&"OS".to_string()));
    settle().await;
    assert_eq!(list.visible().len(), 2);
}

#[tokio::test]
async fn same_file_name_twice_gives_two_files() {
    let portal = Portal::new();
    let uploads = UploadPipeline::new(portal.blobs.clone());

    let first = uploads.upload("previousPapers", pdf("paper.pdf")).await.unwrap();
    let second = uploads.upload("previousPapers", pdf("paper.pdf")).await.unwrap();

    assert_ne!(first.storage_key, second.storage_key);
    assert_eq!(portal.blobs.len(), 2);
}

#[tokio::test]
async fn students_post_and_remove_their_own_lost_items() {
    let portal = Portal::new();
    let sessions = portal.sessions();
    let student = sessions
        .sign_up(&SignUpForm {
            first_name: "Meena".into(),
            email: "meena@vbithyd.ac.in".into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        })
        .await
        .unwrap()
        .session;
    let (list, _handle) = portal.live(ContentKind::LostFound);
    let uploads = UploadPipeline::new(portal.blobs.clone());
    let dispatcher = MutationDispatcher::new(portal.store.clone(), &list);

    let mut form = FormController::new(ContentKind::LostFound.schema());
    form.open_for_create();
    form.update_field(DraftField::Title, "Calculator");
    form.update_field(DraftField::Description, "Casio fx-991, found in room 204");
    let id = form
        .submit(Some(&student), &uploads, &dispatcher)
        .await
        .unwrap();
    settle().await;
    assert_eq!(list.visible().len(), 1);
    assert!(portal.blobs.is_empty());

    dispatcher.delete(Some(&student), &id).await.unwrap();
    assert!(list.visible().is_empty());
}
