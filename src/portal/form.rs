use serde::{Deserialize, Serialize};

use super::{
    dispatcher::MutationDispatcher,
    error::{PortalError, ValidationError},
    model::{AttachmentSource, ContentEntry, ContentSchema, EntryId, EntryPatch, Field, Session},
    services::{BlobStore, DocumentStore},
    upload::{PendingFile, UploadPipeline},
};

/// Field values being edited, before they become an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub target: Option<EntryId>,
    pub title: String,
    pub description: String,
    pub details: String,
    pub attachment_url: String,
    /// Travels separately from the draft when it is sent to the server.
    #[serde(skip)]
    pub pending_file: Option<PendingFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftField {
    Title,
    Description,
    Details,
    AttachmentUrl,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormController {
    schema: &'static ContentSchema,
    draft: Draft,
    open: bool,
}

impl FormController {
    pub fn new(schema: &'static ContentSchema) -> Self {
        Self {
            schema,
            draft: Draft::default(),
            open: false,
        }
    }

    /// Resumes a draft submitted from elsewhere, e.g. by a browser.
    pub fn from_draft(schema: &'static ContentSchema, draft: Draft) -> Self {
        Self {
            schema,
            draft,
            open: true,
        }
    }

    pub fn schema(&self) -> &'static ContentSchema {
        self.schema
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_editing(&self) -> bool {
        self.draft.target.is_some()
    }

    pub fn open_for_create(&mut self) {
        self.draft = Draft::default();
        self.open = true;
    }

    /// Loads `entry` for editing. Its attachment carries over unless a new file is attached.
    pub fn open_for_edit(&mut self, entry: &ContentEntry) {
        self.draft = Draft {
            target: Some(entry.id.clone()),
            title: entry.title.clone(),
            description: entry.description.clone(),
            details: entry.details.clone().unwrap_or_default(),
            attachment_url: entry.attachment_url.clone().unwrap_or_default(),
            pending_file: None,
        };
        self.open = true;
    }

    pub fn update_field(&mut self, field: DraftField, value: impl Into<String>) {
        let value = value.into();
        match field {
            DraftField::Title => self.draft.title = value,
            DraftField::Description => self.draft.description = value,
            DraftField::Details => self.draft.details = value,
            DraftField::AttachmentUrl => self.draft.attachment_url = value,
        }
    }

    pub fn attach_file(&mut self, file: PendingFile) {
        self.draft.pending_file = Some(file);
    }

    /// Discards the draft, as on cancel or when the form is dismissed.
    pub fn close(&mut self) {
        self.draft = Draft::default();
        self.open = false;
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.check(&self.draft)
    }

    fn check(&self, draft: &Draft) -> Result<(), ValidationError> {
        let required = |field| self.schema.required_fields.contains(&field);

        if required(Field::Title) && draft.title.trim().is_empty() {
            return Err(ValidationError::MissingField(self.schema.title_label.into()));
        }
        if required(Field::Description) && draft.description.trim().is_empty() {
            return Err(ValidationError::MissingField(
                self.schema.description_label.into(),
            ));
        }

        let link = draft.attachment_url.trim();
        match self.schema.attachment {
            AttachmentSource::Link => {
                if link.is_empty() {
                    if required(Field::Attachment) {
                        return Err(ValidationError::MissingField(
                            self.schema.label(Field::Attachment).into(),
                        ));
                    }
                } else if !(link.starts_with("http://") || link.starts_with("https://")) {
                    return Err(ValidationError::InvalidLink);
                }
            }
            AttachmentSource::Upload { .. } => {
                // an edit may keep the attachment it already has
                let has_file = draft.pending_file.is_some() || !link.is_empty();
                if required(Field::Attachment) && !has_file {
                    return Err(ValidationError::MissingAttachment);
                }
            }
        }

        Ok(())
    }

    /// Authorizes, validates, uploads the staged file and persists the draft.
    ///
    /// The form is cleared and closed only on success; on any error the draft
    /// is left as it was so the user can retry.
    pub async fn submit<S, B>(
        &mut self,
        session: Option<&Session>,
        uploads: &UploadPipeline<B>,
        dispatcher: &MutationDispatcher<S>,
    ) -> Result<EntryId, PortalError>
    where
        S: DocumentStore,
        B: BlobStore,
    {
        dispatcher.authorize(session, self.draft.target.as_ref())?;
        self.validate()?;
        let draft = self.settled_draft(dispatcher).await?;
        self.check(&draft)?;

        let attachment_url = match draft.pending_file {
            Some(file) => Some(
                uploads
                    .upload(self.schema.collection, file)
                    .await?
                    .retrieval_url,
            ),
            None => non_empty(&draft.attachment_url),
        };
        let title = draft.title.trim().to_string();
        let description = draft.description.trim().to_string();
        let details = non_empty(&draft.details);

        let id = match draft.target {
            None => {
                let entry = ContentEntry {
                    attachment_url,
                    details,
                    ..ContentEntry::new(title, description)
                };
                dispatcher.create(session, entry).await?
            }
            Some(id) => {
                let patch = EntryPatch {
                    title: Some(title),
                    description: Some(description),
                    attachment_url: Some(attachment_url),
                    details: Some(details),
                };
                dispatcher.update(session, &id, patch).await?;
                id
            }
        };

        self.close();
        Ok(id)
    }

    /// The draft with an uploaded kind's attachment taken from the store. Such a
    /// URL only ever comes from a confirmed upload, never from the draft itself.
    async fn settled_draft<S: DocumentStore>(
        &self,
        dispatcher: &MutationDispatcher<S>,
    ) -> Result<Draft, PortalError> {
        let mut draft = self.draft.clone();
        if let AttachmentSource::Upload { .. } = self.schema.attachment {
            draft.attachment_url = match &draft.target {
                Some(id) => dispatcher
                    .stored(id)
                    .await?
                    .attachment_url
                    .unwrap_or_default(),
                None => String::new(),
            };
        }
        Ok(draft)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::{
        live_list::LiveList,
        memory::{MemoryBlobs, MemoryStore},
        model::{ContentKind, UserId},
    };

    fn admin() -> Session {
        Session {
            identity: UserId::new("admin"),
            email: "admin@vbithyd.ac.in".into(),
            display_name: None,
            is_admin: true,
        }
    }

    fn pdf() -> PendingFile {
        PendingFile {
            name: "unit1.pdf".into(),
            content_type: "application/pdf".into(),
            bytes: b"%PDF".to_vec(),
        }
    }

    struct Page {
        store: MemoryStore,
        blobs: MemoryBlobs,
        list: LiveList,
        uploads: UploadPipeline<MemoryBlobs>,
        dispatcher: MutationDispatcher<MemoryStore>,
        form: FormController,
    }

    fn page(kind: ContentKind) -> Page {
        let store = MemoryStore::default();
        let blobs = MemoryBlobs::default();
        let list = LiveList::new(kind.schema());
        Page {
            uploads: UploadPipeline::new(blobs.clone()),
            dispatcher: MutationDispatcher::new(store.clone(), &list),
            form: FormController::new(kind.schema()),
            store,
            blobs,
            list,
        }
    }

    #[test]
    fn missing_fields_are_reported_by_label() {
        let mut form = FormController::new(ContentKind::MockTests.schema());
        form.open_for_create();
        form.update_field(DraftField::Description, "Full syllabus");

        assert_eq!(
            form.validate().unwrap_err(),
            ValidationError::MissingField("Subject".into())
        );
    }

    #[test]
    fn create_needs_a_file_but_edit_does_not() {
        let schema = ContentKind::Notes.schema();
        let mut form = FormController::new(schema);
        form.open_for_create();
        form.update_field(DraftField::Title, "Unit 1");
        form.update_field(DraftField::Description, "Chapter 1 notes");
        assert_eq!(
            form.validate().unwrap_err(),
            ValidationError::MissingAttachment
        );

        let mut existing = ContentEntry::new("Unit 1", "Chapter 1 notes")
            .with_attachment("https://files/unit1.pdf");
        existing.id = EntryId::new("n1");
        form.open_for_edit(&existing);
        assert_eq!(form.validate(), Ok(()));
    }

    #[test]
    fn links_must_be_web_urls() {
        let mut form = FormController::new(ContentKind::LectureVideos.schema());
        form.open_for_create();
        form.update_field(DraftField::Title, "Graphs");
        form.update_field(DraftField::Description, "BFS and DFS");
        form.update_field(DraftField::AttachmentUrl, "javascript:alert(1)");

        assert_eq!(form.validate().unwrap_err(), ValidationError::InvalidLink);
    }

    #[test]
    fn reopening_replaces_the_open_draft() {
        let mut form = FormController::new(ContentKind::Notes.schema());
        form.open_for_create();
        form.update_field(DraftField::Title, "half written");
        let mut entry = ContentEntry::new("Other", "desc");
        entry.id = EntryId::new("x");

        form.open_for_edit(&entry);

        assert_eq!(form.draft().title, "Other");
        assert_eq!(form.draft().target, Some(EntryId::new("x")));
    }

    #[tokio::test]
    async fn admin_adds_a_note_with_its_pdf() {
        let mut p = page(ContentKind::Notes);
        p.form.open_for_create();
        p.form.update_field(DraftField::Title, "Unit 1");
        p.form.update_field(DraftField::Description, "Chapter 1 notes");
        p.form.attach_file(pdf());

        let id = p
            .form
            .submit(Some(&admin()), &p.uploads, &p.dispatcher)
            .await
            .unwrap();

        let visible = p.list.visible();
        assert_eq!(visible.len(), 1);
        let url = visible[0].attachment_url.clone().unwrap();
        let key = url.strip_prefix("/blobs/").unwrap();
        assert_eq!(&p.blobs.get(key).unwrap().1[..], b"%PDF");
        assert_eq!(visible[0].id, id);
        assert!(!p.form.is_open());
        assert_eq!(p.form.draft(), &Draft::default());
    }

    #[tokio::test]
    async fn unchanged_edit_reproduces_the_entry() {
        let mut p = page(ContentKind::Notes);
        p.form.open_for_create();
        p.form.update_field(DraftField::Title, "Unit 1");
        p.form.update_field(DraftField::Description, "Chapter 1 notes");
        p.form.attach_file(pdf());
        let id = p
            .form
            .submit(Some(&admin()), &p.uploads, &p.dispatcher)
            .await
            .unwrap();
        let before = p.list.get(&id).unwrap();

        p.form.open_for_edit(&before);
        p.form
            .submit(Some(&admin()), &p.uploads, &p.dispatcher)
            .await
            .unwrap();

        let after = p.list.get(&id).unwrap();
        assert_eq!(
            ContentEntry {
                updated_at: None,
                ..after
            },
            before
        );
        assert_eq!(p.blobs.len(), 1);
    }

    #[tokio::test]
    async fn typed_urls_never_stand_in_for_an_upload() {
        let mut p = page(ContentKind::Notes);
        let draft = Draft {
            title: "Unit 1".into(),
            description: "Chapter 1 notes".into(),
            attachment_url: "https://evil.example/not-uploaded.pdf".into(),
            ..Draft::default()
        };
        p.form = FormController::from_draft(ContentKind::Notes.schema(), draft.clone());

        let err = p
            .form
            .submit(Some(&admin()), &p.uploads, &p.dispatcher)
            .await
            .unwrap_err();

        assert_eq!(err, PortalError::Validation(ValidationError::MissingAttachment));
        assert_eq!(p.form.draft(), &draft);
        assert_eq!(p.store.request_count(), 0);
    }

    #[tokio::test]
    async fn members_cannot_smuggle_a_url_into_lost_and_found() {
        let mut p = page(ContentKind::LostFound);
        let member = Session {
            is_admin: false,
            ..admin()
        };
        p.form = FormController::from_draft(
            ContentKind::LostFound.schema(),
            Draft {
                title: "Calculator".into(),
                description: "Found in room 204".into(),
                attachment_url: "javascript:alert(1)".into(),
                ..Draft::default()
            },
        );

        let id = p
            .form
            .submit(Some(&member), &p.uploads, &p.dispatcher)
            .await
            .unwrap();

        assert_eq!(p.list.get(&id).unwrap().attachment_url, None);
        assert!(p.store.documents("lostFound")[0].data.get("attachmentUrl").unwrap().is_null());
    }

    #[tokio::test]
    async fn edits_keep_the_stored_file_whatever_the_draft_says() {
        let mut p = page(ContentKind::Notes);
        p.form.open_for_create();
        p.form.update_field(DraftField::Title, "Unit 1");
        p.form.update_field(DraftField::Description, "Chapter 1 notes");
        p.form.attach_file(pdf());
        let id = p
            .form
            .submit(Some(&admin()), &p.uploads, &p.dispatcher)
            .await
            .unwrap();
        let uploaded = p.list.get(&id).unwrap().attachment_url;

        p.form.open_for_edit(&p.list.get(&id).unwrap());
        p.form
            .update_field(DraftField::AttachmentUrl, "data:text/html,<script>x</script>");
        p.form.update_field(DraftField::Title, "Unit 1, revised");
        p.form
            .submit(Some(&admin()), &p.uploads, &p.dispatcher)
            .await
            .unwrap();

        let after = p.list.get(&id).unwrap();
        assert_eq!(after.title, "Unit 1, revised");
        assert_eq!(after.attachment_url, uploaded);
        assert_eq!(p.store.documents("notes")[0].data["attachmentUrl"], uploaded.unwrap());
    }

    #[tokio::test]
    async fn failed_upload_keeps_the_draft_and_writes_nothing() {
        let mut p = page(ContentKind::Notes);
        p.blobs.fail_requests(true);
        p.form.open_for_create();
        p.form.update_field(DraftField::Title, "Unit 1");
        p.form.update_field(DraftField::Description, "Chapter 1 notes");
        p.form.attach_file(pdf());
        let draft = p.form.draft().clone();

        let err = p
            .form
            .submit(Some(&admin()), &p.uploads, &p.dispatcher)
            .await
            .unwrap_err();

        assert!(matches!(err, PortalError::Upload(_)));
        assert!(p.form.is_open());
        assert_eq!(p.form.draft(), &draft);
        assert_eq!(p.store.request_count(), 0);
        assert!(p.list.is_empty());
    }

    #[tokio::test]
    async fn non_admin_submit_uploads_nothing() {
        let mut p = page(ContentKind::Notes);
        let student = Session {
            is_admin: false,
            ..admin()
        };
        p.form.open_for_create();
        p.form.attach_file(pdf());

        let err = p
            .form
            .submit(Some(&student), &p.uploads, &p.dispatcher)
            .await
            .unwrap_err();

        assert_eq!(err, PortalError::Unauthorized("Notes"));
        assert!(p.blobs.is_empty());
        assert_eq!(p.store.request_count(), 0);
    }
}
