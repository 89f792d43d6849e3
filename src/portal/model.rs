use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A document body as stored in a collection.
pub type Record = Map<String, Value>;

/// Stored timestamps are either RFC 3339 strings or unix milliseconds.
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stamp {
        Millis(i64),
        Fractional(f64),
        Text(String),
    }

    impl Stamp {
        fn into_datetime<E: Error>(self) -> Result<DateTime<Utc>, E> {
            match self {
                Stamp::Millis(millis) => DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| E::custom(format!("timestamp {millis} out of range"))),
                Stamp::Fractional(millis) => DateTime::from_timestamp_millis(millis as i64)
                    .ok_or_else(|| E::custom(format!("timestamp {millis} out of range"))),
                Stamp::Text(text) => DateTime::parse_from_rfc3339(&text)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(E::custom),
            }
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        Stamp::deserialize(d)?.into_datetime()
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<Stamp>::deserialize(d)?
            .map(Stamp::into_datetime)
            .transpose()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    const PLACEHOLDER_PREFIX: &'static str = "local-";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A temporary id for an entry the store has not acknowledged yet.
    pub fn placeholder() -> Self {
        Self(format!(
            "{}{}",
            Self::PLACEHOLDER_PREFIX,
            Uuid::new_v4().simple()
        ))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(Self::PLACEHOLDER_PREFIX)
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: EntryId,
    pub data: Record,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    #[default]
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEntry {
    #[serde(default)]
    pub id: EntryId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContentEntry {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: EntryId::default(),
            title: title.into(),
            description: description.into(),
            attachment_url: None,
            details: None,
            created_by: None,
            status: EntryStatus::Complete,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_attachment(mut self, url: impl Into<String>) -> Self {
        self.attachment_url = Some(url.into());
        self
    }

    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        let mut entry: ContentEntry = serde_json::from_value(Value::Object(doc.data))?;
        entry.id = doc.id;
        Ok(entry)
    }

    /// The stored body of this entry. The id lives in the document path, not the body.
    pub fn to_record(&self) -> Result<Record, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(mut record) => {
                record.remove("id");
                Ok(record)
            }
            other => Err(serde::ser::Error::custom(format!(
                "entry serialized to {other}, expected an object"
            ))),
        }
    }

    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Title => &self.title,
            Field::Description => &self.description,
            Field::Attachment => self.attachment_url.as_deref().unwrap_or_default(),
        }
    }
}

/// Partial update merged into an existing entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub attachment_url: Option<Option<String>>,
    pub details: Option<Option<String>>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.attachment_url.is_none()
            && self.details.is_none()
    }

    pub fn apply(&self, entry: &mut ContentEntry, at: DateTime<Utc>) {
        if let Some(title) = &self.title {
            entry.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            entry.description.clone_from(description);
        }
        if let Some(url) = &self.attachment_url {
            entry.attachment_url.clone_from(url);
        }
        if let Some(details) = &self.details {
            entry.details.clone_from(details);
        }
        entry.updated_at = Some(at);
    }

    /// Store-side body of the patch, including the refreshed `updatedAt`.
    pub fn to_record(&self, at: DateTime<Utc>) -> Record {
        let mut record = Record::new();
        if let Some(title) = &self.title {
            record.insert("title".into(), Value::from(title.as_str()));
        }
        if let Some(description) = &self.description {
            record.insert("description".into(), Value::from(description.as_str()));
        }
        if let Some(url) = &self.attachment_url {
            record.insert("attachmentUrl".into(), Value::from(url.clone()));
        }
        if let Some(details) = &self.details {
            record.insert("details".into(), Value::from(details.clone()));
        }
        record.insert("updatedAt".into(), Value::from(at.to_rfc3339()));
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Description,
    Attachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSource {
    /// A file picked by the user and moved to blob storage.
    Upload { accept: &'static str },
    /// A URL typed in by the user.
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Document,
    Image,
    Video,
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAccess {
    Admins,
    /// Any signed-in user may post; owners and admins may edit or delete.
    Members,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentSchema {
    pub kind: ContentKind,
    pub collection: &'static str,
    pub display_name: &'static str,
    pub title_label: &'static str,
    pub description_label: &'static str,
    pub details_label: Option<&'static str>,
    pub required_fields: &'static [Field],
    pub attachment: AttachmentSource,
    pub media: MediaKind,
    pub write_access: WriteAccess,
}

impl ContentSchema {
    pub fn requires_attachment(&self) -> bool {
        self.required_fields.contains(&Field::Attachment)
    }

    pub fn label(&self, field: Field) -> &'static str {
        match field {
            Field::Title => self.title_label,
            Field::Description => self.description_label,
            Field::Attachment => match self.attachment {
                AttachmentSource::Upload { .. } => "File",
                AttachmentSource::Link => "Link",
            },
        }
    }

    pub fn may_create(&self, session: Option<&Session>) -> bool {
        match session {
            Some(session) => session.is_admin || self.write_access == WriteAccess::Members,
            None => false,
        }
    }

    /// Whether `session` may edit or delete an entry created by `owner`.
    pub fn may_modify(&self, session: Option<&Session>, owner: Option<&UserId>) -> bool {
        match session {
            Some(session) if session.is_admin => true,
            Some(session) => {
                self.write_access == WriteAccess::Members && owner == Some(&session.identity)
            }
            None => false,
        }
    }

    /// Partially written entries are kept out of every rendered list.
    pub fn is_displayable(&self, entry: &ContentEntry) -> bool {
        self.required_fields
            .iter()
            .all(|field| !entry.field(*field).trim().is_empty())
    }
}

const ALL_FIELDS: &[Field] = &[Field::Title, Field::Description, Field::Attachment];
const TEXT_FIELDS: &[Field] = &[Field::Title, Field::Description];

static SCHEMAS: [ContentSchema; 7] = [
    ContentSchema {
        kind: ContentKind::Notes,
        collection: "notes",
        display_name: "Notes",
        title_label: "Title",
        description_label: "Description",
        details_label: None,
        required_fields: ALL_FIELDS,
        attachment: AttachmentSource::Upload {
            accept: "application/pdf",
        },
        media: MediaKind::Document,
        write_access: WriteAccess::Admins,
    },
    ContentSchema {
        kind: ContentKind::PreviousPapers,
        collection: "previousPapers",
        display_name: "Previous Papers",
        title_label: "Subject",
        description_label: "Exam",
        details_label: Some("Regulation"),
        required_fields: ALL_FIELDS,
        attachment: AttachmentSource::Upload {
            accept: "application/pdf",
        },
        media: MediaKind::Document,
        write_access: WriteAccess::Admins,
    },
    ContentSchema {
        kind: ContentKind::Forums,
        collection: "posts",
        display_name: "Forums",
        title_label: "Caption",
        description_label: "Post",
        details_label: None,
        required_fields: ALL_FIELDS,
        attachment: AttachmentSource::Upload {
            accept: "image/*,application/pdf",
        },
        media: MediaKind::Document,
        write_access: WriteAccess::Admins,
    },
    ContentSchema {
        kind: ContentKind::LectureVideos,
        collection: "lectureVideos",
        display_name: "Lecture Videos",
        title_label: "Title",
        description_label: "Description",
        details_label: None,
        required_fields: ALL_FIELDS,
        attachment: AttachmentSource::Link,
        media: MediaKind::Video,
        write_access: WriteAccess::Admins,
    },
    ContentSchema {
        kind: ContentKind::MockTests,
        collection: "mockTests",
        display_name: "Mock Tests",
        title_label: "Subject",
        description_label: "Description",
        details_label: None,
        required_fields: ALL_FIELDS,
        attachment: AttachmentSource::Link,
        media: MediaKind::Web,
        write_access: WriteAccess::Admins,
    },
    ContentSchema {
        kind: ContentKind::Faculty,
        collection: "faculty",
        display_name: "Faculty",
        title_label: "Name",
        description_label: "Contact number",
        details_label: Some("Additional information"),
        required_fields: TEXT_FIELDS,
        attachment: AttachmentSource::Upload { accept: "image/*" },
        media: MediaKind::Image,
        write_access: WriteAccess::Admins,
    },
    ContentSchema {
        kind: ContentKind::LostFound,
        collection: "lostFound",
        display_name: "Lost & Found",
        title_label: "Item",
        description_label: "Message",
        details_label: Some("Where"),
        required_fields: TEXT_FIELDS,
        attachment: AttachmentSource::Upload { accept: "image/*" },
        media: MediaKind::Image,
        write_access: WriteAccess::Members,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentKind {
    Notes,
    PreviousPapers,
    Forums,
    LectureVideos,
    MockTests,
    Faculty,
    LostFound,
}

impl ContentKind {
    pub const ALL: [ContentKind; 7] = [
        ContentKind::Notes,
        ContentKind::PreviousPapers,
        ContentKind::Forums,
        ContentKind::LectureVideos,
        ContentKind::MockTests,
        ContentKind::Faculty,
        ContentKind::LostFound,
    ];

    pub fn schema(self) -> &'static ContentSchema {
        &SCHEMAS[self as usize]
    }

    /// Route segment of the section page.
    pub fn slug(self) -> &'static str {
        match self {
            ContentKind::Notes => "notes",
            ContentKind::PreviousPapers => "papers",
            ContentKind::Forums => "forums",
            ContentKind::LectureVideos => "lectures",
            ContentKind::MockTests => "mock-tests",
            ContentKind::Faculty => "faculty",
            ContentKind::LostFound => "lost-found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: UserId,
    pub email: String,
    pub email_verified: bool,
    pub id_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Signed in, admin flag still being looked up.
    Resolving,
    SignedOut,
    SignedIn(Session),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::SignedIn(session) => Some(session),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Decodes a stored profile. A malformed field falls back to its default
    /// without losing the others, so a bad `createdAt` never costs the admin flag.
    pub fn from_record(record: Record) -> Self {
        match serde_json::from_value(Value::Object(record.clone())) {
            Ok(profile) => profile,
            Err(_) => Self {
                first_name: record
                    .get("firstName")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                email: record
                    .get("email")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                is_admin: record
                    .get("isAdmin")
                    .and_then(Value::as_bool)
                    .unwrap_or_default(),
                created_at: record
                    .get("createdAt")
                    .and_then(|value| timestamp::deserialize(value.clone()).ok())
                    .unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCount {
    pub kind: ContentKind,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileOverview {
    pub session: Session,
    pub activity: Vec<ActivityCount>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn schemas_are_indexed_by_kind() {
        for kind in ContentKind::ALL {
            assert_eq!(kind.schema().kind, kind);
        }
    }

    #[test]
    fn partial_documents_decode_but_are_not_displayable() {
        let doc = Document {
            id: EntryId::new("n1"),
            data: json!({ "title": "Unit 1" }).as_object().cloned().unwrap(),
        };
        let entry = ContentEntry::from_document(doc).unwrap();

        assert_eq!(entry.id, EntryId::new("n1"));
        assert!(!ContentKind::Notes.schema().is_displayable(&entry));
    }

    #[test]
    fn millisecond_timestamps_decode() {
        let doc = Document {
            id: EntryId::new("n1"),
            data: json!({
                "title": "Unit 1",
                "createdAt": 1_700_000_000_000_i64,
                "updatedAt": "2024-01-02T03:04:05Z",
            })
            .as_object()
            .cloned()
            .unwrap(),
        };

        let entry = ContentEntry::from_document(doc).unwrap();

        assert_eq!(entry.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(entry.updated_at.unwrap().timestamp(), 1_704_164_645);
    }

    #[test]
    fn profile_keeps_admin_flag_when_other_fields_are_odd() {
        let millis = json!({ "isAdmin": true, "createdAt": 1_700_000_000_000_i64 });
        let garbled = json!({ "isAdmin": true, "email": 42, "createdAt": "last tuesday" });

        let from_millis = Profile::from_record(millis.as_object().cloned().unwrap());
        let from_garbled = Profile::from_record(garbled.as_object().cloned().unwrap());

        assert!(from_millis.is_admin);
        assert_eq!(from_millis.created_at.timestamp_millis(), 1_700_000_000_000);
        assert!(from_garbled.is_admin);
        assert_eq!(from_garbled.email, "");
    }

    #[test]
    fn whitespace_fields_count_as_empty() {
        let entry = ContentEntry::new("  ", "Chapter 1").with_attachment("https://x/y.pdf");

        assert!(!ContentKind::Notes.schema().is_displayable(&entry));
    }

    #[test]
    fn faculty_entries_do_not_need_a_photo() {
        let entry = ContentEntry::new("Dr. Rao", "9876543210");

        assert!(ContentKind::Faculty.schema().is_displayable(&entry));
        assert!(!ContentKind::Notes.schema().is_displayable(&entry));
    }

    #[test]
    fn record_omits_the_id() {
        let mut entry = ContentEntry::new("Unit 1", "Chapter 1 notes");
        entry.id = EntryId::new("abc");

        let record = entry.to_record().unwrap();

        assert!(!record.contains_key("id"));
        assert_eq!(record["title"], json!("Unit 1"));
        assert_eq!(record["status"], json!("complete"));
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut entry = ContentEntry::new("Unit 1", "Chapter 1 notes");
        let patch = EntryPatch {
            title: Some("Unit 2".into()),
            ..Default::default()
        };
        let at = Utc::now();

        patch.apply(&mut entry, at);
        let record = patch.to_record(at);

        assert_eq!(entry.title, "Unit 2");
        assert_eq!(entry.description, "Chapter 1 notes");
        assert_eq!(entry.updated_at, Some(at));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn members_may_only_touch_their_own_posts() {
        let schema = ContentKind::LostFound.schema();
        let member = Session {
            identity: UserId::new("u1"),
            email: "u1@vbithyd.ac.in".into(),
            display_name: None,
            is_admin: false,
        };

        assert!(schema.may_create(Some(&member)));
        assert!(schema.may_modify(Some(&member), Some(&UserId::new("u1"))));
        assert!(!schema.may_modify(Some(&member), Some(&UserId::new("u2"))));
        assert!(!schema.may_modify(Some(&member), None));
        assert!(!schema.may_create(None));
        assert!(!ContentKind::Notes.schema().may_create(Some(&member)));
    }

    #[test]
    fn placeholders_are_recognizable() {
        assert!(EntryId::placeholder().is_placeholder());
        assert!(!EntryId::new("Xyz123").is_placeholder());
    }
}
