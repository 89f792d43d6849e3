//! Framework-free core of the portal: content schemas, the live list mirror,
//! form drafts, uploads, mutations and sessions.
//!
//! Nothing here depends on Leptos or tokio, so the same code runs in the
//! browser build and on the server.

pub mod chat;
pub mod dispatcher;
pub mod error;
pub mod form;
pub mod live_list;
pub mod memory;
pub mod model;
pub mod preview;
pub mod services;
pub mod session;
pub mod upload;

pub use dispatcher::{MutationDispatcher, MutationLog, MutationStatus};
pub use error::{ChatError, IdentityError, PortalError, StoreError, UploadError, ValidationError};
pub use form::{Draft, DraftField, FormController};
pub use live_list::{LiveList, SubscriptionHandle, WeakList};
pub use model::{
    ContentEntry, ContentKind, ContentSchema, EntryId, EntryPatch, Session, SessionState, UserId,
};
pub use session::{SessionProvider, SignUpForm};
pub use upload::{PendingFile, UploadPipeline, UploadResult};
