use leptos::*;

use super::server::current_session;
use crate::portal::model::{ContentSchema, Session, SessionState, UserId};

/// The signed-in user as seen by the browser. Created once in [`App`](super::App)
/// and shared through context.
#[derive(Clone, Copy)]
pub struct SessionContext {
    version: RwSignal<u32>,
    resource: Resource<u32, Result<Option<Session>, ServerFnError>>,
}

impl SessionContext {
    pub fn provide() -> Self {
        let version = create_rw_signal(0);
        let resource = create_resource(move || version.get(), |_| current_session());
        let context = Self { version, resource };
        provide_context(context);
        context
    }

    /// Re-reads the session, e.g. after signing in or out.
    pub fn refresh(&self) {
        self.version.update(|version| *version += 1);
    }

    pub fn state(&self) -> SessionState {
        match self.resource.get() {
            None => SessionState::Resolving,
            Some(Ok(Some(session))) => SessionState::SignedIn(session),
            Some(Ok(None)) => SessionState::SignedOut,
            Some(Err(err)) => {
                tracing::warn!(%err, "could not resolve session");
                SessionState::SignedOut
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state() != SessionState::Resolving
    }

    pub fn session(&self) -> Option<Session> {
        self.state().session().cloned()
    }

    pub fn may_create(&self, schema: &ContentSchema) -> bool {
        schema.may_create(self.session().as_ref())
    }

    pub fn may_modify(&self, schema: &ContentSchema, owner: Option<&UserId>) -> bool {
        schema.may_modify(self.session().as_ref(), owner)
    }
}

pub fn use_session() -> SessionContext {
    expect_context()
}
