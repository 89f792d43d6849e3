use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    error::{IdentityError, PortalError, ValidationError},
    model::{EntryId, Identity, Profile, Session, SessionState},
    services::{DocumentStore, IdentityService},
};

/// Collection holding one profile document per user, keyed by uid.
pub const PROFILES: &str = "users";

lazy_static! {
    static ref INSTITUTIONAL_EMAIL: Regex =
        Regex::new(r"^[\w.+-]+@vbithyd\.ac\.in$").expect("institutional email pattern");
}

pub fn validate_institutional_email(email: &str) -> Result<(), ValidationError> {
    if INSTITUTIONAL_EMAIL.is_match(email.trim()) {
        Ok(())
    } else {
        Err(ValidationError::EmailDomain)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpForm {
    pub first_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// A resolved session plus the token that proves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub session: Session,
    pub id_token: String,
}

type Listener = Box<dyn Fn(&SessionState) + Send + Sync>;

struct Tracked {
    generation: u64,
    identity: Option<Identity>,
    state: SessionState,
}

/// Owns the current identity and the admin flag derived from its profile.
pub struct SessionProvider<I, S> {
    identity: I,
    store: S,
    tracked: Mutex<Tracked>,
    listeners: Mutex<Vec<Listener>>,
}

impl<I: IdentityService, S: DocumentStore> SessionProvider<I, S> {
    pub fn new(identity: I, store: S) -> Self {
        Self {
            identity,
            store,
            tracked: Mutex::new(Tracked {
                generation: 0,
                identity: None,
                state: SessionState::SignedOut,
            }),
            listeners: Default::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.tracked().state.clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state().session().cloned()
    }

    /// Calls `listener` on every state transition.
    pub fn on_change(&self, listener: impl Fn(&SessionState) + Send + Sync + 'static) {
        lock(&self.listeners).push(Box::new(listener));
    }

    /// Re-derives the session for a new identity. The profile is looked up
    /// exactly once; while it is pending the state is `Resolving`.
    pub async fn identity_changed(&self, identity: Option<Identity>) -> SessionState {
        let generation = {
            let mut tracked = self.tracked();
            let same = match (&tracked.identity, &identity) {
                (Some(current), Some(next)) => current.uid == next.uid,
                (None, None) => true,
                _ => false,
            };
            if same && tracked.state != SessionState::Resolving {
                tracked.identity = identity;
                return tracked.state.clone();
            }
            tracked.generation += 1;
            tracked.identity = identity.clone();
            tracked.generation
        };

        let Some(identity) = identity else {
            return self.settle(generation, SessionState::SignedOut);
        };

        self.settle(generation, SessionState::Resolving);
        let profile = self.load_profile(&identity).await;
        let session = Session {
            identity: identity.uid.clone(),
            email: identity.email.clone(),
            display_name: profile.as_ref().and_then(|p| p.first_name.clone()),
            is_admin: profile.is_some_and(|p| p.is_admin),
        };
        self.settle(generation, SessionState::SignedIn(session))
    }

    /// Restores the session behind a previously issued id token.
    pub async fn restore(&self, id_token: &str) -> SessionState {
        match self.identity.lookup(id_token).await {
            Ok(identity) => self.identity_changed(Some(identity)).await,
            Err(err) => {
                debug!(%err, "stored token no longer valid");
                self.identity_changed(None).await
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Authenticated, PortalError> {
        validate_institutional_email(email)?;
        let identity = self.identity.sign_in(email.trim(), password).await?;
        self.authenticated(identity).await
    }

    /// Registers a new account, sends its verification email and creates its
    /// (non-admin) profile.
    pub async fn sign_up(&self, form: &SignUpForm) -> Result<Authenticated, PortalError> {
        if form.password != form.confirm_password {
            return Err(ValidationError::PasswordMismatch.into());
        }
        if form.first_name.trim().is_empty() {
            return Err(ValidationError::MissingField("First name".into()).into());
        }
        validate_institutional_email(&form.email)?;

        let email = form.email.trim();
        let identity = self.identity.sign_up(email, &form.password).await?;
        let profile = Profile {
            first_name: Some(form.first_name.trim().to_string()),
            email: email.to_string(),
            is_admin: false,
            created_at: Utc::now(),
        };
        let record = match serde_json::to_value(&profile)? {
            serde_json::Value::Object(record) => record,
            _ => Default::default(),
        };
        self.store
            .put_by_id(PROFILES, &EntryId::new(identity.uid.as_ref()), record)
            .await?;
        info!(uid = %identity.uid, "registered account");

        self.authenticated(identity).await
    }

    pub async fn sign_out(&self) -> Result<(), PortalError> {
        let identity = self.tracked().identity.clone();
        if let Some(identity) = &identity {
            self.identity.sign_out(identity).await?;
        }
        self.identity_changed(None).await;
        Ok(())
    }

    pub async fn send_password_reset(&self, email: &str) -> Result<(), PortalError> {
        validate_institutional_email(email)?;
        self.identity.send_password_reset(email.trim()).await?;
        Ok(())
    }

    async fn authenticated(&self, identity: Identity) -> Result<Authenticated, PortalError> {
        let id_token = identity.id_token.clone();
        match self.identity_changed(Some(identity)).await {
            SessionState::SignedIn(session) => Ok(Authenticated { session, id_token }),
            // a concurrent sign-out won
            _ => Err(IdentityError::InvalidToken.into()),
        }
    }

    /// Missing or unreadable profiles resolve to a plain, non-admin session.
    async fn load_profile(&self, identity: &Identity) -> Option<Profile> {
        let id = EntryId::new(identity.uid.as_ref());
        match self.store.get_by_id(PROFILES, &id).await {
            Ok(Some(doc)) => Some(Profile::from_record(doc.data)),
            Ok(None) => {
                warn!(uid = %identity.uid, "no profile document, treating as non-admin");
                None
            }
            Err(err) => {
                warn!(uid = %identity.uid, %err, "profile lookup failed, treating as non-admin");
                None
            }
        }
    }

    fn settle(&self, generation: u64, state: SessionState) -> SessionState {
        {
            let mut tracked = self.tracked();
            if tracked.generation != generation {
                debug!("discarding stale session resolution");
                return tracked.state.clone();
            }
            tracked.state = state.clone();
        }
        for listener in lock(&self.listeners).iter() {
            listener(&state);
        }
        state
    }

    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        lock(&self.tracked)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::portal::memory::{MemoryIdentity, MemoryStore};

    const EMAIL: &str = "asha@vbithyd.ac.in";

    fn provider() -> (MemoryIdentity, MemoryStore, SessionProvider<MemoryIdentity, MemoryStore>) {
        let identity = MemoryIdentity::default();
        let store = MemoryStore::default();
        let provider = SessionProvider::new(identity.clone(), store.clone());
        (identity, store, provider)
    }

    async fn make_admin(store: &MemoryStore, uid: &str) {
        store
            .put_by_id(
                PROFILES,
                &EntryId::new(uid),
                json!({ "email": EMAIL, "isAdmin": true })
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    #[test]
    fn only_the_institutional_domain_is_accepted() {
        assert!(validate_institutional_email("asha.k+cse@vbithyd.ac.in").is_ok());
        assert!(validate_institutional_email("student@gmail.com").is_err());
        assert!(validate_institutional_email("x@vbithyd.ac.in.evil.com").is_err());
        assert!(validate_institutional_email("x@vbithydXac.in").is_err());
    }

    #[tokio::test]
    async fn foreign_domains_never_reach_the_identity_service() {
        let (identity, _store, provider) = provider();
        let form = SignUpForm {
            first_name: "Sam".into(),
            email: "student@gmail.com".into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        };

        let err = provider.sign_up(&form).await.unwrap_err();

        assert_eq!(err, PortalError::Validation(ValidationError::EmailDomain));
        assert_eq!(identity.request_count(), 0);
    }

    #[tokio::test]
    async fn sign_up_creates_a_non_admin_profile() {
        let (identity, store, provider) = provider();
        let form = SignUpForm {
            first_name: "Asha".into(),
            email: EMAIL.into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        };

        let auth = provider.sign_up(&form).await.unwrap();

        assert!(!auth.session.is_admin);
        assert_eq!(auth.session.display_name.as_deref(), Some("Asha"));
        assert_eq!(identity.verification_emails(), [EMAIL]);
        let profiles = store.documents(PROFILES);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].data["isAdmin"], json!(false));
    }

    #[tokio::test]
    async fn mismatched_passwords_are_rejected_first() {
        let (identity, _store, provider) = provider();
        let form = SignUpForm {
            first_name: "Asha".into(),
            email: EMAIL.into(),
            password: "secret1".into(),
            confirm_password: "secret2".into(),
        };

        assert_eq!(
            provider.sign_up(&form).await.unwrap_err(),
            PortalError::Validation(ValidationError::PasswordMismatch)
        );
        assert_eq!(identity.request_count(), 0);
    }

    #[tokio::test]
    async fn admin_flag_comes_from_the_profile() {
        let (identity, store, provider) = provider();
        let uid = identity.register(EMAIL, "secret1");
        make_admin(&store, uid.as_ref()).await;

        let auth = provider.sign_in(EMAIL, "secret1").await.unwrap();

        assert!(auth.session.is_admin);
        assert_eq!(provider.current_session(), Some(auth.session));
    }

    #[tokio::test]
    async fn profiles_stamped_in_milliseconds_keep_admin() {
        let (identity, store, provider) = provider();
        let uid = identity.register(EMAIL, "secret1");
        let profile = json!({ "email": EMAIL, "isAdmin": true, "createdAt": 1_700_000_000_000_i64 });
        store
            .put_by_id(
                PROFILES,
                &EntryId::new(uid.as_ref()),
                profile.as_object().cloned().unwrap(),
            )
            .await
            .unwrap();

        let auth = provider.sign_in(EMAIL, "secret1").await.unwrap();

        assert!(auth.session.is_admin);
    }

    #[tokio::test]
    async fn missing_profile_means_not_admin() {
        let (identity, _store, provider) = provider();
        identity.register(EMAIL, "secret1");

        let auth = provider.sign_in(EMAIL, "secret1").await.unwrap();

        assert!(!auth.session.is_admin);
    }

    #[tokio::test]
    async fn one_profile_lookup_per_identity_change() {
        let (identity, store, provider) = provider();
        identity.register(EMAIL, "secret1");
        let signed_in = identity.sign_in(EMAIL, "secret1").await.unwrap();

        provider.identity_changed(Some(signed_in.clone())).await;
        provider.identity_changed(Some(signed_in.clone())).await;
        assert_eq!(store.request_count(), 1);

        provider.identity_changed(None).await;
        provider.identity_changed(Some(signed_in)).await;
        assert_eq!(store.request_count(), 2);
    }

    #[tokio::test]
    async fn listeners_see_resolving_before_signed_in() {
        let (identity, _store, provider) = provider();
        identity.register(EMAIL, "secret1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        provider.on_change(move |state| lock(&sink).push(state.clone()));

        provider.sign_in(EMAIL, "secret1").await.unwrap();
        provider.sign_out().await.unwrap();

        let seen = lock(&seen);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], SessionState::Resolving);
        assert!(matches!(seen[1], SessionState::SignedIn(_)));
        assert_eq!(seen[2], SessionState::SignedOut);
    }

    #[tokio::test]
    async fn restore_with_a_revoked_token_signs_out() {
        let (identity, _store, provider) = provider();
        identity.register(EMAIL, "secret1");
        let auth = provider.sign_in(EMAIL, "secret1").await.unwrap();
        provider.sign_out().await.unwrap();

        let state = provider.restore(&auth.id_token).await;

        assert_eq!(state, SessionState::SignedOut);
    }

    #[tokio::test]
    async fn wrong_password_is_an_identity_error() {
        let (identity, _store, provider) = provider();
        identity.register(EMAIL, "secret1");

        assert_eq!(
            provider.sign_in(EMAIL, "nope").await.unwrap_err(),
            PortalError::Identity(IdentityError::InvalidCredentials)
        );
        assert_eq!(provider.state(), SessionState::SignedOut);
    }
}
