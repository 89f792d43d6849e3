//! Server functions. Each one resolves the caller's session from the session
//! cookie and runs the matching core operation against the shared backend.

use leptos::*;
use server_fn::codec::{Json, MultipartData, MultipartFormData};

use crate::portal::{
    chat::ChatMessage,
    form::Draft,
    model::{ContentEntry, ContentKind, EntryId, ProfileOverview, Session},
    upload::PendingFile,
};

/// Multipart field names of a [`submit_draft`] body.
pub const KIND_PART: &str = "kind";
pub const DRAFT_PART: &str = "draft";
pub const FILE_PART: &str = "file";

/// The decoded parts of a [`submit_draft`] body.
#[derive(Debug, Default)]
pub struct Submission {
    pub kind: Option<String>,
    pub draft: Option<String>,
    pub file: Option<PendingFile>,
}

impl Submission {
    /// The kind and the draft, with the uploaded file staged on it.
    pub fn into_draft(self) -> Result<(ContentKind, Draft), String> {
        let kind = self.kind.ok_or("missing content kind")?;
        let draft = self.draft.ok_or("missing draft")?;
        let kind: ContentKind =
            serde_json::from_str(&kind).map_err(|err| format!("bad content kind: {err}"))?;
        let mut draft: Draft =
            serde_json::from_str(&draft).map_err(|err| format!("bad draft: {err}"))?;
        draft.pending_file = self.file;
        Ok((kind, draft))
    }
}

#[cfg(feature = "ssr")]
pub(crate) mod ssr {
    use std::sync::Arc;

    use http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    };
    use leptos::*;
    use leptos_axum::ResponseOptions;
    use server_fn::codec::MultipartData;

    use super::{Submission, DRAFT_PART, FILE_PART, KIND_PART};
    use crate::{
        app::backend::Backend,
        portal::{model::Session, upload::PendingFile},
    };

    pub const SESSION_COOKIE: &str = "portal_session";
    const SESSION_MAX_AGE: u32 = 60 * 60;

    pub fn backend() -> Result<Arc<Backend>, ServerFnError> {
        use_context::<Arc<Backend>>().ok_or_else(|| ServerFnError::new("backend unavailable"))
    }

    pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn session_cookie(token: Option<&str>) -> String {
        match token {
            Some(token) => format!(
                "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_MAX_AGE}"
            ),
            None => format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
        }
    }

    pub async fn session_token() -> Result<Option<String>, ServerFnError> {
        let headers: HeaderMap = leptos_axum::extract().await?;
        Ok(read_cookie(&headers, SESSION_COOKIE))
    }

    pub async fn current(backend: &Backend) -> Result<Option<Session>, ServerFnError> {
        let token = session_token().await?;
        Ok(backend.resolve_session(token.as_deref()).await)
    }

    pub fn set_session_cookie(token: Option<&str>) -> Result<(), ServerFnError> {
        let value = HeaderValue::from_str(&session_cookie(token)).map_err(ServerFnError::new)?;
        if let Some(response) = use_context::<ResponseOptions>() {
            response.insert_header(SET_COOKIE, value);
        }
        Ok(())
    }

    /// Reads the parts of a multipart submission; unknown parts are skipped.
    pub async fn read_submission(data: MultipartData) -> Result<Submission, ServerFnError> {
        let mut parts = data
            .into_inner()
            .ok_or_else(|| ServerFnError::new("expected a multipart body"))?;
        let mut submission = Submission::default();

        while let Some(field) = parts.next_field().await.map_err(ServerFnError::new)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                KIND_PART => submission.kind = Some(field.text().await.map_err(ServerFnError::new)?),
                DRAFT_PART => {
                    submission.draft = Some(field.text().await.map_err(ServerFnError::new)?)
                }
                FILE_PART => {
                    let name = field.file_name().unwrap_or("upload").to_string();
                    let content_type = field
                        .content_type()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "application/octet-stream".to_string());
                    let bytes = field.bytes().await.map_err(ServerFnError::new)?;
                    submission.file = Some(PendingFile {
                        name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
                other => tracing::debug!(part = other, "ignoring unknown multipart field"),
            }
        }
        Ok(submission)
    }

}

/// The message to show for a failed server call.
pub fn error_message(err: &ServerFnError) -> String {
    match err {
        ServerFnError::ServerError(message) => message.clone(),
        other => other.to_string(),
    }
}

#[server]
pub async fn current_session() -> Result<Option<Session>, ServerFnError> {
    let backend = ssr::backend()?;
    ssr::current(&backend).await
}

#[server]
pub async fn sign_in(email: String, password: String) -> Result<Session, ServerFnError> {
    let backend = ssr::backend()?;
    let auth = backend
        .session_provider()
        .sign_in(&email, &password)
        .await
        .map_err(ServerFnError::new)?;
    ssr::set_session_cookie(Some(&auth.id_token))?;
    Ok(auth.session)
}

#[server]
pub async fn sign_up(
    first_name: String,
    email: String,
    password: String,
    confirm_password: String,
) -> Result<Session, ServerFnError> {
    use crate::portal::session::SignUpForm;

    let backend = ssr::backend()?;
    let form = SignUpForm {
        first_name,
        email,
        password,
        confirm_password,
    };
    let auth = backend
        .session_provider()
        .sign_up(&form)
        .await
        .map_err(ServerFnError::new)?;
    ssr::set_session_cookie(Some(&auth.id_token))?;
    Ok(auth.session)
}

#[server]
pub async fn sign_out() -> Result<(), ServerFnError> {
    let backend = ssr::backend()?;
    if let Some(token) = ssr::session_token().await? {
        let provider = backend.session_provider();
        provider.restore(&token).await;
        if let Err(err) = provider.sign_out().await {
            tracing::warn!(%err, "sign-out request failed, clearing the cookie anyway");
        }
    }
    ssr::set_session_cookie(None)
}

#[server]
pub async fn reset_password(email: String) -> Result<(), ServerFnError> {
    let backend = ssr::backend()?;
    backend
        .session_provider()
        .send_password_reset(&email)
        .await
        .map_err(ServerFnError::new)
}

#[server]
pub async fn list_entries(kind: ContentKind) -> Result<Vec<ContentEntry>, ServerFnError> {
    let backend = ssr::backend()?;
    Ok(backend.entries(kind))
}

#[server]
pub async fn delete_entry(kind: ContentKind, id: EntryId) -> Result<(), ServerFnError> {
    let backend = ssr::backend()?;
    let session = ssr::current(&backend).await?;
    backend
        .dispatcher(kind)
        .delete(session.as_ref(), &id)
        .await
        .map_err(ServerFnError::new)
}

/// Runs the full submit pipeline (authorize, validate, upload, persist) for a
/// draft edited in the browser. The file, if any, arrives as its own part.
#[server(input = MultipartFormData)]
pub async fn submit_draft(data: MultipartData) -> Result<EntryId, ServerFnError> {
    use crate::portal::form::FormController;

    let backend = ssr::backend()?;
    let session = ssr::current(&backend).await?;
    let (kind, draft) = ssr::read_submission(data)
        .await?
        .into_draft()
        .map_err(ServerFnError::new)?;
    let mut form = FormController::from_draft(kind.schema(), draft);
    form.submit(
        session.as_ref(),
        &backend.uploads(),
        &backend.dispatcher(kind),
    )
    .await
    .map_err(ServerFnError::new)
}

#[server(name = ProfileOverviewFn)]
pub async fn profile_overview() -> Result<Option<ProfileOverview>, ServerFnError> {
    let backend = ssr::backend()?;
    Ok(ssr::current(&backend).await?.map(|session| ProfileOverview {
        activity: backend.activity(&session),
        session,
    }))
}

#[server(input = Json)]
pub async fn ask_assistant(history: Vec<ChatMessage>) -> Result<ChatMessage, ServerFnError> {
    use crate::portal::{
        chat::{Conversation, Speaker},
        error::ValidationError,
    };

    let backend = ssr::backend()?;
    let conversation = Conversation::from_messages(history);
    match conversation.messages().last() {
        Some(last) if last.speaker == Speaker::User => {}
        _ => return Err(ServerFnError::new(ValidationError::EmptyMessage)),
    }
    Ok(backend.ask_assistant(&conversation).await)
}
