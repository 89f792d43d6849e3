//! Identity Toolkit, Firestore and Firebase Storage over their REST APIs.

use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    config::FirebaseConfig,
    portal::{
        error::{IdentityError, StoreError, UploadError},
        model::{Document, EntryId, Identity, Record, UserId},
        services::{BlobHandle, BlobStore, DocumentStore, IdentityService, SnapshotStream},
    },
};

const IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1/";
const FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com/v1/";
const STORAGE_ENDPOINT: &str = "https://firebasestorage.googleapis.com/v0/b/";
const PAGE_SIZE: &str = "300";

#[derive(Debug)]
struct Shared {
    http: Client,
    api_key: String,
    access_token: Option<String>,
}

impl Shared {
    /// Service-account token when configured, API key otherwise.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request.query(&[("key", &self.api_key)]),
        }
    }
}

/// Builds the three clients over one connection pool.
pub fn clients(
    config: &FirebaseConfig,
    poll_interval: Duration,
) -> reqwest::Result<(FirebaseAuth, Firestore, FirebaseStorage)> {
    let user_agent = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
    let shared = Arc::new(Shared {
        http: ClientBuilder::default().user_agent(user_agent).build()?,
        api_key: config.api_key.clone(),
        access_token: config.access_token.clone(),
    });

    Ok((
        FirebaseAuth {
            shared: shared.clone(),
        },
        Firestore {
            shared: shared.clone(),
            documents: format!(
                "{FIRESTORE_ENDPOINT}projects/{}/databases/(default)/documents",
                config.project_id
            ),
            poll_interval,
        },
        FirebaseStorage {
            shared,
            bucket: config.storage_bucket.clone(),
        },
    ))
}

#[derive(Debug, Clone)]
pub struct FirebaseAuth {
    shared: Arc<Shared>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    id_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Maps Identity Toolkit error codes, e.g. `EMAIL_EXISTS` or
/// `WEAK_PASSWORD : Password should be at least 6 characters`.
fn identity_error(message: &str) -> IdentityError {
    let code = message.split([' ', ':']).next().unwrap_or_default();
    match code {
        "EMAIL_EXISTS" => IdentityError::EmailInUse,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            IdentityError::InvalidCredentials
        }
        "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "USER_NOT_FOUND" => IdentityError::InvalidToken,
        _ => IdentityError::Rejected(
            message
                .split_once(" : ")
                .map_or(message, |(_, detail)| detail)
                .to_string(),
        ),
    }
}

impl FirebaseAuth {
    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: Value,
    ) -> Result<T, IdentityError> {
        let response = self
            .shared
            .http
            .post(format!("{IDENTITY_ENDPOINT}accounts:{method}"))
            .query(&[("key", &self.shared.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|err| IdentityError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(match response.json::<ApiError>().await {
                Ok(api) => identity_error(&api.error.message),
                Err(_) => IdentityError::Request(format!("identity service returned {status}")),
            });
        }

        response
            .json()
            .await
            .map_err(|err| IdentityError::Request(err.to_string()))
    }
}

impl IdentityService for FirebaseAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        let token: TokenResponse = self
            .call(
                "signInWithPassword",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        self.lookup(&token.id_token).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        let token: TokenResponse = self
            .call(
                "signUp",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        let _: Value = self
            .call(
                "sendOobCode",
                json!({ "requestType": "VERIFY_EMAIL", "idToken": token.id_token }),
            )
            .await?;
        self.lookup(&token.id_token).await
    }

    async fn sign_out(&self, identity: &Identity) -> Result<(), IdentityError> {
        // id tokens cannot be revoked with an API key; they lapse within the hour
        debug!(uid = %identity.uid, "dropping id token");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), IdentityError> {
        let _: Value = self
            .call(
                "sendOobCode",
                json!({ "requestType": "PASSWORD_RESET", "email": email }),
            )
            .await?;
        Ok(())
    }

    async fn lookup(&self, id_token: &str) -> Result<Identity, IdentityError> {
        let response: LookupResponse = self.call("lookup", json!({ "idToken": id_token })).await?;
        let user = response
            .users
            .into_iter()
            .next()
            .ok_or(IdentityError::InvalidToken)?;

        Ok(Identity {
            uid: UserId::new(user.local_id),
            email: user.email,
            email_verified: user.email_verified,
            id_token: id_token.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Firestore {
    shared: Arc<Shared>,
    documents: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Record,
    create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    next_page_token: Option<String>,
}

fn store_request(err: reqwest::Error) -> StoreError {
    StoreError::Request(err.to_string())
}

async fn store_response(response: Response, id: &str) -> Result<Response, StoreError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(StoreError::NotFound(id.to_string())),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Request(format!("firestore returned {status}: {body}")))
        }
    }
}

impl Firestore {
    fn url(&self, collection: &str, id: Option<&EntryId>) -> String {
        match id {
            Some(id) => format!("{}/{collection}/{id}", self.documents),
            None => format!("{}/{collection}", self.documents),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .shared
                .authorize(self.shared.http.get(self.url(collection, None)))
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request.send().await.map_err(store_request)?;
            let page: ListResponse = store_response(response, collection)
                .await?
                .json()
                .await
                .map_err(store_request)?;

            for raw in page.documents {
                documents.push(decode_document(raw)?);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(documents),
            }
        }
    }

    async fn write(
        &self,
        collection: &str,
        id: &EntryId,
        record: Record,
        mask: Option<Vec<(&'static str, String)>>,
    ) -> Result<(), StoreError> {
        let mut request = self
            .shared
            .authorize(self.shared.http.patch(self.url(collection, Some(id))))
            .json(&json!({ "fields": encode_fields(&record) }));
        if let Some(mask) = mask {
            request = request.query(&mask);
        }

        let response = request.send().await.map_err(store_request)?;
        store_response(response, id.as_ref()).await?;
        Ok(())
    }
}

/// Fetches a full snapshot every `interval` and yields each one, changed or not,
/// so local optimistic edits never outlive a poll. Ends after the first error.
fn poll_snapshots<F, Fut>(collection: String, interval: Duration, fetch: F) -> SnapshotStream
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<Document>, StoreError>> + Send + 'static,
{
    stream::unfold(Some((fetch, true)), move |state| {
        let collection = collection.clone();
        async move {
            let (fetch, first) = state?;
            if !first {
                tokio::time::sleep(interval).await;
            }
            match fetch().await {
                Ok(docs) => Some((Ok(docs), Some((fetch, false)))),
                Err(err) => {
                    warn!(%collection, %err, "polling stopped");
                    Some((Err(err), None))
                }
            }
        }
    })
    .boxed()
}

impl DocumentStore for Firestore {
    /// Polls the collection; see [`poll_snapshots`].
    fn subscribe(&self, collection: &str) -> SnapshotStream {
        let store = self.clone();
        let name = collection.to_string();
        poll_snapshots(collection.to_string(), self.poll_interval, move || {
            let store = store.clone();
            let name = name.clone();
            async move { store.list(&name).await }
        })
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<EntryId, StoreError> {
        let response = self
            .shared
            .authorize(self.shared.http.post(self.url(collection, None)))
            .json(&json!({ "fields": encode_fields(&record) }))
            .send()
            .await
            .map_err(store_request)?;
        let raw: RawDocument = store_response(response, collection)
            .await?
            .json()
            .await
            .map_err(store_request)?;

        Ok(document_id(&raw.name))
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &EntryId,
        patch: Record,
    ) -> Result<(), StoreError> {
        let mut mask: Vec<_> = patch
            .keys()
            .map(|key| ("updateMask.fieldPaths", key.clone()))
            .collect();
        mask.push(("currentDocument.exists", "true".into()));
        self.write(collection, id, patch, Some(mask)).await
    }

    async fn delete_by_id(&self, collection: &str, id: &EntryId) -> Result<(), StoreError> {
        let response = self
            .shared
            .authorize(self.shared.http.delete(self.url(collection, Some(id))))
            .send()
            .await
            .map_err(store_request)?;
        store_response(response, id.as_ref()).await?;
        Ok(())
    }

    async fn get_by_id(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> Result<Option<Document>, StoreError> {
        let response = self
            .shared
            .authorize(self.shared.http.get(self.url(collection, Some(id))))
            .send()
            .await
            .map_err(store_request)?;

        match store_response(response, id.as_ref()).await {
            Ok(response) => {
                let raw: RawDocument = response.json().await.map_err(store_request)?;
                decode_document(raw).map(Some)
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn put_by_id(
        &self,
        collection: &str,
        id: &EntryId,
        record: Record,
    ) -> Result<(), StoreError> {
        self.write(collection, id, record, None).await
    }
}

fn document_id(name: &str) -> EntryId {
    EntryId::new(name.rsplit('/').next().unwrap_or_default())
}

fn decode_document(raw: RawDocument) -> Result<Document, StoreError> {
    let mut data = decode_fields(&raw.fields)?;
    if let Some(created) = raw.create_time {
        data.entry("createdAt").or_insert(Value::String(created));
    }
    Ok(Document {
        id: document_id(&raw.name),
        data,
    })
}

fn encode_fields(record: &Record) -> Record {
    record
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn decode_fields(fields: &Record) -> Result<Record, StoreError> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), decode_value(value)?)))
        .collect()
}

fn decode_value(value: &Value) -> Result<Value, StoreError> {
    let malformed = || StoreError::Malformed(format!("unexpected firestore value {value}"));
    let (kind, inner) = value
        .as_object()
        .and_then(|typed| typed.iter().next())
        .ok_or_else(malformed)?;

    Ok(match kind.as_str() {
        "nullValue" => Value::Null,
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .or_else(|| inner.as_i64().map(Value::from))
            .ok_or_else(malformed)?,
        "booleanValue" | "doubleValue" | "stringValue" | "timestampValue" | "referenceValue"
        | "bytesValue" | "geoPointValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect::<Result<_, _>>())
                .transpose()?
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(match inner.get("fields").and_then(Value::as_object) {
            Some(fields) => decode_fields(fields)?,
            None => Record::new(),
        }),
        _ => return Err(malformed()),
    })
}

#[derive(Debug, Clone)]
pub struct FirebaseStorage {
    shared: Arc<Shared>,
    bucket: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredObject {
    name: String,
    download_tokens: Option<String>,
}

impl FirebaseStorage {
    fn object_url(&self, path: Option<&str>) -> Result<Url, UploadError> {
        let mut url = Url::parse(&format!("{STORAGE_ENDPOINT}{}/o", self.bucket))
            .map_err(|err| UploadError::Request(err.to_string()))?;
        if let Some(path) = path {
            url.path_segments_mut()
                .map_err(|_| UploadError::Request("storage url cannot be a base".into()))?
                .push(path);
        }
        Ok(url)
    }
}

impl BlobStore for FirebaseStorage {
    async fn put(
        &self,
        path: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<BlobHandle, UploadError> {
        let mut request = self
            .shared
            .http
            .post(self.object_url(None)?)
            .query(&[("name", path)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.shared.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| UploadError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(UploadError::Request(format!(
                "storage returned {}",
                response.status()
            )));
        }

        let stored: StoredObject = response
            .json()
            .await
            .map_err(|err| UploadError::Request(err.to_string()))?;
        Ok(BlobHandle {
            path: stored.name,
            download_token: stored
                .download_tokens
                .and_then(|tokens| tokens.split(',').next().map(str::to_string)),
        })
    }

    async fn retrieval_url(&self, handle: &BlobHandle) -> Result<String, UploadError> {
        let token = handle
            .download_token
            .as_deref()
            .ok_or_else(|| UploadError::MissingUrl(handle.path.clone()))?;

        let mut url = self.object_url(Some(&handle.path))?;
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("token", token);
        Ok(url.into())
    }
}
