//! Remote store contract and the Podio HTTP client implementing it.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bmsync_storage::HttpClientConfig;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[cfg(any(test, feature = "test-util"))]
mod memory;

#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryStore, StoredItem};

pub const CRATE_NAME: &str = "bmsync-podio";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One field definition of a remote application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppField {
    pub field_id: u64,
    pub label: String,
}

impl AppField {
    pub fn new(field_id: u64, label: impl Into<String>) -> Self {
        Self {
            field_id,
            label: label.into(),
        }
    }
}

/// Minimal view of an existing remote item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: u64,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValuesUpdate {
    pub field_id: u64,
    pub values: Vec<FieldValue>,
}

impl FieldValuesUpdate {
    pub fn single(field_id: u64, value: impl Into<String>) -> Self {
        Self {
            field_id,
            values: vec![FieldValue {
                value: value.into(),
            }],
        }
    }
}

/// Item creation payload in the shape the items endpoint accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreate {
    pub external_id: String,
    pub fields: Vec<FieldValuesUpdate>,
    #[serde(default)]
    pub file_ids: Vec<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ItemCreate {
    /// First value submitted for `field_id`, if the payload carries that field.
    pub fn value_of(&self, field_id: u64) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.field_id == field_id)
            .and_then(|f| f.values.first())
            .map(|v| v.value.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Message(String),
}

/// The three remote operations the importer needs.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn application_fields(&self, app_id: AppId) -> Result<Vec<AppField>, RemoteError>;

    /// Empty result means no item carries `external_id` yet.
    async fn find_items_by_external_id(
        &self,
        app_id: AppId,
        external_id: &str,
    ) -> Result<Vec<ItemRef>, RemoteError>;

    async fn create_item(
        &self,
        app_id: AppId,
        item: &ItemCreate,
        silent: bool,
    ) -> Result<ItemRef, RemoteError>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn application_fields(&self, app_id: AppId) -> Result<Vec<AppField>, RemoteError> {
        (**self).application_fields(app_id).await
    }

    async fn find_items_by_external_id(
        &self,
        app_id: AppId,
        external_id: &str,
    ) -> Result<Vec<ItemRef>, RemoteError> {
        (**self).find_items_by_external_id(app_id, external_id).await
    }

    async fn create_item(
        &self,
        app_id: AppId,
        item: &ItemCreate,
        silent: bool,
    ) -> Result<ItemRef, RemoteError> {
        (**self).create_item(app_id, item, silent).await
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PodioCredentials {
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for PodioCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PodioCredentials")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `podio.com` becomes `https://api.podio.com`; full URLs are used as given.
pub fn api_base_for(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://api.{endpoint}")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct AppResponse {
    #[serde(default)]
    fields: Vec<AppFieldWire>,
}

#[derive(Debug, Deserialize)]
struct AppFieldWire {
    field_id: u64,
    config: AppFieldConfig,
}

#[derive(Debug, Deserialize)]
struct AppFieldConfig {
    label: String,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<ItemRef>,
}

#[derive(Debug, Deserialize)]
struct CreatedItem {
    item_id: u64,
}

fn decode_app_fields(body: &str) -> Result<Vec<AppField>, serde_json::Error> {
    let app: AppResponse = serde_json::from_str(body)?;
    Ok(app
        .fields
        .into_iter()
        .map(|f| AppField::new(f.field_id, f.config.label))
        .collect())
}

/// Podio API client authenticating with the OAuth password grant.
pub struct PodioClient {
    client: reqwest::Client,
    api_base: String,
    credentials: PodioCredentials,
    access_token: Mutex<Option<String>>,
}

impl PodioClient {
    pub fn new(credentials: PodioCredentials, http: &HttpClientConfig) -> anyhow::Result<Self> {
        let client = http.build_client().context("building podio http client")?;
        Ok(Self::with_client(credentials, client))
    }

    /// Uses a caller-built `reqwest::Client` instead of one from `HttpClientConfig`.
    pub fn with_client(credentials: PodioCredentials, client: reqwest::Client) -> Self {
        Self {
            client,
            api_base: api_base_for(&credentials.endpoint),
            credentials,
            access_token: Mutex::new(None),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn access_token(&self) -> Result<String, RemoteError> {
        let mut slot = self.access_token.lock().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }

        let url = format!("{}/oauth/token", self.api_base);
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = decode_response(resp).await?;
        info!(username = %self.credentials.username, "authenticated against podio");

        *slot = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteError> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.api_base, path);
        debug!(%method, %url, "podio request");
        Ok(self
            .client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("OAuth2 {token}")))
    }
}

async fn read_success_body(resp: Response) -> Result<(String, String), RemoteError> {
    let status = resp.status();
    let url = resp.url().to_string();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(RemoteError::Status {
            status: status.as_u16(),
            url,
            body,
        });
    }
    Ok((url, body))
}

async fn decode_response<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
    let (url, body) = read_success_body(resp).await?;
    serde_json::from_str(&body).map_err(|source| RemoteError::Decode { url, source })
}

#[async_trait]
impl RemoteStore for PodioClient {
    async fn application_fields(&self, app_id: AppId) -> Result<Vec<AppField>, RemoteError> {
        let resp = self
            .authorized(Method::GET, &format!("/app/{app_id}"))
            .await?
            .send()
            .await?;
        let (url, body) = read_success_body(resp).await?;
        decode_app_fields(&body).map_err(|source| RemoteError::Decode { url, source })
    }

    async fn find_items_by_external_id(
        &self,
        app_id: AppId,
        external_id: &str,
    ) -> Result<Vec<ItemRef>, RemoteError> {
        let resp = self
            .authorized(Method::GET, &format!("/item/app/{app_id}/v2/"))
            .await?
            .query(&[("external_id", external_id)])
            .send()
            .await?;
        let items: ItemsResponse = decode_response(resp).await?;
        Ok(items.items)
    }

    async fn create_item(
        &self,
        app_id: AppId,
        item: &ItemCreate,
        silent: bool,
    ) -> Result<ItemRef, RemoteError> {
        let resp = self
            .authorized(Method::POST, &format!("/item/app/{app_id}/"))
            .await?
            .query(&[("silent", if silent { "1" } else { "0" })])
            .json(item)
            .send()
            .await?;
        let created: CreatedItem = decode_response(resp).await?;
        Ok(ItemRef {
            item_id: created.item_id,
            external_id: Some(item.external_id.clone()),
        })
    }
}
