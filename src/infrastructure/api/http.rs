//! HTTP Remote API
//!
//! `RemoteApi` over the JSON resource API of one environment, using reqwest.
//! Resources live at `{base_url}/{plural}/{id}`; list endpoints are paginated
//! with `{"results": [...], "pagination": {"next": url}}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, trace};

use crate::domain::ports::{ApiError, ApiResult, Method, RemoteApi};
use crate::domain::value_objects::{reference_url, ObjectId, ResourceType};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_BODY_LIMIT: usize = 300;

pub struct HttpApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> ApiResult<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn collection_url(&self, resource_type: ResourceType) -> String {
        format!("{}/{}", self.base_url, resource_type.plural())
    }

    /// Send with authentication; an empty body yields `None`
    async fn send(&self, request: RequestBuilder) -> ApiResult<Option<Value>> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::status(
                status.as_u16(),
                body.chars().take(ERROR_BODY_LIMIT).collect::<String>(),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_expecting_body(&self, request: RequestBuilder) -> ApiResult<Value> {
        self.send(request)
            .await?
            .ok_or_else(|| ApiError::Decode("empty response body".to_string()))
    }
}

#[async_trait]
impl RemoteApi for HttpApiClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_one(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<Value> {
        let url = reference_url(&self.base_url, resource_type, id);
        trace!(%url, "GET");
        self.send_expecting_body(self.http.get(&url)).await
    }

    async fn create(&self, resource_type: ResourceType, payload: &Value) -> ApiResult<Value> {
        let url = self.collection_url(resource_type);
        trace!(%url, "POST");
        self.send_expecting_body(self.http.post(&url).json(payload))
            .await
    }

    async fn update(
        &self,
        resource_type: ResourceType,
        id: ObjectId,
        payload: &Value,
    ) -> ApiResult<Value> {
        let url = reference_url(&self.base_url, resource_type, id);
        trace!(%url, "PATCH");
        self.send_expecting_body(self.http.patch(&url).json(payload))
            .await
    }

    async fn delete(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<()> {
        let url = reference_url(&self.base_url, resource_type, id);
        trace!(%url, "DELETE");
        self.send(self.http.delete(&url)).await.map(|_| ())
    }

    async fn list_all(
        &self,
        resource_type: ResourceType,
        filters: &[(String, String)],
    ) -> ApiResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut request = self.http.get(self.collection_url(resource_type)).query(filters);
        loop {
            let page = self.send_expecting_body(request).await?;
            let next = match page {
                Value::Array(results) => {
                    items.extend(results);
                    None
                }
                Value::Object(mut page) => {
                    if let Some(Value::Array(results)) = page.remove("results") {
                        items.extend(results);
                    }
                    page.get("pagination")
                        .and_then(|p| p.get("next"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                }
                other => {
                    return Err(ApiError::Decode(format!(
                        "expected a list of {}, got {other}",
                        resource_type.plural()
                    )))
                }
            };
            match next {
                Some(url) => {
                    debug!(%url, "next page");
                    request = self.http.get(url);
                }
                None => return Ok(items),
            }
        }
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> ApiResult<Option<Value>> {
        let mut request = match method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Patch => self.http.patch(url),
            Method::Delete => self.http.delete(url),
        };
        if let Some(body) = body {
            request = request.json(body);
        }
        trace!(%method, url, "raw request");
        self.send(request).await
    }
}
