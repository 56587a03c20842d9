//! Bounded API dispatch
//!
//! Every remote call of a release goes through `Dispatcher`, which holds one
//! permit of a shared semaphore for the duration of the call. Callers beyond
//! the limit wait instead of failing.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::domain::ports::{ApiError, ApiResult, Method, RemoteApi};
use crate::domain::value_objects::{ObjectId, ResourceType};

#[derive(Clone)]
pub struct Dispatcher {
    api: Arc<dyn RemoteApi>,
    rate_limiter: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn RemoteApi>, max_concurrent: usize) -> Self {
        Self {
            api,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }

    async fn permit(&self) -> ApiResult<tokio::sync::SemaphorePermit<'_>> {
        self.rate_limiter
            .acquire()
            .await
            .map_err(|_| ApiError::Transport("rate limiter closed".to_string()))
    }

    pub async fn fetch_one(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<Value> {
        let _permit = self.permit().await?;
        debug!(resource = %resource_type, id, "GET");
        self.api.fetch_one(resource_type, id).await
    }

    pub async fn create(&self, resource_type: ResourceType, payload: &Value) -> ApiResult<Value> {
        let _permit = self.permit().await?;
        debug!(resource = %resource_type, "POST");
        self.api.create(resource_type, payload).await
    }

    pub async fn update(
        &self,
        resource_type: ResourceType,
        id: ObjectId,
        payload: &Value,
    ) -> ApiResult<Value> {
        let _permit = self.permit().await?;
        debug!(resource = %resource_type, id, "PATCH");
        self.api.update(resource_type, id, payload).await
    }

    pub async fn delete(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<()> {
        let _permit = self.permit().await?;
        debug!(resource = %resource_type, id, "DELETE");
        self.api.delete(resource_type, id).await
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> ApiResult<Option<Value>> {
        let _permit = self.permit().await?;
        debug!(%method, url, "raw request");
        self.api.request(method, url, body).await
    }

    pub fn available_permits(&self) -> usize {
        self.rate_limiter.available_permits()
    }
}
