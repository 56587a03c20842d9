//! Remote API port - abstraction over the resource API of one environment
//!
//! Every call is asynchronous; suspension happens at each call boundary.
//! A 404 is a distinguished condition (`ApiError::is_not_found`) used for
//! idempotent deletes and missing-dependency checks.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::value_objects::{ObjectId, ResourceType};

/// Result type for remote API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Remote API errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server answered with a non-success status
    #[error("API responded with {status}: {message}")]
    Status { status: u16, message: String },
    /// The request never got an answer
    #[error("transport error: {0}")]
    Transport(String),
    /// The answer could not be decoded
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ApiError::Status {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }
}

/// HTTP verbs for raw requests against endpoints without a typed wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Patch => write!(f, "PATCH"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// Abstract client for one environment's resource API
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Base URL used when rendering references into this environment
    fn base_url(&self) -> &str;

    async fn fetch_one(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<Value>;

    /// Create a resource; returns the created object (with its new `id`)
    async fn create(&self, resource_type: ResourceType, payload: &Value) -> ApiResult<Value>;

    /// Partially update a resource; returns the updated object
    async fn update(
        &self,
        resource_type: ResourceType,
        id: ObjectId,
        payload: &Value,
    ) -> ApiResult<Value>;

    async fn delete(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<()>;

    async fn list_all(
        &self,
        resource_type: ResourceType,
        filters: &[(String, String)],
    ) -> ApiResult<Vec<Value>>;

    /// Raw request for endpoints without a typed wrapper (e.g. hook templates)
    async fn request(&self, method: Method, url: &str, body: Option<&Value>)
        -> ApiResult<Option<Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguished() {
        assert!(ApiError::status(404, "Not found.").is_not_found());
        assert!(!ApiError::status(400, "Bad").is_not_found());
        assert!(!ApiError::Transport("reset".into()).is_not_found());
    }

    #[test]
    fn api_error_display() {
        let err = ApiError::status(409, "already exists");
        assert_eq!(err.to_string(), "API responded with 409: already exists");
    }
}
