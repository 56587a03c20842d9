//! Remote API implementations

mod http;

pub use http::HttpApiClient;
