//! Network transports.
//!
//! A [`Transport`] performs one request and classifies the outcome; callers
//! branch on the [`Classification`] and never see raw status codes.
//!
//! - [`HttpTransport`]: blocking HTTP with client-side throttling
//! - [`CachingTransport`]: opt-in on-disk response cache wrapping another transport
//! - [`MockTransport`]: scripted responses for tests

mod cache;
mod net;
mod mock;

pub use cache::{CacheResult, CachingTransport};
pub use net::{classify, HttpTransport};
pub use mock::{MockTransport, RecordedRequest};

use http::{HeaderMap, Method};
use serde_json::Value;

/// Outcome of a request, as far as callers need to know
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Success; the body holds the answer
    Ok,
    /// Accepted but not ready; ask again later
    Processing,
    /// Nothing exists for the request
    NoContent,
    /// The request itself was refused as invalid
    Rejected,
    /// Refused because of rate limits
    RateLimited,
    /// The service failed or is down
    ServiceUnavailable,
    /// The service could not be reached
    NetworkUnreachable,
    /// Credentials were refused
    AuthFailed,
}

impl Classification {
    pub fn is_ok(&self) -> bool {
        matches!(self, Classification::Ok)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Classification::Ok => "ok",
            Classification::Processing => "processing",
            Classification::NoContent => "no content",
            Classification::Rejected => "rejected",
            Classification::RateLimited => "rate limited",
            Classification::ServiceUnavailable => "service unavailable",
            Classification::NetworkUnreachable => "network unreachable",
            Classification::AuthFailed => "authentication failed",
        };
        f.write_str(text)
    }
}

/// A classified response
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub classification: Classification,
    /// Response body, or a description of the failure when there was none
    pub body: String,
}

impl TransportResponse {
    pub fn new(classification: Classification, body: impl Into<String>) -> Self {
        Self {
            classification,
            body: body.into(),
        }
    }

    /// Successful response with the given body
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(Classification::Ok, body)
    }

    /// Successful response carrying a JSON document
    pub fn json(value: &Value) -> Self {
        Self::ok(value.to_string())
    }

    pub fn processing() -> Self {
        Self::new(Classification::Processing, "")
    }

    pub fn no_content() -> Self {
        Self::new(Classification::NoContent, "")
    }

    pub fn rejected(body: impl Into<String>) -> Self {
        Self::new(Classification::Rejected, body)
    }
}

/// Performs one network request
pub trait Transport: Send + Sync {
    fn request(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
        headers: &HeaderMap,
    ) -> TransportResponse;
}
