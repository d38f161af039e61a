//! Authenticated requests to the search endpoint.

use http::{header, HeaderMap, HeaderValue, Method};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{DimensionsError, Result};
use crate::transport::{Classification, Transport, TransportResponse};
use crate::utils::{with_retry, Attempt, RetryConfig};

/// Posts search text on behalf of one bearer token
pub(crate) struct DslClient {
    transport: Arc<dyn Transport>,
    dsl_url: String,
    headers: HeaderMap,
    retry: RetryConfig,
}

impl DslClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        dsl_url: impl Into<String>,
        token: &str,
        retry: RetryConfig,
    ) -> Result<Self> {
        let value = HeaderValue::from_str(&format!("JWT {}", token)).map_err(|_| {
            DimensionsError::AuthenticationFailure("token contains invalid characters".to_string())
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value);

        Ok(Self {
            transport,
            dsl_url: dsl_url.into(),
            headers,
            retry,
        })
    }

    /// Post one search. Returns `None` when the service has no content for
    /// it; retries while the service reports results are not ready.
    pub fn post(&self, search: &str) -> Result<Option<Value>> {
        with_retry(&self.retry, "search", || {
            tracing::debug!("posting query: '{}'", search);
            let response =
                self.transport
                    .request(&Method::POST, &self.dsl_url, Some(search), &self.headers);
            match response.classification {
                Classification::Ok => Ok(Attempt::Ready(Some(serde_json::from_str(
                    &response.body,
                )?))),
                Classification::Processing => Ok(Attempt::NotReady),
                Classification::NoContent => {
                    tracing::debug!("server returned \"no content\"");
                    Ok(Attempt::Ready(None))
                }
                _ => Err(response_error(&response)),
            }
        })
    }
}

/// Exchange credentials for a token
pub(crate) fn login(
    transport: &dyn Transport,
    auth_url: &str,
    username: &str,
    password: &str,
) -> Result<String> {
    tracing::debug!("logging in as '{}'", username);
    let body = json!({ "username": username, "password": password }).to_string();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    let response = transport.request(&Method::POST, auth_url, Some(&body), &headers);
    if !response.classification.is_ok() {
        return Err(response_error(&response));
    }

    let data: Value = serde_json::from_str(&response.body)?;
    match data.get("token").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(DimensionsError::AuthenticationFailure(
            "Dimensions did not return a token".to_string(),
        )),
    }
}

/// Error for a response that was not successful
fn response_error(response: &TransportResponse) -> DimensionsError {
    match response.classification {
        Classification::Rejected => {
            DimensionsError::RequestRejected(rejection_message(&response.body))
        }
        Classification::AuthFailed => {
            DimensionsError::AuthenticationFailure(format!("Access is forbidden ({})", response.body))
        }
        Classification::RateLimited => DimensionsError::RateLimited(
            "Server blocking further requests due to rate limits".to_string(),
        ),
        Classification::NetworkUnreachable => DimensionsError::NetworkFailure(response.body.clone()),
        Classification::NoContent => {
            DimensionsError::DataMismatch(format!("No content: {}", response.body))
        }
        Classification::Processing => DimensionsError::ServiceUnavailable(
            "Server returned code 202 where no retry was possible".to_string(),
        ),
        Classification::ServiceUnavailable | Classification::Ok => {
            DimensionsError::ServiceUnavailable(response.body.clone())
        }
    }
}

/// Human-readable reason for a rejected query, with the server's detail
/// text (`errors.query.details[0]`) when it sent one
fn rejection_message(body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        let errors = json.get("errors").unwrap_or(&json);
        let query = errors.get("query").unwrap_or(errors);
        query
            .get("details")
            .and_then(|d| d.get(0))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match detail {
        Some(detail) => format!("Server rejected the query -- {}", detail),
        None => "Server rejected the query".to_string(),
    }
}
