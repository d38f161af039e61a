//! Blocking HTTP transport.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use http::{HeaderMap, Method, StatusCode};
use nonzero_ext::nonzero;
use reqwest::blocking::Client;
use std::num::NonZeroU32;
use std::time::Duration;

use super::{Classification, Transport, TransportResponse};
use crate::config::{Config, RateLimitConfig};
use crate::error::Result;

/// Transport over a blocking `reqwest` client, throttled to the service's
/// published call rate
pub struct HttpTransport {
    client: Client,
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(config.api.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            limiter: RateLimiter::direct(quota(&config.rate_limit)),
            clock: DefaultClock::default(),
        })
    }

    /// Block until the rate limiter admits another call
    fn throttle(&self) {
        while let Err(not_until) = self.limiter.check() {
            let wait = not_until.wait_time_from(self.clock.now());
            tracing::debug!("rate limit reached, waiting {:?}", wait);
            std::thread::sleep(wait);
        }
    }
}

fn quota(config: &RateLimitConfig) -> Quota {
    let calls = NonZeroU32::new(config.max_calls).unwrap_or(nonzero!(30u32));
    let period = Duration::from_secs(config.period_seconds.max(1));
    Quota::with_period(period / calls.get())
        .map(|q| q.allow_burst(calls))
        .unwrap_or_else(|| Quota::per_minute(nonzero!(30u32)))
}

/// Map an HTTP status onto a [`Classification`]
pub fn classify(status: StatusCode) -> Classification {
    match status.as_u16() {
        202 => Classification::Processing,
        200..=299 => Classification::Ok,
        400 => Classification::Rejected,
        401 | 402 | 403 | 407 | 451 | 511 => Classification::AuthFailed,
        404 | 410 => Classification::NoContent,
        429 => Classification::RateLimited,
        _ => Classification::ServiceUnavailable,
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
        headers: &HeaderMap,
    ) -> TransportResponse {
        self.throttle();
        tracing::debug!("HTTP {} {}", method, url);

        let mut request = self.client.request(method.clone(), url).headers(headers.clone());
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!("timed out talking to {}: {}", url, e);
                return TransportResponse::new(
                    Classification::NetworkUnreachable,
                    format!("Timed out reading data from {}", url),
                );
            }
            Err(e) => {
                tracing::warn!("request to {} failed: {}", url, e);
                return TransportResponse::new(
                    Classification::NetworkUnreachable,
                    format!("Unable to connect to {}: {}", url, e),
                );
            }
        };

        let status = response.status();
        let classification = classify(status);
        let text = response.text().unwrap_or_else(|e| {
            tracing::warn!("unreadable response body from {}: {}", url, e);
            String::new()
        });
        tracing::debug!("{} from {} ({} bytes)", status, url, text.len());

        // Keep something readable for failures that come without a body
        let text = if text.is_empty() && !classification.is_ok() {
            format!("HTTP {} for {}", status.as_u16(), url)
        } else {
            text
        };
        TransportResponse::new(classification, text)
    }
}
