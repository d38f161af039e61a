//! Scripted transport for testing purposes.

use http::{HeaderMap, Method};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Transport, TransportResponse};

/// A request seen by [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: String,
    /// Header names and values, lossily converted to text
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
struct Route {
    needle: String,
    responses: VecDeque<TransportResponse>,
}

#[derive(Debug, Default)]
struct MockState {
    routes: Vec<Route>,
    queue: VecDeque<TransportResponse>,
    requests: Vec<RecordedRequest>,
}

/// A transport answering from scripted responses.
///
/// Requests whose body contains a route's needle are answered from that
/// route (the longest matching needle wins). Each route replays its
/// responses in order and then keeps repeating the last one. Anything else
/// takes the next response from a FIFO queue, and once that runs dry the
/// answer is "no content".
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose body contains `needle` with `response`.
    /// Repeated calls for the same needle queue further responses.
    pub fn on(&self, needle: impl Into<String>, response: TransportResponse) -> &Self {
        let needle = needle.into();
        let mut state = self.lock();
        match state.routes.iter_mut().find(|r| r.needle == needle) {
            Some(route) => route.responses.push_back(response),
            None => state.routes.push(Route {
                needle,
                responses: VecDeque::from([response]),
            }),
        }
        drop(state);
        self
    }

    /// Queue a response for the next unrouted request
    pub fn push(&self, response: TransportResponse) -> &Self {
        self.lock().queue.push_back(response);
        self
    }

    /// Every request seen so far, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Number of requests whose body contains `needle`
    pub fn count_matching(&self, needle: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.body.contains(needle))
            .count()
    }

    /// Forget recorded requests, keeping the script
    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockTransport {
    fn request(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
        headers: &HeaderMap,
    ) -> TransportResponse {
        let body = body.unwrap_or_default();
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method: method.clone(),
            url: url.to_string(),
            body: body.to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
                .collect(),
        });

        let route = state
            .routes
            .iter_mut()
            .filter(|r| body.contains(r.needle.as_str()))
            .max_by_key(|r| r.needle.len());
        if let Some(route) = route {
            let response = if route.responses.len() > 1 {
                route.responses.pop_front()
            } else {
                route.responses.front().cloned()
            };
            if let Some(response) = response {
                return response;
            }
        }

        state
            .queue
            .pop_front()
            .unwrap_or_else(TransportResponse::no_content)
    }
}
