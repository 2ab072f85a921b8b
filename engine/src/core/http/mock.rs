//! Recording transport for tests
//!
//! Replies are routed by URL fragment so concurrent stages can share one
//! transport. A route with several queued replies hands them out in order
//! and keeps repeating the last one.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{HttpRequest, HttpResponse, HttpTransport};
use crate::core::{CoreError, CoreResult};

#[derive(Debug, Clone)]
enum MockReply {
    Response(HttpResponse),
    NetworkFailure(String),
}

#[derive(Debug)]
struct Route {
    url_fragment: String,
    replies: VecDeque<MockReply>,
}

/// In-memory [`HttpTransport`] that records every request
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_route(&self, url_fragment: &str, replies: Vec<MockReply>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(Route {
                url_fragment: url_fragment.to_string(),
                replies: replies.into(),
            });
        }
    }

    /// Answers requests whose URL contains `url_fragment`
    pub fn on(self, url_fragment: &str, response: HttpResponse) -> Self {
        self.push_route(url_fragment, vec![MockReply::Response(response)]);
        self
    }

    /// Answers successive matching requests with `responses` in order
    pub fn on_sequence(self, url_fragment: &str, responses: Vec<HttpResponse>) -> Self {
        self.push_route(
            url_fragment,
            responses.into_iter().map(MockReply::Response).collect(),
        );
        self
    }

    /// Fails matching requests before any response is received
    pub fn fail(self, url_fragment: &str, message: &str) -> Self {
        self.push_route(
            url_fragment,
            vec![MockReply::NetworkFailure(message.to_string())],
        );
        self
    }

    /// Every request sent so far, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Total number of requests sent
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Number of requests whose URL contains `url_fragment`
    pub fn calls_to(&self, url_fragment: &str) -> usize {
        self.requests
            .lock()
            .map(|r| r.iter().filter(|req| req.url.contains(url_fragment)).count())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> CoreResult<HttpResponse> {
        let reply = {
            let mut routes = self
                .routes
                .lock()
                .map_err(|_| CoreError::Internal("Mock routes poisoned".to_string()))?;

            routes
                .iter_mut()
                .find(|route| request.url.contains(&route.url_fragment))
                .and_then(|route| {
                    if route.replies.len() > 1 {
                        route.replies.pop_front()
                    } else {
                        route.replies.front().cloned()
                    }
                })
        };

        let url = request.url.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::NetworkFailure(message)) => Err(CoreError::Transport(message)),
            None => Err(CoreError::Transport(format!("No mock route for {}", url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last_reply() {
        let transport = MockTransport::new().on_sequence(
            "/status",
            vec![HttpResponse::new(200, "a"), HttpResponse::new(200, "b")],
        );

        let bodies: Vec<String> = collect_bodies(&transport, 3).await;
        assert_eq!(bodies, vec!["a", "b", "b"]);
        assert_eq!(transport.calls_to("/status"), 3);
    }

    #[tokio::test]
    async fn test_unrouted_request_is_transport_error() {
        let transport = MockTransport::new();
        let err = transport
            .send(HttpRequest::get("https://nowhere.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
        assert_eq!(transport.call_count(), 1);
    }

    async fn collect_bodies(transport: &MockTransport, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            let response = transport
                .send(HttpRequest::get("https://api.test/status"))
                .await
                .unwrap();
            out.push(response.text());
        }
        out
    }
}
