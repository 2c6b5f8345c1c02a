//! Scripted transport for tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::app::{Result, TankobonError};
use crate::transport::{Method, Request, Response, Transport};

#[derive(Clone)]
enum Reply {
    Ok(Response),
    NetworkError,
}

type Route = (Method, String);

/// Answers requests by `(method, path)`. One-shot replies queued with
/// [`MockTransport::push`] are served before the standing reply set with
/// [`MockTransport::on`]. Unknown routes answer 404.
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<Route, VecDeque<Reply>>>,
    standing: Mutex<HashMap<Route, Reply>>,
    requests: Mutex<Vec<Request>>,
    delays: Mutex<HashMap<Route, Duration>>,
}

pub fn json_response(status: u16, body: Value) -> Response {
    Response {
        status,
        headers: vec![("content-type".into(), "application/json".into())],
        body: serde_json::to_vec(&body).unwrap(),
    }
}

fn route(method: Method, path: &str) -> Route {
    (method, path.trim_start_matches('/').to_string())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, path: &str, status: u16, body: Value) {
        self.standing
            .lock()
            .insert(route(method, path), Reply::Ok(json_response(status, body)));
    }

    pub fn on_response(&self, method: Method, path: &str, response: Response) {
        self.standing
            .lock()
            .insert(route(method, path), Reply::Ok(response));
    }

    pub fn push(&self, method: Method, path: &str, response: Response) {
        self.queued
            .lock()
            .entry(route(method, path))
            .or_default()
            .push_back(Reply::Ok(response));
    }

    /// Holds every reply on this route back for `delay`.
    pub fn delay(&self, method: Method, path: &str, delay: Duration) {
        self.delays.lock().insert(route(method, path), delay);
    }

    pub fn fail(&self, method: Method, path: &str) {
        self.standing
            .lock()
            .insert(route(method, path), Reply::NetworkError);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<Request> {
        let (method, path) = route(method, path);
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.url.path().trim_start_matches('/') == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let key = route(request.method, request.url.path());
        self.requests.lock().push(request);

        let delay = self.delays.lock().get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());
        let reply = queued.or_else(|| self.standing.lock().get(&key).cloned());

        match reply {
            Some(Reply::Ok(response)) => Ok(response),
            Some(Reply::NetworkError) => Err(TankobonError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            None => Ok(json_response(404, Value::Null)),
        }
    }
}
