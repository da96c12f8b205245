//! In-memory HTTP stand-in used by the fetcher and controller tests.

use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex};

use super::connection::{Connection, ConnectionSupplier, Response};
use super::error::{BundleError, BundleResult};

#[derive(Debug, Default)]
struct ServerState {
    body: Vec<u8>,
    etag: Option<String>,
    accept_ranges: bool,
    status_override: Option<u16>,
    content_range_override: Option<String>,
    /// Absolute body offset at which reads start failing.
    fail_at: Option<u64>,
    unreachable: bool,
    requests: Vec<Vec<(String, String)>>,
    bytes_served: u64,
}

#[derive(Debug, Default)]
struct GateState {
    held: bool,
    blocked: usize,
}

/// Holds body reads until released.
#[derive(Debug, Default)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.held {
            return;
        }
        state.blocked += 1;
        self.changed.notify_all();
        while state.held {
            state = self.changed.wait(state).unwrap();
        }
        state.blocked -= 1;
    }
}

/// A single-resource server honouring `Range` and `If-Range`.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeServer {
    state: Arc<Mutex<ServerState>>,
    gate: Arc<Gate>,
}

impl FakeServer {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        let server = Self::default();
        server.state.lock().unwrap().body = body;
        server
    }

    /// Advertise `Accept-Ranges: bytes` and the given entity tag.
    pub(crate) fn with_ranges(self, etag: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.accept_ranges = true;
            state.etag = Some(etag.to_string());
        }
        self
    }

    pub(crate) fn set_body(&self, body: Vec<u8>, etag: &str) {
        let mut state = self.state.lock().unwrap();
        state.body = body;
        state.etag = Some(etag.to_string());
    }

    pub(crate) fn set_status(&self, status: Option<u16>) {
        self.state.lock().unwrap().status_override = status;
    }

    /// Send this `Content-Range` on partial responses instead of the real one.
    pub(crate) fn set_content_range(&self, value: Option<&str>) {
        self.state.lock().unwrap().content_range_override = value.map(str::to_string);
    }

    /// Make body reads block until [`FakeServer::release`].
    pub(crate) fn hold(&self) {
        self.gate.state.lock().unwrap().held = true;
    }

    pub(crate) fn release(&self) {
        self.gate.state.lock().unwrap().held = false;
        self.gate.changed.notify_all();
    }

    /// Wait until a reader is parked on the held gate.
    pub(crate) fn wait_until_blocked(&self) {
        let mut state = self.gate.state.lock().unwrap();
        while state.blocked == 0 {
            state = self.gate.changed.wait(state).unwrap();
        }
    }

    pub(crate) fn set_fail_at(&self, offset: Option<u64>) {
        self.state.lock().unwrap().fail_at = offset;
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub(crate) fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub(crate) fn bytes_served(&self) -> u64 {
        self.state.lock().unwrap().bytes_served
    }

    /// Value of a header sent with the `index`th request.
    pub(crate) fn request_header(&self, index: usize, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.requests.get(index).and_then(|headers| {
            headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        })
    }
}

impl ConnectionSupplier for FakeServer {
    fn connect(&self) -> BundleResult<Box<dyn Connection>> {
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
            gate: Arc::clone(&self.gate),
            headers: Vec::new(),
        }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<ServerState>>,
    gate: Arc<Gate>,
    headers: Vec<(String, String)>,
}

impl Connection for FakeConnection {
    fn url(&self) -> &str {
        "fake://bundle.zip"
    }

    fn set_request_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn open(self: Box<Self>) -> BundleResult<Box<dyn Response>> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(self.headers.clone());

        if state.unreachable {
            return Err(BundleError::DownloadFailed {
                url: "fake://bundle.zip".to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let find = |name: &str| {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        let range_start = find("Range")
            .and_then(|r| r.strip_prefix("bytes=").map(str::to_string))
            .and_then(|r| r.trim_end_matches('-').parse::<u64>().ok());
        let if_range_ok = match (find("If-Range"), &state.etag) {
            (Some(sent), Some(current)) => &sent == current,
            (None, _) => true,
            _ => false,
        };

        let (status, start) = match range_start {
            Some(start) if state.accept_ranges && if_range_ok => {
                if start > state.body.len() as u64 {
                    (416, start)
                } else {
                    (206, start)
                }
            }
            _ => (200, 0),
        };
        let status = state.status_override.unwrap_or(status);

        let mut headers = Vec::new();
        if state.accept_ranges {
            headers.push(("Accept-Ranges".to_string(), "bytes".to_string()));
        }
        if let Some(etag) = &state.etag {
            headers.push(("ETag".to_string(), etag.clone()));
        }

        let data = if status == 200 || status == 206 {
            state.body[start as usize..].to_vec()
        } else {
            Vec::new()
        };
        if status == 206 {
            let total = state.body.len() as u64;
            let content_range = match &state.content_range_override {
                Some(value) => Some(value.clone()),
                None if data.is_empty() => None,
                None => Some(format!("bytes {}-{}/{}", start, total - 1, total)),
            };
            if let Some(value) = content_range {
                headers.push(("Content-Range".to_string(), value));
            }
        }
        let fail_after = state
            .fail_at
            .map(|at| at.saturating_sub(start) as usize);

        Ok(Box::new(FakeResponse {
            status,
            headers,
            content_length: data.len() as u64,
            data,
            position: 0,
            fail_after,
            state: Arc::clone(&self.state),
            gate: Arc::clone(&self.gate),
        }))
    }
}

struct FakeResponse {
    status: u16,
    headers: Vec<(String, String)>,
    content_length: u64,
    data: Vec<u8>,
    position: usize,
    fail_after: Option<usize>,
    state: Arc<Mutex<ServerState>>,
    gate: Arc<Gate>,
}

impl Read for FakeResponse {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.gate.pass();
        let mut end = self.data.len();
        if let Some(limit) = self.fail_after {
            if self.position >= limit {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
            }
            end = end.min(limit);
        }
        let n = buf.len().min(end - self.position);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        self.state.lock().unwrap().bytes_served += n as u64;
        Ok(n)
    }
}

impl Response for FakeResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.content_length)
    }
}
