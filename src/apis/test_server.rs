use std::io::Read as _;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;

/// How long the server waits for the next request before giving up on the
/// rest of its script.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path and query exactly as sent.
    pub url: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// A local HTTP server that answers requests with scripted JSON responses,
/// in order, and records what it received.
pub struct TestServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn start(responses: Vec<(u16, Value)>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind test server");
        let addr = server.server_addr().to_ip().expect("test server listens on TCP");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let handle = std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok(Some(mut request)) = server.recv_timeout(IDLE_TIMEOUT) else {
                    return;
                };
                let mut request_body = String::new();
                request.as_reader().read_to_string(&mut request_body).expect("read request body");
                let authorization = request
                    .headers()
                    .iter()
                    .find(|header| header.field.equiv("Authorization"))
                    .map(|header| header.value.as_str().to_owned());
                recorded.lock().expect("lock").push(RecordedRequest {
                    method: request.method().as_str().to_owned(),
                    url: request.url().to_owned(),
                    authorization,
                    body: request_body,
                });
                let content_type = tiny_http::Header::from_bytes("Content-Type", "application/json")
                    .expect("valid header");
                let response = tiny_http::Response::from_data(body.to_string().into_bytes())
                    .with_status_code(status)
                    .with_header(content_type);
                request.respond(response).expect("send response");
            }
        });
        Self { base_url: format!("http://{addr}"), requests, handle }
    }

    /// Waits for the script to be used up (or the server to go idle) and
    /// returns every request received.
    pub fn finish(self) -> Vec<RecordedRequest> {
        self.handle.join().expect("test server thread panicked");
        let requests = self.requests.lock().expect("lock");
        requests.clone()
    }
}
