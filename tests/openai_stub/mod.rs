#![allow(dead_code)]

use std::io::Read as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Fail this many chat requests before succeeding.
    pub fail_first: u32,
    /// Status code used for injected failures.
    pub fail_status: u16,
    pub summary_text: String,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            fail_first: 0,
            fail_status: 500,
            summary_text: "a concise summary".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub authorization: Option<String>,
    pub body: Value,
}

pub struct LlmStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LlmStub {
    pub fn spawn(config: StubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start llm stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let failures_left = Arc::new(AtomicU32::new(config.fail_first));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                let method = request.method().clone();

                if method == tiny_http::Method::Get && path == "/v1/models" {
                    respond_json(
                        request,
                        200,
                        &serde_json::json!({
                            "object": "list",
                            "data": [
                                { "id": "gpt-4o-mini", "owned_by": "openai" },
                                { "id": "gpt-4.1", "owned_by": "openai" },
                            ],
                        }),
                    );
                    continue;
                }

                if method != tiny_http::Method::Post || path != "/v1/chat/completions" {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_owned());

                let mut raw = String::new();
                if request.as_reader().read_to_string(&mut raw).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&raw) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };

                recorded.lock().expect("record request").push(RecordedRequest {
                    authorization,
                    body: parsed.clone(),
                });

                let remaining = failures_left.load(Ordering::SeqCst);
                if remaining > 0 {
                    failures_left.store(remaining - 1, Ordering::SeqCst);
                    respond_json(
                        request,
                        config.fail_status,
                        &serde_json::json!({
                            "error": { "message": "stub failure injected" },
                        }),
                    );
                    continue;
                }

                respond_json(
                    request,
                    200,
                    &serde_json::json!({
                        "id": "chatcmpl-stub",
                        "object": "chat.completion",
                        "model": parsed.get("model").cloned().unwrap_or(Value::Null),
                        "choices": [
                            {
                                "index": 0,
                                "message": {
                                    "role": "assistant",
                                    "content": config.summary_text,
                                },
                                "finish_reason": "stop",
                            }
                        ],
                    }),
                );
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("read recorded requests").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("count recorded requests").len()
    }
}

impl Drop for LlmStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn respond_json(request: tiny_http::Request, status: u16, body: &Value) {
    let mut response =
        tiny_http::Response::from_string(body.to_string()).with_status_code(status);
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    response = response.with_header(header);
    let _ = request.respond(response);
}
