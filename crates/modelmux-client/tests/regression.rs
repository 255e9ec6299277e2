//! Regression tests for modelmux-client: backends against mock servers, the
//! tool loop end to end, and streaming over real HTTP bodies.

use async_trait::async_trait;
use futures_util::StreamExt;
use modelmux_client::{
    AnthropicBackend, Backend, BlockingClient, ChatOptions, ChatRequest, ChatResult, LlmClient,
    LlmError, LlmResult, Message, OllamaBackend, OpenAiBackend, RetryPolicy, StreamEvent,
    ToolArgs, ToolCall, ToolSpec,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn add_tool() -> ToolSpec {
    ToolSpec::from_fn(
        "add",
        "Add two integers",
        json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
            "required": ["a", "b"]
        }),
        |args: ToolArgs| {
            let a = args.get("a").and_then(Value::as_i64).ok_or("missing a")?;
            let b = args.get("b").and_then(Value::as_i64).ok_or("missing b")?;
            Ok::<_, &str>(a + b)
        },
    )
}

fn question() -> ChatRequest {
    ChatRequest::new("test-model", vec![Message::user("What is 2+3?")])
}

fn openai(server: &MockServer) -> OpenAiBackend {
    OpenAiBackend::new("sk-test", format!("{}/v1", server.uri()))
}

fn no_retry(backend: impl Backend + 'static) -> LlmClient {
    LlmClient::new(backend).with_retry(RetryPolicy::none())
}

fn openai_text(text: &str) -> Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 9, "completion_tokens": 1, "total_tokens": 10}
    })
}

fn openai_add_call() -> Value {
    json!({
        "choices": [{"message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "add", "arguments": "{\"a\":2,\"b\":3}"}
            }]
        }, "finish_reason": "tool_calls"}]
    })
}

// --- Status mapping ---

async fn status_error(backend: impl Backend + 'static) -> LlmError {
    no_retry(backend)
        .chat(&question(), &[], &ChatOptions::default())
        .await
        .unwrap_err()
}

async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
        .mount(server)
        .await;
}

fn nope(status: u16) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth {
            status: Some(status),
            body: "nope".into(),
        },
        429 => LlmError::RateLimit {
            body: "nope".into(),
        },
        _ => LlmError::Provider {
            status,
            body: "nope".into(),
        },
    }
}

#[tokio::test]
async fn test_openai_status_mapping() {
    for status in [401u16, 403, 429, 500] {
        let server = MockServer::start().await;
        mount_status(&server, "/v1/chat/completions", status).await;
        let err = status_error(openai(&server)).await;
        assert_eq!(err, nope(status), "status {status}");
    }
}

#[tokio::test]
async fn test_anthropic_status_mapping() {
    for status in [401u16, 429, 529] {
        let server = MockServer::start().await;
        mount_status(&server, "/v1/messages", status).await;
        let err = status_error(AnthropicBackend::new("k", server.uri(), "2023-06-01")).await;
        assert_eq!(err, nope(status), "status {status}");
    }
}

#[tokio::test]
async fn test_ollama_status_mapping() {
    let server = MockServer::start().await;
    mount_status(&server, "/api/chat", 500).await;
    let err = status_error(OllamaBackend::new(server.uri())).await;
    assert_eq!(
        err,
        LlmError::Provider {
            status: 500,
            body: "nope".into()
        }
    );
}

#[tokio::test]
async fn test_auth_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        LlmClient::new(openai(&server)).with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
    let err = client
        .chat(&question(), &[], &ChatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Auth { .. }));
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_text("hi")))
        .mount(&server)
        .await;

    let client =
        LlmClient::new(openai(&server)).with_retry(RetryPolicy::new(2, Duration::from_millis(1)));
    let result = client
        .chat(&question(), &[], &ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(result.text, "hi");
    assert_eq!(result.usage.total(), Some(10));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

// --- Tool loop ---

#[tokio::test]
async fn test_openai_tool_loop_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("\"role\":\"tool\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_text("5")))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_add_call()))
        .mount(&server)
        .await;

    let result = no_retry(openai(&server))
        .chat(&question(), &[add_tool()], &ChatOptions::auto())
        .await
        .unwrap();
    assert_eq!(result.text, "5");
    assert!(result.tool_calls.is_empty());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first["tools"][0]["function"]["name"], json!("add"));

    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let messages = second["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["tool_calls"][0]["id"], json!("call_1"));
    assert_eq!(
        messages[2],
        json!({"role": "tool", "content": "5", "tool_call_id": "call_1"})
    );
}

#[tokio::test]
async fn test_manual_runtime_returns_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_add_call()))
        .expect(1)
        .mount(&server)
        .await;

    let result = no_retry(openai(&server))
        .chat(&question(), &[add_tool()], &ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(
        result.tool_calls,
        vec![ToolCall::from_json_text("call_1", "add", r#"{"a":2,"b":3}"#)]
    );
}

/// Requests the `add` tool on every call.
struct AlwaysCalls {
    calls: AtomicU32,
}

#[async_trait]
impl Backend for AlwaysCalls {
    fn name(&self) -> &str {
        "always-calls"
    }

    async fn chat(&self, _request: &ChatRequest, _tools: &[ToolSpec]) -> LlmResult<ChatResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResult {
            tool_calls: vec![ToolCall::from_json_text(
                format!("call_{n}"),
                "add",
                r#"{"a":1,"b":1}"#,
            )],
            ..ChatResult::default()
        })
    }
}

#[tokio::test]
async fn test_tool_loop_stops_at_max_steps() {
    let backend = Arc::new(AlwaysCalls {
        calls: AtomicU32::new(0),
    });
    let client = LlmClient::from_backend(backend.clone());
    let options = ChatOptions::auto().with_max_steps(4);

    let result = client
        .chat(&question(), &[add_tool()], &options)
        .await
        .unwrap();

    assert!(result.has_tool_calls());
    assert_eq!(result.tool_calls[0].id, "call_4");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_blocking_client_matches_async_bound() {
    let backend = Arc::new(AlwaysCalls {
        calls: AtomicU32::new(0),
    });
    let client = BlockingClient::from_backend(backend.clone()).unwrap();

    let result = client
        .chat(&question(), &[add_tool()], &ChatOptions::auto())
        .unwrap();

    assert!(result.has_tool_calls());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn test_anthropic_tool_loop_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("tool_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "2+3 is 5."}],
            "usage": {"input_tokens": 40, "output_tokens": 6}
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "k"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "tool_use", "id": "toolu_1", "name": "add", "input": {"a": 2, "b": 3}}],
            "usage": {"input_tokens": 30, "output_tokens": 12}
        })))
        .mount(&server)
        .await;

    let backend = AnthropicBackend::new("k", server.uri(), "2023-06-01");
    let result = no_retry(backend)
        .chat(&question(), &[add_tool()], &ChatOptions::auto())
        .await
        .unwrap();
    assert_eq!(result.text, "2+3 is 5.");

    let requests = server.received_requests().await.unwrap();
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(second["messages"][1]["content"][0]["type"], json!("tool_use"));
    assert_eq!(
        second["messages"][2]["content"][0],
        json!({"type": "tool_result", "tool_use_id": "toolu_1", "content": "5"})
    );
}

#[tokio::test]
async fn test_ollama_tool_loop_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("\"role\":\"tool\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "It is 5."},
            "done": true,
            "prompt_eval_count": 20,
            "eval_count": 4
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "add", "arguments": {"a": 2, "b": 3}}}]
            },
            "done": true
        })))
        .mount(&server)
        .await;

    let result = no_retry(OllamaBackend::new(server.uri()))
        .chat(&question(), &[add_tool()], &ChatOptions::auto())
        .await
        .unwrap();
    assert_eq!(result.text, "It is 5.");
    assert_eq!(result.usage.total(), Some(24));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let messages = second["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages[1]["tool_calls"][0],
        json!({"function": {"name": "add", "arguments": {"a": 2, "b": 3}}})
    );
    assert_eq!(
        messages[2],
        json!({"role": "tool", "content": "5", "tool_name": "add"})
    );
}

// --- Streaming ---

const OPENAI_SSE: &str = concat!(
    ": keep-alive\n\n",
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Let me \"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"add.\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"add\",\"arguments\":\"\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"a\\\"\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\":2,\\\"b\\\":\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"3}\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn test_openai_stream_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(OPENAI_SSE, "text/event-stream"))
        .mount(&server)
        .await;

    let events: Vec<StreamEvent> = no_retry(openai(&server))
        .stream(&question(), &[add_tool()])
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::text("Let me "),
            StreamEvent::text("add."),
            StreamEvent::ToolCall {
                call: ToolCall::from_json_text("call_1", "add", r#"{"a":2,"b":3}"#)
            },
            StreamEvent::Done,
        ]
    );
}

#[tokio::test]
async fn test_stream_status_error_is_returned_up_front() {
    let server = MockServer::start().await;
    mount_status(&server, "/v1/chat/completions", 429).await;
    let err = match no_retry(openai(&server)).stream(&question(), &[]).await {
        Err(e) => e,
        Ok(_) => panic!("expected a rate-limit error"),
    };
    assert!(matches!(err, LlmError::RateLimit { .. }));
}

#[tokio::test]
async fn test_ollama_stream_over_http() {
    let body = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"eval_count\":2}\n",
    );
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let events: Vec<StreamEvent> = no_retry(OllamaBackend::new(server.uri()))
        .stream(&question(), &[])
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        events,
        vec![StreamEvent::text("Hel"), StreamEvent::text("lo"), StreamEvent::Done]
    );
}

#[tokio::test]
async fn test_ollama_stream_malformed_line() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "{\"message\":{\"content\":\"a\"},\"done\":false}\n{broken\n",
            "application/x-ndjson",
        ))
        .mount(&server)
        .await;

    let events: Vec<StreamEvent> = no_retry(OllamaBackend::new(server.uri()))
        .stream(&question(), &[])
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::text("a"));
    assert!(matches!(
        events[1],
        StreamEvent::Error {
            error: LlmError::Parse(_)
        }
    ));
}

#[tokio::test]
async fn test_anthropic_stream_degrades_to_single_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "all at once"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let events: Vec<StreamEvent> = no_retry(AnthropicBackend::new("k", server.uri(), "2023-06-01"))
        .stream(&question(), &[])
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(events, vec![StreamEvent::text("all at once"), StreamEvent::Done]);
}

#[tokio::test]
async fn test_http_timeout_is_a_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": {"content": "late"}, "done": true}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let limit = Duration::from_millis(100);
    let backend = OllamaBackend::new(server.uri()).with_timeout(limit).unwrap();
    let err = status_error(backend).await;
    assert_eq!(err, LlmError::Timeout(limit));
}

// --- Abandoned streams ---

/// Reads one HTTP request, headers and `Content-Length` body.
async fn read_request(socket: &mut TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        data.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&data);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                return;
            }
        }
    }
}

/// Answers one request with a single SSE event and never finishes the body.
/// The receiver fires once the client closes the connection.
async fn open_ended_sse_server() -> (String, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"first\"}}]}\n\n";
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        let chunk = format!("{:x}\r\n{event}\r\n", event.len());
        socket.write_all(chunk.as_bytes()).await.unwrap();

        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = closed_tx.send(());
    });

    (format!("http://{addr}/v1"), closed_rx)
}

#[tokio::test]
async fn test_dropped_stream_closes_connection() {
    let (base_url, closed) = open_ended_sse_server().await;
    let mut events = no_retry(OpenAiBackend::new("sk-test", base_url))
        .stream(&question(), &[])
        .await
        .unwrap();

    assert_eq!(events.next().await, Some(StreamEvent::text("first")));
    drop(events);

    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .expect("connection left open after the stream was dropped")
        .unwrap();
}

#[tokio::test]
async fn test_partially_read_stream_leaves_client_usable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(OPENAI_SSE, "text/event-stream"))
        .mount(&server)
        .await;
    let client = no_retry(openai(&server));

    let mut events = client.stream(&question(), &[]).await.unwrap();
    assert_eq!(events.next().await, Some(StreamEvent::text("Let me ")));
    drop(events);

    let all: Vec<StreamEvent> = client.stream(&question(), &[]).await.unwrap().collect().await;
    assert_eq!(all.last(), Some(&StreamEvent::Done));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[test]
fn test_blocking_stream_can_stop_early() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(OPENAI_SSE, "text/event-stream"))
            .mount(&server)
            .await;
        server
    });

    let client = BlockingClient::new(openai(&server))
        .unwrap()
        .with_retry(RetryPolicy::none());
    let first: Vec<StreamEvent> = client.stream(&question(), &[]).unwrap().take(1).collect();
    assert_eq!(first, vec![StreamEvent::text("Let me ")]);

    let all: Vec<StreamEvent> = client.stream(&question(), &[]).unwrap().collect();
    assert_eq!(all.len(), 4);
    assert_eq!(all.last(), Some(&StreamEvent::Done));

    let received = rt.block_on(server.received_requests()).unwrap();
    assert_eq!(received.len(), 2);
}
