use claude_router::config::{ModelPrice, ProviderConfig, RouterConfig, RouterPolicy};
use claude_router::{
    build_router, AppState, ConfigSource, Dispatcher, PriceTable, Telemetry, TelemetryRecord,
    TelemetrySink,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct Records(Mutex<Vec<TelemetryRecord>>);

impl TelemetrySink for Records {
    fn record(&self, record: &TelemetryRecord) {
        self.0.lock().unwrap().push(record.clone());
    }
}

impl Records {
    fn take(&self) -> Vec<TelemetryRecord> {
        self.0.lock().unwrap().clone()
    }
}

fn openai_provider(name: &str, server: &MockServer, models: &[&str]) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        api_base_url: Some(format!("{}/v1/chat/completions", server.uri())),
        api_key: Some("test-key".to_string()),
        models: models.iter().map(|m| m.to_string()).collect(),
        ..ProviderConfig::default()
    }
}

fn config(providers: Vec<ProviderConfig>, default: &str, fallbacks: &[&str]) -> RouterConfig {
    RouterConfig {
        api_timeout_ms: 5_000,
        providers,
        router: RouterPolicy {
            default: Some(default.to_string()),
            fallbacks: fallbacks.iter().map(|r| r.to_string()).collect(),
            ..RouterPolicy::default()
        },
        ..RouterConfig::default()
    }
}

fn chat_completion(text: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
    })
}

fn anthropic_request(model: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": 64,
        "system": "Be brief.",
        "messages": [{"role": "user", "content": "Say hello"}]
    })
}

fn http() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Serve the router on an ephemeral port; returns its base URL and the telemetry it emits.
async fn spawn_router(config: RouterConfig) -> (String, Arc<Records>) {
    spawn_router_with(ConfigSource::fixed(config)).await
}

async fn spawn_router_with(config: ConfigSource) -> (String, Arc<Records>) {
    let records = Arc::new(Records::default());
    let telemetry = Telemetry::new(records.clone(), Arc::new(PriceTable::default()));
    let state = Arc::new(AppState {
        config,
        dispatcher: Dispatcher::new(http(), None, telemetry).with_config_pricing(),
        logger: None,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), records)
}

#[tokio::test]
async fn test_anthropic_client_served_by_openai_provider() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "messages": [{"role": "system", "content": "Be brief."}, {"role": "user", "content": "Say hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("hello")))
        .expect(1)
        .mount(&upstream)
        .await;

    let provider = openai_provider("openai", &upstream, &["gpt-4o"]);
    let (base, records) = spawn_router(config(vec![provider], "openai,gpt-4o", &[])).await;

    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&anthropic_request("claude-3-5-sonnet-latest"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["text"], "hello");
    assert_eq!(body["stop_reason"], "stop");
    assert_eq!(body["usage"]["input_tokens"], 5);

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "openai");
    assert_eq!(records[0].model, "gpt-4o");
    assert_eq!((records[0].input_tokens, records[0].output_tokens), (5, 1));
    assert!(records[0].success);
}

#[tokio::test]
async fn test_openai_client_served_by_anthropic_provider() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header_exists("anthropic-version"))
        .and(body_partial_json(json!({
            "model": "claude-3-5-haiku-latest",
            "max_tokens": 1024,
            "system": "sys"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-haiku-latest",
            "content": [{"type": "text", "text": "hi there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let provider = ProviderConfig {
        name: "anthropic".to_string(),
        api_base_url: Some(format!("{}/v1/messages", upstream.uri())),
        api_key: Some("test-key".to_string()),
        models: vec!["claude-3-5-haiku-latest".to_string()],
        ..ProviderConfig::default()
    };
    let (base, records) =
        spawn_router(config(vec![provider], "anthropic,claude-3-5-haiku-latest", &[])).await;

    let resp = http()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "system", "content": "sys"}, {"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "hi there");
    assert_eq!(body["choices"][0]["finish_reason"], "end_turn");
    assert_eq!(body["usage"]["total_tokens"], 5);
    assert_eq!(records.take()[0].provider, "anthropic");
}

#[tokio::test]
async fn test_fallback_after_connection_refused() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("from backup")))
        .expect(1)
        .mount(&upstream)
        .await;

    let dead = ProviderConfig {
        name: "dead".to_string(),
        api_base_url: Some("http://127.0.0.1:1/v1/chat/completions".to_string()),
        api_key: Some("test-key".to_string()),
        models: vec!["m1".to_string()],
        ..ProviderConfig::default()
    };
    let backup = openai_provider("backup", &upstream, &["gpt-4o"]);
    let (base, records) =
        spawn_router(config(vec![dead, backup], "dead,m1", &["backup,gpt-4o"])).await;

    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&anthropic_request("claude-3-5-sonnet-latest"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "from backup");

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "backup");
    assert_eq!(records[0].model, "gpt-4o");
    assert!(records[0].success);
}

#[tokio::test]
async fn test_exhausted_chain_is_bad_gateway() {
    let dead = ProviderConfig {
        name: "dead".to_string(),
        api_base_url: Some("http://127.0.0.1:1/v1/chat/completions".to_string()),
        api_key: Some("test-key".to_string()),
        models: vec!["m1".to_string()],
        ..ProviderConfig::default()
    };
    let (base, records) = spawn_router(config(vec![dead], "dead,m1", &[])).await;

    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&anthropic_request("claude-3-5-sonnet-latest"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "dead");
    assert!(!records[0].success);
}

#[tokio::test]
async fn test_rate_limit_passes_through_without_fallback() {
    let primary = MockServer::start().await;
    let error_body = json!({"error": {"message": "slow down", "type": "rate_limit_error"}});
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(error_body.clone()))
        .expect(1)
        .mount(&primary)
        .await;

    let backup = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("unused")))
        .expect(0)
        .mount(&backup)
        .await;

    let (base, records) = spawn_router(config(
        vec![
            openai_provider("primary", &primary, &["gpt-4o"]),
            openai_provider("backup", &backup, &["gpt-4o"]),
        ],
        "primary,gpt-4o",
        &["backup,gpt-4o"],
    ))
    .await;

    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&anthropic_request("claude-3-5-sonnet-latest"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, error_body);

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "primary");
    assert!(!records[0].success);
}

#[tokio::test]
async fn test_subagent_directive_overrides_default() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("mini")))
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, records) = spawn_router(config(
        vec![openai_provider("openai", &upstream, &["gpt-4o", "gpt-4o-mini"])],
        "openai,gpt-4o",
        &[],
    ))
    .await;

    let mut request = anthropic_request("claude-3-5-sonnet-latest");
    request["system"] = json!([
        {"type": "text", "text": "<CCR-SUBAGENT-MODEL>openai,gpt-4o-mini</CCR-SUBAGENT-MODEL>"},
        {"type": "text", "text": "You are a sub-agent."}
    ]);

    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(records.take()[0].model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_streaming_openai_upstream_to_anthropic_client() {
    let upstream = MockServer::start().await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse, "text/event-stream"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let provider = openai_provider("openai", &upstream, &["gpt-4o"]);
    let (base, records) = spawn_router(config(vec![provider], "openai,gpt-4o", &[])).await;

    let mut request = anthropic_request("claude-3-5-sonnet-latest");
    request["stream"] = json!(true);
    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = resp.text().await.unwrap();
    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types.first(), Some(&"message_start"));
    assert_eq!(types.last(), Some(&"message_stop"));
    assert_eq!(types.iter().filter(|t| **t == "message_stop").count(), 1);

    let streamed: String = events
        .iter()
        .filter(|e| e["type"] == "content_block_delta")
        .map(|e| e["delta"]["text"].as_str().unwrap())
        .collect();
    assert_eq!(streamed, "Hello");

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert_eq!((records[0].input_tokens, records[0].output_tokens), (7, 2));
}

#[tokio::test]
async fn test_fallback_after_timeout() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_completion("too late"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&slow)
        .await;

    let backup = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("in time")))
        .expect(1)
        .mount(&backup)
        .await;

    let mut config = config(
        vec![
            openai_provider("slow", &slow, &["gpt-4o"]),
            openai_provider("backup", &backup, &["gpt-4o"]),
        ],
        "slow,gpt-4o",
        &["backup,gpt-4o"],
    );
    config.api_timeout_ms = 300;
    let (base, records) = spawn_router(config).await;

    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&anthropic_request("claude-3-5-sonnet-latest"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "in time");

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "backup");
    assert!(records[0].success);
}

#[tokio::test]
async fn test_streaming_anthropic_upstream_to_openai_client() {
    let upstream = MockServer::start().await;
    let sse = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":9,\"output_tokens\":0}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: ping\n",
        "data: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi \"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"there\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&upstream)
        .await;

    let provider = ProviderConfig {
        name: "anthropic".to_string(),
        api_base_url: Some(format!("{}/v1/messages", upstream.uri())),
        api_key: Some("test-key".to_string()),
        models: vec!["claude-3-5-haiku-latest".to_string()],
        ..ProviderConfig::default()
    };
    let (base, records) =
        spawn_router(config(vec![provider], "anthropic,claude-3-5-haiku-latest", &[])).await;

    let resp = http()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = resp.text().await.unwrap();
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();
    assert_eq!(data.last(), Some(&"[DONE]"));
    assert_eq!(data.iter().filter(|d| **d == "[DONE]").count(), 1);

    let chunks: Vec<Value> = data[..data.len() - 1]
        .iter()
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert!(chunks.iter().all(|c| c["object"] == "chat.completion.chunk"));
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");

    let streamed: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(streamed, "Hi there");
    assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "end_turn");

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "anthropic");
    assert_eq!((records[0].input_tokens, records[0].output_tokens), (9, 2));
    assert!(records[0].success);
}

#[tokio::test]
async fn test_same_protocol_stream_is_relayed_verbatim() {
    let upstream = MockServer::start().await;
    let sse = concat!(
        ": upstream comment\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"one\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true, "model": "gpt-4o"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream; charset=utf-8"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let provider = openai_provider("openai", &upstream, &["gpt-4o"]);
    let (base, records) = spawn_router(config(vec![provider], "openai,gpt-4o", &[])).await;

    let resp = http()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/event-stream; charset=utf-8"
    );
    assert_eq!(resp.text().await.unwrap(), sse);

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
}

/// An upstream that answers with `head` plus a partial body, then goes silent.
async fn stalling_upstream(head: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });
    format!("http://{addr}/v1/chat/completions")
}

#[tokio::test]
async fn test_streaming_error_status_survives_stalled_body() {
    let url = stalling_upstream(concat!(
        "HTTP/1.1 429 Too Many Requests\r\n",
        "content-type: application/json\r\n",
        "content-length: 200\r\n",
        "\r\n",
        "{\"error\":",
    ))
    .await;

    let provider = ProviderConfig {
        name: "limited".to_string(),
        api_base_url: Some(url),
        api_key: Some("test-key".to_string()),
        models: vec!["gpt-4o".to_string()],
        ..ProviderConfig::default()
    };
    let mut config = config(vec![provider], "limited,gpt-4o", &[]);
    config.api_timeout_ms = 300;
    let (base, records) = spawn_router(config).await;

    let mut request = anthropic_request("claude-3-5-sonnet-latest");
    request["stream"] = json!(true);
    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "limited");
    assert!(!records[0].success);
}

#[tokio::test]
async fn test_streaming_error_status_passes_through() {
    let upstream = MockServer::start().await;
    let error_body = json!({"error": {"message": "overloaded", "type": "server_error"}});
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_json(error_body.clone()))
        .expect(1)
        .mount(&upstream)
        .await;

    let provider = openai_provider("openai", &upstream, &["gpt-4o"]);
    let (base, records) = spawn_router(config(vec![provider], "openai,gpt-4o", &[])).await;

    let mut request = anthropic_request("claude-3-5-sonnet-latest");
    request["stream"] = json!(true);
    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, error_body);

    let records = records.take();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
}

#[tokio::test]
async fn test_pricing_follows_reloaded_config() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("priced")))
        .expect(2)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let write_config = |input_price: f64| {
        let mut config = config(
            vec![openai_provider("openai", &upstream, &["gpt-4o"])],
            "openai,gpt-4o",
            &[],
        );
        config.pricing.insert(
            "openai".to_string(),
            std::collections::HashMap::from([(
                "gpt-4o".to_string(),
                ModelPrice {
                    input: input_price,
                    output: 0.0,
                },
            )]),
        );
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
    };

    write_config(1_000.0);
    let (base, records) = spawn_router_with(ConfigSource::File(path.clone())).await;
    let send = || {
        http()
            .post(format!("{base}/v1/messages"))
            .json(&anthropic_request("claude-3-5-sonnet-latest"))
            .send()
    };

    assert_eq!(send().await.unwrap().status(), 200);
    write_config(2_000.0);
    assert_eq!(send().await.unwrap().status(), 200);

    let records = records.take();
    assert_eq!(records.len(), 2);
    // 5 prompt tokens at the configured per-million price
    assert!((records[0].cost - 0.005).abs() < 1e-12);
    assert!((records[1].cost - 0.010).abs() < 1e-12);
}

#[tokio::test]
async fn test_responses_endpoint_normalizes_input() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("hello")))
        .expect(1)
        .mount(&upstream)
        .await;

    let provider = openai_provider("openai", &upstream, &["gpt-4o"]);
    let (base, _) = spawn_router(config(vec![provider], "openai,gpt-4o", &[])).await;

    let resp = http()
        .post(format!("{base}/v1/responses"))
        .json(&json!({"model": "gpt-4o", "input": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hello");
}

#[tokio::test]
async fn test_missing_api_key_is_client_error() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("unused")))
        .expect(0)
        .mount(&upstream)
        .await;

    let mut provider = openai_provider("openai", &upstream, &["gpt-4o"]);
    provider.api_key = Some("$CLAUDE_ROUTER_TEST_KEY_THAT_IS_NEVER_SET".to_string());
    let (base, records) = spawn_router(config(vec![provider], "openai,gpt-4o", &[])).await;

    let resp = http()
        .post(format!("{base}/v1/messages"))
        .json(&anthropic_request("claude-3-5-sonnet-latest"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(records.take().is_empty());
}

#[tokio::test]
async fn test_unknown_provider_is_client_error() {
    let (base, _) = spawn_router(config(vec![], "nowhere,model", &[])).await;

    let resp = http()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("nowhere"));
}

#[tokio::test]
async fn test_count_tokens_health_and_models() {
    let upstream = MockServer::start().await;
    let (base, records) = spawn_router(config(
        vec![openai_provider("openai", &upstream, &["gpt-4o", "gpt-4o-mini"])],
        "openai,gpt-4o",
        &[],
    ))
    .await;
    let client = http();

    // "abc hello world!" is 16 characters
    let count: Value = client
        .post(format!("{base}/v1/messages/count_tokens"))
        .json(&json!({"system": "abc", "messages": [{"role": "user", "content": "hello world!"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count, json!({"input_tokens": 4}));

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["timestamp"].is_string());

    let models: Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = models["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["openai,gpt-4o", "openai,gpt-4o-mini"]);

    assert!(records.take().is_empty());
}

#[test]
fn test_example_files_load() {
    use claude_router::intent::IntentRouter;
    use std::path::Path;

    let config = RouterConfig::load(Path::new("config.example.toml")).unwrap();
    assert_eq!(config.port, 3456);
    assert_eq!(config.router.default.as_deref(), Some("openai,gpt-4o"));
    assert!(config.provider("GLM").is_some());

    let intents = IntentRouter::load(Path::new("intents.example.toml")).unwrap();
    assert_eq!(intents.len(), 6);
    assert_eq!(
        intents.classify("please refactor this rust function").map(|(name, _)| name),
        Some("coding")
    );
}
