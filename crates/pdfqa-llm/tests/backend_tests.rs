use pdfqa_core::config::{BackendConfig, BackendKind};
use pdfqa_core::error::GenerationError;
use pdfqa_core::traits::Reranker;
use pdfqa_llm::{backends_from_config, CrossEncoderReranker, Generator, OllamaGenerate, OpenAiChat};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves one canned response per connection and records request bodies.
async fn mock_server(status: u16, body: &'static str, delay: Duration) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut tmp = [0u8; 4096];
                let body_start = loop {
                    let n = socket.read(&mut tmp).await.unwrap_or(0);
                    if n == 0 { return; }
                    buf.extend_from_slice(&tmp[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") { break pos + 4; }
                };
                let head = String::from_utf8_lossy(&buf[..body_start]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0)))
                    .unwrap_or(0);
                while buf.len() < body_start + len {
                    let n = socket.read(&mut tmp).await.unwrap_or(0);
                    if n == 0 { break; }
                    buf.extend_from_slice(&tmp[..n]);
                }
                recorded.lock().unwrap().push(String::from_utf8_lossy(&buf[body_start..]).to_string());
                tokio::time::sleep(delay).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{}", addr), seen)
}

fn openai(url: &str, timeout: Duration) -> OpenAiChat {
    OpenAiChat::new("primary", url, "gpt-test", Some("sk-test".into()), 0.3, timeout).unwrap()
}

#[tokio::test]
async fn openai_chat_returns_trimmed_content() {
    let (url, seen) = mock_server(200, r#"{"choices":[{"message":{"role":"assistant","content":"  Boil it.  "}}]}"#, Duration::ZERO).await;
    let answer = openai(&url, Duration::from_secs(5)).generate("How do I purify water?").await.unwrap();
    assert_eq!(answer, "Boil it.");
    let body: serde_json::Value = serde_json::from_str(&seen.lock().unwrap()[0]).unwrap();
    assert_eq!(body["model"], "gpt-test");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "How do I purify water?");
}

#[tokio::test]
async fn openai_chat_maps_failures() {
    let (url, _) = mock_server(429, r#"{"error":"slow down"}"#, Duration::ZERO).await;
    assert_eq!(openai(&url, Duration::from_secs(5)).generate("q").await, Err(GenerationError::RateLimited));

    let (url, _) = mock_server(500, "boom", Duration::ZERO).await;
    assert!(matches!(openai(&url, Duration::from_secs(5)).generate("q").await, Err(GenerationError::Status { status: 500, .. })));

    let (url, _) = mock_server(200, r#"{"choices":[{"message":{"content":"   "}}]}"#, Duration::ZERO).await;
    assert_eq!(openai(&url, Duration::from_secs(5)).generate("q").await, Err(GenerationError::Empty));

    let (url, _) = mock_server(200, r#"{"choices":[]}"#, Duration::ZERO).await;
    assert_eq!(openai(&url, Duration::from_secs(5)).generate("q").await, Err(GenerationError::Empty));

    let (url, _) = mock_server(200, "not json", Duration::ZERO).await;
    assert!(matches!(openai(&url, Duration::from_secs(5)).generate("q").await, Err(GenerationError::Malformed(_))));
}

#[tokio::test]
async fn slow_backend_times_out() {
    let (url, _) = mock_server(200, r#"{"choices":[{"message":{"content":"late"}}]}"#, Duration::from_secs(3)).await;
    let err = openai(&url, Duration::from_millis(200)).generate("q").await.unwrap_err();
    assert!(matches!(err, GenerationError::Timeout(_) | GenerationError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let err = openai(&url, Duration::from_secs(2)).generate("q").await.unwrap_err();
    assert!(matches!(err, GenerationError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn ollama_generate_sends_non_streaming_request() {
    let (url, seen) = mock_server(200, r#"{"model":"llama3","response":"Use a rain barrel.","done":true}"#, Duration::ZERO).await;
    let backend = OllamaGenerate::new("local", &url, "llama3", 0.1, Duration::from_secs(5)).unwrap();
    assert_eq!(backend.name(), "local");
    assert_eq!(backend.generate("Collect water?").await.unwrap(), "Use a rain barrel.");
    let body: serde_json::Value = serde_json::from_str(&seen.lock().unwrap()[0]).unwrap();
    assert_eq!(body["stream"], false);
    assert_eq!(body["prompt"], "Collect water?");
}

#[test]
fn backends_keep_configured_order() {
    let configs = vec![
        BackendConfig {
            name: "local".into(),
            kind: BackendKind::Ollama,
            base_url: "http://localhost:11434".into(),
            model: "llama3".into(),
            api_key_env: None,
            temperature: 0.2,
            request_timeout_secs: 10,
        },
        BackendConfig {
            name: "remote".into(),
            kind: BackendKind::Openai,
            base_url: "https://api.example.com/v1".into(),
            model: "m".into(),
            api_key_env: Some("PDFQA_TEST_UNSET_KEY".into()),
            temperature: 0.2,
            request_timeout_secs: 10,
        },
    ];
    let backends = backends_from_config(&configs).unwrap();
    let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    assert_eq!(names, vec!["local", "remote"]);
}

#[tokio::test]
async fn reranker_returns_scores_in_input_order() {
    let (url, seen) = mock_server(
        200,
        r#"{"results":[{"index":1,"relevance_score":0.92},{"index":0,"relevance_score":0.15}]}"#,
        Duration::ZERO,
    )
    .await;
    let reranker = CrossEncoderReranker::new(&url, "bge-reranker-v2-m3", None, Duration::from_secs(5), false).unwrap();
    let docs = vec!["dig a trench".to_string(), "boil the water".to_string()];
    let scores = reranker.score("safe water", &docs).await.unwrap();
    assert_eq!(scores, vec![0.15, 0.92]);

    let body: serde_json::Value = serde_json::from_str(&seen.lock().unwrap()[0]).unwrap();
    assert_eq!(body["query"], "safe water");
    assert_eq!(body["top_n"], 2);
    assert_eq!(body["documents"][1], "boil the water");
}

#[tokio::test]
async fn reranker_applies_sigmoid_to_logits() {
    let (url, _) = mock_server(200, r#"{"results":[{"index":0,"relevance_score":0.0}]}"#, Duration::ZERO).await;
    let reranker = CrossEncoderReranker::new(&url, "m", None, Duration::from_secs(5), true).unwrap();
    let scores = reranker.score("q", &["d".to_string()]).await.unwrap();
    assert!((scores[0] - 0.5).abs() < 1e-6);
}

#[tokio::test]
async fn reranker_rejects_errors_and_missing_rows() {
    let (url, _) = mock_server(503, r#"{"error":"loading"}"#, Duration::ZERO).await;
    let reranker = CrossEncoderReranker::new(&url, "m", None, Duration::from_secs(5), false).unwrap();
    assert!(reranker.score("q", &["d".to_string()]).await.is_err());

    let (url, _) = mock_server(200, r#"{"results":[{"index":0,"relevance_score":0.4}]}"#, Duration::ZERO).await;
    let reranker = CrossEncoderReranker::new(&url, "m", None, Duration::from_secs(5), false).unwrap();
    assert!(reranker.score("q", &["a".to_string(), "b".to_string()]).await.is_err());
}
