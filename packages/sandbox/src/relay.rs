// ABOUTME: Relays the worker's streamed /stream response back to the caller as raw bytes
// ABOUTME: Also provides an NDJSON decoder for consumers that want typed worker events

use crate::error::{OrchestratorError, Result};
use crate::providers::PreviewLink;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use tracing::{debug, info, warn};

pub const STREAM_PATH: &str = "/stream";

/// Live, ordered, non-restartable byte stream from the worker
pub type RelayStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Body posted to the worker's /stream endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    pub messages: Vec<Value>,
}

/// A relayed stream and the sandbox serving it
pub struct StreamSession {
    /// Pass back on a follow-up call to reuse the same sandbox
    pub sandbox_id: String,
    pub stream: RelayStream,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("sandbox_id", &self.sandbox_id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct StreamRelay {
    client: Client,
}

impl StreamRelay {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Open the worker stream; connection failures surface here, read failures in the stream
    pub async fn relay(&self, link: &PreviewLink, request: &StreamRequest) -> Result<RelayStream> {
        let response = self
            .client
            .post(link.url_for(STREAM_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| OrchestratorError::RelayFailed {
                message: e.to_string(),
                source: Some(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::RelayFailed {
                message: format!("worker responded {}", status.as_u16()),
                source: None,
            });
        }

        info!("Relaying worker stream ({} messages)", request.messages.len());

        let stream = async_stream::stream! {
            let mut body = response.bytes_stream();
            let mut relayed = 0usize;

            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        relayed += bytes.len();
                        yield Ok(bytes);
                    }
                    Err(e) => {
                        warn!("Worker stream interrupted after {} bytes: {}", relayed, e);
                        yield Err(OrchestratorError::RelayStreamInterrupted {
                            message: e.to_string(),
                            source: Some(e),
                        });
                        return;
                    }
                }
            }

            debug!("Worker stream closed after {} bytes", relayed);
        };

        Ok(Box::pin(stream))
    }
}

/// One NDJSON record emitted by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Data { chunk: Value },
}

impl WorkerEvent {
    pub fn chunk(&self) -> &Value {
        match self {
            WorkerEvent::Data { chunk } => chunk,
        }
    }

    /// Final record carrying the full message list
    pub fn is_done(&self) -> bool {
        self.chunk().get("type").and_then(Value::as_str) == Some("done")
    }
}

/// Splits relayed bytes into worker events across arbitrary chunk boundaries
#[derive(Debug, Default)]
pub struct WorkerEventDecoder {
    buffer: Vec<u8>,
}

impl WorkerEventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete record it finished
    pub fn push(&mut self, chunk: &[u8]) -> Vec<std::result::Result<WorkerEvent, serde_json::Error>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = trim_line(&line);
            if !line.is_empty() {
                events.push(serde_json::from_slice(line));
            }
        }
        events
    }

    /// Decode whatever is left once the stream has ended
    pub fn finish(mut self) -> Option<std::result::Result<WorkerEvent, serde_json::Error>> {
        let rest = std::mem::take(&mut self.buffer);
        let line = trim_line(&rest);
        (!line.is_empty()).then(|| serde_json::from_slice(line))
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn link(server: &MockServer) -> PreviewLink {
        PreviewLink {
            url: server.uri(),
            token: "tok".to_string(),
        }
    }

    async fn collect(stream: RelayStream) -> Vec<u8> {
        stream
            .map(|chunk| chunk.expect("chunk should be Ok"))
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[tokio::test]
    async fn test_relay_forwards_body_verbatim() {
        let body = concat!(
            "{\"event\":\"data\",\"chunk\":{\"type\":\"text-delta\",\"text\":\"Hi\"}}\n",
            "{\"event\":\"data\",\"chunk\":{\"type\":\"done\",\"messages\":[]}}\n"
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream"))
            .and(query_param("DAYTONA_SANDBOX_AUTH_KEY", "tok"))
            .and(body_json(json!({"messages": [{"role": "user", "content": "hello"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let relay = StreamRelay::new(Client::new());
        let request = StreamRequest {
            messages: vec![json!({"role": "user", "content": "hello"})],
        };
        let stream = relay.relay(&link(&server), &request).await.unwrap();

        assert_eq!(String::from_utf8(collect(stream).await).unwrap(), body);
    }

    #[tokio::test]
    async fn test_relay_empty_body_ends_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let relay = StreamRelay::new(Client::new());
        let stream = relay
            .relay(&link(&server), &StreamRequest { messages: vec![] })
            .await
            .unwrap();

        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_relay_connection_refused_fails_synchronously() {
        let relay = StreamRelay::new(Client::new());
        let unreachable = PreviewLink {
            url: "http://127.0.0.1:9".to_string(),
            token: "tok".to_string(),
        };

        let result = relay
            .relay(&unreachable, &StreamRequest { messages: vec![] })
            .await;
        assert!(matches!(result, Err(OrchestratorError::RelayFailed { .. })));
    }

    #[tokio::test]
    async fn test_relay_error_status_fails_synchronously() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let relay = StreamRelay::new(Client::new());
        let result = relay
            .relay(&link(&server), &StreamRequest { messages: vec![] })
            .await;

        match result {
            Err(OrchestratorError::RelayFailed { message, source }) => {
                assert_eq!(message, "worker responded 500");
                assert!(source.is_none());
            }
            Err(other) => panic!("Expected RelayFailed, got {:?}", other),
            Ok(_) => panic!("Expected RelayFailed, got a stream"),
        }
    }

    /// Serves one response that promises more body than it sends, then hangs up
    async fn truncated_worker(line: &'static str) -> PreviewLink {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Drain the request so closing the socket is a clean FIN
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|value| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 1000\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(line.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });

        PreviewLink {
            url: format!("http://{}", addr),
            token: "tok".to_string(),
        }
    }

    #[tokio::test]
    async fn test_relay_read_error_ends_stream_with_interruption() {
        let line = "{\"event\":\"data\",\"chunk\":{\"type\":\"text-delta\",\"text\":\"Hi\"}}\n";
        let worker = truncated_worker(line).await;

        let relay = StreamRelay::new(Client::new());
        let mut stream = relay
            .relay(&worker, &StreamRequest { messages: vec![] })
            .await
            .expect("headers arrive before the body is cut");

        let mut relayed = Vec::new();
        let interruption = loop {
            match stream.next().await {
                Some(Ok(bytes)) => relayed.extend_from_slice(&bytes),
                Some(Err(e)) => break e,
                None => panic!("Expected RelayStreamInterrupted before the stream ended"),
            }
        };

        assert_eq!(relayed, line.as_bytes());
        assert!(matches!(
            interruption,
            OrchestratorError::RelayStreamInterrupted { .. }
        ));
        assert_eq!(interruption.code(), "RELAY_STREAM_INTERRUPTED");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_decoder_handles_split_records() {
        let mut decoder = WorkerEventDecoder::new();

        assert!(decoder.push(b"{\"event\":\"data\",\"chu").is_empty());
        let events = decoder.push(b"nk\":{\"type\":\"text-delta\"}}\n{\"event\":\"data\",");
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &WorkerEvent::Data {
                chunk: json!({"type": "text-delta"})
            }
        );

        let events = decoder.push(b"\"chunk\":{\"type\":\"done\",\"messages\":[]}}\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().is_done());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_finish_flushes_unterminated_record() {
        let mut decoder = WorkerEventDecoder::new();
        assert!(decoder
            .push(b"{\"event\":\"data\",\"chunk\":{\"type\":\"done\"}}")
            .is_empty());

        let last = decoder.finish().expect("record should be flushed").unwrap();
        assert!(last.is_done());
    }

    #[test]
    fn test_decoder_reports_malformed_lines() {
        let mut decoder = WorkerEventDecoder::new();
        let events = decoder.push(b"not json\n");

        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }
}
