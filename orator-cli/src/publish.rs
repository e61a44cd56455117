//! Transcript publication over TCP, as newline-delimited JSON.
//!
//! Two modes mirror the upstream publisher:
//! - **bind**: accept subscribers and fan every transcript out to all of
//!   them; a dead subscriber is dropped with a warning.
//! - **connect**: push transcripts to a single collector.
//!
//! Delivery failures are logged and swallowed — publication must never
//! propagate an error back into the audio pipeline.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct TranscriptLine<'a> {
    topic: &'a str,
    text: &'a str,
}

/// One `{"topic":…,"text":…}` JSON object terminated by a newline.
fn encode_line(topic: &str, text: &str) -> Vec<u8> {
    let mut line = serde_json::to_vec(&TranscriptLine { topic, text })
        .unwrap_or_else(|_| b"{}".to_vec());
    line.push(b'\n');
    line
}

enum Sink {
    /// Print to stdout only (publishing disabled).
    Stdout,
    /// Single outbound connection to a collector.
    Client(TcpStream),
    /// Fan-out to every connected subscriber.
    Server(Arc<Mutex<Vec<OwnedWriteHalf>>>),
}

pub struct Publisher {
    sink: Sink,
    topic: String,
    /// Local address when bound as a fan-out server.
    bound_addr: Option<std::net::SocketAddr>,
}

impl Publisher {
    /// Publishing disabled — transcripts go to stdout.
    pub fn stdout(topic: &str) -> Self {
        Self {
            sink: Sink::Stdout,
            topic: topic.to_string(),
            bound_addr: None,
        }
    }

    /// Connect out to a collector at `addr` (`host:port`).
    pub async fn connect(addr: &str, topic: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to {addr}"))?;
        info!(addr, "publisher connected");
        Ok(Self {
            sink: Sink::Client(stream),
            topic: topic.to_string(),
            bound_addr: None,
        })
    }

    /// Bind a fan-out server on `addr` and start accepting subscribers.
    ///
    /// Returns once the listener is bound; subscribers attach in the
    /// background. Callers should allow a short delay before the first
    /// publish so early subscribers do not miss it.
    pub async fn bind(addr: &str, topic: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding publisher on {addr}"))?;
        let bound_addr = listener.local_addr().ok();
        info!(addr, "publisher bound — waiting for subscribers");

        let subscribers: Arc<Mutex<Vec<OwnedWriteHalf>>> = Arc::new(Mutex::new(Vec::new()));
        let accept_list = Arc::clone(&subscribers);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!(%peer, "subscriber connected");
                        let (_read_half, write_half) = stream.into_split();
                        accept_list.lock().await.push(write_half);
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                    }
                }
            }
        });

        Ok(Self {
            sink: Sink::Server(subscribers),
            topic: topic.to_string(),
            bound_addr,
        })
    }

    /// Local address when bound as a fan-out server.
    pub fn bound_addr(&self) -> Option<std::net::SocketAddr> {
        self.bound_addr
    }

    /// Deliver one transcript. Failures are logged, never returned — the
    /// pipeline must not notice a dead subscriber.
    pub async fn publish(&mut self, text: &str) {
        match &mut self.sink {
            Sink::Stdout => {
                println!("[{}] {}", self.topic, text);
            }
            Sink::Client(stream) => {
                let line = encode_line(&self.topic, text);
                if let Err(e) = stream.write_all(&line).await {
                    warn!("publish to collector failed: {e}");
                }
            }
            Sink::Server(subscribers) => {
                let line = encode_line(&self.topic, text);
                let mut subs = subscribers.lock().await;
                let before = subs.len();
                let mut kept = Vec::with_capacity(before);
                for mut sub in subs.drain(..) {
                    match sub.write_all(&line).await {
                        Ok(()) => kept.push(sub),
                        Err(e) => warn!("dropping dead subscriber: {e}"),
                    }
                }
                *subs = kept;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn encoded_line_is_newline_terminated_json() {
        let line = encode_line("lab", "hello world");
        assert_eq!(line.last(), Some(&b'\n'));
        let value: serde_json::Value = serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(value["topic"], "lab");
        assert_eq!(value["text"], "hello world");
    }

    #[tokio::test]
    async fn bound_publisher_fans_out_to_subscribers() {
        let mut publisher = Publisher::bind("127.0.0.1:0", "lab").await.unwrap();
        let local = publisher.bound_addr().expect("server must report its address");

        let client = TcpStream::connect(local).await.unwrap();
        // Give the accept loop a beat to register the subscriber.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        publisher.publish("first utterance").await;

        let mut lines = BufReader::new(client).lines();
        let line = tokio::time::timeout(std::time::Duration::from_secs(1), lines.next_line())
            .await
            .expect("timed out")
            .unwrap()
            .expect("subscriber should receive a line");
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["topic"], "lab");
        assert_eq!(value["text"], "first utterance");
    }

    #[tokio::test]
    async fn connected_publisher_writes_to_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let mut publisher = Publisher::connect(&addr.to_string(), "t").await.unwrap();
        publisher.publish("payload").await;

        let line = tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("timed out")
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["text"], "payload");
    }
}
