//! WebSocket client transport for the push endpoint.
//!
//! Thin wrapper around `tokio-tungstenite` with separate reader and writer
//! halves, so a producer can pump stdin into the writer while a
//! `tokio::select!` loop drains the reader. Used by the `push` subcommand
//! and by the integration tests.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::constants;
use crate::run_id::RunId;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Message received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// A line from another connection on the same run.
    Text(String),
    /// Binary frame. The server never sends these.
    Binary(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a push connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send one line as a text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a normal-closure close frame.
    pub async fn send_close(&mut self, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")
    }

    /// Flush pending writes and close the sink.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a push connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Ping, pong and raw frames are handled by the transport and skipped.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => return Some(Ok(WsMessage::Text(text))),
                Ok(tungstenite::Message::Binary(data)) => {
                    return Some(Ok(WsMessage::Binary(data)));
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Ok(
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_),
                ) => {}
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            }
        }
    }
}

/// Open a WebSocket to `url`.
///
/// Returns split (writer, reader) halves for independent use in
/// `tokio::select!` loops.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;
    let agent = tungstenite::http::HeaderValue::from_str(&constants::user_agent())
        .context("invalid user agent")?;
    request
        .headers_mut()
        .insert(tungstenite::http::header::USER_AGENT, agent);

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Push endpoint URL for `run` on the server at `base`.
///
/// `base` may use an `http(s)://` or `ws(s)://` scheme.
#[must_use]
pub fn live_url(base: &str, run: &RunId) -> String {
    format!(
        "{}{}/{}",
        http_to_ws_scheme(base.trim_end_matches('/')),
        constants::LIVE_PATH,
        run
    )
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme() {
        assert_eq!(http_to_ws_scheme("https://example.com"), "wss://example.com");
        assert_eq!(http_to_ws_scheme("http://localhost:5002"), "ws://localhost:5002");
        assert_eq!(http_to_ws_scheme("ws://localhost:5002"), "ws://localhost:5002");
    }

    #[test]
    fn test_live_url() {
        let run = RunId::parse("run-42").unwrap();
        assert_eq!(
            live_url("http://127.0.0.1:5002/", &run),
            "ws://127.0.0.1:5002/live/run-42"
        );
        assert_eq!(
            live_url("wss://runs.example.com", &run),
            "wss://runs.example.com/live/run-42"
        );
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        assert!(connect("not-a-url").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        assert!(connect("ws://127.0.0.1:1/live/r1").await.is_err());
    }
}
