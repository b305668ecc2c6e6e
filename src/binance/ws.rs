use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use crate::error::AppError;
use crate::source::TickSource;

/// Single-connection Binance trade stream. A dropped connection ends the run;
/// there is no reconnect loop.
pub struct BinanceTradeStream {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl BinanceTradeStream {
    pub async fn connect(ws_base_url: &str, stream: &str) -> Result<Self> {
        let url = format!("{}/{}", ws_base_url.trim_end_matches('/'), stream);
        tracing::info!(url = %url, "Connecting to Binance");

        let (ws_stream, _resp) = tokio_tungstenite::connect_async(&url)
            .await
            .with_context(|| format!("WebSocket connect to {} failed", url))?;

        tracing::info!(url = %url, "WebSocket connected");
        Ok(Self {
            url,
            stream: ws_stream,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TickSource for BinanceTradeStream {
    async fn next_message(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    tracing::warn!(url = %self.url, ?frame, "WebSocket closed by server");
                    return Ok(None);
                }
                Some(Ok(tungstenite::Message::Ping(_))) => {
                    // tokio-tungstenite handles pong automatically
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(AppError::WebSocket(e.to_string()))
                        .context("WebSocket read error");
                }
                None => return Ok(None),
            }
        }
    }
}
