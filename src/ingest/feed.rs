//! Upstream feed session: dial, subscribe, verify the ack, then stream trade
//! events into the last-price map.

use crate::errors::{Result, ServiceError};
use crate::ingest::LastPriceMap;
use crate::models::Symbol;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Session lifecycle, for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedState {
    Dial,
    Subscribed,
    Streaming,
    Closed,
    Error,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dial => write!(f, "DIAL"),
            Self::Subscribed => write!(f, "SUBSCRIBED"),
            Self::Streaming => write!(f, "STREAMING"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// First response frame after the subscribe request. A null `result` means
/// the subscription was accepted; anything else is a refusal.
#[derive(Debug, Deserialize)]
struct SubscribeAck {
    result: Option<serde_json::Value>,
    #[allow(dead_code)]
    id: i64,
}

/// One combined-stream trade event.
#[derive(Debug, Deserialize)]
struct StreamFrame {
    stream: String,
    data: TradeData,
}

#[derive(Debug, Deserialize)]
struct TradeData {
    p: String,
}

pub struct MarketIngester {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    prices: Arc<LastPriceMap>,
    errors: mpsc::Sender<ServiceError>,
}

impl MarketIngester {
    /// Dial the feed and subscribe to every symbol. A refused subscription is
    /// fatal: the service must not start half-blind.
    pub async fn connect(
        url: &str,
        symbols: &[Symbol],
        prices: Arc<LastPriceMap>,
        errors: mpsc::Sender<ServiceError>,
    ) -> Result<Self> {
        info!(state = %FeedState::Dial, url, "connecting to market feed");

        let (mut ws, _response) = connect_async(url)
            .await
            .map_err(ServiceError::transient)?;

        let tags: Vec<&str> = symbols.iter().map(|s| s.stream_tag()).collect();
        let subscribe = serde_json::json!({
            "method": "SUBSCRIBE",
            "params": tags,
            "id": 1,
        });

        ws.send(Message::Text(subscribe.to_string()))
            .await
            .map_err(ServiceError::transient)?;

        let ack = Self::read_ack(&mut ws).await?;
        if ack.result.is_some() {
            return Err(ServiceError::SubscriptionFailed);
        }

        info!(state = %FeedState::Subscribed, params = ?tags, "market feed subscription acknowledged");

        Ok(Self { ws, prices, errors })
    }

    async fn read_ack(ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> Result<SubscribeAck> {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).map_err(ServiceError::transient);
                }
                Some(Ok(Message::Ping(payload))) => {
                    ws.send(Message::Pong(payload))
                        .await
                        .map_err(ServiceError::transient)?;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ServiceError::transient(e)),
                None => {
                    return Err(ServiceError::transient(
                        "feed closed before acknowledging subscription",
                    ))
                }
            }
        }
    }

    /// Single reader loop. Frame-level parse failures go to the central error
    /// channel and the stream continues; transport failures end the session.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(state = %FeedState::Streaming, "market ingester streaming");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = self
                        .ws
                        .close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        }))
                        .await;
                    info!(state = %FeedState::Closed, "market ingester shut down");
                    return;
                }
                frame = self.ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = self.ws.send(Message::Pong(payload)).await {
                            warn!(error = %e, "failed to answer feed ping");
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(state = %FeedState::Closed, "market feed closed the session");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(state = %FeedState::Error, error = %e, "market feed transport error");
                        let _ = self.errors.send(ServiceError::transient(e)).await;
                        return;
                    }
                    None => {
                        warn!(state = %FeedState::Error, "market feed stream ended");
                        let _ = self
                            .errors
                            .send(ServiceError::transient("market feed stream ended"))
                            .await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let frame: StreamFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = self.errors.send(ServiceError::transient(e)).await;
                return;
            }
        };

        match Symbol::from_stream_tag(&frame.stream) {
            Some(symbol) => self.prices.set(symbol, frame.data.p),
            None => debug!(stream = %frame.stream, "trade event for unsubscribed stream"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_ack_null_result_is_success() {
        let ack: SubscribeAck = serde_json::from_str(r#"{"result":null,"id":1}"#).unwrap();
        assert!(ack.result.is_none());
    }

    #[test]
    fn test_subscribe_ack_non_null_result_is_refusal() {
        let ack: SubscribeAck =
            serde_json::from_str(r#"{"result":{"error":"bad params"},"id":1}"#).unwrap();
        assert!(ack.result.is_some());
    }

    #[test]
    fn test_trade_frame_parses_stream_and_price() {
        let raw = r#"{"stream":"btcusdt@trade","data":{"e":"trade","p":"64123.51000000","q":"0.001"}}"#;
        let frame: StreamFrame = serde_json::from_str(raw).unwrap();

        assert_eq!(Symbol::from_stream_tag(&frame.stream), Some(Symbol::Btc));
        assert_eq!(frame.data.p, "64123.51000000");
    }

    #[test]
    fn test_non_trade_frame_is_a_parse_error() {
        // Subscription responses have no stream/data envelope.
        let raw = r#"{"result":null,"id":1}"#;
        assert!(serde_json::from_str::<StreamFrame>(raw).is_err());
    }
}
