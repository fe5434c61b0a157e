//! WebSocket reverse proxy (§4.7): upgrade the client connection, dial the
//! resolved upstream, and splice frames in both directions until either
//! side closes. Grounded on the realtime relay pattern in the retrieved
//! corpus (`gateway/src/proxy/realtime.rs`-equivalent): split both sockets,
//! pump each direction in its own future, and race them with `select!`.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use crate::error::GatewayError;
use crate::AppState;

/// Per-frame idle cap while waiting on the upstream (§5).
const UPSTREAM_READ_TIMEOUT: Duration = Duration::from_secs(10);
/// RFC 6455 reserves 1006 for the client-side "no close frame received"
/// case; it can never be sent on the wire. 1011 (Internal Error) is the
/// closest sendable stand-in for the source's abnormal-closure signal.
const ABNORMAL_CLOSURE_CODE: u16 = 1011;

pub async fn forward(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    request: Request,
) -> Result<Response, GatewayError> {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    if state.repo.get_endpoint_by_url(&path).await?.is_none() {
        return Err(GatewayError::EndpointNotFound);
    }

    let base_url = state.repo.get_microservice_base_url(&path).await?;
    let upstream_url = build_upstream_ws_url(&base_url, &path, query.as_deref());

    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(err) = relay(socket, &upstream_url).await {
            tracing::warn!(url = %upstream_url, error = %err, "websocket relay ended abnormally");
        }
    }))
}

async fn relay(client: WebSocket, upstream_url: &str) -> anyhow::Result<()> {
    let (upstream, _response) = tokio_tungstenite::connect_async(upstream_url).await?;
    let (mut upstream_sink, mut upstream_stream) = upstream.split();
    let (mut client_sink, mut client_stream) = client.split();

    let consumer = async {
        while let Some(Ok(message)) = client_stream.next().await {
            match message {
                AxumMessage::Binary(data) => {
                    if upstream_sink
                        .send(TungsteniteMessage::Binary(data.to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                AxumMessage::Close(_) => break,
                _ => continue,
            }
        }
        let _ = upstream_sink.close().await;
    };

    let producer = async {
        loop {
            let next = tokio::time::timeout(UPSTREAM_READ_TIMEOUT, upstream_stream.next()).await;
            let message = match next {
                Ok(Some(Ok(message))) => message,
                _ => break,
            };

            let data = match message {
                TungsteniteMessage::Binary(data) => data,
                TungsteniteMessage::Text(text) => text.into_bytes(),
                TungsteniteMessage::Ping(data) | TungsteniteMessage::Pong(data) => data,
                TungsteniteMessage::Close(_) | TungsteniteMessage::Frame(_) => break,
            };

            if client_sink.send(AxumMessage::Binary(data.into())).await.is_err() {
                break;
            }
        }

        let _ = client_sink
            .send(AxumMessage::Close(Some(CloseFrame {
                code: ABNORMAL_CLOSURE_CODE,
                reason: "upstream connection ended".into(),
            })))
            .await;
    };

    tokio::select! {
        _ = consumer => {},
        _ = producer => {},
    }

    Ok(())
}

/// Translate `base_url`'s scheme `http→ws`, `https→wss`, then append the
/// gateway-side path and query verbatim, preserving authority and fragment
/// bit-for-bit per §8's URL-scheme-conversion property.
fn build_upstream_ws_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    let ws_base = base_url
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);

    let mut url = format!("{ws_base}{path}");
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_http_scheme_to_ws() {
        assert_eq!(
            build_upstream_ws_url("http://inventory:9000", "/stream", None),
            "ws://inventory:9000/stream"
        );
    }

    #[test]
    fn converts_https_scheme_to_wss_and_preserves_query() {
        assert_eq!(
            build_upstream_ws_url("https://inventory:9443/", "/stream", Some("token=abc")),
            "wss://inventory:9443/stream?token=abc"
        );
    }

    #[test]
    fn leaves_other_schemes_untouched() {
        assert_eq!(
            build_upstream_ws_url("ws://inventory:9000", "/stream", None),
            "ws://inventory:9000/stream"
        );
    }
}
