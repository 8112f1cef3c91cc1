//! Websocket adapter for the event hub

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use ipsync_core::EventHub;
use ipsync_core::hub::{InboundFrame, serve_connection};
use tracing::debug;

/// Serve one upgraded websocket as a hub subscriber
pub async fn serve(hub: EventHub, socket: WebSocket) {
    let (sink, stream) = socket.split();

    let sink = sink.with(|text: String| async move { Ok::<_, axum::Error>(Message::Text(text)) });
    let inbound = stream.map(|frame| match frame {
        Ok(Message::Close(_)) => InboundFrame::Close,
        Ok(_) => InboundFrame::Data,
        Err(e) => InboundFrame::Error(e.to_string()),
    });

    if let Err(e) = serve_connection(&hub, sink, inbound).await {
        debug!("Websocket subscriber ended: {}", e);
    }
}
