//! One subscriber connection
//!
//! Transport-agnostic: anything that accepts outbound text frames and yields
//! inbound frames can be served. The daemon adapts websockets to this.

use super::{EventHub, Subscription};
use crate::error::Result;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tracing::debug;

/// What the inbound side of a connection produced
///
/// Inbound payloads are ignored; only the end of the stream matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Any payload from the peer
    Data,
    /// The peer asked to close
    Close,
    /// The transport failed
    Error(String),
}

/// Serve one subscriber until the peer leaves, the transport fails, or the
/// hub kicks it
///
/// Runs an outbound drainer and an inbound watcher as separate tasks; the
/// first one to finish tears both down and unregisters the subscriber.
pub async fn serve_connection<S, R>(hub: &EventHub, sink: S, inbound: R) -> Result<()>
where
    S: Sink<String> + Send + 'static,
    S::Error: Display,
    R: Stream<Item = InboundFrame> + Send + 'static,
{
    let Subscription {
        id,
        mut messages,
        kicked,
    } = hub.register().await?;

    let mut outbound = tokio::spawn(async move {
        let mut sink = Box::pin(sink);
        while let Some(message) = messages.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!("Subscriber {} send failed: {}", id, e);
                return;
            }
        }
        let _ = sink.close().await;
    });

    let mut watcher = tokio::spawn(async move {
        let mut inbound = Box::pin(inbound);
        while let Some(frame) = inbound.next().await {
            match frame {
                InboundFrame::Data => {}
                InboundFrame::Close => break,
                InboundFrame::Error(e) => {
                    debug!("Subscriber {} read failed: {}", id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut outbound => debug!("Subscriber {} outbound closed", id),
        _ = &mut watcher => debug!("Subscriber {} went away", id),
        _ = kicked => debug!("Subscriber {} was dropped by the hub", id),
    }

    outbound.abort();
    watcher.abort();
    hub.unregister(id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use futures_util::sink;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn channel_sink(tx: mpsc::Sender<String>) -> impl Sink<String, Error = &'static str> + Send {
        sink::unfold(tx, |tx, message: String| async move {
            match tx.send(message).await {
                Ok(()) => Ok::<_, &'static str>(tx),
                Err(_) => Err("receiver gone"),
            }
        })
    }

    #[tokio::test]
    async fn peer_close_unregisters() {
        let (hub, dispatcher) = EventHub::new(&HubConfig::default());
        tokio::spawn(dispatcher.run());

        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);

        let served = {
            let hub = hub.clone();
            tokio::spawn(async move {
                serve_connection(&hub, channel_sink(out_tx), ReceiverStream::new(in_rx)).await
            })
        };

        while hub.subscriber_count().await == 0 {
            tokio::task::yield_now().await;
        }
        hub.broadcast_change("203.0.113.2".parse().unwrap(), "STUN");
        let frame = out_rx.recv().await.unwrap();
        assert!(frame.contains("203.0.113.2"));

        in_tx.send(InboundFrame::Data).await.unwrap();
        in_tx.send(InboundFrame::Close).await.unwrap();
        served.await.unwrap().unwrap();

        assert_eq!(hub.subscriber_count().await, 0);
    }
}
