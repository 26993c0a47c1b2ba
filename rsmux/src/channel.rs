//! The inbound payload stream of a REQUEST_CHANNEL interaction.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use rsbase::{Error, Frame, FrameError, Payload};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::registry::StreamRegistry;

/// How much credit the channel's inbound half asks from the peer each time
/// its local buffer runs dry.
const REFILL: u32 = 64;

/// The payload stream a channel handler consumes.
///
/// Polling is the demand signal: whenever the outstanding credit reaches
/// zero the stream grants the peer another [`REFILL`] items with an
/// outbound REQUEST_N. Dropping the stream before a terminal signal
/// cancels the peer's production with an outbound CANCEL; the frames
/// travel through the connection's single outbound queue, of which this
/// side holds only an enqueue handle.
pub struct ChannelReceiver {
    stream_id: u32,
    inbound: UnboundedReceiver<Result<Payload, Error>>,
    outbound: UnboundedSender<Frame>,
    registry: Arc<StreamRegistry>,
    requested: u32,
    terminated: bool,
}

impl ChannelReceiver {
    pub(crate) fn new(
        stream_id: u32,
        inbound: UnboundedReceiver<Result<Payload, Error>>,
        outbound: UnboundedSender<Frame>,
        registry: Arc<StreamRegistry>,
    ) -> Self {
        Self {
            stream_id,
            inbound,
            outbound,
            registry,
            requested: 0,
            terminated: false,
        }
    }

    fn send_frame(&self, frame: Result<Frame, FrameError>) {
        if let Ok(frame) = frame {
            // the transport going away terminates the stream through the
            // registry sweep; nothing to do here
            let _ = self.outbound.send(frame);
        }
    }
}

impl Stream for ChannelReceiver {
    type Item = Result<Payload, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.terminated && this.requested == 0 {
            this.send_frame(Frame::request_n(this.stream_id, REFILL));
            this.requested = REFILL;
        }
        match this.inbound.poll_recv(cx) {
            Poll::Ready(Some(Ok(payload))) => {
                this.requested = this.requested.saturating_sub(1);
                Poll::Ready(Some(Ok(payload)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.terminated = true;
                this.registry.remove_receiver(this.stream_id);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChannelReceiver {
    fn drop(&mut self) {
        if !self.terminated {
            debug!(
                stream_id = self.stream_id,
                "channel consumer dropped, cancelling the peer"
            );
            self.registry.remove_receiver(self.stream_id);
            self.send_frame(Frame::cancel(self.stream_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use rsbase::FrameType;
    use tokio::sync::mpsc;

    use super::*;

    fn receiver() -> (
        ChannelReceiver,
        mpsc::UnboundedSender<Result<Payload, Error>>,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(StreamRegistry::default());
        (
            ChannelReceiver::new(7, rx, out_tx, registry),
            tx,
            out_rx,
        )
    }

    #[tokio::test]
    async fn test_polling_grants_credit_in_batches() {
        let (mut receiver, tx, mut outbound) = receiver();
        tx.send(Ok(Payload::from("p0"))).unwrap();

        let item = receiver.next().await.unwrap().unwrap();
        assert_eq!(item.data().unwrap().as_ref(), b"p0");

        let frame = outbound.recv().await.unwrap();
        assert_eq!(frame.frame_type(), FrameType::RequestN);
        assert_eq!(frame.stream_id(), 7);
        assert_eq!(frame.initial_request_n(), Some(REFILL));
    }

    #[tokio::test]
    async fn test_drop_before_terminal_sends_cancel() {
        let (mut receiver, tx, mut outbound) = receiver();
        tx.send(Ok(Payload::from("p0"))).unwrap();
        let _ = receiver.next().await;
        drop(receiver);

        // the credit grant from the first poll, then the cancellation
        assert_eq!(
            outbound.recv().await.unwrap().frame_type(),
            FrameType::RequestN
        );
        let cancel = outbound.recv().await.unwrap();
        assert_eq!(cancel.frame_type(), FrameType::Cancel);
        assert_eq!(cancel.stream_id(), 7);
    }

    #[tokio::test]
    async fn test_completion_is_not_a_cancellation() {
        let (mut receiver, tx, mut outbound) = receiver();
        drop(tx);
        assert!(receiver.next().await.is_none());
        drop(receiver);

        assert_eq!(
            outbound.recv().await.unwrap().frame_type(),
            FrameType::RequestN
        );
        assert!(outbound.try_recv().is_err());
    }
}
