//! Assembly of the responder-side engine for one established connection.
//!
//! The transport stays external: it decodes inbound bytes into [`Frame`]s
//! and feeds them to [`Connection::run`] (or [`Connection::accept`] one at
//! a time), drains the outbound queue handed out at assembly, and calls
//! [`Connection::dispose`] when the byte channel dies. The engine never
//! reaches below that surface.

use std::{sync::Arc, time::Duration};

use futures::{Stream, StreamExt};
use rsbase::{Error, Frame, FrameError, FrameType};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    handler::{ErrorConsumer, RSocket},
    interceptor::InterceptorRegistry,
    keepalive::{KeepAlive, TimeoutAction},
    responder::{ConnectionState, Responder},
};

/// One established connection: the responder multiplexer plus its
/// keep-alive coordinator.
pub struct Connection {
    responder: Arc<Responder>,
    keepalive: Arc<KeepAlive>,
}

impl Connection {
    /// Assemble the engine. Returns the connection and the outbound frame
    /// queue the transport must drain; the keep-alive timer starts armed.
    pub fn new(
        handler: Arc<dyn RSocket>,
        interceptors: &InterceptorRegistry,
        keepalive_interval: Duration,
        keepalive_timeout: Duration,
        error_consumer: ErrorConsumer,
    ) -> (Arc<Self>, UnboundedReceiver<Frame>) {
        let handler = interceptors.decorate(handler);
        let (responder, feed) = Responder::new(handler, error_consumer);
        let on_timeout: TimeoutAction = {
            let responder = responder.clone();
            Arc::new(move || responder.dispose(Error::connection("keepalive timeout")))
        };
        let keepalive = Arc::new(KeepAlive::new(
            keepalive_interval,
            keepalive_timeout,
            responder.outbound_handle(),
            on_timeout,
        ));
        keepalive.start();
        (
            Arc::new(Self {
                responder,
                keepalive,
            }),
            feed,
        )
    }

    /// Route one decoded inbound frame: KEEPALIVE to the liveness
    /// coordinator, everything else to the responder.
    pub fn accept(self: &Arc<Self>, frame: Frame) {
        match frame.frame_type() {
            FrameType::Keepalive => self.keepalive.receive(&frame),
            _ => self.responder.handle_frame(frame),
        }
        // a fatal frame may have closed the connection under us
        if self.responder.state() == ConnectionState::Closed {
            self.keepalive.stop();
        }
    }

    /// Drive the connection from an inbound frame feed until the feed
    /// ends, a decode fault kills the connection, or the connection closes
    /// for any other reason.
    pub async fn run<S>(self: &Arc<Self>, mut inbound: S)
    where
        S: Stream<Item = Result<Frame, FrameError>> + Unpin + Send,
    {
        while let Some(item) = inbound.next().await {
            match item {
                Ok(frame) => self.accept(frame),
                Err(fault) => {
                    self.dispose(fault.into());
                    return;
                }
            }
            if self.state() == ConnectionState::Closed {
                return;
            }
        }
        self.dispose(Error::closed_channel());
    }

    pub fn state(&self) -> ConnectionState {
        self.responder.state()
    }

    /// Tear the connection down: disarm the keep-alive timer and run the
    /// termination sweep.
    pub fn dispose(&self, error: Error) {
        self.keepalive.stop();
        self.responder.dispose(error);
    }

    /// Extension point for draining in-flight streams before teardown.
    /// The current behavior is an immediate dispose.
    pub fn graceful_dispose(&self, error: Error) {
        self.dispose(error);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::{FutureExt, future::BoxFuture};
    use rsbase::Payload;

    use super::*;

    struct Echo;
    impl RSocket for Echo {
        fn request_response(
            &self,
            payload: Payload,
        ) -> BoxFuture<'static, Result<Option<Payload>, Error>> {
            async move { Ok(Some(payload)) }.boxed()
        }
    }

    fn assemble() -> (Arc<Connection>, UnboundedReceiver<Frame>) {
        Connection::new(
            Arc::new(Echo),
            &InterceptorRegistry::new(),
            Duration::from_secs(20),
            Duration::from_secs(90),
            crate::handler::log_errors(),
        )
    }

    #[tokio::test]
    async fn test_keepalive_is_routed_to_the_coordinator() {
        let (connection, mut feed) = assemble();
        connection.accept(Frame::keepalive(true, 0, Bytes::from_static(b"ka")).unwrap());

        let reply = feed.recv().await.unwrap();
        assert_eq!(reply.frame_type(), FrameType::Keepalive);
        assert!(!reply.respond());
        assert_eq!(reply.data().as_ref(), b"ka");
    }

    #[tokio::test]
    async fn test_requests_are_routed_to_the_responder() {
        let (connection, mut feed) = assemble();
        connection.accept(Frame::request_response(1, Payload::from("echo")).unwrap());

        let reply = feed.recv().await.unwrap();
        assert_eq!(reply.frame_type(), FrameType::NextComplete);
        assert_eq!(reply.data().as_ref(), b"echo");
    }

    #[tokio::test]
    async fn test_run_sweeps_when_the_feed_ends() {
        let (connection, _feed) = assemble();
        let inbound = futures::stream::iter(vec![Ok(
            Frame::request_response(1, Payload::from("r")).unwrap()
        )]);
        connection.run(inbound.boxed()).await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(!connection.keepalive.is_running());
    }

    #[tokio::test]
    async fn test_run_stops_on_a_decode_fault() {
        let (connection, _feed) = assemble();
        let inbound =
            futures::stream::iter(vec![Err(FrameError::IllegalFrame("corrupt length prefix"))]);
        connection.run(inbound.boxed()).await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_peer_connection_error_closes() {
        let (connection, _feed) = assemble();
        connection.accept(Frame::error(0, &Error::connection("going away")).unwrap());
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(!connection.keepalive.is_running());
    }
}
