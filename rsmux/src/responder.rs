//! Inbound frame dispatch and the responder side of every interaction
//! model.
//!
//! Each accepted request spawns a task that bridges the user handler to
//! the wire: the task draws peer credit before every emitted payload,
//! races a cancellation latch, and deregisters its stream when it winds
//! down. All outbound frames funnel through one unbounded queue; the
//! transport is its only consumer.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU8, Ordering},
};

use futures::StreamExt;
use rsbase::{Error, Frame, FrameError, FrameType, error::INVALID_SETUP};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::{
    channel::ChannelReceiver,
    handler::{ErrorConsumer, PayloadStream, RSocket},
    registry::{ReceiverEntry, SenderEntry, StreamRegistry},
};

const OPEN: u8 = 0;
const TERMINATING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of the connection as the responder sees it.
///
/// `Open` ends at a fatal protocol violation, transport loss or keep-alive
/// timeout; `Terminating` lasts for the duration of the termination sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Terminating,
    Closed,
}

/// The responder-side multiplexer.
///
/// Owns the outbound frame queue, the stream registries and the user
/// handler. One instance serves one connection.
pub struct Responder {
    outbound: Mutex<Option<UnboundedSender<Frame>>>,
    registry: Arc<StreamRegistry>,
    handler: Mutex<Option<Arc<dyn RSocket>>>,
    error_consumer: ErrorConsumer,
    state: AtomicU8,
}

impl Responder {
    /// Returns the responder plus the outbound frame feed the transport
    /// must drain.
    pub fn new(
        handler: Arc<dyn RSocket>,
        error_consumer: ErrorConsumer,
    ) -> (Arc<Self>, UnboundedReceiver<Frame>) {
        let (outbound, feed) = mpsc::unbounded_channel();
        let responder = Arc::new(Self {
            outbound: Mutex::new(Some(outbound)),
            registry: Arc::new(StreamRegistry::default()),
            handler: Mutex::new(Some(handler)),
            error_consumer,
            state: AtomicU8::new(OPEN),
        });
        (responder, feed)
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            TERMINATING => ConnectionState::Terminating,
            _ => ConnectionState::Closed,
        }
    }

    fn handler(&self) -> Option<Arc<dyn RSocket>> {
        self.handler.lock().unwrap().clone()
    }

    pub(crate) fn outbound_handle(&self) -> UnboundedSender<Frame> {
        self.outbound
            .lock()
            .unwrap()
            .clone()
            // after disposal late frames go nowhere
            .unwrap_or_else(|| mpsc::unbounded_channel().0)
    }

    /// Dispatch one decoded inbound frame.
    pub fn handle_frame(self: &Arc<Self>, frame: Frame) {
        match frame.frame_type() {
            FrameType::RequestFnf => self.handle_fire_and_forget(frame),
            FrameType::RequestResponse => self.handle_request_response(frame),
            FrameType::RequestStream => self.handle_request_stream(frame),
            FrameType::RequestChannel => self.handle_request_channel(frame),
            FrameType::RequestN => self.handle_request_n(frame),
            FrameType::Cancel => self.handle_cancel(frame.stream_id()),
            FrameType::Next | FrameType::Complete | FrameType::NextComplete => {
                self.handle_payload(frame)
            }
            FrameType::Error => self.handle_error(frame),
            FrameType::MetadataPush => self.handle_metadata_push(frame),
            FrameType::Setup => {
                self.fatal(Error::new(INVALID_SETUP, "SETUP frame received post setup"))
            }
            FrameType::Lease => self.fatal(Error::connection("LEASE frame received by the responder")),
            FrameType::Payload => self.fatal(Error::connection(
                "PAYLOAD frame carries neither NEXT nor COMPLETE",
            )),
            other => debug!(
                frame_type = ?other,
                stream_id = frame.stream_id(),
                "discarding unhandled frame",
            ),
        }
    }

    fn send_frame(self: &Arc<Self>, frame: Frame) {
        let outbound = self.outbound.lock().unwrap().clone();
        if let Some(outbound) = outbound {
            if outbound.send(frame).is_err() {
                // the transport stopped draining the queue
                self.dispose(Error::closed_channel());
            }
        }
    }

    fn send_terminal(self: &Arc<Self>, frame: Result<Frame, FrameError>) {
        match frame {
            Ok(frame) => self.send_frame(frame),
            Err(fault) => (self.error_consumer)(fault.into()),
        }
    }

    /// An emitted payload that does not encode fails its own stream, not
    /// the connection.
    fn send_encode_failure(self: &Arc<Self>, stream_id: u32, fault: FrameError) {
        let error = Error::application(fault.to_string());
        self.send_terminal(Frame::error(stream_id, &error));
    }

    fn handle_fire_and_forget(self: &Arc<Self>, frame: Frame) {
        let Some(handler) = self.handler() else { return };
        let stream_id = frame.stream_id();
        let entry = SenderEntry::unbounded();
        self.registry.insert_sender(stream_id, entry.clone());
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = entry.canceled() => {}
                result = handler.fire_and_forget(frame.payload()) => {
                    // fire-and-forget is unreplied by contract
                    if let Err(error) = result {
                        (this.error_consumer)(error);
                    }
                }
            }
            this.registry.remove_sender(stream_id);
        });
    }

    fn handle_request_response(self: &Arc<Self>, frame: Frame) {
        let Some(handler) = self.handler() else { return };
        let stream_id = frame.stream_id();
        let entry = SenderEntry::unbounded();
        self.registry.insert_sender(stream_id, entry.clone());
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = entry.canceled() => {}
                result = handler.request_response(frame.payload()) => {
                    let reply = match result {
                        Ok(Some(payload)) => Frame::next_complete(stream_id, payload),
                        Ok(None) => Frame::complete(stream_id),
                        Err(error) => Frame::error(stream_id, &error),
                    };
                    match reply {
                        Ok(reply) => this.send_frame(reply),
                        Err(fault) => this.send_encode_failure(stream_id, fault),
                    }
                }
            }
            this.registry.remove_sender(stream_id);
        });
    }

    fn handle_request_stream(self: &Arc<Self>, frame: Frame) {
        let Some(handler) = self.handler() else { return };
        let stream_id = frame.stream_id();
        let entry = SenderEntry::with_initial(frame.initial_request_n().unwrap_or_default());
        self.registry.insert_sender(stream_id, entry.clone());
        let this = self.clone();
        tokio::spawn(async move {
            let outbound = handler.request_stream(frame.payload());
            this.pump(stream_id, entry, outbound).await;
        });
    }

    fn handle_request_channel(self: &Arc<Self>, frame: Frame) {
        let Some(handler) = self.handler() else { return };
        let stream_id = frame.stream_id();
        let bootstrap = frame.payload();

        let (sink, inbound) = mpsc::unbounded_channel();
        let receiver = ReceiverEntry::new(sink);
        // the bootstrap payload reaches the sink before the handler ever
        // observes it as a stream
        receiver.deliver(Ok(bootstrap.clone()));
        self.registry.insert_receiver(stream_id, receiver);
        let payloads = ChannelReceiver::new(
            stream_id,
            inbound,
            self.outbound_handle(),
            self.registry.clone(),
        );

        let entry = SenderEntry::with_initial(frame.initial_request_n().unwrap_or_default());
        self.registry.insert_sender(stream_id, entry.clone());
        let this = self.clone();
        tokio::spawn(async move {
            // the handler sees the bootstrap payload twice: as its
            // argument and as the first item of the inbound stream
            let outbound = handler.request_channel(bootstrap, payloads.boxed());
            this.pump(stream_id, entry, outbound).await;
        });
    }

    /// Drive a handler-produced stream onto the wire, one peer credit per
    /// item, until it terminates or the stream is canceled.
    async fn pump(self: &Arc<Self>, stream_id: u32, entry: SenderEntry, mut stream: PayloadStream) {
        loop {
            let item = tokio::select! {
                _ = entry.canceled() => break,
                item = async {
                    entry.acquire().await;
                    stream.next().await
                } => item,
            };
            match item {
                Some(Ok(payload)) => match Frame::next(stream_id, payload) {
                    Ok(frame) => self.send_frame(frame),
                    Err(fault) => {
                        self.send_encode_failure(stream_id, fault);
                        break;
                    }
                },
                Some(Err(error)) => {
                    self.send_terminal(Frame::error(stream_id, &error));
                    break;
                }
                None => {
                    self.send_terminal(Frame::complete(stream_id));
                    break;
                }
            }
        }
        self.registry.remove_sender(stream_id);
    }

    fn handle_request_n(&self, frame: Frame) {
        let stream_id = frame.stream_id();
        let Some(n) = frame.initial_request_n() else { return };
        match self.registry.sender(stream_id) {
            Some(entry) => entry.grant(n),
            None => debug!(stream_id, "credit for unknown stream"),
        }
    }

    fn handle_cancel(&self, stream_id: u32) {
        match self.registry.remove_sender(stream_id) {
            Some(entry) => entry.cancel(),
            None => debug!(stream_id, "cancellation of unknown stream"),
        }
    }

    fn handle_payload(&self, frame: Frame) {
        let stream_id = frame.stream_id();
        match frame.frame_type() {
            FrameType::Next => match self.registry.receiver(stream_id) {
                Some(receiver) => receiver.deliver(Ok(frame.payload())),
                None => debug!(stream_id, "payload for unknown stream"),
            },
            FrameType::NextComplete => match self.registry.remove_receiver(stream_id) {
                Some(receiver) => receiver.deliver(Ok(frame.payload())),
                None => debug!(stream_id, "payload for unknown stream"),
            },
            _ => {
                // dropping the sink completes the inbound stream
                self.registry.remove_receiver(stream_id);
            }
        }
    }

    fn handle_error(self: &Arc<Self>, frame: Frame) {
        let stream_id = frame.stream_id();
        let error = Error::new(
            frame.error_code().unwrap_or_default(),
            String::from_utf8_lossy(&frame.data()).into_owned(),
        );
        if stream_id == 0 {
            self.dispose(error);
            return;
        }
        match self.registry.remove_receiver(stream_id) {
            Some(receiver) => receiver.deliver(Err(error)),
            None => debug!(stream_id, "error for unknown stream"),
        }
    }

    fn handle_metadata_push(self: &Arc<Self>, frame: Frame) {
        let Some(handler) = self.handler() else { return };
        let this = self.clone();
        tokio::spawn(async move {
            // metadata push is unreplied by contract
            if let Err(error) = handler.metadata_push(frame.payload()).await {
                (this.error_consumer)(error);
            }
        });
    }

    /// A protocol violation that kills the connection: report it to the
    /// peer on stream 0, then tear everything down.
    fn fatal(self: &Arc<Self>, error: Error) {
        self.send_terminal(Frame::error(0, &error));
        self.dispose(error);
    }

    /// The termination sweep.
    ///
    /// Fails every receiver with `error`, cancels every sender, clears the
    /// registries, drops the handler and closes the outbound queue. Runs
    /// at most once.
    pub fn dispose(&self, error: Error) {
        if self
            .state
            .compare_exchange(OPEN, TERMINATING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!(%error, "terminating connection");
        self.registry.sweep(&error);
        drop(self.handler.lock().unwrap().take());
        drop(self.outbound.lock().unwrap().take());
        self.state.store(CLOSED, Ordering::Release);
    }
}
