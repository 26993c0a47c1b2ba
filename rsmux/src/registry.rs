//! The two concurrent stream maps: stream id to sender, stream id to
//! receiver.
//!
//! Individual inserts and removals run under the maps' own sharding; the
//! termination sweep flips a flag that suppresses per-stream removals so
//! nothing interleaves with its iteration, then fails every entry and
//! clears both maps.

use std::{
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use rsbase::{Error, Payload};
use tokio::sync::{Notify, mpsc::UnboundedSender};

use crate::credit::Credit;

/// A one-shot latch that stops the task driving a stream.
///
/// Firing is idempotent; the driving task races the latch against its own
/// work and winds down when it fires.
#[derive(Debug, Default)]
pub struct Cancellation {
    fired: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    pub fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolve once the latch fires.
    pub async fn fired(&self) {
        while !self.is_fired() {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// One in-flight responder-side producer: the credit the peer granted it
/// plus the latch that cancels it.
#[derive(Debug, Clone)]
pub struct SenderEntry {
    credit: Arc<Credit>,
    cancellation: Arc<Cancellation>,
}

impl SenderEntry {
    pub fn with_initial(initial_request_n: u32) -> Self {
        Self {
            credit: Arc::new(Credit::with_initial(initial_request_n)),
            cancellation: Arc::new(Cancellation::default()),
        }
    }

    /// An entry for interactions of fixed cardinality, which request
    /// everything up front.
    pub fn unbounded() -> Self {
        Self {
            credit: Arc::new(Credit::unbounded()),
            cancellation: Arc::new(Cancellation::default()),
        }
    }

    pub fn grant(&self, n: u32) {
        self.credit.grant(n);
    }

    pub async fn acquire(&self) {
        self.credit.acquire().await;
    }

    pub fn cancel(&self) {
        self.cancellation.fire();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_fired()
    }

    pub async fn canceled(&self) {
        self.cancellation.fired().await;
    }

    #[cfg(test)]
    pub(crate) fn credit(&self) -> &Credit {
        &self.credit
    }
}

/// The inbound half of a stream: the unicast sink the dispatcher feeds
/// and user code drains.
#[derive(Debug, Clone)]
pub struct ReceiverEntry {
    sink: UnboundedSender<Result<Payload, Error>>,
}

impl ReceiverEntry {
    pub fn new(sink: UnboundedSender<Result<Payload, Error>>) -> Self {
        Self { sink }
    }

    /// Push an item or a terminal error into the stream. The consumer may
    /// already be gone, which is not this side's problem.
    pub fn deliver(&self, item: Result<Payload, Error>) {
        let _ = self.sink.send(item);
    }
}

/// The pair of concurrent mappings from stream id to stream endpoints.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    senders: DashMap<u32, SenderEntry>,
    receivers: DashMap<u32, ReceiverEntry>,
    terminating: AtomicBool,
}

impl StreamRegistry {
    pub fn insert_sender(&self, stream_id: u32, entry: SenderEntry) {
        self.senders.insert(stream_id, entry);
    }

    pub fn insert_receiver(&self, stream_id: u32, entry: ReceiverEntry) {
        self.receivers.insert(stream_id, entry);
    }

    pub fn sender(&self, stream_id: u32) -> Option<SenderEntry> {
        self.senders.get(&stream_id).map(|entry| entry.value().clone())
    }

    pub fn receiver(&self, stream_id: u32) -> Option<ReceiverEntry> {
        self.receivers.get(&stream_id).map(|entry| entry.value().clone())
    }

    /// Idempotent; suppressed while the termination sweep runs.
    pub fn remove_sender(&self, stream_id: u32) -> Option<SenderEntry> {
        if self.is_terminating() {
            return None;
        }
        self.senders.remove(&stream_id).map(|(_, entry)| entry)
    }

    /// Idempotent; suppressed while the termination sweep runs.
    pub fn remove_receiver(&self, stream_id: u32) -> Option<ReceiverEntry> {
        if self.is_terminating() {
            return None;
        }
        self.receivers.remove(&stream_id).map(|(_, entry)| entry)
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// Fail every in-flight stream and clear both maps.
    ///
    /// Receivers observe the termination error, senders are canceled.
    /// Runs at most once; per-stream removals are suppressed from the
    /// moment it starts.
    pub fn sweep(&self, error: &Error) {
        if self.terminating.swap(true, Ordering::AcqRel) {
            return;
        }
        let receivers: Vec<_> = self
            .receivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for receiver in receivers {
            receiver.deliver(Err(error.clone()));
        }
        let senders: Vec<_> = self
            .senders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for sender in senders {
            sender.cancel();
        }
        self.receivers.clear();
        self.senders.clear();
    }
}
