//! Connection liveness: periodic KEEPALIVE probes and a timeout action.
//!
//! The coordinator runs on its own timer next to the frame dispatch. Every
//! interval it probes the peer unless the deadline has already passed, in
//! which case the timeout action fires exactly once. Inbound KEEPALIVE
//! frames refresh the deadline and, when asked, are echoed back with the
//! same data.
//!
//! For a resumable connection the transport layer calls [`KeepAlive::stop`]
//! on disconnect and [`KeepAlive::start`] on resume, so the timer is armed
//! exactly while the transport is up; its timeout action requests a
//! disconnect rather than closing, keeping resumption possible.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use rsbase::Frame;
use tokio::{
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::debug;

/// What to do when the peer goes quiet past the deadline.
pub type TimeoutAction = Arc<dyn Fn() + Send + Sync>;

/// Supplies the resume position carried by outbound KEEPALIVE frames.
pub type PositionProvider = Arc<dyn Fn() -> u64 + Send + Sync>;

/// The keep-alive coordinator of one connection.
pub struct KeepAlive {
    interval: Duration,
    timeout: Duration,
    last_received: Arc<Mutex<Instant>>,
    outbound: UnboundedSender<Frame>,
    on_timeout: TimeoutAction,
    position: PositionProvider,
    running: Arc<AtomicBool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAlive {
    /// The default variant: the caller's timeout action disposes the
    /// connection, and outbound probes carry position 0.
    pub fn new(
        interval: Duration,
        timeout: Duration,
        outbound: UnboundedSender<Frame>,
        on_timeout: TimeoutAction,
    ) -> Self {
        Self::resumable(interval, timeout, outbound, on_timeout, Arc::new(|| 0))
    }

    /// The resumable variant: probes carry the position the provider
    /// reports, and the timeout action should request a transport
    /// disconnect rather than a close.
    pub fn resumable(
        interval: Duration,
        timeout: Duration,
        outbound: UnboundedSender<Frame>,
        on_timeout: TimeoutAction,
        position: PositionProvider,
    ) -> Self {
        Self {
            interval,
            timeout,
            last_received: Arc::new(Mutex::new(Instant::now())),
            outbound,
            on_timeout,
            position,
            running: Arc::new(AtomicBool::new(false)),
            ticker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Arm the timer. The liveness deadline restarts from now, so a
    /// resumed connection is not blamed for the time it spent down.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.last_received.lock().unwrap() = Instant::now();

        let interval = self.interval;
        let timeout = self.timeout;
        let last_received = self.last_received.clone();
        let outbound = self.outbound.clone();
        let on_timeout = self.on_timeout.clone();
        let position = self.position.clone();
        let running = self.running.clone();
        let ticker = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::Acquire) {
                    break;
                }
                let elapsed = last_received.lock().unwrap().elapsed();
                if elapsed >= timeout {
                    debug!(?elapsed, "keepalive deadline missed");
                    running.store(false, Ordering::Release);
                    on_timeout();
                    break;
                }
                let Ok(probe) = Frame::keepalive(true, position(), Bytes::new()) else {
                    break;
                };
                if outbound.send(probe).is_err() {
                    break;
                }
            }
        });
        *self.ticker.lock().unwrap() = Some(ticker);
    }

    /// Disarm the timer; a later [`start`](Self::start) re-arms it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(ticker) = self.ticker.lock().unwrap().take() {
            ticker.abort();
        }
    }

    /// Account an inbound KEEPALIVE frame: refresh the deadline and echo
    /// the opaque data back when the peer asked for a response.
    pub fn receive(&self, frame: &Frame) {
        *self.last_received.lock().unwrap() = Instant::now();
        if frame.respond() {
            let position = (self.position)();
            if let Ok(reply) = Frame::keepalive(false, position, frame.data()) {
                let _ = self.outbound.send(reply);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc::{self, error::TryRecvError};

    use super::*;

    fn counting_action() -> (TimeoutAction, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        (
            Arc::new(move || {
                counter.fetch_add(1, Ordering::AcqRel);
            }),
            fired,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_exactly_once() {
        let (outbound, mut feed) = mpsc::unbounded_channel();
        let (action, fired) = counting_action();
        let keepalive = KeepAlive::new(
            Duration::from_millis(500),
            Duration::from_millis(1500),
            outbound,
            action,
        );
        keepalive.start();

        // two probes go out before the deadline passes
        assert!(feed.recv().await.unwrap().respond());
        assert!(feed.recv().await.unwrap().respond());

        time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(fired.load(Ordering::Acquire), 1);
        assert!(!keepalive.is_running());
        assert!(matches!(feed.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_keepalive_defers_the_timeout() {
        let (outbound, mut feed) = mpsc::unbounded_channel();
        let (action, fired) = counting_action();
        let keepalive = KeepAlive::new(
            Duration::from_millis(500),
            Duration::from_millis(1500),
            outbound,
            action,
        );
        keepalive.start();

        time::sleep(Duration::from_millis(1200)).await;
        keepalive.receive(&Frame::keepalive(false, 0, Bytes::new()).unwrap());

        // the deadline restarted at 1200ms, so nothing fires through 2600ms
        time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(fired.load(Ordering::Acquire), 0);

        time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::Acquire), 1);
        while feed.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn test_respond_is_echoed_with_the_same_data() {
        let (outbound, mut feed) = mpsc::unbounded_channel();
        let (action, _) = counting_action();
        let keepalive = KeepAlive::new(
            Duration::from_secs(30),
            Duration::from_secs(90),
            outbound,
            action,
        );

        keepalive.receive(&Frame::keepalive(true, 7, Bytes::from_static(b"ping")).unwrap());
        let reply = feed.recv().await.unwrap();
        assert!(!reply.respond());
        assert_eq!(reply.data().as_ref(), b"ping");

        // a plain acknowledgement is not echoed
        keepalive.receive(&Frame::keepalive(false, 7, Bytes::from_static(b"pong")).unwrap());
        assert!(matches!(feed.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumable_pauses_while_disconnected() {
        let (outbound, mut feed) = mpsc::unbounded_channel();
        let (action, fired) = counting_action();
        let keepalive = KeepAlive::resumable(
            Duration::from_millis(500),
            Duration::from_millis(1500),
            outbound,
            action,
            Arc::new(|| 99),
        );

        keepalive.start();
        let probe = feed.recv().await.unwrap();
        assert_eq!(probe.last_received_position(), Some(99));

        // transport went down: the timer must not run it out
        keepalive.stop();
        assert!(!keepalive.is_running());
        time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(fired.load(Ordering::Acquire), 0);
        while feed.try_recv().is_ok() {}

        // transport came back
        keepalive.start();
        assert!(keepalive.is_running());
        assert!(feed.recv().await.unwrap().respond());
        assert_eq!(fired.load(Ordering::Acquire), 0);
    }
}
