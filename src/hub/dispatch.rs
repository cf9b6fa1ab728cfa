//! Per-message fan-out.
//!
//! Each recipient gets its own delivery task with its own write deadline,
//! so a stalled connection only ever costs its own task. Outcomes are
//! logged here and never reported back to the sender.

// Rust guideline compliant 2026-02

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::commands::Message;
use super::peer::{DeliveryError, Peer};

/// What happened to one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The write completed.
    Delivered,
    /// The write did not finish before the deadline.
    TimedOut,
    /// Shutdown aborted the write.
    Cancelled,
    /// The recipient had already gone away.
    Closed,
    /// Any other transport failure.
    Failed(String),
}

impl Delivery {
    fn log(&self, peer: &Peer, run: &str) {
        match self {
            Self::Delivered => {}
            Self::TimedOut => {
                log::warn!("[Hub] Delivery to {} on run {run} timed out", peer.id());
            }
            Self::Cancelled => {
                log::debug!("[Hub] Delivery to {} on run {run} cancelled", peer.id());
            }
            Self::Closed => {
                log::debug!("[Hub] Delivery to {} skipped, connection closed", peer.id());
            }
            Self::Failed(e) => {
                log::error!("[Hub] Delivery to {} on run {run} failed: {e}", peer.id());
            }
        }
    }
}

/// Spawns delivery tasks.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    tracker: TaskTracker,
    abort: CancellationToken,
    write_timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(write_timeout: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            abort: CancellationToken::new(),
            write_timeout,
        }
    }

    /// Start one delivery task per recipient. Returns immediately.
    pub(crate) fn dispatch(&self, message: &Message, recipients: Vec<Peer>) {
        for peer in recipients {
            let payload = Arc::clone(&message.payload);
            let run = message.run.clone();
            let abort = self.abort.clone();
            let deadline = self.write_timeout;

            self.tracker.spawn(async move {
                let outcome = deliver(&peer, &payload, deadline, &abort).await;
                outcome.log(&peer, run.as_str());
            });
        }
    }

    /// Delivery tasks still running.
    pub(crate) fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work, give in-flight deliveries up to `grace`, then
    /// cancel whatever is left and wait for it to unwind.
    pub(crate) async fn drain(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            log::warn!(
                "[Hub] {} deliveries still running after {:?}, cancelling",
                self.tracker.len(),
                grace
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }
    }
}

/// Write `payload` to `peer`, bounded by `deadline` and `abort`.
pub(crate) async fn deliver(
    peer: &Peer,
    payload: &str,
    deadline: Duration,
    abort: &CancellationToken,
) -> Delivery {
    tokio::select! {
        () = abort.cancelled() => Delivery::Cancelled,
        result = tokio::time::timeout(deadline, peer.sink().send_text(payload)) => match result {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(DeliveryError::Closed)) => Delivery::Closed,
            Ok(Err(DeliveryError::Io(e))) => Delivery::Failed(e),
            Err(_) => Delivery::TimedOut,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::peer::testing::{channel_peer, BrokenSink, StalledSink};
    use crate::run_id::RunId;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_deliver_outcomes() {
        let abort = CancellationToken::new();

        let (ok, mut rx) = channel_peer();
        assert_eq!(deliver(&ok, "hi", SHORT, &abort).await, Delivery::Delivered);
        assert_eq!(rx.recv().await.unwrap(), "hi");

        let stalled = Peer::new(Arc::new(StalledSink));
        assert_eq!(deliver(&stalled, "hi", SHORT, &abort).await, Delivery::TimedOut);

        let broken = Peer::new(Arc::new(BrokenSink));
        assert!(matches!(
            deliver(&broken, "hi", SHORT, &abort).await,
            Delivery::Failed(_)
        ));

        let (gone, rx) = channel_peer();
        drop(rx);
        assert_eq!(deliver(&gone, "hi", SHORT, &abort).await, Delivery::Closed);
    }

    #[tokio::test]
    async fn test_deliver_cancelled() {
        let abort = CancellationToken::new();
        abort.cancel();
        let stalled = Peer::new(Arc::new(StalledSink));

        let outcome = deliver(&stalled, "hi", Duration::from_secs(60), &abort).await;
        assert_eq!(outcome, Delivery::Cancelled);
    }

    #[tokio::test]
    async fn test_stalled_recipient_does_not_block_others() {
        let dispatcher = Dispatcher::new(Duration::from_secs(30));
        let (fast, mut rx) = channel_peer();
        let stalled = Peer::new(Arc::new(StalledSink));
        let msg = Message::new(RunId::parse("r1").unwrap(), "line", None);

        dispatcher.dispatch(&msg, vec![stalled, fast]);

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("fast peer should not wait on stalled peer")
            .unwrap();
        assert_eq!(got, "line");
        assert!(dispatcher.in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_drain_cancels_after_grace() {
        let dispatcher = Dispatcher::new(Duration::from_secs(30));
        let msg = Message::new(RunId::parse("r1").unwrap(), "line", None);
        dispatcher.dispatch(&msg, vec![Peer::new(Arc::new(StalledSink))]);

        tokio::time::timeout(Duration::from_secs(2), dispatcher.drain(SHORT))
            .await
            .expect("drain should finish once grace expires");
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_quick_deliveries() {
        let dispatcher = Dispatcher::new(SHORT);
        let (peer, mut rx) = channel_peer();
        let msg = Message::new(RunId::parse("r1").unwrap(), "line", None);
        dispatcher.dispatch(&msg, vec![peer]);

        dispatcher.drain(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv().unwrap(), "line");
    }
}
