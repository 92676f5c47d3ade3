//! C7 — ChangeFeed: a best-effort push channel for per-market updates
//! (spec §4.7). Not on the critical path: the engine behaves identically
//! with zero subscribers. Built on `tokio::sync::broadcast`, the same
//! primitive the teacher uses for its own live price/signal fan-out.

use crate::domain::{CommitmentId, DistributionId, MarketId};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    CommitmentSettled {
        market_id: MarketId,
        commitment_id: CommitmentId,
        status: crate::domain::CommitmentStatus,
    },
    DistributionApplied {
        market_id: MarketId,
        distribution_id: DistributionId,
    },
    DistributionRolledBack {
        market_id: MarketId,
        distribution_id: DistributionId,
    },
    MarketCancelled {
        market_id: MarketId,
    },
}

impl ChangeEvent {
    pub fn market_id(&self) -> &str {
        match self {
            ChangeEvent::CommitmentSettled { market_id, .. }
            | ChangeEvent::DistributionApplied { market_id, .. }
            | ChangeEvent::DistributionRolledBack { market_id, .. }
            | ChangeEvent::MarketCancelled { market_id } => market_id,
        }
    }
}

/// Eventually-consistent fan-out of `ChangeEvent`s. Duplicate delivery is
/// permitted (spec §4.7); a slow subscriber that falls behind the
/// broadcast channel's buffer just misses old events rather than blocking
/// publishers, which is exactly the "best-effort, may miss, must
/// eventually converge" contract asked for.
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Publishing never blocks and never fails the caller: if nobody is
    /// subscribed the event is simply dropped.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    /// A subscription scoped to one market id; events for other markets
    /// are filtered out on the receiver side. Dropping the returned
    /// receiver releases its buffer slot immediately (bounded-time
    /// cancellation, spec §4.7).
    pub fn subscribe(&self, market_id: MarketId) -> MarketSubscription {
        MarketSubscription {
            market_id,
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub struct MarketSubscription {
    market_id: MarketId,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl MarketSubscription {
    /// Waits for the next event belonging to this subscription's market,
    /// skipping events for other markets and tolerating lag (missed
    /// events are acceptable per the best-effort contract).
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.market_id() == self.market_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_only_sees_its_own_market() {
        let feed = ChangeFeed::new(16);
        let mut sub = feed.subscribe("m1".to_string());

        feed.publish(ChangeEvent::MarketCancelled { market_id: "m2".into() });
        feed.publish(ChangeEvent::MarketCancelled { market_id: "m1".into() });

        let event = sub.recv().await.unwrap();
        assert_eq!(event.market_id(), "m1");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let feed = ChangeFeed::new(16);
        feed.publish(ChangeEvent::MarketCancelled { market_id: "m1".into() });
    }
}
