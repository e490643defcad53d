use tokio::sync::{Mutex, Notify};

use crate::measurement::Measurement;

/// The only value the two workers share: the latest counter snapshot plus a
/// single-slot trigger. The serial side replaces the snapshot and fires the
/// trigger, the MQTT side clones it out. Neither holds the lock for anything
/// but the copy itself.
pub struct SnapshotExchange {
    snapshot: Mutex<Measurement>,
    trigger: Notify,
}

impl SnapshotExchange {
    pub fn new(initial: Measurement) -> Self {
        return SnapshotExchange {
            snapshot: Mutex::new(initial),
            trigger: Notify::new(),
        };
    }

    /// Store a new snapshot and fire the trigger. `notify_one` keeps at most
    /// one stored permit, so a burst of telegrams collapses into a single
    /// wake-up and the consumer always sees the latest state, never a
    /// backlog of stale ones.
    pub async fn publish(&self, measurement: Measurement) {
        *self.snapshot.lock().await = measurement;
        self.trigger.notify_one();
    }

    pub async fn take(&self) -> Measurement {
        return self.snapshot.lock().await.clone();
    }

    /// Block until the trigger fires. Returning consumes the stored permit,
    /// which is what clears the trigger.
    pub async fn wait(&self) {
        self.trigger.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ChannelCounter;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn snapshot(total: u64) -> Measurement {
        let mut measurement = Measurement::new(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap());
        measurement.channels.insert(1, ChannelCounter { pulsecount: total, total, today: total });
        return measurement;
    }

    #[tokio::test]
    async fn test_wait_wakes_up_after_publish() {
        let exchange = SnapshotExchange::new(snapshot(0));
        exchange.publish(snapshot(1)).await;

        tokio::time::timeout(Duration::from_secs(1), exchange.wait()).await.unwrap();
        assert_eq!(exchange.take().await, snapshot(1));
    }

    #[tokio::test]
    async fn test_bursts_coalesce_into_one_wakeup_with_latest_state() {
        let exchange = SnapshotExchange::new(snapshot(0));
        exchange.publish(snapshot(1)).await;
        exchange.publish(snapshot(2)).await;
        exchange.publish(snapshot(3)).await;

        tokio::time::timeout(Duration::from_secs(1), exchange.wait()).await.unwrap();
        assert_eq!(exchange.take().await, snapshot(3));

        /* All three publishes collapsed into the single permit */
        let pending = tokio::time::timeout(Duration::from_millis(50), exchange.wait()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_take_does_not_clear_the_trigger() {
        let exchange = SnapshotExchange::new(snapshot(0));
        exchange.publish(snapshot(1)).await;

        assert_eq!(exchange.take().await, snapshot(1));
        tokio::time::timeout(Duration::from_secs(1), exchange.wait()).await.unwrap();
    }
}
