use async_trait::async_trait;
use tokio::sync::mpsc;

use verity_core::ExecutionReport;

use crate::{EventPublisher, VenueError, VenueResult};

/// A report paired with the topic it was published under.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedReport {
    pub topic: String,
    pub report: ExecutionReport,
}

/// Publisher backed by a single-consumer channel.
///
/// The receiving half is the downstream consumer; dropping it makes every
/// subsequent publish fail, which surfaces a wedged consumer instead of
/// silently discarding reports.
#[derive(Clone)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<PublishedReport>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiver downstream consumers read from.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedReport>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, topic: &str, report: &ExecutionReport) -> VenueResult<()> {
        self.sender
            .send(PublishedReport {
                topic: topic.to_string(),
                report: report.clone(),
            })
            .map_err(|err| VenueError::Other(format!("event sink closed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use verity_core::{PositionSide, PositionStatusReport};

    fn sample_report() -> ExecutionReport {
        ExecutionReport::Position(PositionStatusReport {
            instrument: "BTC-USD-PERP".into(),
            side: PositionSide::Long,
            quantity: Decimal::ONE,
            average_entry_price: None,
            updated_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn delivers_reports_in_order() {
        let (publisher, mut rx) = ChannelPublisher::new();
        let report = sample_report();
        publisher.publish("events.position.X", &report).await.unwrap();
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.topic, "events.position.X");
        assert_eq!(delivered.report, report);
    }

    #[tokio::test]
    async fn publish_fails_once_consumer_is_gone() {
        let (publisher, rx) = ChannelPublisher::new();
        drop(rx);
        let err = publisher
            .publish("events.position.X", &sample_report())
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::Other(_)));
    }
}
