use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::notifications::{Notification, Notifier};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends without waiting for capacity; failures are logged and dropped.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "Dropping marketplace event");
            metrics::counter!("marketplace_events_dropped_total", 1);
        }
    }
}

/// Marketplace domain events. Each one names the user who should hear about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ItemCreated {
        item_id: Uuid,
        owner_id: Uuid,
    },
    ItemDeleted {
        item_id: Uuid,
        owner_id: Uuid,
    },
    TransactionRequested {
        transaction_id: Uuid,
        item_id: Uuid,
        buyer_id: Uuid,
        seller_id: Uuid,
    },
    PickupProposed {
        transaction_id: Uuid,
        buyer_id: Uuid,
        pickup_at: DateTime<Utc>,
        pickup_location: String,
    },
    TransactionConfirmed {
        transaction_id: Uuid,
        item_id: Uuid,
        seller_id: Uuid,
    },
    TransactionRejected {
        transaction_id: Uuid,
        item_id: Uuid,
        /// The party who did not reject
        notify_user_id: Uuid,
        by_seller: bool,
    },
}

impl Event {
    /// User to notify, if any.
    pub fn recipient(&self) -> Option<Uuid> {
        match self {
            Event::ItemCreated { .. } | Event::ItemDeleted { .. } => None,
            Event::TransactionRequested { seller_id, .. } => Some(*seller_id),
            Event::PickupProposed { buyer_id, .. } => Some(*buyer_id),
            Event::TransactionConfirmed { seller_id, .. } => Some(*seller_id),
            Event::TransactionRejected { notify_user_id, .. } => Some(*notify_user_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::ItemCreated { .. } => "item_created",
            Event::ItemDeleted { .. } => "item_deleted",
            Event::TransactionRequested { .. } => "transaction_requested",
            Event::PickupProposed { .. } => "pickup_proposed",
            Event::TransactionConfirmed { .. } => "transaction_confirmed",
            Event::TransactionRejected { .. } => "transaction_rejected",
        }
    }

    /// Human-readable notification text
    pub fn message(&self) -> String {
        match self {
            Event::ItemCreated { .. } => "Your listing was submitted for review".to_string(),
            Event::ItemDeleted { .. } => "Your listing was removed".to_string(),
            Event::TransactionRequested { .. } => {
                "A resident requested one of your listings".to_string()
            }
            Event::PickupProposed {
                pickup_at,
                pickup_location,
                ..
            } => format!(
                "The seller proposed pickup at {} on {}",
                pickup_location,
                pickup_at.to_rfc3339()
            ),
            Event::TransactionConfirmed { .. } => {
                "The buyer confirmed the pickup details".to_string()
            }
            Event::TransactionRejected { by_seller: true, .. } => {
                "The seller declined your request".to_string()
            }
            Event::TransactionRejected { by_seller: false, .. } => {
                "The buyer declined the proposed pickup".to_string()
            }
        }
    }
}

/// Drains the event channel and hands each addressed event to `notifier`.
/// Runs until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(event = event.name(), "Received event");
        metrics::counter!("marketplace_events_total", 1, "event" => event.name());

        let Some(user_id) = event.recipient() else {
            continue;
        };

        let notification = Notification::new(user_id, event.name(), event.message());
        if let Err(e) = notifier.notify(notification).await {
            error!(
                event = event.name(),
                user_id = %user_id,
                error = %e,
                "Failed to deliver notification"
            );
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationError;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
            self.seen.lock().await.push(notification);
            Ok(())
        }
    }

    #[tokio::test]
    async fn addressed_events_reach_the_notifier() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let recorder = Arc::new(Recorder::default());

        let seller = Uuid::new_v4();
        sender.send_or_log(Event::ItemCreated {
            item_id: Uuid::new_v4(),
            owner_id: seller,
        });
        sender
            .send(Event::TransactionRequested {
                transaction_id: Uuid::new_v4(),
                item_id: Uuid::new_v4(),
                buyer_id: Uuid::new_v4(),
                seller_id: seller,
            })
            .await
            .unwrap();
        drop(sender);

        process_events(rx, recorder.clone()).await;

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].user_id, seller);
        assert_eq!(seen[0].kind, "transaction_requested");
    }

    #[test]
    fn full_channel_does_not_fail_the_caller() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let event = Event::ItemDeleted {
            item_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
        };
        sender.send_or_log(event.clone());
        sender.send_or_log(event);
    }
}
