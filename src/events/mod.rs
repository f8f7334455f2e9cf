use crate::errors::ServiceError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

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
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event, logging instead of failing when the channel is closed
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted by the coupon service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CouponCreated {
        coupon_id: Uuid,
        code: String,
    },
    CouponUpdated(Uuid),
    CouponActivationChanged {
        coupon_id: Uuid,
        is_active: bool,
    },
    CouponDeleted(Uuid),
    CouponRedeemed {
        coupon_id: Uuid,
        code: String,
        discount_amount: Decimal,
        used_count: i32,
        redeemed_at: DateTime<Utc>,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CouponCreated { coupon_id, code } => {
                info!(%coupon_id, %code, "Coupon created");
            }
            Event::CouponUpdated(coupon_id) => {
                info!(%coupon_id, "Coupon updated");
            }
            Event::CouponActivationChanged {
                coupon_id,
                is_active,
            } => {
                info!(%coupon_id, is_active, "Coupon activation changed");
            }
            Event::CouponDeleted(coupon_id) => {
                info!(%coupon_id, "Coupon deleted");
            }
            Event::CouponRedeemed {
                coupon_id,
                code,
                discount_amount,
                used_count,
                ..
            } => {
                info!(
                    %coupon_id,
                    %code,
                    %discount_amount,
                    used_count,
                    "Coupon redeemed"
                );
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();

        sender.send(Event::CouponDeleted(id)).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event, Event::CouponDeleted(id));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender.send(Event::CouponUpdated(Uuid::new_v4())).await;
        assert!(matches!(result, Err(ServiceError::EventError(_))));

        // never panics or errors
        sender.send_or_log(Event::CouponUpdated(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn process_events_stops_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender
            .send(Event::CouponActivationChanged {
                coupon_id: Uuid::new_v4(),
                is_active: false,
            })
            .await
            .unwrap();
        drop(sender);

        process_events(rx).await;
    }
}
