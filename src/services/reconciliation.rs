use crate::{
    entities::{
        order::{self, Entity as Order, PaymentStatus},
        order_item::{self, Entity as OrderItem},
        webhook_event,
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    notifications::{dispatch_order_confirmation, Notifier, OrderConfirmation},
    services::{
        inventory::InventoryService,
        payments::{GatewayEvent, GatewayEventKind},
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Consumes the payment provider's webhook event stream and makes order and
/// stock state match real-world payment outcomes.
///
/// Every branch is idempotent: the provider may redeliver any event, and a
/// replay must be a no-op rather than a double-send or a double stock
/// restore. Two guards enforce this: a processed-event ledger keyed by the
/// provider event id, and a check on the order's current payment status
/// before any mutation.
#[derive(Clone)]
pub struct PaymentReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    notifier: Arc<dyn Notifier>,
}

impl PaymentReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifier,
        }
    }

    /// Applies one verified provider event. Returns `Ok(())` for anything
    /// that should be acknowledged to the provider, including events we do
    /// not recognize; only infrastructure failures bubble up.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn handle_event(&self, event: GatewayEvent) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        if let Some(event_id) = &event.id {
            let ledger_row = webhook_event::ActiveModel {
                event_id: Set(event_id.clone()),
                event_type: Set(event.event_type.clone()),
                received_at: Set(Utc::now()),
            };
            match ledger_row.insert(&txn).await {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    info!(%event_id, "Webhook event already processed, acknowledging");
                    txn.rollback().await?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        match event.kind {
            GatewayEventKind::PaymentSucceeded {
                order_id,
                payment_intent_id,
            } => {
                self.apply_payment_succeeded(txn, order_id, payment_intent_id)
                    .await
            }
            GatewayEventKind::PaymentFailed { order_id } => {
                self.apply_payment_failed(txn, order_id).await
            }
            GatewayEventKind::Unrecognized => {
                info!(event_type = %event.event_type, "Unhandled webhook event type");
                txn.commit().await?;
                Ok(())
            }
        }
    }

    async fn apply_payment_succeeded(
        &self,
        txn: DatabaseTransaction,
        order_id: Option<Uuid>,
        payment_intent_id: Option<String>,
    ) -> Result<(), ServiceError> {
        let Some(order_id) = order_id else {
            // An event without our correlation metadata is not ours to act
            // on; failing here would only make the provider retry forever.
            warn!("Payment-succeeded event without orderId metadata");
            txn.commit().await?;
            return Ok(());
        };

        let Some(found) = Order::find_by_id(order_id).one(&txn).await? else {
            warn!(%order_id, "Payment-succeeded event for unknown order");
            txn.commit().await?;
            return Ok(());
        };

        // Only PENDING orders can settle. PAID means a replay; FAILED means
        // the failure branch already restored this order's stock, and
        // flipping it to PAID here would hand the customer inventory that
        // went back on the shelf. Out-of-order success events are
        // acknowledged and dropped.
        if found.payment_status != PaymentStatus::Pending {
            info!(
                order_number = %found.order_number,
                payment_status = ?found.payment_status,
                "Success event for an already settled order, no-op"
            );
            txn.commit().await?;
            return Ok(());
        }

        let mut active: order::ActiveModel = found.clone().into();
        active.payment_status = Set(PaymentStatus::Paid);
        if payment_intent_id.is_some() {
            active.stripe_payment_intent_id = Set(payment_intent_id);
        }
        let updated = active.update(&txn).await?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send(Event::PaymentSucceeded { order_id })
            .await;

        // First customer-facing confirmation for online orders, deliberately
        // deferred from checkout time to payment-confirmed time.
        dispatch_order_confirmation(
            self.notifier.clone(),
            OrderConfirmation::from_order(&updated, &items),
        );

        info!(order_number = %updated.order_number, "Payment completed");
        Ok(())
    }

    async fn apply_payment_failed(
        &self,
        txn: DatabaseTransaction,
        order_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let Some(order_id) = order_id else {
            warn!("Payment-failed event without orderId metadata");
            txn.commit().await?;
            return Ok(());
        };

        let Some(found) = Order::find_by_id(order_id).one(&txn).await? else {
            warn!(%order_id, "Payment-failed event for unknown order");
            txn.commit().await?;
            return Ok(());
        };

        // Stock was already restored the first time this order failed;
        // restoring again would inflate inventory.
        if found.payment_status == PaymentStatus::Failed {
            info!(order_number = %found.order_number, "Replayed failed event, stock already restored");
            txn.commit().await?;
            return Ok(());
        }

        let mut active: order::ActiveModel = found.clone().into();
        active.payment_status = Set(PaymentStatus::Failed);
        active.update(&txn).await?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        // Undo the reservation made at order creation, inside the same
        // transaction as the status flip so both commit or neither does.
        for item in &items {
            InventoryService::increment_stock(&txn, item.product_id, item.quantity).await?;
        }

        txn.commit().await?;

        self.event_sender.send(Event::PaymentFailed { order_id }).await;
        for item in &items {
            self.event_sender
                .send(Event::StockRestored {
                    order_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .await;
        }

        info!(order_number = %found.order_number, "Payment failed, stock restored");
        Ok(())
    }
}
