use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus, PaymentMethod, PaymentStatus},
        order_item::{self, Entity as OrderItem},
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Attempts with a 5-digit suffix before widening to 7 digits.
const ORDER_NUMBER_ATTEMPTS: u32 = 8;
/// Attempts with the widened suffix before giving up outright.
const ORDER_NUMBER_WIDENED_ATTEMPTS: u32 = 8;

/// Fields for a new order row, computed by the checkout orchestrator.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub shipping_address_line1: String,
    pub shipping_address_line2: Option<String>,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_postal_code: String,
    pub shipping_country: String,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub tax: i64,
    pub total: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
}

/// Line-item snapshot captured at order creation.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_slug: String,
    pub product_image: Option<String>,
    pub price: i64,
    pub quantity: i32,
}

/// Partial update applied by admin status changes.
#[derive(Debug, Clone, Default)]
pub struct OrderStatusUpdate {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub tracking_number: Option<String>,
}

/// Durable storage for orders and their item snapshots, plus the
/// human-readable order-number generator.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    order_number_prefix: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        order_number_prefix: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            order_number_prefix,
        }
    }

    /// Produces a free order number of the form `PREFIX-YYYYMMDD-XXXXX`.
    ///
    /// Collision odds per attempt are ~1/90000, so the loop almost never
    /// iterates; after a fixed number of attempts the random suffix widens to
    /// 7 digits rather than spinning forever. The unique constraint on
    /// `orders.order_number` remains the final backstop against two callers
    /// generating the same number in the same tick.
    #[instrument(skip(self))]
    pub async fn generate_order_number(&self) -> Result<String, ServiceError> {
        let date = Utc::now().format("%Y%m%d");

        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let suffix: u32 = rand::thread_rng().gen_range(10_000..=99_999);
            let candidate = format!("{}-{}-{}", self.order_number_prefix, date, suffix);
            if !self.order_number_exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        warn!("Order number space unusually dense; widening random suffix");
        for _ in 0..ORDER_NUMBER_WIDENED_ATTEMPTS {
            let suffix: u32 = rand::thread_rng().gen_range(1_000_000..=9_999_999);
            let candidate = format!("{}-{}-{}", self.order_number_prefix, date, suffix);
            if !self.order_number_exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        Err(ServiceError::InternalError(
            "Unable to allocate a unique order number".to_string(),
        ))
    }

    pub async fn order_number_exists(&self, order_number: &str) -> Result<bool, ServiceError> {
        let count = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    /// Inserts the order row and all item snapshots on the given connection,
    /// which is expected to be the checkout transaction. A unique-constraint
    /// collision on the order number surfaces as
    /// [`ServiceError::DuplicateOrderNumber`] so the caller can regenerate
    /// and retry the whole create.
    pub async fn create_order_with_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        new_order: NewOrder,
        items: &[NewOrderItem],
    ) -> Result<order::Model, ServiceError> {
        let order_id = Uuid::new_v4();
        let order_number = new_order.order_number.clone();

        let model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(new_order.order_number),
            customer_name: Set(new_order.customer_name),
            customer_email: Set(new_order.customer_email),
            customer_phone: Set(new_order.customer_phone),
            shipping_address_line1: Set(new_order.shipping_address_line1.clone()),
            shipping_address_line2: Set(new_order.shipping_address_line2.clone()),
            shipping_city: Set(new_order.shipping_city.clone()),
            shipping_state: Set(new_order.shipping_state.clone()),
            shipping_postal_code: Set(new_order.shipping_postal_code.clone()),
            shipping_country: Set(new_order.shipping_country.clone()),
            // Billing mirrors shipping until the storefront collects both.
            billing_address_line1: Set(new_order.shipping_address_line1),
            billing_address_line2: Set(new_order.shipping_address_line2),
            billing_city: Set(new_order.shipping_city),
            billing_state: Set(new_order.shipping_state),
            billing_postal_code: Set(new_order.shipping_postal_code),
            billing_country: Set(new_order.shipping_country),
            subtotal: Set(new_order.subtotal),
            shipping_cost: Set(new_order.shipping_cost),
            tax: Set(new_order.tax),
            total: Set(new_order.total),
            currency: Set(new_order.currency),
            payment_method: Set(new_order.payment_method),
            payment_status: Set(PaymentStatus::Pending),
            status: Set(OrderStatus::Pending),
            stripe_session_id: Set(None),
            stripe_payment_intent_id: Set(None),
            tracking_number: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            ..Default::default()
        };

        let inserted = model.insert(conn).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::DuplicateOrderNumber(order_number.clone())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        for item in items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                product_slug: Set(item.product_slug.clone()),
                product_image: Set(item.product_image.clone()),
                price: Set(item.price),
                quantity: Set(item.quantity),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }

        Ok(inserted)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(Order::find_by_id(id).one(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_order_with_items(
        &self,
        id: Uuid,
    ) -> Result<Option<(order::Model, Vec<order_item::Model>)>, ServiceError> {
        let Some(found) = Order::find_by_id(id).one(&*self.db).await? else {
            return Ok(None);
        };
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(Some((found, items)))
    }

    /// Applies an admin status update. Lifecycle timestamps are set exactly
    /// once, the first time the corresponding state is reached; re-applying
    /// the same status never overwrites them. REFUNDED is only reachable
    /// from PAID.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        id: Uuid,
        update: OrderStatusUpdate,
    ) -> Result<order::Model, ServiceError> {
        let existing = Order::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

        let old_status = existing.status;
        let mut active: order::ActiveModel = existing.clone().into();

        if let Some(status) = update.status {
            active.status = Set(status);
            let now = Utc::now();
            match status {
                OrderStatus::Shipped if existing.shipped_at.is_none() => {
                    active.shipped_at = Set(Some(now));
                }
                OrderStatus::Delivered if existing.delivered_at.is_none() => {
                    active.delivered_at = Set(Some(now));
                }
                OrderStatus::Cancelled if existing.cancelled_at.is_none() => {
                    active.cancelled_at = Set(Some(now));
                }
                _ => {}
            }
        }

        if let Some(payment_status) = update.payment_status {
            // PENDING -> PAID | FAILED, PAID -> REFUNDED. Re-applying the
            // current status is an allowed no-op; everything else is a
            // back-office mistake, not a correction.
            let allowed = payment_status == existing.payment_status
                || matches!(
                    (existing.payment_status, payment_status),
                    (PaymentStatus::Pending, PaymentStatus::Paid)
                        | (PaymentStatus::Pending, PaymentStatus::Failed)
                        | (PaymentStatus::Paid, PaymentStatus::Refunded)
                );
            if !allowed {
                return Err(ServiceError::InvalidOperation(format!(
                    "Cannot change payment status from {:?} to {:?}",
                    existing.payment_status, payment_status
                )));
            }
            active.payment_status = Set(payment_status);
        }

        if let Some(tracking) = update.tracking_number {
            active.tracking_number = Set(if tracking.is_empty() {
                None
            } else {
                Some(tracking)
            });
        }

        let updated = active.update(&*self.db).await?;

        if old_status != updated.status {
            self.event_sender
                .send(Event::OrderStatusChanged {
                    order_id: id,
                    old_status: format!("{:?}", old_status),
                    new_status: format!("{:?}", updated.status),
                })
                .await;
            info!(order_number = %updated.order_number, ?old_status, new_status = ?updated.status, "Order status updated");
        }

        Ok(updated)
    }

    /// Self-service order lookup by number plus the email it was placed
    /// under. Both must match; a near-miss is indistinguishable from an
    /// unknown order so the endpoint cannot be used to probe for emails.
    #[instrument(skip(self, customer_email))]
    pub async fn track_order(
        &self,
        order_number: &str,
        customer_email: &str,
    ) -> Result<Option<(order::Model, Vec<order_item::Model>)>, ServiceError> {
        let Some(found) = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };
        if !found.customer_email.eq_ignore_ascii_case(customer_email) {
            return Ok(None);
        }
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(found.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(Some((found, items)))
    }

    /// Records the gateway checkout-session id after the session is created.
    pub async fn attach_checkout_session(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<(), ServiceError> {
        let existing = Order::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
        let mut active: order::ActiveModel = existing.into();
        active.stripe_session_id = Set(Some(session_id.to_string()));
        active.update(&*self.db).await?;
        Ok(())
    }
}

/// Parses an order number back into its segments. Used by tests and
/// diagnostics; generation lives in [`OrderService::generate_order_number`].
pub fn parse_order_number(value: &str) -> Option<(&str, DateTime<Utc>, u32)> {
    let mut parts = value.splitn(3, '-');
    let prefix = parts.next()?;
    let date_part = parts.next()?;
    let suffix = parts.next()?.parse().ok()?;
    if date_part.len() != 8 {
        return None;
    }
    let date = chrono::NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some((prefix, midnight.and_utc(), suffix))
}
