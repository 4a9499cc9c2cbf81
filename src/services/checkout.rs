use crate::{
    config::AppConfig,
    entities::{
        order::{self, PaymentMethod},
        product::Entity as Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{dispatch_order_confirmation, Notifier, OrderConfirmation},
    services::{
        inventory::{InventoryService, StockDecrement},
        orders::{NewOrder, NewOrderItem, OrderService},
        payments::{CheckoutSessionRequest, CheckoutSessionRef, PaymentGateway, SessionLineItem},
    },
};
use sea_orm::{DatabaseConnection, EntityTrait, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Whole-sequence retries when the generated order number collides with a
/// concurrent checkout. Stock checks are redone from scratch on each attempt.
const CREATE_ORDER_ATTEMPTS: u32 = 3;

/// Client-submitted cart line. `price` is the price the client saw; it must
/// still match the live catalog price or the checkout is rejected.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    #[validate(length(min = 1, message = "Item name is required"))]
    pub name: String,
    pub slug: String,
    pub image: Option<String>,
    pub price: i64,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    pub phone: Option<String>,
    #[validate(length(min = 1, message = "Address line 1 is required"))]
    pub address_line1: String,
    pub address_line2: Option<String>,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
}

/// Checkout submission. The client-computed totals are accepted for drift
/// logging only; the server recomputes every figure from authoritative
/// prices and its own shipping/tax policy.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub items: Vec<CartLine>,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub subtotal: Option<i64>,
    #[serde(default)]
    pub shipping: Option<i64>,
    #[serde(default)]
    pub tax: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
}

/// Result of handing an online order off to the hosted payment page.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OnlineCheckout {
    pub session_id: String,
    pub session_url: String,
    pub order_id: Uuid,
    pub order_number: String,
}

/// Server-side shipping and tax policy, all in the smallest currency unit.
#[derive(Debug, Clone, Copy)]
pub struct TotalsPolicy {
    pub shipping_flat_cost: i64,
    pub free_shipping_threshold: i64,
    pub tax_rate_bps: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
}

impl TotalsPolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            shipping_flat_cost: cfg.shipping_flat_cost,
            free_shipping_threshold: cfg.free_shipping_threshold,
            tax_rate_bps: cfg.tax_rate_bps,
        }
    }

    /// Integer arithmetic throughout; `total == subtotal + shipping + tax`
    /// holds by construction.
    pub fn compute(&self, subtotal: i64) -> Totals {
        let shipping = if subtotal >= self.free_shipping_threshold {
            0
        } else {
            self.shipping_flat_cost
        };
        let tax = subtotal * self.tax_rate_bps / 10_000;
        Totals {
            subtotal,
            shipping,
            tax,
            total: subtotal + shipping + tax,
        }
    }
}

/// Turns a client-submitted cart into a durable, stock-consistent order.
///
/// Validation, order/item insertion and stock reservation run in one
/// transaction: either the order exists with its stock taken, or nothing
/// happened at all.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    orders: Arc<OrderService>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    notifier: Arc<dyn Notifier>,
    policy: TotalsPolicy,
    currency: String,
    app_url: String,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        orders: Arc<OrderService>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        notifier: Arc<dyn Notifier>,
        policy: TotalsPolicy,
        currency: String,
        app_url: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            orders,
            gateway,
            notifier,
            policy,
            currency,
            app_url,
        }
    }

    /// Client-input errors are rejected here, before any transaction starts.
    fn validate_request(&self, request: &CheckoutRequest) -> Result<(), ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::BadRequest("Cart is empty".to_string()));
        }
        request.validate()?;
        Ok(())
    }

    /// COD path: create the order, leave payment PENDING (settled physically
    /// on delivery) and send the confirmation right away, best-effort.
    #[instrument(skip(self, request))]
    pub async fn place_cod_order(
        &self,
        request: CheckoutRequest,
    ) -> Result<order::Model, ServiceError> {
        self.validate_request(&request)?;
        if request.payment_method.is_online() {
            return Err(ServiceError::BadRequest(
                "Online payment methods must use the checkout endpoint".to_string(),
            ));
        }

        let (placed, _) = self.create_order(&request).await?;

        if let Some((placed, items)) = self.orders.get_order_with_items(placed.id).await? {
            dispatch_order_confirmation(
                self.notifier.clone(),
                OrderConfirmation::from_order(&placed, &items),
            );
        }

        info!(order_number = %placed.order_number, "COD order placed");
        Ok(placed)
    }

    /// Online path: create the order with stock reserved, then hand off to
    /// the gateway's hosted page. Confirmation is deferred to the webhook;
    /// payment has not actually happened yet.
    #[instrument(skip(self, request))]
    pub async fn create_online_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<OnlineCheckout, ServiceError> {
        self.validate_request(&request)?;
        if !request.payment_method.is_online() {
            return Err(ServiceError::BadRequest(
                "COD orders should use the orders endpoint".to_string(),
            ));
        }
        let gateway = self.gateway.clone().ok_or_else(|| {
            ServiceError::PaymentGatewayError("Payment gateway is not configured".to_string())
        })?;

        let (placed, snapshots) = self.create_order(&request).await?;

        let session = self
            .checkout_session_for(gateway, &placed, &snapshots)
            .await?;
        self.orders
            .attach_checkout_session(placed.id, &session.id)
            .await?;

        self.event_sender
            .send(Event::CheckoutSessionCreated {
                order_id: placed.id,
                session_id: session.id.clone(),
            })
            .await;

        info!(order_number = %placed.order_number, session_id = %session.id, "Checkout session created");
        Ok(OnlineCheckout {
            session_id: session.id,
            session_url: session.url,
            order_id: placed.id,
            order_number: placed.order_number,
        })
    }

    async fn checkout_session_for(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        placed: &order::Model,
        snapshots: &[NewOrderItem],
    ) -> Result<CheckoutSessionRef, ServiceError> {
        gateway
            .create_checkout_session(CheckoutSessionRequest {
                order_id: placed.id,
                order_number: placed.order_number.clone(),
                customer_email: placed.customer_email.clone(),
                currency: self.currency.clone(),
                success_url: format!(
                    "{}/order-confirmation/{}?session_id={{CHECKOUT_SESSION_ID}}",
                    self.app_url, placed.id
                ),
                cancel_url: format!("{}/checkout?cancelled=true", self.app_url),
                line_items: snapshots
                    .iter()
                    .map(|s| SessionLineItem {
                        name: s.product_name.clone(),
                        price: s.price,
                        quantity: s.quantity,
                        image: s.product_image.clone(),
                    })
                    .collect(),
            })
            .await
    }

    /// Runs the atomic create, regenerating the order number and redoing the
    /// stock checks from scratch whenever the unique constraint fires.
    async fn create_order(
        &self,
        request: &CheckoutRequest,
    ) -> Result<(order::Model, Vec<NewOrderItem>), ServiceError> {
        for _ in 0..CREATE_ORDER_ATTEMPTS {
            let order_number = self.orders.generate_order_number().await?;
            match self.try_create(request, order_number).await {
                Err(ServiceError::DuplicateOrderNumber(number)) => {
                    warn!(%number, "Order number collided at insert, retrying checkout");
                    continue;
                }
                other => return other,
            }
        }
        Err(ServiceError::Conflict(
            "Could not allocate a unique order number, please retry".to_string(),
        ))
    }

    async fn try_create(
        &self,
        request: &CheckoutRequest,
        order_number: String,
    ) -> Result<(order::Model, Vec<NewOrderItem>), ServiceError> {
        // Dropping the transaction on any early return rolls everything
        // back: no stock mutated, no order row created.
        let txn = self.db.begin().await?;

        let mut snapshots = Vec::with_capacity(request.items.len());
        let mut subtotal: i64 = 0;

        for line in &request.items {
            let product = Product::find_by_id(line.product_id)
                .one(&txn)
                .await?
                .filter(|p| p.is_active)
                .ok_or_else(|| ServiceError::ProductUnavailable(line.name.clone()))?;

            if product.stock < line.quantity {
                return Err(ServiceError::InsufficientStock {
                    name: product.name,
                    available: product.stock,
                });
            }
            // Stale-price guard: the client completed checkout against a
            // price it cached; reject if the catalog moved since.
            if product.price != line.price {
                return Err(ServiceError::PriceChanged(product.name));
            }

            subtotal += product.price * i64::from(line.quantity);
            snapshots.push(NewOrderItem {
                product_id: product.id,
                product_name: product.name,
                product_slug: product.slug,
                product_image: product.image_url,
                price: product.price,
                quantity: line.quantity,
            });
        }

        let totals = self.policy.compute(subtotal);
        if let Some(client_total) = request.total {
            if client_total != totals.total {
                warn!(
                    client_total,
                    server_total = totals.total,
                    "Client-computed total drifted from server policy; using server figures"
                );
            }
        }

        let address = &request.shipping_address;
        let new_order = NewOrder {
            order_number,
            customer_name: address.full_name.clone(),
            customer_email: address.email.clone(),
            customer_phone: address.phone.clone(),
            shipping_address_line1: address.address_line1.clone(),
            shipping_address_line2: address.address_line2.clone(),
            shipping_city: address.city.clone(),
            shipping_state: address.state.clone(),
            shipping_postal_code: address.postal_code.clone(),
            shipping_country: address.country.clone(),
            subtotal: totals.subtotal,
            shipping_cost: totals.shipping,
            tax: totals.tax,
            total: totals.total,
            currency: self.currency.clone(),
            payment_method: request.payment_method,
        };

        let placed = self
            .orders
            .create_order_with_items(&txn, new_order, &snapshots)
            .await?;

        // Unconditional reservation: stock is taken at order-creation time,
        // not payment-confirmation time. The conditional decrement is the
        // storage-level backstop against a concurrent checkout that passed
        // the same pre-check.
        for snapshot in &snapshots {
            let outcome =
                InventoryService::decrement_stock(&txn, snapshot.product_id, snapshot.quantity)
                    .await?;
            if outcome == StockDecrement::Insufficient {
                let available = Product::find_by_id(snapshot.product_id)
                    .one(&txn)
                    .await?
                    .map(|p| p.stock)
                    .unwrap_or(0);
                return Err(ServiceError::InsufficientStock {
                    name: snapshot.product_name.clone(),
                    available,
                });
            }
        }

        txn.commit().await?;

        self.event_sender
            .send(Event::OrderCreated {
                order_id: placed.id,
                order_number: placed.order_number.clone(),
            })
            .await;

        Ok((placed, snapshots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TotalsPolicy {
        TotalsPolicy {
            shipping_flat_cost: 9900,
            free_shipping_threshold: 99900,
            tax_rate_bps: 1800,
        }
    }

    #[rstest::rstest]
    #[case::below_threshold(4998, 9900)]
    #[case::just_under(99899, 9900)]
    #[case::at_threshold(99900, 0)]
    #[case::above_threshold(250_000, 0)]
    fn shipping_charges_below_the_free_threshold(#[case] subtotal: i64, #[case] shipping: i64) {
        let totals = policy().compute(subtotal);
        assert_eq!(totals.shipping, shipping);
        assert_eq!(totals.tax, subtotal * 1800 / 10_000);
        assert_eq!(totals.total, totals.subtotal + totals.shipping + totals.tax);
    }

    #[test]
    fn tax_rounds_down_with_integer_arithmetic() {
        // 1 unit at 18% is 0 in minor units; no fractional drift ever.
        let totals = policy().compute(1);
        assert_eq!(totals.tax, 0);
        assert_eq!(totals.total, 1 + 9900);
    }
}
