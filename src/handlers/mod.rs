pub mod checkout;
pub mod orders;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    events::EventSender,
    notifications::Notifier,
    services::{
        checkout::{CheckoutService, TotalsPolicy},
        inventory::InventoryService,
        orders::OrderService,
        payments::{PaymentGateway, WebhookVerifier},
        reconciliation::PaymentReconciliationService,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Aggregated services shared by all HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub inventory: Arc<InventoryService>,
    pub reconciliation: Arc<PaymentReconciliationService>,
    pub webhook_verifier: Option<Arc<WebhookVerifier>>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        event_sender: EventSender,
        gateway: Option<Arc<dyn PaymentGateway>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            config.order_number_prefix.clone(),
        ));
        let inventory = Arc::new(InventoryService::new(db.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            orders.clone(),
            gateway,
            notifier.clone(),
            TotalsPolicy::from_config(config),
            config.currency.clone(),
            config.app_url.clone(),
        ));
        let reconciliation = Arc::new(PaymentReconciliationService::new(
            db,
            event_sender,
            notifier,
        ));
        let webhook_verifier = config.stripe_webhook_secret.clone().map(|secret| {
            Arc::new(WebhookVerifier::new(
                secret,
                config.stripe_webhook_tolerance_secs,
            ))
        });

        Self {
            orders,
            checkout,
            inventory,
            reconciliation,
            webhook_verifier,
        }
    }
}
