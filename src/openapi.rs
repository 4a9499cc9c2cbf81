use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = "Checkout orchestration, stock reservation, and payment webhook reconciliation for a direct-to-consumer storefront."
    ),
    paths(
        crate::handlers::checkout::create_checkout,
        crate::handlers::checkout::create_cod_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::track_order,
        crate::handlers::orders::update_order,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::services::checkout::CartLine,
        crate::services::checkout::ShippingAddress,
        crate::services::checkout::CheckoutRequest,
        crate::handlers::checkout::CheckoutSessionResponse,
        crate::handlers::checkout::CreateOrderResponse,
        crate::handlers::orders::OrderDetailResponse,
        crate::handlers::orders::TrackOrderRequest,
        crate::handlers::orders::UpdateOrderRequest,
        crate::handlers::orders::UpdateOrderResponse,
        crate::entities::order::Model,
        crate::entities::order_item::Model,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentStatus,
        crate::entities::order::PaymentMethod,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "Checkout", description = "Cart to order conversion"),
        (name = "Orders", description = "Order retrieval"),
        (name = "Admin", description = "Back-office order management"),
        (name = "Payments", description = "Payment provider callbacks")
    )
)]
pub struct ApiDoc;
