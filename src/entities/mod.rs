pub mod order;
pub mod order_item;
pub mod product;
pub mod webhook_event;

pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
pub use webhook_event::Entity as WebhookEvent;
