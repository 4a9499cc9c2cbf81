pub mod checkout;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod reconciliation;
