pub mod checkout;
pub mod order_status;
pub mod orders;
pub mod payment_intents;
pub mod pricing;
pub mod reconciliation;
pub mod signatures;
pub mod stock_ledger;
