//! Reservation and settlement workflows. Every function that changes
//! inventory runs in a transaction and locks rows in the same order:
//! the hold, then its ticket types by ascending id, then the payment.

pub mod checkin;
pub mod holds;
pub mod inventory;
pub mod payments;
pub mod qr;
pub mod settlement;
pub mod webhooks;

pub use checkin::{check_in, check_in_payload};
pub use holds::{create_or_reuse_hold, get_hold, release_hold, HoldRequest, HoldSettings};
pub use inventory::{availability, run_expiry_sweep, sweep_expired_holds};
pub use payments::{prepare_for_hold, reconcile_payment, BuyerDetails, PaymentOutcome};
pub use qr::QrSigner;
pub use settlement::{finalize_paid_hold, Settlement, SettlementRequest};
pub use webhooks::{process_notification, process_webhook, WebhookOutcome};
