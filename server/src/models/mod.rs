pub mod event;
pub mod hold;
pub mod order;
pub mod payment;
pub mod ticket;
pub mod ticket_type;
pub mod webhook_event;

pub use event::Event;
pub use hold::{Hold, HoldItem, HoldStatus, HoldWithItems};
pub use order::Order;
pub use payment::{Payment, PaymentDraft, PaymentStatus, ProviderKind};
pub use ticket::{Ticket, TicketStatus};
pub use ticket_type::TicketType;
pub use webhook_event::WebhookEvent;
