//! Multi-subscription radio-resource lifecycle coordination
//!
//! Several SIM-backed subscriptions share one device; exactly one of them,
//! the active-data-subscription, may carry packet data at a time. Each
//! subscription runs an independent pair of actors (a data-connection
//! tracker and a service-state tracker) with ordered mailboxes; the
//! [`coordinator::Coordinator`] is the only component that routes between
//! them. External collaborators (modem transport, card records, carrier
//! store, broadcast sink) sit behind traits with in-process simulation
//! doubles in [`sim`].

pub mod carrier;
pub mod coordinator;
pub mod dct;
pub mod icc;
pub mod notify;
pub mod phone;
pub mod radio;
pub mod registry;
pub mod sim;
pub mod sst;
pub mod tasks;

pub use coordinator::{Coordinator, DdsSelector, Services};
pub use phone::PhoneFacade;
pub use registry::SubscriptionRegistry;
