#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod applier;
pub mod catalog;
pub mod command;
pub mod currency;
pub mod entities;
pub mod events;
pub mod ingress;
pub mod multiplier;
pub mod notifier;
pub mod queue;
pub mod reconnect;
pub mod settings;
pub mod store;
pub mod values;
