//! Persistent record types for the accrual pipeline.

pub mod accrual;
pub mod event;
pub mod value_config;

pub use accrual::{Accrual, Multiplier};
pub use event::{EventId, SupportEvent};
pub use value_config::{ValueEntry, ValuePatch};
