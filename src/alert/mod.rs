//! Alerts: the durable record, per-zone cooldown and the coordinator that
//! turns intrusion events into persisted, recorded and notified alerts.

mod cooldown;
mod coordinator;
mod record;

pub use cooldown::CooldownTable;
pub use coordinator::{AlertCoordinator, SharedStore, SideEffect};
pub(crate) use record::epoch_ms;
pub use record::{from_epoch_ms, to_epoch_ms, AlertRecord, StoredAlert, HUMAN_INTRUSION};
