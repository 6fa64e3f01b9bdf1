//! Six-times-daily mood check-in schedule: slot definitions, per-day
//! completion state, and the manager that reconciles it with the remote store.

pub mod clock;
pub mod daily;
pub mod manager;
pub mod slots;

pub use daily::{DueSlots, Progress};
pub use manager::{MoodScheduleManager, ScheduleConfig, ScheduleSnapshot};
pub use slots::{MissedSlotPolicy, SlotDefinition, SlotKey, SlotState};
