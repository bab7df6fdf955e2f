pub mod booking;
pub mod capacity;
pub mod conflict;

pub use booking::{EventSink, SchedulingService};
