#![deny(clippy::all)]

mod deadline;
mod sync;

pub use deadline::Deadline;
pub use sync::mutex_lock_or_recover;
