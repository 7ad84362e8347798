#![deny(clippy::all)]

pub mod error;
mod pty;
mod registry;

pub use error::PtyError;
pub use pty::GroupSignal;
pub use pty::PtyHandle;
pub use registry::TransportClaim;
pub use registry::TransportRegistry;

pub type Result<T> = std::result::Result<T, PtyError>;
