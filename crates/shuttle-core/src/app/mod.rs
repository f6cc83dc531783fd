//! App - components built on top of the ports.
//!
//! - **listener**: dispatch loop turning `receive` into push delivery

pub mod listener;

pub use self::listener::{Delivery, DispatchLoop, DispatchSettings, deliver};
