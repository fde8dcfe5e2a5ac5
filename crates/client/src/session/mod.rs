//! Session lifecycle management.
//!
//! This module tracks sessions known to this process and drives them through
//! creation, connection, disconnection and deletion.

pub mod controller;
pub mod record;

pub use controller::{Attachment, ControllerConfig, LifecycleError, SessionController};
pub use record::{unix_now, ActivityClock, SessionRecord};
