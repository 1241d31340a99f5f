//! Control surface: the line protocol, its socket server and the event bus
//! feeding subscribed clients.

pub mod events;
pub mod protocol;
pub mod server;

pub use events::{DaemonEvent, EventBus, EventClass};
pub use protocol::{parse_request, ControlError, Request};
pub use server::{ControlContext, ControlServer, ControlSettings};
