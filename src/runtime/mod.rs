mod error;
mod event;
mod realtime;
pub mod transport;

pub use error::{RuntimeError, TransportError};
pub use event::{ClientEvent, EventKind, RealtimeEvent, Subscription};
pub use realtime::RealtimeClient;
pub use transport::TransportKind;
