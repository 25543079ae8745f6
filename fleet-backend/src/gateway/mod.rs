pub mod actix_ws;
pub mod events;
pub mod protocol;
pub mod pump;

pub use events::EventBroadcaster;
pub use protocol::GatewayEvent;
pub use pump::{EventPump, PumpHandle, TaskLogger};
