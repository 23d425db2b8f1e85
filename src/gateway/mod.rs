//! Gateway runtime and health surface

mod handler;
mod server;
mod status;

pub use handler::health_router;
pub use server::{Gateway, GatewayBuilder, APP_NAME};
pub use status::{GatewayRuntime, RuntimeStatus, StatusTracker};
