pub mod api;
pub mod config;
pub mod hub;
pub mod lifecycle;
pub mod metrics;

pub use config::ServerConfig;
pub use hub::{HubHandle, NotificationHub, Session};
pub use lifecycle::LifecycleManager;
pub use metrics::Metrics;
