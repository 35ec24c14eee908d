#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod debounce;
pub mod devices;
pub mod event_log;
pub mod session;

pub use config::Config;
pub use config::LogLevel;
pub use devices::DeviceKey;
pub use devices::DeviceState;
pub use devices::DeviceStore;
pub use event_log::EventLog;
pub use event_log::LogCategory;
pub use event_log::LogEntry;
pub use session::SessionController;
pub use session::SessionHandle;
pub use session::SessionState;
