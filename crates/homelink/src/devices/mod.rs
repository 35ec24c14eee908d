mod state;
mod store;
mod table;

pub use state::DeviceState;
pub use state::SensorReadings;
pub use state::SensorValue;
pub use state::StateChange;
pub use store::DeviceStore;
pub use table::DeviceKey;
pub use table::DeviceKind;
pub use table::SensorKey;
