// Device catalog: point-in-time snapshots of the server's device population

pub mod builder;
pub mod types;

pub use builder::build;
pub use types::DeviceRecord;
