pub mod adb;
pub mod driver;

pub use adb::AdbDriver;
pub use driver::{CommandOutput, DeviceDriver, DriverTimeouts, Readiness};
