mod device;
mod driver;
mod service;

pub use device::DeviceType;
pub use driver::{CsiCamera, DriverError, DriverSettings};
pub use service::ModuleService;
