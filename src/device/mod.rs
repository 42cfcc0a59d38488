mod descriptor;
mod discovery;
#[cfg(test)]
mod tests;

pub use descriptor::{DeviceDescriptor, DeviceInfo, ThetaModel, RICOH_VENDOR_ID};
pub use discovery::{find_device, find_devices, list_devices, print_devices};
