use super::descriptor::{DeviceDescriptor, DeviceInfo};
use crate::backend::{UvcBackend, UvcDevice};
use crate::error::{Result, ThetaError, UvcError};
use std::io::Write;
use tracing::{debug, warn};

/// Attached THETA devices paired with their descriptors, in bus order
fn matching_devices<B: UvcBackend>(bus: &B) -> Result<Vec<(B::Device<'_>, DeviceDescriptor)>> {
    let mut matches = Vec::new();

    for device in bus.devices()? {
        let descriptor = match device.descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Skipping device with unreadable descriptor: {}", e);
                continue;
            }
        };

        if descriptor.is_theta() {
            debug!("Found THETA device: {}", descriptor);
            matches.push((device, descriptor));
        } else {
            debug!(
                "Ignoring USB device {:04x}:{:04x}",
                descriptor.vendor_id, descriptor.product_id
            );
        }
    }

    Ok(matches)
}

/// Every attached THETA in live streaming mode.
///
/// Fails with `NoDevice` when nothing matches.
pub fn find_devices<B: UvcBackend>(bus: &B) -> Result<Vec<B::Device<'_>>> {
    let devices: Vec<_> = matching_devices(bus)?
        .into_iter()
        .map(|(device, _)| device)
        .collect();

    if devices.is_empty() {
        return Err(UvcError::NoDevice.into());
    }

    Ok(devices)
}

/// The `index`-th (0-based) attached THETA
pub fn find_device<B: UvcBackend>(bus: &B, index: usize) -> Result<B::Device<'_>> {
    let devices = find_devices(bus)?;
    let count = devices.len();

    devices.into_iter().nth(index).ok_or_else(|| {
        warn!("THETA index {} requested but only {} attached", index, count);
        ThetaError::Uvc(UvcError::NoDevice)
    })
}

/// Descriptors of the attached THETAs, empty when none are attached
pub fn list_devices<B: UvcBackend>(bus: &B) -> Result<Vec<DeviceInfo>> {
    Ok(matching_devices(bus)?
        .into_iter()
        .enumerate()
        .map(|(index, (_, descriptor))| DeviceInfo {
            index,
            model: descriptor.model(),
            descriptor,
        })
        .collect())
}

/// Write a numbered table of attached THETAs to `out`
pub fn print_devices<B: UvcBackend, W: Write>(bus: &B, out: &mut W) -> Result<()> {
    let devices = list_devices(bus)?;

    writeln!(out, "No : {:<18} : {:<10}", "Product", "Serial")?;
    for info in &devices {
        writeln!(
            out,
            "{:2} : {:<18} : {:<10}",
            info.index,
            info.descriptor.product.as_deref().unwrap_or(""),
            info.descriptor.serial_number.as_deref().unwrap_or(""),
        )?;
    }
    out.flush()?;

    Ok(())
}
