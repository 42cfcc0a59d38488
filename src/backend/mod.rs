//! USB video backends.
//!
//! libuvc objects borrow each other (context → device → handle → stream), so
//! the traits hand out borrowed values and keep a streaming session inside a
//! single blocking call.

#[cfg(feature = "libuvc")]
mod libuvc;
mod mock;

#[cfg(feature = "libuvc")]
pub use libuvc::{LibUvcBackend, LibUvcDevice, LibUvcHandle};
pub use mock::{MockBackend, MockDevice, MockHandle};

use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::stream::{FramePump, StreamControl, StreamFormat};

/// A USB bus as seen through libuvc
pub trait UvcBackend {
    type Device<'a>: UvcDevice
    where
        Self: 'a;

    /// Every UVC device currently attached, in bus order
    fn devices(&self) -> Result<Vec<Self::Device<'_>>>;
}

/// An attached, not yet opened UVC device
pub trait UvcDevice {
    type Handle<'h>: UvcDeviceHandle
    where
        Self: 'h;

    fn descriptor(&self) -> Result<DeviceDescriptor>;

    /// Open the device; the handle closes when dropped
    fn open(&self) -> Result<Self::Handle<'_>>;
}

/// An opened UVC device
pub trait UvcDeviceHandle {
    /// Match a requested format against the formats the device advertises
    fn negotiate(&self, requested: &StreamFormat) -> Result<StreamFormat>;

    /// Stream with the given control, feeding frames through `pump` until it
    /// stops or the device ends the stream
    fn stream(&mut self, control: &StreamControl, pump: &mut FramePump<'_>) -> Result<()>;
}
