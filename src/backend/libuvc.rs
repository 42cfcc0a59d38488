use super::{UvcBackend, UvcDevice, UvcDeviceHandle};
use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::frame::{FrameData, FrameFormat};
use crate::stream::{FramePump, StreamControl, StreamFormat};
use crossbeam::channel::{self, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// libuvc context owning the underlying libusb session
pub struct LibUvcBackend<'ctx> {
    context: uvc::Context<'ctx>,
}

impl<'ctx> LibUvcBackend<'ctx> {
    pub fn new() -> Result<Self> {
        let context = uvc::Context::new()?;
        debug!("libuvc context initialized");
        Ok(Self { context })
    }
}

impl<'ctx> UvcBackend for LibUvcBackend<'ctx> {
    type Device<'a> = LibUvcDevice<'a>
    where
        Self: 'a;

    fn devices(&self) -> Result<Vec<LibUvcDevice<'_>>> {
        let devices = self.context.devices()?;
        Ok(devices.map(|device| LibUvcDevice { device }).collect())
    }
}

pub struct LibUvcDevice<'a> {
    device: uvc::Device<'a>,
}

impl<'a> UvcDevice for LibUvcDevice<'a> {
    type Handle<'h> = LibUvcHandle<'h>
    where
        Self: 'h;

    fn descriptor(&self) -> Result<DeviceDescriptor> {
        let description = self.device.description()?;
        Ok(DeviceDescriptor {
            vendor_id: description.vendor_id,
            product_id: description.product_id,
            serial_number: description.serial_number,
            manufacturer: description.manufacturer,
            product: description.product,
        })
    }

    fn open(&self) -> Result<LibUvcHandle<'_>> {
        let handle = self.device.open()?;
        debug!(
            "Opened UVC device on bus {:03} address {:03}",
            self.device.bus_number(),
            self.device.device_address()
        );
        Ok(LibUvcHandle { handle })
    }
}

pub struct LibUvcHandle<'h> {
    handle: uvc::DeviceHandle<'h>,
}

impl LibUvcHandle<'_> {
    /// THETA streams are H.264; libuvc only needs to match size and rate
    fn uvc_format(format: FrameFormat) -> uvc::FrameFormat {
        match format {
            FrameFormat::Mjpeg => uvc::FrameFormat::MJPEG,
            FrameFormat::H264 | FrameFormat::Unknown => uvc::FrameFormat::Any,
        }
    }
}

/// State moved onto libuvc's transfer thread
struct FrameForwarder {
    tx: Sender<FrameData>,
    format: StreamFormat,
    sequence: AtomicU64,
    dropped: AtomicU64,
}

impl FrameForwarder {
    fn forward(&self, frame: &uvc::Frame) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let data = FrameData::new(
            sequence,
            SystemTime::now(),
            frame.to_bytes().to_vec(),
            frame.width(),
            frame.height(),
            self.format.format,
        );

        trace!("libuvc frame {} ({} bytes)", sequence, data.len());

        // Never block the transfer thread; a full queue drops the frame
        match self.tx.try_send(data) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl UvcDeviceHandle for LibUvcHandle<'_> {
    fn negotiate(&self, requested: &StreamFormat) -> Result<StreamFormat> {
        self.handle
            .get_stream_handle_with_format_size_and_fps(
                Self::uvc_format(requested.format),
                requested.width,
                requested.height,
                requested.fps,
            )
            .map(|_| *requested)
            .map_err(|e| {
                debug!("Device rejected {}: {}", requested, e);
                e.into()
            })
    }

    fn stream(&mut self, control: &StreamControl, pump: &mut FramePump<'_>) -> Result<()> {
        let format = control.format;
        let mut stream_handle = self.handle.get_stream_handle_with_format_size_and_fps(
            Self::uvc_format(format.format),
            format.width,
            format.height,
            format.fps,
        )?;

        let (tx, rx) = channel::bounded(pump.channel_capacity());
        let forwarder = std::sync::Arc::new(FrameForwarder {
            tx,
            format,
            sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let active = stream_handle.start_stream(
            |frame: &uvc::Frame, forwarder: &mut std::sync::Arc<FrameForwarder>| {
                forwarder.forward(frame)
            },
            std::sync::Arc::clone(&forwarder),
        )?;

        info!("libuvc streaming started: {}", format);

        let result = pump.run(&rx);

        active.stop();
        drop(rx);

        pump.record_dropped_frames(forwarder.dropped.load(Ordering::Relaxed));

        match &result {
            Ok(()) => info!("libuvc streaming stopped"),
            Err(e) => warn!("libuvc streaming ended with error: {}", e),
        }

        result
    }
}
