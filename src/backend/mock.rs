use super::{UvcBackend, UvcDevice, UvcDeviceHandle};
use crate::device::{DeviceDescriptor, ThetaModel};
use crate::error::{Result, UvcError};
use crate::frame::{FrameData, FrameFormat};
use crate::stream::{FramePump, StopSignal, StreamControl, StreamFormat};
use crossbeam::channel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

/// Frame interval the THETA advertises for its 29.97 fps modes (100ns units)
const THETA_FRAME_INTERVAL: u32 = 333_667;

/// In-memory USB bus for running without libuvc or real hardware
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    devices: Vec<MockDevice>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// A single simulated THETA V streaming synthetic H.264 at ~30 fps
    pub fn demo() -> Self {
        Self::new().with_device(
            MockDevice::theta(ThetaModel::V, "00105377")
                .with_frames(synthetic_gop(30))
                .with_frame_interval(Duration::from_millis(33))
                .repeating(),
        )
    }
}

impl UvcBackend for MockBackend {
    type Device<'a> = MockDevice;

    fn devices(&self) -> Result<Vec<MockDevice>> {
        Ok(self.devices.clone())
    }
}

/// Scripted device: advertised formats, frames to emit and failures to inject
#[derive(Debug, Clone)]
pub struct MockDevice {
    descriptor: DeviceDescriptor,
    formats: Vec<StreamFormat>,
    frames: Vec<Vec<u8>>,
    frame_interval: Option<Duration>,
    repeat: bool,
    descriptor_error: Option<UvcError>,
    open_error: Option<UvcError>,
    negotiate_error: Option<UvcError>,
    stream_error: Option<UvcError>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockDevice {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            formats: Vec::new(),
            frames: Vec::new(),
            frame_interval: None,
            repeat: false,
            descriptor_error: None,
            open_error: None,
            negotiate_error: None,
            stream_error: None,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A THETA advertising both H.264 live streaming modes
    pub fn theta(model: ThetaModel, serial: &str) -> Self {
        let descriptor = DeviceDescriptor {
            vendor_id: crate::device::RICOH_VENDOR_ID,
            product_id: model.product_id(),
            serial_number: Some(serial.to_string()),
            manufacturer: Some("RICOH".to_string()),
            product: Some(model.name().to_string()),
        };

        Self::new(descriptor)
            .with_format(StreamFormat::from_interval(
                FrameFormat::H264,
                3840,
                1920,
                THETA_FRAME_INTERVAL,
            ))
            .with_format(StreamFormat::from_interval(
                FrameFormat::H264,
                1920,
                960,
                THETA_FRAME_INTERVAL,
            ))
    }

    pub fn with_format(mut self, format: StreamFormat) -> Self {
        self.formats.push(format);
        self
    }

    pub fn with_frames(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Loop over the scripted frames until stopped
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn failing_descriptor(mut self, error: UvcError) -> Self {
        self.descriptor_error = Some(error);
        self
    }

    pub fn failing_open(mut self, error: UvcError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Reject stream negotiation with `error` whatever the requested format
    pub fn failing_negotiate(mut self, error: UvcError) -> Self {
        self.negotiate_error = Some(error);
        self
    }

    /// Fail after the scripted frames are delivered
    pub fn failing_stream(mut self, error: UvcError) -> Self {
        self.stream_error = Some(error);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl UvcDevice for MockDevice {
    type Handle<'h> = MockHandle<'h>;

    fn descriptor(&self) -> Result<DeviceDescriptor> {
        match self.descriptor_error {
            Some(error) => Err(error.into()),
            None => Ok(self.descriptor.clone()),
        }
    }

    fn open(&self) -> Result<MockHandle<'_>> {
        if let Some(error) = self.open_error {
            return Err(error.into());
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!("Mock device {} opened", self.descriptor);
        Ok(MockHandle { device: self })
    }
}

pub struct MockHandle<'h> {
    device: &'h MockDevice,
}

impl UvcDeviceHandle for MockHandle<'_> {
    fn negotiate(&self, requested: &StreamFormat) -> Result<StreamFormat> {
        if let Some(error) = self.device.negotiate_error {
            return Err(error.into());
        }

        self.device
            .formats
            .iter()
            .find(|advertised| advertised.satisfies(requested))
            .copied()
            .ok_or_else(|| UvcError::InvalidMode.into())
    }

    fn stream(&mut self, control: &StreamControl, pump: &mut FramePump<'_>) -> Result<()> {
        let device = self.device;
        let format = control.format;
        // Set once the pump returns, whatever the reason
        let finished = StopSignal::new();
        let producer_finished = finished.clone();
        let (tx, rx) = channel::bounded::<FrameData>(pump.channel_capacity());

        info!("Mock stream started: {}", format);

        // The producer thread stands in for libuvc's transfer thread
        std::thread::scope(|scope| {
            scope.spawn(move || {
                let mut sequence = 0u64;
                'produce: loop {
                    for payload in &device.frames {
                        if producer_finished.is_stopped() {
                            break 'produce;
                        }

                        let frame = FrameData::new(
                            sequence,
                            SystemTime::now(),
                            payload.clone(),
                            format.width,
                            format.height,
                            format.format,
                        );
                        trace!("Mock frame {} ({} bytes)", sequence, payload.len());
                        sequence += 1;

                        if tx.send(frame).is_err() {
                            break 'produce;
                        }

                        if let Some(interval) = device.frame_interval {
                            if producer_finished.wait_timeout(interval) {
                                break 'produce;
                            }
                        }
                    }

                    if !device.repeat || device.frames.is_empty() {
                        break;
                    }
                }
            });

            let result = pump.run(&rx);
            finished.stop();
            drop(rx);
            result
        })?;

        match self.device.stream_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

impl Drop for MockHandle<'_> {
    fn drop(&mut self) {
        self.device.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// One group of pictures: an SPS/PPS/IDR access unit followed by P slices
fn synthetic_gop(length: usize) -> Vec<Vec<u8>> {
    let mut frames = Vec::with_capacity(length);
    frames.push(vec![
        0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x33, // SPS
        0x00, 0x00, 0x00, 0x01, 0x68, 0xee, 0x3c, 0x80, // PPS
        0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, // IDR slice
    ]);
    for i in 1..length {
        frames.push(vec![0x00, 0x00, 0x00, 0x01, 0x41, 0x9a, i as u8, 0x00]);
    }
    frames
}
