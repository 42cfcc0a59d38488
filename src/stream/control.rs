use crate::backend::UvcDeviceHandle;
use crate::error::Result;
use crate::frame::FrameFormat;
use crate::mode::ThetaMode;
use std::fmt;
use tracing::debug;

/// UVC frame intervals are expressed in 100ns units
const INTERVAL_UNITS_PER_SECOND: u32 = 10_000_000;

/// A format/resolution/rate triple as advertised or requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamFormat {
    pub fn new(format: FrameFormat, width: u32, height: u32, fps: u32) -> Self {
        Self {
            format,
            width,
            height,
            fps,
        }
    }

    /// Build from a UVC frame interval, rounding the rate down like libuvc
    pub fn from_interval(format: FrameFormat, width: u32, height: u32, interval: u32) -> Self {
        let fps = if interval == 0 {
            0
        } else {
            INTERVAL_UNITS_PER_SECOND / interval
        };
        Self::new(format, width, height, fps)
    }

    /// The H.264 format a THETA streams in the given mode
    pub fn for_mode(mode: ThetaMode) -> Self {
        let spec = mode.spec();
        Self::new(FrameFormat::H264, spec.width, spec.height, spec.fps)
    }

    pub fn satisfies(&self, requested: &StreamFormat) -> bool {
        self.format == requested.format
            && self.width == requested.width
            && self.height == requested.height
            && self.fps == requested.fps
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}x{} @ {}fps",
            self.format, self.width, self.height, self.fps
        )
    }
}

/// Negotiated stream configuration used to start a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamControl {
    pub mode: ThetaMode,
    pub format: StreamFormat,
}

/// Negotiate the stream control for `mode` against an opened device.
///
/// Fails with [`UvcError::InvalidMode`](crate::error::UvcError::InvalidMode)
/// when the device does not advertise the mode's format.
pub fn get_stream_ctrl_format_size<H>(handle: &H, mode: ThetaMode) -> Result<StreamControl>
where
    H: UvcDeviceHandle + ?Sized,
{
    let requested = StreamFormat::for_mode(mode);
    debug!("Negotiating stream format {} for mode {}", requested, mode.as_str());

    let format = handle.negotiate(&requested)?;
    debug!("Negotiated stream control: {}", format);

    Ok(StreamControl { mode, format })
}
