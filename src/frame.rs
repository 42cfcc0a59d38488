use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Payload format of frames delivered by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// H.264 access units in Annex B byte-stream form
    H264,
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// Anything libuvc could not classify
    Unknown,
}

impl FrameFormat {
    /// GStreamer caps describing this format, when one exists
    pub fn caps(&self) -> Option<&'static str> {
        match self {
            FrameFormat::H264 => Some("video/x-h264,stream-format=byte-stream,alignment=au"),
            FrameFormat::Mjpeg => Some("image/jpeg"),
            FrameFormat::Unknown => None,
        }
    }
}

/// H.264 NAL unit type for a coded slice of an IDR picture
const NAL_TYPE_IDR: u8 = 5;
/// H.264 NAL unit type for a sequence parameter set
const NAL_TYPE_SPS: u8 = 7;

/// Frame data structure containing raw frame data and metadata
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Frame sequence number within a streaming session
    pub sequence: u64,
    /// Timestamp when the frame was received from libuvc
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        sequence: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// NAL unit types found in an Annex B H.264 payload, in stream order
    pub fn nal_unit_types(&self) -> Vec<u8> {
        if self.format != FrameFormat::H264 {
            return Vec::new();
        }

        let data = self.data.as_slice();
        let mut types = Vec::new();
        let mut i = 0;

        while i + 3 < data.len() {
            if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
                types.push(data[i + 3] & 0x1f);
                i += 3;
            } else {
                i += 1;
            }
        }

        types
    }

    /// True when the frame can start a decodable stream (IDR slice or SPS)
    pub fn is_keyframe(&self) -> bool {
        self.nal_unit_types()
            .iter()
            .any(|&t| t == NAL_TYPE_IDR || t == NAL_TYPE_SPS)
    }
}
