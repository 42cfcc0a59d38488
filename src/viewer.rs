//! Live H.264 playback through a GStreamer pipeline fed from an `appsrc`.

use crate::error::{PipelineError, Result, ThetaError};
use crate::frame::{FrameData, FrameFormat};
use crate::pipeline::VIEWER_PREFIX;
use crate::sink::FrameSink;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSrc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// How long `finish` waits for the pipeline to drain after EOS
const EOS_TIMEOUT_SECONDS: u64 = 5;

/// Full launch description for a user supplied tail such as
/// `decodebin ! autovideosink sync=false`
pub fn viewer_description(pipeline: &str) -> String {
    format!("{}{}", VIEWER_PREFIX, pipeline.trim())
}

/// Presentation time of `timestamp` relative to the first frame of the session
fn relative_pts(base: SystemTime, timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(base)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

fn gst_error(details: String) -> ThetaError {
    PipelineError::Gstreamer { details }.into()
}

pub struct GstViewerSink {
    pipeline: Pipeline,
    appsrc: AppSrc,
    base_time: Option<SystemTime>,
    frames_pushed: u64,
    finished: bool,
}

impl GstViewerSink {
    /// Parse `pipeline` behind the appsrc/h264parse prefix and start playing
    pub fn launch(pipeline: &str) -> Result<Self> {
        gstreamer::init().map_err(|e| gst_error(format!("Failed to initialize GStreamer: {}", e)))?;

        let description = viewer_description(pipeline);
        info!("Creating viewer pipeline");
        debug!("Pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| gst_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| gst_error("Failed to downcast to Pipeline".to_string()))?;

        let appsrc = pipeline
            .by_name("ap")
            .ok_or_else(|| gst_error("Failed to get appsrc element".to_string()))?
            .downcast::<AppSrc>()
            .map_err(|_| gst_error("Failed to downcast to AppSrc".to_string()))?;

        if let Some(caps) = FrameFormat::H264.caps() {
            let caps = caps
                .parse::<gstreamer::Caps>()
                .map_err(|e| gst_error(format!("Invalid caps {}: {}", caps, e)))?;
            appsrc.set_caps(Some(&caps));
        }
        appsrc.set_property("format", gstreamer::Format::Time);
        appsrc.set_property("is-live", true);

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| gst_error(format!("Failed to start pipeline: {}", e)))?;

        info!("Viewer pipeline playing");

        Ok(Self {
            pipeline,
            appsrc,
            base_time: None,
            frames_pushed: 0,
            finished: false,
        })
    }

    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed
    }

    /// Surface errors posted on the bus since the last call
    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };

        while let Some(msg) = bus.pop_filtered(&[gstreamer::MessageType::Error]) {
            if let gstreamer::MessageView::Error(err) = msg.view() {
                let details = format!(
                    "{} ({})",
                    err.error(),
                    err.debug().unwrap_or_default()
                );
                error!("Viewer pipeline error: {}", details);
                return Err(gst_error(details));
            }
        }

        Ok(())
    }
}

impl FrameSink for GstViewerSink {
    fn name(&self) -> &str {
        "gst_viewer"
    }

    fn consume(&mut self, frame: &FrameData) -> Result<()> {
        self.check_bus()?;

        let base = *self.base_time.get_or_insert(frame.timestamp);

        let mut buffer = gstreamer::Buffer::with_size(frame.len())
            .map_err(|e| gst_error(format!("Failed to create buffer: {}", e)))?;
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| gst_error("Buffer is not writable".to_string()))?;
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(relative_pts(
                base,
                frame.timestamp,
            )));
            let mut map = buffer_ref
                .map_writable()
                .map_err(|e| gst_error(format!("Failed to map buffer: {}", e)))?;
            map.copy_from_slice(&frame.data);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| gst_error(format!("Failed to push buffer: {:?}", e)))?;

        self.frames_pushed += 1;
        if self.frames_pushed % 300 == 0 {
            debug!("Viewer received {} frames", self.frames_pushed);
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if let Err(e) = self.appsrc.end_of_stream() {
            warn!("Failed to signal EOS: {:?}", e);
        } else if let Some(bus) = self.pipeline.bus() {
            for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS)) {
                match msg.view() {
                    gstreamer::MessageView::Eos(..) => break,
                    gstreamer::MessageView::Error(err) => {
                        warn!("Viewer error while draining: {}", err.error());
                        break;
                    }
                    _ => {}
                }
            }
        }

        self.pipeline
            .set_state(gstreamer::State::Null)
            .map_err(|e| gst_error(format!("Failed to stop pipeline: {}", e)))?;

        info!("Viewer stopped after {} frames", self.frames_pushed);
        Ok(())
    }
}

impl Drop for GstViewerSink {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.pipeline.set_state(gstreamer::State::Null);
        }
    }
}
