use super::control::get_stream_ctrl_format_size;
use super::stats::{RateReporter, StreamingStats};
use crate::backend::{UvcDevice, UvcDeviceHandle};
use crate::error::{Result, UvcError};
use crate::frame::FrameData;
use crate::mode::ThetaMode;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the pump wakes up to check the stop signal and the watchdog
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative stop flag shared between a streaming session and its owner
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block until stopped or `timeout` elapses; returns whether stopped
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock();
        if !*stopped {
            cvar.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

/// Knobs for a streaming session
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub stop: StopSignal,
    /// End the session with `Timeout` when no frame arrives for this long
    pub watchdog_timeout: Duration,
    /// Frame rate reporting period; zero disables the report
    pub stats_interval: Duration,
    /// Frames buffered between the transfer thread and the callback
    pub channel_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            stop: StopSignal::new(),
            watchdog_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(10),
            channel_capacity: 8,
        }
    }
}

/// Delivers frames received from a backend to the caller's callback on the
/// streaming thread.
pub struct FramePump<'a> {
    on_frame: &'a mut dyn FnMut(&FrameData),
    stop: StopSignal,
    watchdog_timeout: Duration,
    channel_capacity: usize,
    stats: StreamingStats,
    reporter: RateReporter,
}

impl<'a> FramePump<'a> {
    pub fn new(on_frame: &'a mut dyn FnMut(&FrameData), options: &StreamOptions) -> Self {
        Self {
            on_frame,
            stop: options.stop.clone(),
            watchdog_timeout: options.watchdog_timeout,
            channel_capacity: options.channel_capacity.max(1),
            stats: StreamingStats::default(),
            reporter: RateReporter::new(options.stats_interval),
        }
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn record_dropped_frames(&mut self, count: u64) {
        if count > 0 {
            warn!("{} frames dropped by the transfer thread", count);
        }
        self.stats.record_dropped_frames(count);
    }

    pub fn deliver(&mut self, frame: FrameData) {
        self.stats.update_frame_stats(&frame);
        self.reporter.record_frame();
        (self.on_frame)(&frame);

        if let Some(rate) = self.reporter.poll(Instant::now()) {
            info!(
                "Stream stats: {:.1} frames/s ({} frames, {} bytes total)",
                rate, self.stats.frames_received, self.stats.bytes_received
            );
        }
    }

    /// Drain `frames` until stopped, the sender side hangs up, or the
    /// watchdog fires.
    pub fn run(&mut self, frames: &Receiver<FrameData>) -> Result<()> {
        let mut last_frame = Instant::now();

        loop {
            if self.stop.is_stopped() {
                debug!("Stop requested, leaving frame pump");
                return Ok(());
            }

            match frames.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => {
                    last_frame = Instant::now();
                    self.deliver(frame);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if last_frame.elapsed() >= self.watchdog_timeout {
                        warn!(
                            "No frames received for {:?}; ending stream",
                            self.watchdog_timeout
                        );
                        return Err(UvcError::Timeout.into());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Device ended the stream");
                    return Ok(());
                }
            }
        }
    }

    pub fn into_stats(self) -> StreamingStats {
        self.stats
    }
}

/// Result of a completed streaming session
#[derive(Debug)]
pub struct StreamReport<U> {
    pub user_data: U,
    pub stats: StreamingStats,
}

/// Open `device`, negotiate `mode`, and stream until stopped.
///
/// `callback` runs once per frame on the calling thread with `user_data`;
/// the device handle is closed before this returns. `user_data` is dropped
/// when the session fails, so pass `&mut T` to keep state that must outlive
/// a timeout or transfer error.
pub fn run_streaming<D, F, U>(
    device: &D,
    mode: ThetaMode,
    mut callback: F,
    mut user_data: U,
    options: &StreamOptions,
) -> Result<StreamReport<U>>
where
    D: UvcDevice,
    F: FnMut(&FrameData, &mut U),
{
    match device.descriptor() {
        Ok(descriptor) => info!("Opening {} for {}", descriptor, mode),
        Err(e) => debug!("Device descriptor unavailable: {}", e),
    }

    let mut handle = device.open()?;
    let control = get_stream_ctrl_format_size(&handle, mode)?;

    info!("Starting stream: {}", control.format);

    let stats = {
        let mut on_frame = |frame: &FrameData| callback(frame, &mut user_data);
        let mut pump = FramePump::new(&mut on_frame, options);
        handle.stream(&control, &mut pump)?;
        pump.into_stats()
    };

    drop(handle);

    info!(
        "Stream finished: {} frames, {} dropped ({:.1}% delivered), {} bytes",
        stats.frames_received,
        stats.frames_dropped,
        stats.efficiency() * 100.0,
        stats.bytes_received
    );

    Ok(StreamReport { user_data, stats })
}
