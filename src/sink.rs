use crate::error::{Result, ThetaError};
use crate::frame::FrameData;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Destination for frames coming out of a streaming session
pub trait FrameSink {
    fn name(&self) -> &str;

    fn consume(&mut self, frame: &FrameData) -> Result<()>;

    /// Flush and release resources once streaming has ended
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends the H.264 elementary stream to a file.
///
/// Frames before the first keyframe are skipped so the file starts decodable.
pub struct RawFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    started: bool,
    frames_written: u64,
    frames_skipped: u64,
}

impl RawFileSink {
    /// Start a new recording, truncating any existing file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path.as_ref(), false)
    }

    /// Continue an existing recording; each session restarts at a keyframe
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path.as_ref(), true)
    }

    fn open(path: &Path, append: bool) -> Result<Self> {
        let path = path.to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)?;
        info!("Recording raw H.264 stream to {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            started: false,
            frames_written: 0,
            frames_skipped: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }
}

impl FrameSink for RawFileSink {
    fn name(&self) -> &str {
        "raw_file"
    }

    fn consume(&mut self, frame: &FrameData) -> Result<()> {
        if !self.started {
            if !frame.is_keyframe() {
                self.frames_skipped += 1;
                return Ok(());
            }
            debug!(
                "First keyframe at sequence {} after skipping {} frames",
                frame.sequence, self.frames_skipped
            );
            self.started = true;
        }

        self.writer.write_all(&frame.data)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        info!(
            "Closed recording {} ({} frames written, {} skipped)",
            self.path.display(),
            self.frames_written,
            self.frames_skipped
        );
        Ok(())
    }
}

/// Hands frames to another thread through a bounded queue, dropping frames
/// when the consumer falls behind.
pub struct ChannelSink {
    tx: Sender<FrameData>,
    dropped: u64,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<FrameData>) {
        let (tx, rx) = channel::bounded(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn consume(&mut self, frame: &FrameData) -> Result<()> {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(ThetaError::component(
                "channel_sink",
                "frame consumer has gone away",
            )),
        }
    }
}
