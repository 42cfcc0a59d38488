//! GStreamer pipeline descriptions for fanning a THETA stream out to JPEG
//! fifos, with an optional raw recording branch.

use crate::config::FanoutConfig;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Leaky queue holding at most half a second of buffers
pub const QUEUE: &str = "queue leaky=downstream max-size-time=500000000";

/// Elements the viewer places in front of every user pipeline
pub const VIEWER_PREFIX: &str = "appsrc name=ap ! queue ! h264parse ! queue ! ";

/// A fully assembled pipeline and the files it writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutPipeline {
    pub description: String,
    pub original_pipe: PathBuf,
    pub low_pipe: PathBuf,
    pub recording: Option<PathBuf>,
}

impl FanoutPipeline {
    pub fn fifos(&self) -> [&Path; 2] {
        [&self.original_pipe, &self.low_pipe]
    }
}

/// Device keys end up in file names, so only `[A-Za-z0-9_]` is allowed
pub fn validate_key(key: &str) -> std::result::Result<(), PipelineError> {
    let valid = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidKey {
            key: key.to_string(),
        })
    }
}

pub struct PipelineBuilder<'a> {
    config: &'a FanoutConfig,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(config: &'a FanoutConfig) -> Self {
        Self { config }
    }

    pub fn pipe_path(&self, quality: &str) -> PathBuf {
        Path::new(&self.config.pipe_dir).join(format!("pipe-{}-{}", self.config.key, quality))
    }

    fn to_pipe(pipe: &Path) -> String {
        format!(
            " ! jpegenc ! {} ! filesink location=\"{}\"",
            QUEUE,
            pipe.display()
        )
    }

    fn crop(&self) -> String {
        if self.config.crop_top > 0 || self.config.crop_bottom > 0 {
            format!(
                " ! videocrop top={} bottom={}",
                self.config.crop_top, self.config.crop_bottom
            )
        } else {
            String::new()
        }
    }

    /// Dimensions of the half-resolution branch, odd sizes rounded up
    pub fn low_resolution(&self) -> (u32, u32) {
        let crop = self.config.crop_top.saturating_add(self.config.crop_bottom);
        let cropped = self.config.height.saturating_sub(crop);
        (half_rounded(self.config.width), half_rounded(cropped))
    }

    /// Recording file for a stream started at `now`
    pub fn record_filename(&self, dir: &Path, now: DateTime<Utc>) -> PathBuf {
        dir.join(format!(
            "{}-{}.mkv",
            self.config.key,
            now.format("%Y-%m-%d-%H-%M-%S")
        ))
    }

    fn record_branch(&self, now: DateTime<Utc>) -> Option<(String, PathBuf)> {
        let dir = Path::new(self.config.record_path.as_deref()?);

        if !dir.is_dir() {
            warn!("Invalid recording directory {}", dir.display());
            return None;
        }

        let filename = self.record_filename(dir, now);
        info!("Recording raw H.264 stream to {}", filename.display());

        let branch = format!(
            "tee name=stream ! {q} ! matroskamux streamable=true ! {q} ! filesink location=\"{}\" stream. ! ",
            filename.display(),
            q = QUEUE
        );
        Some((branch, filename))
    }

    /// Assemble the decode/crop/fan-out pipeline for a session starting at `now`
    pub fn build(&self, now: DateTime<Utc>) -> std::result::Result<FanoutPipeline, PipelineError> {
        validate_key(&self.config.key)?;

        match self.config.crop_top.checked_add(self.config.crop_bottom) {
            Some(crop) if crop < self.config.height => {}
            _ => {
                return Err(PipelineError::InvalidCrop {
                    crop: self.config.crop_top.saturating_add(self.config.crop_bottom),
                    height: self.config.height,
                });
            }
        }

        if !Path::new(&self.config.pipe_dir).is_dir() {
            return Err(PipelineError::PipeDirectory {
                path: self.config.pipe_dir.clone(),
            });
        }

        let original_pipe = self.pipe_path("original");
        let low_pipe = self.pipe_path("low");
        let (low_width, low_height) = self.low_resolution();

        let (record, recording) = match self.record_branch(now) {
            Some((branch, path)) => (branch, Some(path)),
            None => (String::new(), None),
        };

        let description = format!(
            "{record}decodebin{crop} ! tee name=low ! {q}{original} low. ! {q} ! videoscale ! video/x-raw,width={w},height={h}{low}",
            record = record,
            crop = self.crop(),
            q = QUEUE,
            original = Self::to_pipe(&original_pipe),
            w = low_width,
            h = low_height,
            low = Self::to_pipe(&low_pipe),
        );

        Ok(FanoutPipeline {
            description,
            original_pipe,
            low_pipe,
            recording,
        })
    }
}

fn half_rounded(value: u32) -> u32 {
    value / 2 + value % 2
}

/// Create a named pipe at `path` unless something already exists there
#[cfg(unix)]
pub fn ensure_fifo(path: &Path) -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    if path.exists() {
        info!("fifo already exists: {}", path.display());
        return Ok(());
    }

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "fifo path contains a NUL byte",
        )
    })?;

    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    info!("fifo created: {}", path.display());
    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_fifo(path: &Path) -> Result<()> {
    Err(crate::error::ThetaError::system(format!(
        "named pipes are not supported on this platform ({})",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fanout_config(pipe_dir: &Path) -> FanoutConfig {
        FanoutConfig {
            enabled: true,
            key: "theta".to_string(),
            width: 3840,
            height: 1920,
            crop_top: 0,
            crop_bottom: 0,
            pipe_dir: pipe_dir.to_string_lossy().to_string(),
            record_path: None,
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 17, 8, 30, 15).unwrap()
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("theta_1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("theta-1").is_err());
        assert!(validate_key("../etc").is_err());
    }

    #[test]
    fn test_basic_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let config = fanout_config(temp_dir.path());
        let pipeline = PipelineBuilder::new(&config).build(fixed_time()).unwrap();

        let original = temp_dir.path().join("pipe-theta-original");
        let low = temp_dir.path().join("pipe-theta-low");
        let expected = format!(
            "decodebin ! tee name=low ! {q} ! jpegenc ! {q} ! filesink location=\"{}\" low. ! {q} ! videoscale ! video/x-raw,width=1920,height=960 ! jpegenc ! {q} ! filesink location=\"{}\"",
            original.display(),
            low.display(),
            q = QUEUE
        );

        assert_eq!(pipeline.description, expected);
        assert_eq!(pipeline.original_pipe, original);
        assert_eq!(pipeline.low_pipe, low);
        assert!(pipeline.recording.is_none());
    }

    #[test]
    fn test_crop_and_rounding() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = fanout_config(temp_dir.path());
        config.width = 1921;
        config.height = 960;
        config.crop_top = 101;
        config.crop_bottom = 0;

        let builder = PipelineBuilder::new(&config);
        assert_eq!(builder.low_resolution(), (961, 430));

        let pipeline = builder.build(fixed_time()).unwrap();
        assert!(pipeline
            .description
            .starts_with("decodebin ! videocrop top=101 bottom=0 ! tee name=low"));
        assert!(pipeline
            .description
            .contains("video/x-raw,width=961,height=430"));
    }

    #[test]
    fn test_invalid_crop() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = fanout_config(temp_dir.path());
        config.crop_top = 1000;
        config.crop_bottom = 920;

        let result = PipelineBuilder::new(&config).build(fixed_time());
        assert_eq!(
            result,
            Err(PipelineError::InvalidCrop {
                crop: 1920,
                height: 1920
            })
        );
    }

    #[test]
    fn test_crop_overflow() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = fanout_config(temp_dir.path());
        config.crop_top = u32::MAX;
        config.crop_bottom = 1;

        let builder = PipelineBuilder::new(&config);
        assert_eq!(builder.low_resolution(), (1920, 0));
        assert_eq!(
            builder.build(fixed_time()),
            Err(PipelineError::InvalidCrop {
                crop: u32::MAX,
                height: 1920
            })
        );
    }

    #[test]
    fn test_low_resolution_at_width_limit() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = fanout_config(temp_dir.path());
        config.width = u32::MAX;

        assert_eq!(
            PipelineBuilder::new(&config).low_resolution(),
            (2_147_483_648, 960)
        );
    }

    #[test]
    fn test_missing_pipe_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = fanout_config(&temp_dir.path().join("missing"));

        let result = PipelineBuilder::new(&config).build(fixed_time());
        assert!(matches!(result, Err(PipelineError::PipeDirectory { .. })));
    }

    #[test]
    fn test_record_branch() {
        let temp_dir = TempDir::new().unwrap();
        let record_dir = temp_dir.path().join("records");
        std::fs::create_dir(&record_dir).unwrap();

        let mut config = fanout_config(temp_dir.path());
        config.record_path = Some(record_dir.to_string_lossy().to_string());

        let pipeline = PipelineBuilder::new(&config).build(fixed_time()).unwrap();
        let recording = record_dir.join("theta-2023-05-17-08-30-15.mkv");

        assert_eq!(pipeline.recording.as_ref(), Some(&recording));
        assert!(pipeline.description.starts_with(&format!(
            "tee name=stream ! {q} ! matroskamux streamable=true ! {q} ! filesink location=\"{}\" stream. ! decodebin",
            recording.display(),
            q = QUEUE
        )));
    }

    #[test]
    fn test_missing_record_dir_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = fanout_config(temp_dir.path());
        config.record_path = Some(temp_dir.path().join("nope").to_string_lossy().to_string());

        let pipeline = PipelineBuilder::new(&config).build(fixed_time()).unwrap();
        assert!(pipeline.recording.is_none());
        assert!(pipeline.description.starts_with("decodebin"));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_fifo() {
        use std::os::unix::fs::FileTypeExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pipe-theta-low");

        ensure_fifo(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());

        // Second call reuses the existing node
        ensure_fifo(&path).unwrap();
    }
}
