mod control;
mod session;
mod stats;

pub use control::{get_stream_ctrl_format_size, StreamControl, StreamFormat};
pub use session::{run_streaming, FramePump, StopSignal, StreamOptions, StreamReport};
pub use stats::{RateReporter, StreamingStats};
