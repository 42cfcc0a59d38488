pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod mode;
pub mod pipeline;
pub mod sink;
pub mod stream;
pub mod supervisor;

#[cfg(all(feature = "viewer", target_os = "linux"))]
pub mod viewer;

pub use backend::{MockBackend, MockDevice, UvcBackend, UvcDevice, UvcDeviceHandle};
#[cfg(feature = "libuvc")]
pub use backend::LibUvcBackend;
pub use config::ThetaConfig;
pub use device::{
    find_device, find_devices, list_devices, print_devices, DeviceDescriptor, DeviceInfo,
    ThetaModel,
};
pub use error::{PipelineError, Result, ThetaError, UvcError};
pub use frame::{FrameData, FrameFormat};
pub use mode::ThetaMode;
pub use pipeline::{ensure_fifo, FanoutPipeline, PipelineBuilder};
pub use sink::{ChannelSink, FrameSink, RawFileSink};
pub use stream::{
    get_stream_ctrl_format_size, run_streaming, StopSignal, StreamControl, StreamOptions,
    StreamReport, StreamingStats,
};
pub use supervisor::{StreamSupervisor, SupervisorConfig, SupervisorStats};

#[cfg(all(feature = "viewer", target_os = "linux"))]
pub use viewer::GstViewerSink;
