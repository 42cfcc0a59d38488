use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thetauvc::backend::{UvcBackend, UvcDevice};
use thetauvc::pipeline::{self, PipelineBuilder};
use thetauvc::sink::{FrameSink, RawFileSink};
use thetauvc::stream::{run_streaming, StopSignal, StreamOptions, StreamingStats};
use thetauvc::supervisor::{StreamSupervisor, SupervisorConfig};
use thetauvc::{find_device, list_devices, print_devices, ThetaConfig, ThetaError, ThetaMode};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "thetauvc")]
#[command(about = "Live streaming from Ricoh THETA V / Z1 cameras over USB")]
#[command(version)]
#[command(long_about = "Discovers Ricoh THETA cameras in live streaming mode, negotiates a \
UVC stream (3840x1920 or 1920x960 H.264 at 29.97fps) and hands the frames to a GStreamer \
pipeline or a raw H.264 file. Sessions are restarted when the camera goes away.")]
struct Args {
    /// TOML file layered under THETAUVC_* environment overrides
    #[arg(short, long, default_value = "thetauvc.toml")]
    config: String,

    /// Log device negotiation and per-session detail
    #[arg(short, long)]
    debug: bool,

    /// Log session starts, restarts and frame rates
    #[arg(short, long)]
    verbose: bool,

    /// Log only failures
    #[arg(short, long, conflicts_with_all = ["debug", "verbose"])]
    quiet: bool,

    /// Check the configuration, report the result and exit
    #[arg(long)]
    validate_config: bool,

    /// Write the built-in configuration as TOML to stdout and exit
    #[arg(long)]
    print_config: bool,

    /// Shape of the log lines written to stderr
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached THETA devices (default)
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Stream from a THETA to a GStreamer pipeline or a file
    Stream(StreamArgs),

    /// Print the fan-out pipeline built from the [fanout] section
    Pipeline,
}

#[derive(ClapArgs, Debug, Clone)]
struct StreamArgs {
    /// Device index as shown by `list` (overrides device.index)
    #[arg(long)]
    index: Option<usize>,

    /// uhd, fhd or a numeric mode index (overrides device.mode)
    #[arg(long)]
    mode: Option<ThetaMode>,

    /// GStreamer elements after the H.264 parser (overrides viewer.pipeline)
    #[arg(long, value_name = "DESC")]
    pipeline: Option<String>,

    /// Write the raw H.264 stream to this file instead of a pipeline
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Stop after the first session instead of restarting
    #[arg(long)]
    no_restart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting thetauvc v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = ThetaConfig::load_from_file(&args.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    match config.validate() {
        Ok(()) if args.validate_config => {
            info!("Configuration validation successful");
            println!("✓ Configuration is valid");
            return Ok(());
        }
        Ok(()) => {}
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    match args.command.unwrap_or(Command::List { json: false }) {
        Command::List { json } => list_command(json),
        Command::Pipeline => pipeline_command(&config),
        Command::Stream(stream_args) => stream_command(config, stream_args).await,
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let level = match (args.quiet, args.debug, args.verbose) {
        (true, _, _) => "error",
        (_, true, _) => "debug",
        (_, _, true) => "info",
        _ => "warn",
    };

    // RUST_LOG wins over the flags
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("thetauvc={}", level)));

    // stderr keeps `list --json` and `pipeline` output on stdout clean
    let fmt_layer = match args.log_format {
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(false)
            .with_thread_names(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .pretty()
            .with_thread_names(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

fn print_default_config() -> Result<()> {
    println!("# thetauvc configuration file");
    println!("# Every key is optional; THETAUVC_<SECTION>__<KEY> environment variables override it");
    println!();
    print!("{}", ThetaConfig::default().to_toml()?);
    Ok(())
}

fn print_listing<B: UvcBackend>(bus: &B, json: bool) -> thetauvc::Result<()> {
    if json {
        let devices = list_devices(bus)?;
        let rendered = serde_json::to_string_pretty(&devices)
            .map_err(|e| ThetaError::system(format!("JSON encoding failed: {}", e)))?;
        println!("{}", rendered);
    } else {
        print_devices(bus, &mut std::io::stdout().lock())?;
    }
    Ok(())
}

#[cfg(feature = "libuvc")]
fn list_command(json: bool) -> Result<()> {
    let bus = thetauvc::LibUvcBackend::new()?;
    print_listing(&bus, json)?;
    Ok(())
}

#[cfg(not(feature = "libuvc"))]
fn list_command(json: bool) -> Result<()> {
    warn!("Built without the libuvc feature; listing the simulated THETA");
    print_listing(&thetauvc::MockBackend::demo(), json)?;
    Ok(())
}

fn pipeline_command(config: &ThetaConfig) -> Result<()> {
    let fanout = PipelineBuilder::new(&config.fanout).build(chrono::Utc::now())?;
    for fifo in fanout.fifos() {
        info!("Pipeline writes JPEG frames to {}", fifo.display());
    }
    println!("{}{}", pipeline::VIEWER_PREFIX, fanout.description);
    Ok(())
}

/// Everything a blocking session needs, shared across restarts
struct SessionSettings {
    index: usize,
    mode: ThetaMode,
    options: StreamOptions,
    target: SinkTarget,
    sessions_started: AtomicU32,
}

enum SinkTarget {
    File(PathBuf),
    Viewer(String),
    Fanout(thetauvc::config::FanoutConfig),
}

/// The session's sink plus the first error it reported
struct SinkState {
    sink: Box<dyn FrameSink>,
    error: Option<ThetaError>,
}

async fn stream_command(config: ThetaConfig, args: StreamArgs) -> Result<()> {
    let target = match (&args.output, &args.pipeline) {
        (Some(path), _) => SinkTarget::File(path.clone()),
        (None, Some(desc)) => SinkTarget::Viewer(desc.clone()),
        (None, None) if config.fanout.enabled => SinkTarget::Fanout(config.fanout.clone()),
        (None, None) => SinkTarget::Viewer(config.viewer.pipeline.clone()),
    };

    let settings = Arc::new(SessionSettings {
        index: args.index.unwrap_or(config.device.index),
        mode: args.mode.unwrap_or(config.device.mode),
        options: config.stream_options(StopSignal::new()),
        target,
        sessions_started: AtomicU32::new(0),
    });

    let mut supervisor_config = SupervisorConfig::from(&config.stream);
    if args.no_restart {
        supervisor_config.restart_on_exit = false;
    }
    let supervisor = Arc::new(StreamSupervisor::new(supervisor_config));
    install_signal_handlers(Arc::clone(&supervisor));

    info!(
        "Streaming THETA #{} in mode {}",
        settings.index, settings.mode
    );

    let stats = supervisor
        .run(move |stop| stream_session(&settings, stop))
        .await?;

    info!(
        "Streaming finished: {} sessions, {} failures, {} frames",
        stats.sessions, stats.failures, stats.frames_received
    );

    match stats.last_error {
        Some(e) if !supervisor.is_stopped() && stats.failures == stats.sessions => {
            Err(anyhow::anyhow!(e))
        }
        _ => Ok(()),
    }
}

fn install_signal_handlers(supervisor: Arc<StreamSupervisor>) {
    #[cfg(unix)]
    {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM signal");
                        supervisor.stop();
                    }
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received SIGINT signal (Ctrl+C)");
            supervisor.stop();
        }
    });
}

/// One blocking session on a fresh USB context
#[cfg(feature = "libuvc")]
fn stream_session(settings: &SessionSettings, stop: StopSignal) -> thetauvc::Result<StreamingStats> {
    let bus = thetauvc::LibUvcBackend::new()?;
    stream_from(&bus, settings, stop)
}

#[cfg(not(feature = "libuvc"))]
fn stream_session(settings: &SessionSettings, stop: StopSignal) -> thetauvc::Result<StreamingStats> {
    warn!("Built without the libuvc feature; streaming from the simulated THETA");
    stream_from(&thetauvc::MockBackend::demo(), settings, stop)
}

fn stream_from<B: UvcBackend>(
    bus: &B,
    settings: &SessionSettings,
    stop: StopSignal,
) -> thetauvc::Result<StreamingStats> {
    let device = find_device(bus, settings.index)?;
    let first_session = settings.sessions_started.fetch_add(1, Ordering::SeqCst) == 0;
    let sink = open_sink(&settings.target, first_session)?;
    info!("Delivering frames to the {} sink", sink.name());

    let options = StreamOptions {
        stop,
        ..settings.options.clone()
    };

    deliver_frames(&device, settings.mode, sink, &options)
}

/// Stream `device` into `sink`, finishing the sink however the session ends.
///
/// A sink failure stops the session and is reported once the handle is closed.
fn deliver_frames<D: UvcDevice>(
    device: &D,
    mode: ThetaMode,
    sink: Box<dyn FrameSink>,
    options: &StreamOptions,
) -> thetauvc::Result<StreamingStats> {
    let mut state = SinkState { sink, error: None };
    let stop = options.stop.clone();

    let outcome = run_streaming(
        device,
        mode,
        |frame, state: &mut &mut SinkState| {
            if state.error.is_some() {
                return;
            }
            if let Err(e) = state.sink.consume(frame) {
                error!("Sink {} failed: {}", state.sink.name(), e);
                state.error = Some(e);
                stop.stop();
            }
        },
        &mut state,
        options,
    )
    .map(|report| report.stats);

    let finished = state.sink.finish();
    if let Err(e) = &finished {
        warn!("Sink {} did not finish cleanly: {}", state.sink.name(), e);
    }

    let stats = outcome?;
    match state.error {
        Some(e) => Err(e),
        None => finished.map(|()| stats),
    }
}

fn open_sink(target: &SinkTarget, first_session: bool) -> thetauvc::Result<Box<dyn FrameSink>> {
    match target {
        SinkTarget::File(path) if first_session => Ok(Box::new(RawFileSink::create(path)?)),
        SinkTarget::File(path) => Ok(Box::new(RawFileSink::append(path)?)),
        SinkTarget::Viewer(desc) => launch_viewer(desc),
        SinkTarget::Fanout(fanout) => {
            let built = PipelineBuilder::new(fanout).build(chrono::Utc::now())?;
            for fifo in built.fifos() {
                pipeline::ensure_fifo(fifo)?;
            }
            launch_viewer(&built.description)
        }
    }
}

#[cfg(all(feature = "viewer", target_os = "linux"))]
fn launch_viewer(desc: &str) -> thetauvc::Result<Box<dyn FrameSink>> {
    Ok(Box::new(thetauvc::viewer::GstViewerSink::launch(desc)?))
}

#[cfg(not(all(feature = "viewer", target_os = "linux")))]
fn launch_viewer(_desc: &str) -> thetauvc::Result<Box<dyn FrameSink>> {
    Err(ThetaError::component(
        "viewer",
        "built without GStreamer support; rebuild with --features viewer or use --output",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use thetauvc::{FrameData, MockDevice, ThetaModel, UvcError};

    /// Records frames and whether `finish` ran
    struct TrackingSink {
        frames: Arc<AtomicU32>,
        finished: Arc<AtomicBool>,
        fail_on: Option<u32>,
    }

    impl FrameSink for TrackingSink {
        fn name(&self) -> &str {
            "tracking"
        }

        fn consume(&mut self, _frame: &FrameData) -> thetauvc::Result<()> {
            let seen = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(seen) {
                return Err(ThetaError::component("tracking", "sink closed"));
            }
            Ok(())
        }

        fn finish(&mut self) -> thetauvc::Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tracking_sink(fail_on: Option<u32>) -> (Box<dyn FrameSink>, Arc<AtomicU32>, Arc<AtomicBool>) {
        let frames = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let sink = TrackingSink {
            frames: Arc::clone(&frames),
            finished: Arc::clone(&finished),
            fail_on,
        };
        (Box::new(sink), frames, finished)
    }

    fn idr() -> Vec<u8> {
        vec![0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00]
    }

    fn quick_options() -> StreamOptions {
        StreamOptions {
            watchdog_timeout: Duration::from_millis(300),
            stats_interval: Duration::ZERO,
            ..StreamOptions::default()
        }
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();

        let args = Args::try_parse_from([
            "thetauvc",
            "--log-format",
            "json",
            "stream",
            "--mode",
            "fhd",
            "--no-restart",
        ])
        .unwrap();
        assert_eq!(args.log_format, LogFormat::Json);
        match args.command {
            Some(Command::Stream(stream)) => {
                assert_eq!(stream.mode, Some(ThetaMode::Fhd2997));
                assert!(stream.no_restart);
            }
            other => panic!("expected stream command, got {:?}", other),
        }

        assert!(Args::try_parse_from(["thetauvc", "--log-format", "xml"]).is_err());
        assert!(Args::try_parse_from(["thetauvc", "--quiet", "--debug"]).is_err());
    }

    #[test]
    fn test_sink_finished_after_watchdog() {
        let device = MockDevice::theta(ThetaModel::V, "00105377")
            .with_frames(vec![idr()])
            .with_frame_interval(Duration::from_secs(30));
        let (sink, frames, finished) = tracking_sink(None);

        let result = deliver_frames(&device, ThetaMode::Uhd2997, sink, &quick_options());

        assert!(matches!(result, Err(ThetaError::Uvc(UvcError::Timeout))));
        assert_eq!(frames.load(Ordering::SeqCst), 1);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sink_failure_stops_session() {
        let device = MockDevice::theta(ThetaModel::Z1, "10010104")
            .with_frames(vec![idr()])
            .with_frame_interval(Duration::from_millis(5))
            .repeating();
        let (sink, frames, finished) = tracking_sink(Some(3));

        let result = deliver_frames(&device, ThetaMode::Fhd2997, sink, &quick_options());

        assert!(matches!(result, Err(ThetaError::Component { .. })));
        assert_eq!(frames.load(Ordering::SeqCst), 3);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_sink_finished_after_clean_end() {
        let device = MockDevice::theta(ThetaModel::V, "00105377").with_frames(vec![idr(), idr()]);
        let (sink, frames, finished) = tracking_sink(None);

        let stats = deliver_frames(&device, ThetaMode::Uhd2997, sink, &quick_options()).unwrap();

        assert_eq!(stats.frames_received, 2);
        assert_eq!(frames.load(Ordering::SeqCst), 2);
        assert!(finished.load(Ordering::SeqCst));
    }
}
