use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, value_parser};
use log::{info, warn};
use serialcast::config::{PartialRunConfig, RunConfig, app_name, app_version};
use serialcast::decoder::{FfmpegSource, MediaSource};
use serialcast::pipeline::PipelineCoordinator;
use serialcast::sink::{FrameDumpSink, OutputSink, open_output};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::{panic, process};

fn cli() -> Command {
    Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .short('i')
                .long("input-media")
                .value_name("FILE")
                .help("Media file to transmit.")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output-device")
                .value_name("DEVICE")
                .help("Serial device (configured beforehand, e.g. with stty), or - for stdout.")
                .required(true),
        )
        .arg(
            Arg::new("threshold")
                .short('a')
                .long("audio-fft-threshold")
                .value_name("MAGNITUDE")
                .help("Lowest spectral magnitude reported as a tone.")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("baudrate")
                .short('b')
                .long("baudrate")
                .value_name("BAUD")
                .help("Line speed of the device, used to warn when packets cannot keep up.")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("framerate")
                .long("framerate")
                .value_name("FPS")
                .help("Packet rate; defaults to the frame rate of the input.")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .help("Display width.")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .help("Display height, a multiple of 8.")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("frame-bytes")
                .long("frame-bytes")
                .value_name("BYTES")
                .help("Bitmap bytes per packet.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("audio-bytes")
                .long("audio-bytes")
                .value_name("BYTES")
                .help("Tone bytes per packet.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("max-sink-failures")
                .long("max-sink-failures")
                .value_name("COUNT")
                .help("Consecutive failed writes tolerated before giving up.")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON run configuration; command line options take precedence.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("dump-frame")
                .long("dump-frame")
                .value_name("FILE")
                .help("Save the first dithered frame as a PBM image.")
                .value_parser(value_parser!(PathBuf)),
        )
}

fn cli_overrides(matches: &ArgMatches) -> PartialRunConfig {
    PartialRunConfig {
        video_out_width: matches.get_one::<u32>("width").copied(),
        video_out_height: matches.get_one::<u32>("height").copied(),
        spectral_threshold: matches.get_one::<f64>("threshold").copied(),
        framerate: matches.get_one::<f64>("framerate").copied(),
        video_frame_byte_count: matches.get_one::<usize>("frame-bytes").copied(),
        audio_byte_count: matches.get_one::<usize>("audio-bytes").copied(),
        baudrate: matches.get_one::<u32>("baudrate").copied(),
        max_sink_failures: matches.get_one::<u32>("max-sink-failures").copied(),
        capacities: None,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    let overrides = match matches.get_one::<PathBuf>("config") {
        Some(path) => PartialRunConfig::from_file(path)?.merge(cli_overrides(&matches)),
        None => cli_overrides(&matches),
    };

    let input = matches
        .get_one::<PathBuf>("input")
        .context("input media not given")?;
    let source = FfmpegSource::open(input, overrides.framerate)
        .with_context(|| format!("cannot open {}", input.display()))?;
    let info = source.info();

    let config = overrides.apply(RunConfig::new(info.framerate, 0.0));
    config.validate()?;
    if config.baudrate.is_none() {
        info!(
            "Transmission needs {:.0} baud on an 8N1 line",
            config.required_line_rate()
        );
    }

    let output = matches
        .get_one::<String>("output")
        .context("output device not given")?;
    let sink = open_output(output).with_context(|| format!("cannot open {}", output))?;
    let sink: Box<dyn OutputSink> = match matches.get_one::<PathBuf>("dump-frame") {
        Some(path) => Box::new(FrameDumpSink::new(
            sink,
            path.clone(),
            config.video_out_width,
            config.video_out_height,
        )),
        None => sink,
    };

    let coordinator = PipelineCoordinator::new(&config, source, sink)?;

    // first signal drains what is queued, a second one stops at once
    let stop = coordinator.stop_handle();
    let signals = AtomicU32::new(0);
    ctrlc::set_handler(move || {
        if signals.fetch_add(1, Ordering::SeqCst) == 0 {
            warn!("Stopping after queued packets, interrupt again to abort");
            stop.request_stop();
        } else {
            warn!("Aborting");
            stop.abort();
        }
    })
    .context("unable to set the Ctrl-C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("unable to start the runtime")?;
    let report = runtime.block_on(coordinator.run())?;

    info!("Transmission finished: {}", report);
    Ok(())
}
