use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use depthplay::cli::Args;
use depthplay::core::player_events::{AlertEvent, FrameReadyEvent, LoadingProgressEvent, ReadyEvent};
use depthplay::core::{PlaybackState, StreamId};
use depthplay::paths::{self, PathConfig};
use depthplay::synthetic::SyntheticSource;
use depthplay::{EventBus, PlaybackController, PlayerConfig, downcast_event};

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::data_file("depthplay.log", path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if args.log_file.is_some() {
        paths::ensure_dirs(&path_config)?;
    }
    init_logging(&args, &path_config)?;

    info!("depthplay {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let mut config = PlayerConfig::load(&path_config)?;
    if let Some(window) = args.prefetch {
        config.prefetch_window = window;
    }
    debug!("Config: {:?}", config);

    let bus = EventBus::new();
    let rendered = Arc::new(AtomicUsize::new(0));
    {
        let rendered = Arc::clone(&rendered);
        bus.subscribe::<FrameReadyEvent, _>(move |e| {
            rendered.fetch_add(1, Ordering::Relaxed);
            log::trace!(
                "Frame {}/{}: depth {}x{}, color {} bytes",
                e.index,
                e.total_frames,
                e.depth.width(),
                e.depth.height(),
                e.color.byte_len()
            );
        });
    }

    let controller = PlaybackController::new(&config, bus.clone())?;
    let source = SyntheticSource {
        width: args.width,
        height: args.height,
        fail_at: args.fail_at,
        decode_delay: (args.decode_ms > 0).then(|| Duration::from_millis(args.decode_ms)),
        ..SyntheticSource::new(args.frames, args.fps)
    };
    let timeline = controller
        .open(&source, &args.file_path)
        .with_context(|| format!("Failed to open {}", args.file_path.display()))?;
    let last = timeline.last_valid_frame();

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut last_reported = -1i32;
    loop {
        for event in bus.poll() {
            if let Some(LoadingProgressEvent(fraction)) = downcast_event::<LoadingProgressEvent>(&event) {
                let percent = (fraction * 100.0) as i32;
                if percent / 10 != last_reported / 10 {
                    info!("Loading... {}%", percent);
                    last_reported = percent;
                }
            } else if let Some(ready) = downcast_event::<ReadyEvent>(&event) {
                info!("Ready: {} frames @ {} fps", ready.total_frames, ready.fps);
            } else if let Some(AlertEvent(message)) = downcast_event::<AlertEvent>(&event) {
                warn!("{}", message);
            }
        }

        let finished = controller.state() == PlaybackState::Paused && controller.current_frame() == Some(last);
        if finished {
            info!("Reached end of recording");
            break;
        }
        if Instant::now() >= deadline {
            info!("Time limit reached at {}", controller.position_label());
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let depth = controller.cache(StreamId::Depth);
    let color = controller.cache(StreamId::Color);
    println!(
        "{}: {} frames delivered, position {}, cache hit rate depth {:.1}% / color {:.1}%",
        args.file_path.display(),
        rendered.load(Ordering::Relaxed),
        controller.position_label(),
        depth.stats().hit_rate() * 100.0,
        color.stats().hit_rate() * 100.0
    );
    Ok(())
}
