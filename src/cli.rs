use clap::Parser;
use std::path::PathBuf;

/// Headless player for depth + color recordings.
///
/// Plays a generated recording through the playback core and logs what a
/// display would receive.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Name reported for the recording (no file is read)
    #[arg(value_name = "FILE", default_value = "synthetic.oni")]
    pub file_path: PathBuf,

    /// Frames in the generated recording
    #[arg(long = "frames", value_name = "N", default_value_t = 300)]
    pub frames: usize,

    /// Nominal frame rate
    #[arg(long = "fps", value_name = "FPS", default_value_t = 30)]
    pub fps: u32,

    /// Frame width
    #[arg(long = "width", value_name = "W", default_value_t = 64)]
    pub width: usize,

    /// Frame height
    #[arg(long = "height", value_name = "H", default_value_t = 48)]
    pub height: usize,

    /// Inject a depth read failure at this frame
    #[arg(long = "fail-at", value_name = "N")]
    pub fail_at: Option<usize>,

    /// Simulated decode cost per frame (ms)
    #[arg(long = "decode-ms", value_name = "MS", default_value_t = 0)]
    pub decode_ms: u64,

    /// Stop after this many seconds even if playback continues
    #[arg(long = "seconds", value_name = "S", default_value_t = 60)]
    pub seconds: u64,

    /// Frames to read ahead per cache fill (overrides config)
    #[arg(long = "prefetch", value_name = "N")]
    pub prefetch: Option<usize>,

    /// Enable logging to file (default: depthplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["depthplay"]);
        assert_eq!(args.frames, 300);
        assert_eq!(args.fps, 30);
        assert!(args.log_file.is_none());
        assert_eq!(args.verbosity, 0);
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from(["depthplay", "rec.oni", "--frames", "90", "-vv", "--log", "--fail-at", "7"]);
        assert_eq!(args.file_path, PathBuf::from("rec.oni"));
        assert_eq!(args.frames, 90);
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.log_file, Some(None));
        assert_eq!(args.fail_at, Some(7));
    }
}
