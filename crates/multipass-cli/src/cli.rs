use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use multipass::gpu::GpuPowerPreference;
use multipass::{BufferId, PassId};

#[derive(Parser, Debug)]
#[command(
    name = "multipass",
    author,
    version,
    about = "Render a multi-pass shader profile headlessly and export the final frame"
)]
pub struct Cli {
    /// Profile TOML describing passes, channels and textures.
    #[arg(value_name = "PROFILE")]
    pub profile: PathBuf,

    /// Override the render resolution (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_dimensions)]
    pub size: Option<(u32, u32)>,

    /// Number of frames to render before exporting.
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u32>,

    /// Simulated time between frames (`16ms`, `0.5s`, ...).
    #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
    pub frame_interval: Option<Duration>,

    /// Multiplier applied to `iTime`.
    #[arg(long, value_name = "SCALE")]
    pub time_scale: Option<f32>,

    /// Present a buffer (A-D) instead of the Image pass.
    #[arg(long, value_name = "BUFFER", value_parser = parse_debug_buffer)]
    pub debug_buffer: Option<BufferId>,

    /// Adapter power preference.
    #[arg(long, value_enum)]
    pub power: Option<PowerArg>,

    /// PNG path the final presentation surface is written to.
    #[arg(long, short, value_name = "PATH", default_value = "frame.png", value_parser = parse_output_path)]
    pub output: PathBuf,

    /// Log filter (overrides `RUST_LOG`), e.g. `debug` or `multipass=trace`.
    #[arg(long, value_name = "FILTER")]
    pub log: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PowerArg {
    Low,
    High,
}

impl From<PowerArg> for GpuPowerPreference {
    fn from(value: PowerArg) -> Self {
        match value {
            PowerArg::Low => GpuPowerPreference::Low,
            PowerArg::High => GpuPowerPreference::High,
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_dimensions(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| "invalid width".to_string())?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| "invalid height".to_string())?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok((width, height))
}

pub fn parse_interval(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err("frame interval must be non-negative".into());
        }
        return Ok(Duration::from_secs_f64(seconds));
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid duration '{trimmed}': {err}"))
}

pub fn parse_debug_buffer(value: &str) -> Result<BufferId, String> {
    PassId::from_str(value)
        .map_err(|err| err.to_string())?
        .buffer()
        .ok_or_else(|| format!("'{}' is not one of buffers A-D", value.trim()))
}

pub fn parse_output_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    match extension(&path).as_deref() {
        Some("png") => Ok(path),
        None => Err("output path has no extension; expected .png".to_string()),
        Some(other) => Err(format!("unsupported export format '.{other}'; expected .png")),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dimensions() {
        assert_eq!(parse_dimensions("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_dimensions(" 64 X 32 ").unwrap(), (64, 32));
        assert!(parse_dimensions("0x10").is_err());
        assert!(parse_dimensions("1280").is_err());
    }

    #[test]
    fn parses_intervals_as_seconds_or_humantime() {
        assert_eq!(parse_interval("0.25").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval("16ms").unwrap(), Duration::from_millis(16));
        assert!(parse_interval("-1").is_err());
        assert!(parse_interval("later").is_err());
    }

    #[test]
    fn debug_buffer_accepts_buffers_only() {
        assert_eq!(parse_debug_buffer("b").unwrap(), BufferId::B);
        assert_eq!(parse_debug_buffer("Buffer D").unwrap(), BufferId::D);
        assert!(parse_debug_buffer("image").is_err());
        assert!(parse_debug_buffer("e").is_err());
    }

    #[test]
    fn output_must_be_png() {
        assert!(parse_output_path("out/frame.PNG").is_ok());
        assert!(parse_output_path("frame.exr").is_err());
        assert!(parse_output_path("frame").is_err());
    }

    #[test]
    fn cli_overrides_are_optional() {
        let cli = Cli::try_parse_from(["multipass", "demo.toml"]).unwrap();
        assert_eq!(cli.profile, PathBuf::from("demo.toml"));
        assert!(cli.size.is_none());
        assert_eq!(cli.output, PathBuf::from("frame.png"));

        let cli = Cli::try_parse_from([
            "multipass",
            "demo.toml",
            "--size",
            "320x200",
            "--frames",
            "12",
            "--debug-buffer",
            "a",
            "--power",
            "high",
            "-o",
            "out.png",
        ])
        .unwrap();
        assert_eq!(cli.size, Some((320, 200)));
        assert_eq!(cli.frames, Some(12));
        assert_eq!(cli.debug_buffer, Some(BufferId::A));
        assert_eq!(cli.power, Some(PowerArg::High));
        assert_eq!(cli.output, PathBuf::from("out.png"));
    }
}
