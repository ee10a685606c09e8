use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use multipass::gpu::{GpuPowerPreference, ImageCatalog, WgpuBackend};
use multipass::{effective_time_scale, BufferId, FrameClock, FullscreenTriangle, Orchestrator};
use profile::{LoadedProfile, Profile};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

/// Settings after applying command-line overrides to the profile's `[render]`
/// section.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub frame_interval: Duration,
    pub time_scale: f32,
    pub debug_buffer: Option<BufferId>,
    pub power: GpuPowerPreference,
    pub output: PathBuf,
}

impl RunConfig {
    pub fn resolve(cli: &Cli, profile: &Profile) -> Result<Self> {
        let render = &profile.render;
        let (width, height) = cli.size.unwrap_or((render.width, render.height));
        let debug_buffer = match cli.debug_buffer {
            Some(buffer) => Some(buffer),
            None => render
                .debug_buffer_id()
                .context("invalid debug_buffer in profile")?,
        };
        Ok(Self {
            width,
            height,
            frames: cli.frames.unwrap_or(render.frames).max(1),
            frame_interval: cli.frame_interval.unwrap_or(render.frame_interval),
            time_scale: cli
                .time_scale
                .map(effective_time_scale)
                .unwrap_or_else(|| profile.effective_time_scale()),
            debug_buffer,
            power: cli
                .power
                .map(GpuPowerPreference::from)
                .unwrap_or_else(|| render.power.into()),
            output: cli.output.clone(),
        })
    }
}

pub fn initialise_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let loaded = LoadedProfile::load(&cli.profile)
        .with_context(|| format!("failed to load profile {}", cli.profile.display()))?;
    let config = RunConfig::resolve(&cli, loaded.profile())?;
    let document = loaded
        .document()
        .context("failed to read pass sources")?;
    tracing::info!(
        profile = %cli.profile.display(),
        name = loaded.profile().name.as_deref().unwrap_or("unnamed"),
        width = config.width,
        height = config.height,
        frames = config.frames,
        "starting headless render"
    );

    let mut backend = WgpuBackend::new(config.width, config.height, config.power)?;
    let catalog = ImageCatalog::load(&mut backend, &loaded.texture_paths());
    let mut orchestrator = Orchestrator::new(config.width, config.height);

    let failures = orchestrator.load_document(&mut backend, &document);
    for (pass, error) in &failures {
        tracing::warn!(%pass, diagnostic = error.diagnostic(), "pass disabled");
    }
    if !orchestrator.has_valid_main_pass() && config.debug_buffer.is_none() {
        tracing::warn!("Image pass is not available; output will stay black");
    }
    orchestrator.set_debug_buffer(config.debug_buffer);

    let mut clock = FrameClock::fixed_step(config.width, config.height, config.frame_interval)
        .with_time_scale(config.time_scale);
    let started = Instant::now();
    for _ in 0..config.frames {
        clock.tick(Instant::now());
        orchestrator.render_frame(&mut backend, &catalog, &mut clock, &mut FullscreenTriangle);
    }
    tracing::debug!(
        frames = orchestrator.frame_index(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "frames rendered"
    );

    let pixels = backend
        .read_presentation()
        .context("failed to read back presentation target")?;
    orchestrator.teardown(&mut backend);
    if let Some(parent) = config.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    pixels
        .save_with_format(&config.output, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", config.output.display()))?;
    tracing::info!(output = %config.output.display(), "wrote final frame");

    if !failures.is_empty() {
        eprintln!("{}", orchestrator.all_errors());
    }
    Ok(())
}
