use std::time::{Duration, Instant};

use chrono::{Datelike, Local, Timelike};

use crate::backend::UniformProvider;
use crate::types::{PassId, CHANNEL_COUNT};

/// Sample rate reported through `iSampleRate`. No audio is produced.
pub const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;

/// Returns `scale` when it is a finite positive number, 1.0 otherwise.
pub fn effective_time_scale(scale: f32) -> f32 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

/// Values of the standard ShaderToy uniforms for one pass invocation.
///
/// `channel_resolution` is overwritten by the orchestrator from the resolved
/// channel bindings right before the draw; providers may leave it zeroed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub resolution: [f32; 3],
    pub time: f32,
    pub time_delta: f32,
    pub frame: i32,
    pub mouse: [f32; 4],
    pub date: [f32; 4],
    pub sample_rate: f32,
    pub channel_time: [f32; CHANNEL_COUNT],
    pub channel_resolution: [[f32; 3]; CHANNEL_COUNT],
}

impl FrameUniforms {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: [width as f32, height as f32, 1.0],
            time: 0.0,
            time_delta: 0.0,
            frame: 0,
            mouse: [0.0; 4],
            date: [0.0; 4],
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_time: [0.0; CHANNEL_COUNT],
            channel_resolution: [[0.0; 3]; CHANNEL_COUNT],
        }
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = [width as f32, height as f32, 1.0];
    }

    pub fn set_channel_resolution(&mut self, index: usize, resolution: [f32; 3]) {
        if let Some(slot) = self.channel_resolution.get_mut(index) {
            *slot = resolution;
        }
    }
}

/// Default [`UniformProvider`]: advances time, frame counter and date once
/// per [`FrameClock::tick`] and hands the same values to every pass of the
/// frame.
///
/// With a fixed step the clock ignores wall time so headless renders are
/// reproducible.
#[derive(Debug, Clone)]
pub struct FrameClock {
    current: FrameUniforms,
    start_time: Instant,
    last_frame_time: Instant,
    frame_count: u32,
    time_scale: f32,
    fixed_step: Option<Duration>,
    mouse: [f32; 4],
}

impl FrameClock {
    pub fn new(width: u32, height: u32) -> Self {
        let now = Instant::now();
        Self {
            current: FrameUniforms::new(width, height),
            start_time: now,
            last_frame_time: now,
            frame_count: 0,
            time_scale: 1.0,
            fixed_step: None,
            mouse: [0.0; 4],
        }
    }

    /// Clock that advances by `step` per tick regardless of wall time.
    pub fn fixed_step(width: u32, height: u32, step: Duration) -> Self {
        Self {
            fixed_step: Some(step),
            ..Self::new(width, height)
        }
    }

    /// Multiplies elapsed time. See [`effective_time_scale`] for how
    /// unusable values are handled.
    pub fn with_time_scale(mut self, scale: f32) -> Self {
        self.time_scale = effective_time_scale(scale);
        self
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.current.set_resolution(width, height);
    }

    /// Sets `iMouse` as (x, y, click x, click y) in pixels.
    pub fn set_mouse(&mut self, mouse: [f32; 4]) {
        self.mouse = mouse;
    }

    /// Number of ticks taken so far.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn current(&self) -> &FrameUniforms {
        &self.current
    }

    /// Advances to the next frame using `now` as the wall-clock sample.
    pub fn tick(&mut self, now: Instant) {
        let (seconds, delta_seconds) = match self.fixed_step {
            Some(step) => {
                let step = step.as_secs_f32() * self.time_scale;
                (self.frame_count as f32 * step, if self.frame_count == 0 { 0.0 } else { step })
            }
            None => {
                if self.frame_count == 0 {
                    self.start_time = now;
                    self.last_frame_time = now;
                }
                let elapsed = now.saturating_duration_since(self.start_time);
                let delta = now.saturating_duration_since(self.last_frame_time);
                self.last_frame_time = now;
                (
                    elapsed.as_secs_f32() * self.time_scale,
                    delta.as_secs_f32() * self.time_scale,
                )
            }
        };

        self.current.time = seconds;
        self.current.time_delta = delta_seconds;
        self.current.frame = self.frame_count.min(i32::MAX as u32) as i32;
        self.current.channel_time = [seconds; CHANNEL_COUNT];
        self.current.mouse = self.mouse;
        self.frame_count = self.frame_count.saturating_add(1);
        self.refresh_date();
    }

    fn refresh_date(&mut self) {
        let local_now = Local::now();
        let seconds_since_midnight = local_now.num_seconds_from_midnight() as f32
            + local_now.nanosecond() as f32 / 1_000_000_000.0;
        self.current.date = [
            local_now.year() as f32,
            local_now.month() as f32,
            local_now.day() as f32,
            seconds_since_midnight,
        ];
    }
}

impl UniformProvider for FrameClock {
    fn uniforms(&mut self, _pass: PassId) -> FrameUniforms {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_step_clock_is_deterministic() {
        let mut clock = FrameClock::fixed_step(320, 200, Duration::from_millis(500));
        let now = Instant::now();
        clock.tick(now);
        assert_eq!(clock.current().frame, 0);
        assert_eq!(clock.current().time, 0.0);
        assert_eq!(clock.current().time_delta, 0.0);

        clock.tick(now);
        clock.tick(now);
        let uniforms = clock.uniforms(PassId::Image);
        assert_eq!(uniforms.frame, 2);
        assert!((uniforms.time - 1.0).abs() < 1e-6);
        assert!((uniforms.time_delta - 0.5).abs() < 1e-6);
        assert_eq!(uniforms.channel_time, [uniforms.time; CHANNEL_COUNT]);
        assert_eq!(uniforms.resolution, [320.0, 200.0, 1.0]);
        assert_eq!(clock.frame_count(), 3);
    }

    #[test]
    fn wall_clock_measures_from_first_tick() {
        let mut clock = FrameClock::new(8, 8).with_time_scale(2.0);
        let start = Instant::now();
        clock.tick(start);
        assert_eq!(clock.current().time, 0.0);

        clock.tick(start + Duration::from_secs(1));
        assert!((clock.current().time - 2.0).abs() < 1e-4);
        assert!((clock.current().time_delta - 2.0).abs() < 1e-4);
        assert_eq!(clock.current().frame, 1);
    }

    #[test]
    fn unusable_time_scales_run_at_normal_speed() {
        for scale in [-2.0, 0.0, f32::NAN, f32::INFINITY] {
            let mut clock =
                FrameClock::fixed_step(4, 4, Duration::from_secs(1)).with_time_scale(scale);
            let now = Instant::now();
            clock.tick(now);
            clock.tick(now);
            clock.tick(now);
            assert!((clock.current().time - 2.0).abs() < 1e-6, "scale {scale}");
            assert!((clock.current().time_delta - 1.0).abs() < 1e-6);
        }
        assert_eq!(effective_time_scale(0.25), 0.25);
    }

    #[test]
    fn every_pass_of_a_frame_sees_the_same_values() {
        let mut clock = FrameClock::fixed_step(4, 4, Duration::from_millis(16));
        clock.set_mouse([1.0, 2.0, 3.0, 4.0]);
        clock.tick(Instant::now());
        let a = clock.uniforms(PassId::BufferA);
        let image = clock.uniforms(PassId::Image);
        assert_eq!(a, image);
        assert_eq!(image.mouse, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(image.sample_rate, DEFAULT_SAMPLE_RATE);
        assert!(image.date[0] >= 2000.0);
    }

    #[test]
    fn channel_resolution_ignores_out_of_range_index() {
        let mut uniforms = FrameUniforms::new(2, 2);
        uniforms.set_channel_resolution(1, [64.0, 32.0, 1.0]);
        uniforms.set_channel_resolution(9, [1.0, 1.0, 1.0]);
        assert_eq!(uniforms.channel_resolution[1], [64.0, 32.0, 1.0]);
        assert_eq!(uniforms.channel_resolution[0], [0.0; 3]);
    }
}
