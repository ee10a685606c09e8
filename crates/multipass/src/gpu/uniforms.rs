use bytemuck::{Pod, Zeroable};

use crate::types::CHANNEL_COUNT;
use crate::uniforms::FrameUniforms;

/// std140 mirror of the `PassParams` block declared by the transpiler
/// preamble. Arrays of scalars and `vec3` use a 16-byte stride.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct PassParams {
    pub i_resolution: [f32; 3],
    pub i_time: f32,
    pub i_time_delta: f32,
    pub i_frame: i32,
    pub i_sample_rate: f32,
    pub i_padding0: f32,
    pub i_mouse: [f32; 4],
    pub i_date: [f32; 4],
    pub i_channel_time: [[f32; 4]; CHANNEL_COUNT],
    pub i_channel_resolution: [[f32; 4]; CHANNEL_COUNT],
}

impl From<&FrameUniforms> for PassParams {
    fn from(uniforms: &FrameUniforms) -> Self {
        let mut params = Self::zeroed();
        params.i_resolution = uniforms.resolution;
        params.i_time = uniforms.time;
        params.i_time_delta = uniforms.time_delta;
        params.i_frame = uniforms.frame;
        params.i_sample_rate = uniforms.sample_rate;
        params.i_mouse = uniforms.mouse;
        params.i_date = uniforms.date;
        for channel in 0..CHANNEL_COUNT {
            params.i_channel_time[channel][0] = uniforms.channel_time[channel];
            let [width, height, depth] = uniforms.channel_resolution[channel];
            params.i_channel_resolution[channel] = [width, height, depth, 0.0];
        }
        params
    }
}

pub(crate) const PASS_PARAMS_SIZE: u64 = std::mem::size_of::<PassParams>() as u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_params_match_std140_layout() {
        let params = PassParams::zeroed();
        let base = &params as *const _ as usize;

        assert_eq!(PASS_PARAMS_SIZE, 192);
        assert_eq!((&params.i_resolution as *const _ as usize) - base, 0);
        assert_eq!((&params.i_time as *const _ as usize) - base, 12);
        assert_eq!((&params.i_time_delta as *const _ as usize) - base, 16);
        assert_eq!((&params.i_frame as *const _ as usize) - base, 20);
        assert_eq!((&params.i_sample_rate as *const _ as usize) - base, 24);
        assert_eq!((&params.i_mouse as *const _ as usize) - base, 32);
        assert_eq!((&params.i_date as *const _ as usize) - base, 48);
        assert_eq!((&params.i_channel_time as *const _ as usize) - base, 64);
        assert_eq!(
            (&params.i_channel_resolution as *const _ as usize) - base,
            128
        );
    }

    #[test]
    fn converts_frame_uniforms() {
        let mut uniforms = FrameUniforms::new(640, 360);
        uniforms.time = 2.5;
        uniforms.frame = 7;
        uniforms.channel_time = [2.5; CHANNEL_COUNT];
        uniforms.set_channel_resolution(2, [64.0, 32.0, 1.0]);

        let params = PassParams::from(&uniforms);
        assert_eq!(params.i_resolution, [640.0, 360.0, 1.0]);
        assert_eq!(params.i_time, 2.5);
        assert_eq!(params.i_frame, 7);
        assert_eq!(params.i_channel_time[3], [2.5, 0.0, 0.0, 0.0]);
        assert_eq!(params.i_channel_resolution[2], [64.0, 32.0, 1.0, 0.0]);
        assert_eq!(params.i_sample_rate, 44_100.0);
    }
}
