//! Headless `wgpu` implementation of [`Backend`].
//!
//! - `context` acquires an adapter and device without a window surface.
//! - `pipeline` validates transpiled GLSL through naga and builds one render
//!   pipeline per target format.
//! - `uniforms` mirrors the std140 `PassParams` block.
//! - `catalog` loads image files into sampleable textures.
//!
//! Commands of a frame are recorded into a single encoder that is submitted
//! in [`Backend::end_frame`] (or before a readback).

mod catalog;
mod context;
mod pipeline;
mod uniforms;

use std::array;
use std::fmt;

use anyhow::{Context as AnyhowContext, Result};
use image::RgbaImage;
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::backend::Backend;
use crate::error::{AllocationError, CompileError};
use crate::types::CHANNEL_COUNT;
use crate::uniforms::FrameUniforms;

pub use catalog::{decode_texture, mip_chain, ImageCatalog};
pub use context::GpuPowerPreference;
pub use pipeline::GpuProgram;

use context::GpuContext;
use pipeline::{build_channel_entries, build_program, PipelineLayouts, BUFFER_FORMAT, PRESENTATION_FORMAT};
use uniforms::{PassParams, PASS_PARAMS_SIZE};

const BYTES_PER_PIXEL: u32 = 4;

/// Off-screen color surface owned by the target manager.
pub struct GpuSurface {
    texture: wgpu::Texture,
    handle: GpuTexture,
}

/// How a channel samples outside the [0, 1] texture range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureWrap {
    /// Render targets clamp so feedback never bleeds across edges.
    #[default]
    Clamp,
    /// Catalog images tile.
    Repeat,
}

impl TextureWrap {
    fn address_mode(self) -> wgpu::AddressMode {
        match self {
            TextureWrap::Clamp => wgpu::AddressMode::ClampToEdge,
            TextureWrap::Repeat => wgpu::AddressMode::Repeat,
        }
    }
}

/// Sampleable view plus an identity used for equality.
#[derive(Clone)]
pub struct GpuTexture {
    id: u64,
    view: wgpu::TextureView,
    wrap: TextureWrap,
}

impl GpuTexture {
    pub fn wrap(&self) -> TextureWrap {
        self.wrap
    }
}

impl PartialEq for GpuTexture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GpuTexture").field(&self.id).finish()
    }
}

#[derive(Clone)]
struct BoundTarget {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

pub struct WgpuBackend {
    context: GpuContext,
    layouts: PipelineLayouts,
    clamp_sampler: wgpu::Sampler,
    repeat_sampler: wgpu::Sampler,
    placeholder: GpuTexture,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    presentation: wgpu::Texture,
    presentation_view: wgpu::TextureView,
    presentation_size: (u32, u32),
    encoder: Option<wgpu::CommandEncoder>,
    target: Option<BoundTarget>,
    program: Option<GpuProgram>,
    channels: [Option<GpuTexture>; CHANNEL_COUNT],
    params: PassParams,
    next_texture_id: u64,
}

impl WgpuBackend {
    /// Creates a device and a `width` x `height` presentation target.
    pub fn new(width: u32, height: u32, power: GpuPowerPreference) -> Result<Self> {
        let context = GpuContext::new(power)?;
        let (width, height) = (width.max(1), height.max(1));
        if width > context.max_dimension || height > context.max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max}, requested presentation is {width}x{height}",
                max = context.max_dimension
            );
        }

        let device = &context.device;
        let layouts = PipelineLayouts::new(device);
        let clamp_sampler = create_channel_sampler(device, TextureWrap::Clamp);
        let repeat_sampler = create_channel_sampler(device, TextureWrap::Repeat);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pass params"),
            size: PASS_PARAMS_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pass params bind group"),
            layout: &layouts.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let placeholder_texture = device.create_texture_with_data(
            &context.queue,
            &wgpu::TextureDescriptor {
                label: Some("placeholder channel texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: PRESENTATION_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &[0u8, 0, 0, 0],
        );
        let placeholder = GpuTexture {
            id: 0,
            view: placeholder_texture.create_view(&wgpu::TextureViewDescriptor::default()),
            wrap: TextureWrap::Clamp,
        };
        let (presentation, presentation_view) = create_presentation(device, width, height);

        tracing::info!(width, height, "initialised headless wgpu backend");
        Ok(Self {
            layouts,
            clamp_sampler,
            repeat_sampler,
            placeholder,
            uniform_buffer,
            uniform_bind_group,
            presentation,
            presentation_view,
            presentation_size: (width, height),
            encoder: None,
            target: None,
            program: None,
            channels: array::from_fn(|_| None),
            params: PassParams::from(&FrameUniforms::new(width, height)),
            next_texture_id: 1,
            context,
        })
    }

    pub fn presentation_size(&self) -> (u32, u32) {
        self.presentation_size
    }

    /// Uploads a mip chain of tightly packed RGBA8 images, largest first.
    ///
    /// Row 0 of each level is the top of the texture, which is where
    /// `fragCoord.y == 0` samples.
    pub fn upload_texture(
        &mut self,
        label: &str,
        levels: &[RgbaImage],
        wrap: TextureWrap,
    ) -> Result<GpuTexture> {
        let base = levels.first().context("texture upload needs at least one level")?;
        let (width, height) = base.dimensions();
        let mut data = Vec::with_capacity(levels.iter().map(|level| level.as_raw().len()).sum());
        for level in levels {
            data.extend_from_slice(level.as_raw());
        }
        let texture = self.context.device.create_texture_with_data(
            &self.context.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: width.max(1),
                    height: height.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: levels.len() as u32,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: PRESENTATION_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &data,
        );
        Ok(GpuTexture {
            id: self.allocate_texture_id(),
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            wrap,
        })
    }

    /// Submits pending work and copies the presentation target to the CPU.
    pub fn read_presentation(&mut self) -> Result<RgbaImage> {
        let (width, height) = self.presentation_size;
        let unpadded_bytes_per_row = width * BYTES_PER_PIXEL;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let device = &self.context.device;
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("presentation readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let encoder = frame_encoder(&mut self.encoder, device);
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.presentation,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.submit();

        let slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.context
            .device
            .poll(wgpu::PollType::Wait)
            .context("failed to wait for presentation readback")?;
        receiver
            .recv()
            .context("readback callback dropped")?
            .context("failed to map presentation readback")?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in mapped.chunks(padded_bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        readback.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .context("readback size does not match presentation target")
    }

    fn allocate_texture_id(&mut self) -> u64 {
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        id
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.context.queue.submit(Some(encoder.finish()));
        }
    }
}

impl Backend for WgpuBackend {
    type Surface = GpuSurface;
    type Texture = GpuTexture;
    type Program = GpuProgram;

    fn create_surface(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<GpuSurface, AllocationError> {
        let max = self.context.max_dimension;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(AllocationError::new(
                width,
                height,
                format!("size must be between 1 and {max}"),
            ));
        }
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BUFFER_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(AllocationError::new(width, height, error.to_string()));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = GpuTexture {
            id: self.allocate_texture_id(),
            view,
            wrap: TextureWrap::Clamp,
        };
        Ok(GpuSurface { texture, handle })
    }

    fn destroy_surface(&mut self, surface: GpuSurface) {
        tracing::trace!(id = surface.handle.id, "releasing render surface");
        drop(surface.texture);
    }

    fn surface_texture(&self, surface: &GpuSurface) -> GpuTexture {
        surface.handle.clone()
    }

    fn clear_surface(&mut self, surface: &GpuSurface) {
        let encoder = frame_encoder(&mut self.encoder, &self.context.device);
        encode_clear(encoder, &surface.handle.view);
    }

    fn compile_program(&mut self, label: &str, source: &str) -> Result<GpuProgram, CompileError> {
        build_program(&self.context.device, &self.layouts, label, source)
    }

    fn begin_frame(&mut self) {
        self.target = None;
    }

    fn end_frame(&mut self) {
        self.submit();
    }

    fn bind_surface(&mut self, surface: &GpuSurface) {
        self.target = Some(BoundTarget {
            view: surface.handle.view.clone(),
            format: BUFFER_FORMAT,
        });
    }

    fn bind_presentation(&mut self) {
        self.target = Some(BoundTarget {
            view: self.presentation_view.clone(),
            format: PRESENTATION_FORMAT,
        });
    }

    fn clear_bound(&mut self) {
        if let Some(target) = &self.target {
            let encoder = frame_encoder(&mut self.encoder, &self.context.device);
            encode_clear(encoder, &target.view);
        }
    }

    fn use_program(&mut self, program: &GpuProgram) {
        self.program = Some(program.clone());
    }

    fn bind_channel(&mut self, channel: usize, texture: Option<&GpuTexture>) {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = texture.cloned();
        }
    }

    fn set_uniforms(&mut self, uniforms: &FrameUniforms) {
        self.params = PassParams::from(uniforms);
    }

    fn draw_triangles(&mut self, vertex_count: u32) {
        let (Some(target), Some(program)) = (&self.target, &self.program) else {
            tracing::trace!("draw skipped without target or program");
            return;
        };
        let device = &self.context.device;

        let channels: [(&wgpu::TextureView, &wgpu::Sampler); CHANNEL_COUNT] =
            array::from_fn(|channel| {
                let texture = self.channels[channel].as_ref().unwrap_or(&self.placeholder);
                let sampler = match texture.wrap {
                    TextureWrap::Clamp => &self.clamp_sampler,
                    TextureWrap::Repeat => &self.repeat_sampler,
                };
                (&texture.view, sampler)
            });
        let channel_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("channel bind group"),
            layout: &self.layouts.channel_layout,
            entries: &build_channel_entries(&channels),
        });
        let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pass params staging"),
            contents: bytemuck::bytes_of(&self.params),
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let encoder = frame_encoder(&mut self.encoder, device);
        encoder.copy_buffer_to_buffer(&staging, 0, &self.uniform_buffer, 0, PASS_PARAMS_SIZE);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(program.pipeline_for(target.format));
        pass.set_bind_group(0, &self.uniform_bind_group, &[]);
        pass.set_bind_group(1, &channel_bind_group, &[]);
        pass.draw(0..vertex_count, 0..1);
    }

    fn unbind(&mut self) {
        self.target = None;
        self.program = None;
        self.channels = array::from_fn(|_| None);
    }
}

fn frame_encoder<'a>(
    encoder: &'a mut Option<wgpu::CommandEncoder>,
    device: &wgpu::Device,
) -> &'a mut wgpu::CommandEncoder {
    encoder.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("multipass frame encoder"),
        })
    })
}

fn encode_clear(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

fn create_channel_sampler(device: &wgpu::Device, wrap: TextureWrap) -> wgpu::Sampler {
    let address_mode = wrap.address_mode();
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(match wrap {
            TextureWrap::Clamp => "clamping channel sampler",
            TextureWrap::Repeat => "repeating channel sampler",
        }),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    })
}

fn create_presentation(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("presentation target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: PRESENTATION_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}
