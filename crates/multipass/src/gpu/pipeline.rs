use std::borrow::Cow;

use wgpu::naga::front::glsl::{Frontend, Options};
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};
use wgpu::naga::ShaderStage;

use crate::error::CompileError;
use crate::transpile::VERTEX_SHADER;
use crate::types::CHANNEL_COUNT;

/// Format of buffer A-D surfaces. Half floats keep feedback values above 1.
pub(crate) const BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Format of the presentation target and of catalog textures.
pub(crate) const PRESENTATION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Layouts shared by every pass pipeline.
pub(crate) struct PipelineLayouts {
    pub uniform_layout: wgpu::BindGroupLayout,
    pub channel_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
    pub vertex_module: wgpu::ShaderModule,
}

impl PipelineLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pass params layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let channel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("channel layout"),
            entries: &build_channel_layout_entries(),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pass pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &channel_layout],
            push_constant_ranges: &[],
        });
        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fullscreen triangle vertex"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(VERTEX_SHADER),
                stage: ShaderStage::Vertex,
                defines: &[],
            },
        });

        Self {
            uniform_layout,
            channel_layout,
            pipeline_layout,
            vertex_module,
        }
    }
}

/// A compiled pass. Holds one pipeline per color target format so the same
/// program can draw into a buffer or the presentation target.
#[derive(Clone)]
pub struct GpuProgram {
    label: String,
    buffer_pipeline: wgpu::RenderPipeline,
    present_pipeline: wgpu::RenderPipeline,
}

impl GpuProgram {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn pipeline_for(&self, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        if format == BUFFER_FORMAT {
            &self.buffer_pipeline
        } else {
            &self.present_pipeline
        }
    }
}

/// Parses and validates transpiled GLSL with naga so diagnostics carry
/// source spans, then builds both pipelines inside a validation scope.
pub(crate) fn build_program(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    label: &str,
    source: &str,
) -> Result<GpuProgram, CompileError> {
    validate_fragment(source)?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(source),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    });
    let buffer_pipeline = create_pipeline(device, layouts, &fragment_module, label, BUFFER_FORMAT);
    let present_pipeline =
        create_pipeline(device, layouts, &fragment_module, label, PRESENTATION_FORMAT);
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(CompileError::new(error.to_string()));
    }

    Ok(GpuProgram {
        label: label.to_string(),
        buffer_pipeline,
        present_pipeline,
    })
}

pub(crate) fn validate_fragment(source: &str) -> Result<(), CompileError> {
    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(ShaderStage::Fragment), source)
        .map_err(|errors| CompileError::new(errors.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|error| CompileError::new(error.emit_to_string(source)))?;
    Ok(())
}

fn create_pipeline(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    fragment_module: &wgpu::ShaderModule,
    label: &str,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layouts.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &layouts.vertex_module,
            entry_point: Some("main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: fragment_module,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

pub(crate) fn build_channel_entries<'a>(
    channels: &[(&'a wgpu::TextureView, &'a wgpu::Sampler); CHANNEL_COUNT],
) -> Vec<wgpu::BindGroupEntry<'a>> {
    let mut entries = Vec::with_capacity(CHANNEL_COUNT * 2);
    for (index, &(view, sampler)) in channels.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: (index as u32) * 2,
            resource: wgpu::BindingResource::TextureView(view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: (index as u32) * 2 + 1,
            resource: wgpu::BindingResource::Sampler(sampler),
        });
    }
    entries
}

fn build_channel_layout_entries() -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(CHANNEL_COUNT * 2);
    for index in 0..CHANNEL_COUNT as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpile::{transpile, DEBUG_TONEMAP_SOURCE};

    #[test]
    fn validation_accepts_transpiled_debug_view() {
        assert!(validate_fragment(&transpile(DEBUG_TONEMAP_SOURCE)).is_ok());
    }

    #[test]
    fn validation_reports_missing_identifiers() {
        let source = transpile(
            "void mainImage(out vec4 fragColor, in vec2 fragCoord) { fragColor = undefinedThing; }",
        );
        let err = validate_fragment(&source).unwrap_err();
        assert!(!err.diagnostic().is_empty());
    }

    #[test]
    fn channel_layout_interleaves_textures_and_samplers() {
        let entries = build_channel_layout_entries();
        assert_eq!(entries.len(), CHANNEL_COUNT * 2);
        assert!(matches!(entries[0].ty, wgpu::BindingType::Texture { .. }));
        assert!(matches!(entries[7].ty, wgpu::BindingType::Sampler(_)));
        assert_eq!(entries[7].binding, 7);
    }
}
