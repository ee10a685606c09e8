//! CPU reference backend.
//!
//! Surfaces are `RGBA32F` pixel grids held by the backend. Programs cannot be
//! executed from GLSL text, so each source selects a Rust kernel registered
//! with [`SoftBackend::register_kernel`] through a `// kernel: <name>` line
//! (the last such line wins, so a pass may override one inherited from
//! Common). Compilation still checks the transpiled text for an entry point
//! and balanced delimiters so broken sources fail the same way they would on
//! a GPU.
//!
//! Every draw evaluates the kernel once per pixel of the bound target with
//! `frag_coord = (x + 0.5, y + 0.5)`; row `0` is the first row of the grid.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::backend::Backend;
use crate::error::{AllocationError, CompileError};
use crate::types::CHANNEL_COUNT;
use crate::uniforms::FrameUniforms;

/// Marker line selecting a registered kernel.
pub const KERNEL_DIRECTIVE: &str = "// kernel:";

type Kernel = Arc<dyn Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync>;

/// Owned surface handle. Dropping it without `destroy_surface` leaks the
/// grid until the backend is dropped.
#[derive(Debug)]
pub struct SoftSurface {
    id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftTexture(u64);

#[derive(Clone)]
pub struct SoftProgram {
    label: String,
    kernel_name: String,
    kernel: Kernel,
}

impl fmt::Debug for SoftProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftProgram")
            .field("label", &self.label)
            .field("kernel", &self.kernel_name)
            .finish()
    }
}

impl SoftProgram {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }
}

#[derive(Debug, Clone)]
struct Grid {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl Grid {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    fn texel(&self, x: i32, y: i32) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        self.pixels[y * self.width as usize + x]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundTarget {
    Surface(u64),
    Presentation,
}

/// Inputs visible to a kernel for one pixel.
pub struct Fragment<'a> {
    pub frag_coord: [f32; 2],
    pub uniforms: &'a FrameUniforms,
    channels: [Option<&'a Grid>; CHANNEL_COUNT],
}

impl Fragment<'_> {
    /// Nearest-neighbour sample with clamp-to-edge addressing. Unbound
    /// channels read transparent black.
    pub fn texture(&self, channel: usize, uv: [f32; 2]) -> [f32; 4] {
        match self.channels.get(channel).copied().flatten() {
            Some(grid) => grid.texel(
                (uv[0] * grid.width as f32).floor() as i32,
                (uv[1] * grid.height as f32).floor() as i32,
            ),
            None => [0.0; 4],
        }
    }

    pub fn texel_fetch(&self, channel: usize, x: i32, y: i32) -> [f32; 4] {
        match self.channels.get(channel).copied().flatten() {
            Some(grid) => grid.texel(x, y),
            None => [0.0; 4],
        }
    }

    /// Texel under the current fragment when the channel matches its size.
    pub fn same_texel(&self, channel: usize) -> [f32; 4] {
        self.texel_fetch(channel, self.frag_coord[0] as i32, self.frag_coord[1] as i32)
    }
}

/// Deterministic single-threaded [`Backend`] used by tests and tooling.
pub struct SoftBackend {
    surfaces: HashMap<u64, Grid>,
    presentation: Grid,
    kernels: HashMap<String, Kernel>,
    next_id: u64,
    allocations: usize,
    allocation_budget: Option<usize>,
    draw_calls: usize,
    frames: usize,
    target: Option<BoundTarget>,
    program: Option<SoftProgram>,
    channels: [Option<SoftTexture>; CHANNEL_COUNT],
    uniforms: FrameUniforms,
}

impl Default for SoftBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftBackend {
    /// Backend with a zero-sized presentation target and the built-in
    /// `debug_tonemap` kernel.
    pub fn new() -> Self {
        let mut backend = Self {
            surfaces: HashMap::new(),
            presentation: Grid::new(0, 0),
            kernels: HashMap::new(),
            next_id: 1,
            allocations: 0,
            allocation_budget: None,
            draw_calls: 0,
            frames: 0,
            target: None,
            program: None,
            channels: [None; CHANNEL_COUNT],
            uniforms: FrameUniforms::new(0, 0),
        };
        backend.register_kernel("debug_tonemap", |fragment| {
            let resolution = fragment.uniforms.resolution;
            let uv = [
                fragment.frag_coord[0] / resolution[0].max(1.0),
                fragment.frag_coord[1] / resolution[1].max(1.0),
            ];
            let hdr = fragment.texture(0, uv);
            let map = |c: f32| (c / (1.0 + c)).max(0.0).powf(1.0 / 2.2);
            [map(hdr[0]), map(hdr[1]), map(hdr[2]), hdr[3]]
        });
        backend
    }

    pub fn with_presentation(width: u32, height: u32) -> Self {
        let mut backend = Self::new();
        backend.resize_presentation(width, height);
        backend
    }

    pub fn resize_presentation(&mut self, width: u32, height: u32) {
        self.presentation = Grid::new(width, height);
    }

    pub fn register_kernel<F>(&mut self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(kernel));
    }

    /// Removes a kernel. Programs compiled before keep running it; new
    /// compiles naming it fail.
    pub fn unregister_kernel(&mut self, name: &str) -> bool {
        self.kernels.remove(name).is_some()
    }

    /// Creates a sampleable texture outside the render-target lifecycle,
    /// e.g. for a test catalog. Missing pixels are transparent black.
    pub fn create_texture(&mut self, width: u32, height: u32, pixels: Vec<[f32; 4]>) -> SoftTexture {
        let mut grid = Grid::new(width, height);
        for (slot, pixel) in grid.pixels.iter_mut().zip(pixels) {
            *slot = pixel;
        }
        let id = self.allocate_id();
        self.surfaces.insert(id, grid);
        SoftTexture(id)
    }

    /// Lets `remaining` more surface allocations succeed, then fails all.
    pub fn fail_allocations_after(&mut self, remaining: usize) {
        self.allocation_budget = Some(remaining);
    }

    pub fn allow_allocations(&mut self) {
        self.allocation_budget = None;
    }

    /// Surfaces created through [`Backend::create_surface`] so far.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn pixel(&self, texture: SoftTexture, x: u32, y: u32) -> Option<[f32; 4]> {
        let grid = self.surfaces.get(&texture.0)?;
        (x < grid.width && y < grid.height).then(|| grid.texel(x as i32, y as i32))
    }

    pub fn presentation_pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        let grid = &self.presentation;
        (x < grid.width && y < grid.height).then(|| grid.texel(x as i32, y as i32))
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bound_grid_mut(&mut self) -> Option<&mut Grid> {
        match self.target? {
            BoundTarget::Surface(id) => self.surfaces.get_mut(&id),
            BoundTarget::Presentation => Some(&mut self.presentation),
        }
    }
}

impl Backend for SoftBackend {
    type Surface = SoftSurface;
    type Texture = SoftTexture;
    type Program = SoftProgram;

    fn create_surface(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<SoftSurface, AllocationError> {
        if width == 0 || height == 0 {
            return Err(AllocationError::new(width, height, "zero-sized surface"));
        }
        if let Some(budget) = self.allocation_budget.as_mut() {
            if *budget == 0 {
                return Err(AllocationError::new(width, height, "allocation budget exhausted"));
            }
            *budget -= 1;
        }
        let id = self.allocate_id();
        self.surfaces.insert(id, Grid::new(width, height));
        self.allocations += 1;
        trace!(label, id, width, height, "allocated soft surface");
        Ok(SoftSurface { id })
    }

    fn destroy_surface(&mut self, surface: SoftSurface) {
        self.surfaces.remove(&surface.id);
    }

    fn surface_texture(&self, surface: &SoftSurface) -> SoftTexture {
        SoftTexture(surface.id)
    }

    fn clear_surface(&mut self, surface: &SoftSurface) {
        if let Some(grid) = self.surfaces.get_mut(&surface.id) {
            grid.pixels.fill([0.0; 4]);
        }
    }

    fn compile_program(&mut self, label: &str, source: &str) -> Result<SoftProgram, CompileError> {
        check_delimiters(source)?;
        if !source.contains("void mainImage") {
            return Err(CompileError::new("ERROR: 'mainImage' : no matching entry point"));
        }
        let kernel_name = source
            .lines()
            .filter_map(|line| line.trim().strip_prefix(KERNEL_DIRECTIVE))
            .map(str::trim)
            .last()
            .ok_or_else(|| CompileError::new("ERROR: no kernel directive in source"))?;
        let kernel = self
            .kernels
            .get(kernel_name)
            .cloned()
            .ok_or_else(|| CompileError::new(format!("ERROR: unknown kernel '{kernel_name}'")))?;
        Ok(SoftProgram {
            label: label.to_string(),
            kernel_name: kernel_name.to_string(),
            kernel,
        })
    }

    fn begin_frame(&mut self) {
        self.target = None;
    }

    fn end_frame(&mut self) {
        self.frames += 1;
    }

    fn bind_surface(&mut self, surface: &SoftSurface) {
        self.target = Some(BoundTarget::Surface(surface.id));
    }

    fn bind_presentation(&mut self) {
        self.target = Some(BoundTarget::Presentation);
    }

    fn clear_bound(&mut self) {
        if let Some(grid) = self.bound_grid_mut() {
            grid.pixels.fill([0.0; 4]);
        }
    }

    fn use_program(&mut self, program: &SoftProgram) {
        self.program = Some(program.clone());
    }

    fn bind_channel(&mut self, channel: usize, texture: Option<&SoftTexture>) {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = texture.copied();
        }
    }

    fn set_uniforms(&mut self, uniforms: &FrameUniforms) {
        self.uniforms = *uniforms;
    }

    fn draw_triangles(&mut self, vertex_count: u32) {
        if vertex_count < 3 {
            return;
        }
        let (Some(target), Some(program)) = (self.target, self.program.as_ref()) else {
            return;
        };
        let (width, height) = match target {
            BoundTarget::Surface(id) => match self.surfaces.get(&id) {
                Some(grid) => (grid.width, grid.height),
                None => return,
            },
            BoundTarget::Presentation => (self.presentation.width, self.presentation.height),
        };

        let channels = self.channels.map(|texture| {
            texture
                .filter(|texture| target != BoundTarget::Surface(texture.0))
                .and_then(|texture| self.surfaces.get(&texture.0))
        });
        let mut output = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let fragment = Fragment {
                    frag_coord: [x as f32 + 0.5, y as f32 + 0.5],
                    uniforms: &self.uniforms,
                    channels,
                };
                output.push((program.kernel)(&fragment));
            }
        }
        trace!(program = %program.label, width, height, "soft draw");

        if let Some(grid) = self.bound_grid_mut() {
            grid.pixels = output;
        }
        self.draw_calls += 1;
    }

    fn unbind(&mut self) {
        self.target = None;
        self.program = None;
        self.channels = [None; CHANNEL_COUNT];
    }
}

/// Rejects unbalanced `()`, `[]` and `{}` outside comments.
fn check_delimiters(source: &str) -> Result<(), CompileError> {
    let mut stack = Vec::new();
    for (line_index, line) in source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or_default();
        for c in code.chars() {
            match c {
                '(' | '[' | '{' => stack.push((c, line_index + 1)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => {
                            return Err(CompileError::new(format!(
                                "ERROR: 0:{}: '{c}' : syntax error",
                                line_index + 1
                            )))
                        }
                    }
                }
                _ => {}
            }
        }
    }
    match stack.pop() {
        Some((open, line)) => Err(CompileError::new(format!(
            "ERROR: 0:{line}: '{open}' : unexpected end of file"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_evaluates_kernel_at_pixel_centres() {
        let mut backend = SoftBackend::with_presentation(3, 2);
        backend.register_kernel("coord", |f| [f.frag_coord[0], f.frag_coord[1], 0.0, 1.0]);
        let program = backend
            .compile_program("test", "// kernel: coord\nvoid mainImage() {}")
            .unwrap();
        backend.bind_presentation();
        backend.use_program(&program);
        backend.draw_triangles(3);
        assert_eq!(backend.presentation_pixel(0, 0), Some([0.5, 0.5, 0.0, 1.0]));
        assert_eq!(backend.presentation_pixel(2, 1), Some([2.5, 1.5, 0.0, 1.0]));
        assert_eq!(backend.presentation_pixel(3, 0), None);
        assert_eq!(backend.draw_calls(), 1);
    }

    #[test]
    fn compile_reports_unbalanced_delimiters_and_unknown_kernels() {
        let mut backend = SoftBackend::new();
        let err = backend
            .compile_program("bad", "// kernel: x\nvoid mainImage( {\n")
            .err()
            .unwrap();
        assert!(err.diagnostic().contains("0:2"));

        let err = backend
            .compile_program("missing", "// kernel: nope\nvoid mainImage() {}")
            .err()
            .unwrap();
        assert!(err.diagnostic().contains("unknown kernel 'nope'"));
    }

    #[test]
    fn last_kernel_directive_wins() {
        let mut backend = SoftBackend::new();
        backend.register_kernel("first", |_| [1.0; 4]);
        backend.register_kernel("second", |_| [2.0; 4]);
        let program = backend
            .compile_program("p", "// kernel: first\n// kernel: second\nvoid mainImage() {}")
            .unwrap();
        assert_eq!(program.kernel_name(), "second");
    }

    #[test]
    fn sampling_clamps_and_unbound_channels_are_black() {
        let mut backend = SoftBackend::with_presentation(1, 1);
        let texture = backend.create_texture(2, 1, vec![[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0]]);
        backend.register_kernel("sampler_edges", |f| {
            let right = f.texture(0, [5.0, 0.5]);
            let empty = f.texture(1, [0.5, 0.5]);
            [right[1], empty[0], f.texel_fetch(0, -3, 0)[0], 1.0]
        });
        let program = backend
            .compile_program("sampler_edges", "// kernel: sampler_edges\nvoid mainImage() {}")
            .unwrap();
        backend.bind_presentation();
        backend.use_program(&program);
        backend.bind_channel(0, Some(&texture));
        backend.draw_triangles(3);
        assert_eq!(backend.presentation_pixel(0, 0), Some([1.0, 0.0, 1.0, 1.0]));
    }

    #[test]
    fn zero_sized_and_budgeted_allocations_fail() {
        let mut backend = SoftBackend::new();
        assert!(backend.create_surface("zero", 0, 4).is_err());
        backend.fail_allocations_after(1);
        assert!(backend.create_surface("one", 2, 2).is_ok());
        assert!(backend.create_surface("two", 2, 2).is_err());
        assert_eq!(backend.allocations(), 1);
    }
}
