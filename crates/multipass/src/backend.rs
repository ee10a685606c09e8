//! Seams between the multi-pass core and the outside world.
//!
//! [`Backend`] is the graphics contract the core drives (implemented by the
//! `wgpu` backend in [`crate::gpu`] and the CPU reference backend in
//! [`crate::soft`]). The three narrow capability traits below are the
//! per-frame collaborators a host passes in: a texture catalog, a uniform
//! provider, and the full-screen draw primitive.

use std::fmt;

use crate::error::{AllocationError, CompileError};
use crate::types::PassId;
use crate::uniforms::FrameUniforms;

/// Graphics operations required to allocate targets, compile programs and
/// issue full-screen passes.
///
/// Binding calls are stateful in the GL sense: `bind_*`, `use_program`,
/// `bind_channel` and `set_uniforms` configure the next `draw_triangles`, and
/// `unbind` resets that state.
pub trait Backend {
    /// Off-screen drawable color surface.
    type Surface;
    /// Cheap, comparable handle to a sampleable texture.
    type Texture: Clone + fmt::Debug + PartialEq;
    /// Linked program ready for drawing.
    type Program;

    fn create_surface(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<Self::Surface, AllocationError>;

    /// Releases a surface. Its texture handles become invalid.
    fn destroy_surface(&mut self, surface: Self::Surface);

    fn surface_texture(&self, surface: &Self::Surface) -> Self::Texture;

    /// Zeroes the surface to transparent black.
    fn clear_surface(&mut self, surface: &Self::Surface);

    fn compile_program(&mut self, label: &str, source: &str)
        -> Result<Self::Program, CompileError>;

    /// Called once before the first pass of a frame.
    fn begin_frame(&mut self) {}

    /// Called once after the end-of-frame swap.
    fn end_frame(&mut self) {}

    fn bind_surface(&mut self, surface: &Self::Surface);

    /// Binds the externally owned presentation target.
    fn bind_presentation(&mut self);

    /// Clears whatever target is currently bound.
    fn clear_bound(&mut self);

    fn use_program(&mut self, program: &Self::Program);

    /// Binds `texture` to `channel`; `None` binds an empty placeholder.
    fn bind_channel(&mut self, channel: usize, texture: Option<&Self::Texture>);

    fn set_uniforms(&mut self, uniforms: &FrameUniforms);

    fn draw_triangles(&mut self, vertex_count: u32);

    fn unbind(&mut self);
}

/// A texture supplied by the catalog together with its size in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTexture<T> {
    pub texture: T,
    pub width: u32,
    pub height: u32,
}

/// Pre-existing textures that channel bindings can reference by index.
pub trait TextureCatalog<T> {
    fn resolve(&self, index: usize) -> Option<CatalogTexture<T>>;
}

/// Catalog with no entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCatalog;

impl<T> TextureCatalog<T> for EmptyCatalog {
    fn resolve(&self, _index: usize) -> Option<CatalogTexture<T>> {
        None
    }
}

impl<T: Clone> TextureCatalog<T> for [CatalogTexture<T>] {
    fn resolve(&self, index: usize) -> Option<CatalogTexture<T>> {
        self.get(index).cloned()
    }
}

impl<T: Clone> TextureCatalog<T> for Vec<CatalogTexture<T>> {
    fn resolve(&self, index: usize) -> Option<CatalogTexture<T>> {
        self.get(index).cloned()
    }
}

/// Supplies the standard uniform values. Invoked once per drawn pass.
pub trait UniformProvider {
    fn uniforms(&mut self, pass: PassId) -> FrameUniforms;
}

/// Issues the geometry for one full-viewport pass.
pub trait QuadDraw<B: Backend + ?Sized> {
    fn draw(&mut self, backend: &mut B);
}

/// Default draw primitive: one oversized triangle covering the viewport.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullscreenTriangle;

impl<B: Backend + ?Sized> QuadDraw<B> for FullscreenTriangle {
    fn draw(&mut self, backend: &mut B) {
        backend.draw_triangles(3);
    }
}
