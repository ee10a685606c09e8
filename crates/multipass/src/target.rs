use std::mem;

use tracing::debug;

use crate::backend::Backend;
use crate::error::AllocationError;

/// One off-screen color surface and its size.
pub struct RenderTarget<B: Backend> {
    surface: B::Surface,
    width: u32,
    height: u32,
}

impl<B: Backend> RenderTarget<B> {
    pub fn create(backend: &mut B, label: &str, width: u32, height: u32) -> Result<Self, AllocationError> {
        let surface = backend.create_surface(label, width, height)?;
        Ok(Self {
            surface,
            width,
            height,
        })
    }

    pub fn surface(&self) -> &B::Surface {
        &self.surface
    }

    pub fn texture(&self, backend: &B) -> B::Texture {
        backend.surface_texture(&self.surface)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn destroy(self, backend: &mut B) {
        backend.destroy_surface(self.surface);
    }
}

/// Ping-pong pair: `front` is drawn into this frame, `back` holds the last
/// completed frame and is the only surface other passes may sample.
pub struct TargetPair<B: Backend> {
    label: String,
    front: RenderTarget<B>,
    back: RenderTarget<B>,
}

impl<B: Backend> TargetPair<B> {
    /// Allocates both surfaces. If the second allocation fails the first is
    /// released again.
    pub fn create(
        backend: &mut B,
        label: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<Self, AllocationError> {
        let label = label.into();
        let front = RenderTarget::create(backend, &format!("{label} front"), width, height)?;
        let back = match RenderTarget::create(backend, &format!("{label} back"), width, height) {
            Ok(back) => back,
            Err(err) => {
                front.destroy(backend);
                return Err(err);
            }
        };
        Ok(Self { label, front, back })
    }

    pub fn size(&self) -> (u32, u32) {
        self.front.size()
    }

    /// Reallocates both surfaces at the new size, dropping feedback history.
    /// Returns `Ok(false)` when the size is unchanged. On failure the pair
    /// still holds its old surfaces.
    pub fn resize(&mut self, backend: &mut B, width: u32, height: u32) -> Result<bool, AllocationError> {
        if self.size() == (width, height) {
            return Ok(false);
        }
        let (old_width, old_height) = self.size();
        let replacement = TargetPair::create(backend, self.label.clone(), width, height)?;
        let previous = mem::replace(self, replacement);
        previous.destroy(backend);
        debug!(
            target = %self.label,
            old_width,
            old_height,
            width,
            height,
            "reallocated target pair; feedback history discarded"
        );
        Ok(true)
    }

    /// Exchanges the roles of front and back.
    pub fn swap(&mut self) {
        mem::swap(&mut self.front, &mut self.back);
    }

    /// Texture holding the previous completed frame.
    pub fn readable_texture(&self, backend: &B) -> B::Texture {
        self.back.texture(backend)
    }

    /// Texture of the surface currently designated for writing.
    pub fn written_texture(&self, backend: &B) -> B::Texture {
        self.front.texture(backend)
    }

    pub fn bind_for_write(&self, backend: &mut B) {
        backend.bind_surface(self.front.surface());
    }

    pub fn clear(&self, backend: &mut B) {
        backend.clear_surface(self.front.surface());
        backend.clear_surface(self.back.surface());
    }

    pub fn destroy(self, backend: &mut B) {
        self.front.destroy(backend);
        self.back.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftBackend;

    #[test]
    fn swap_exchanges_readable_and_written() {
        let mut backend = SoftBackend::new();
        let mut pair = TargetPair::create(&mut backend, "Buffer A", 4, 4).unwrap();
        let readable = pair.readable_texture(&backend);
        let written = pair.written_texture(&backend);
        assert_ne!(readable, written);

        pair.swap();
        assert_eq!(pair.readable_texture(&backend), written);
        assert_eq!(pair.written_texture(&backend), readable);
    }

    #[test]
    fn resize_to_same_size_keeps_surfaces() {
        let mut backend = SoftBackend::new();
        let mut pair = TargetPair::create(&mut backend, "Buffer A", 8, 8).unwrap();
        let before = pair.readable_texture(&backend);
        assert!(!pair.resize(&mut backend, 8, 8).unwrap());
        assert_eq!(pair.readable_texture(&backend), before);
        assert_eq!(backend.allocations(), 2);

        assert!(pair.resize(&mut backend, 16, 8).unwrap());
        assert_eq!(pair.size(), (16, 8));
        assert_ne!(pair.readable_texture(&backend), before);
        assert_eq!(backend.live_surfaces(), 2);
    }

    #[test]
    fn failed_second_allocation_releases_first() {
        let mut backend = SoftBackend::new();
        backend.fail_allocations_after(1);
        assert!(TargetPair::create(&mut backend, "Buffer C", 4, 4).is_err());
        assert_eq!(backend.live_surfaces(), 0);
    }
}
