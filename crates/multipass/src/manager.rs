use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::AllocationError;
use crate::target::TargetPair;
use crate::types::{BufferId, BUFFER_COUNT};

/// Owns the double-buffered pairs backing buffers A-D.
///
/// All enabled pairs share the manager's dimensions. Texture handles handed
/// out by the manager must not be cached across [`TargetManager::resize`],
/// [`TargetManager::disable`] or [`TargetManager::destroy_all`].
pub struct TargetManager<B: Backend> {
    pairs: [Option<TargetPair<B>>; BUFFER_COUNT],
    width: u32,
    height: u32,
}

impl<B: Backend> Default for TargetManager<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> TargetManager<B> {
    pub fn new() -> Self {
        Self {
            pairs: [None, None, None, None],
            width: 0,
            height: 0,
        }
    }

    /// Size shared by the enabled pairs: the last `resize`, or the last
    /// successful `initialize`. `(0, 0)` before either.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Creates the pair for `id` if absent. A size different from the
    /// current one resizes every enabled pair first, so all pairs keep
    /// sharing one size. Idempotent for an enabled pair of the same size.
    pub fn initialize(
        &mut self,
        backend: &mut B,
        id: BufferId,
        width: u32,
        height: u32,
    ) -> Result<(), AllocationError> {
        if (self.width, self.height) != (width, height) && self.enabled_count() > 0 {
            self.resize(backend, width, height);
        }
        if self.pairs[id.index()].is_some() {
            return Ok(());
        }
        let pair = TargetPair::create(backend, id.to_string(), width, height)?;
        debug!(buffer = %id, width, height, "created target pair");
        self.pairs[id.index()] = Some(pair);
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Destroys the pair for `id`. No-op when it is not enabled.
    pub fn disable(&mut self, backend: &mut B, id: BufferId) {
        if let Some(pair) = self.pairs[id.index()].take() {
            pair.destroy(backend);
            debug!(buffer = %id, "destroyed target pair");
        }
    }

    /// Resizes every enabled pair. Pairs that fail to reallocate are dropped
    /// and come back on the next `initialize`.
    pub fn resize(&mut self, backend: &mut B, width: u32, height: u32) {
        if (self.width, self.height) == (width, height) {
            return;
        }
        self.width = width;
        self.height = height;
        for (index, slot) in self.pairs.iter_mut().enumerate() {
            let Some(pair) = slot.as_mut() else { continue };
            if let Err(err) = pair.resize(backend, width, height) {
                if let Some(stale) = slot.take() {
                    stale.destroy(backend);
                }
                warn!(
                    buffer = %BufferId::ALL[index],
                    error = %err,
                    "dropping target pair after failed resize"
                );
            }
        }
    }

    /// Clears both surfaces of every enabled pair to transparent black.
    pub fn clear_all(&mut self, backend: &mut B) {
        for pair in self.pairs.iter().flatten() {
            pair.clear(backend);
        }
    }

    /// Swaps every enabled pair.
    pub fn swap_all(&mut self) {
        self.swap_drawn(&[true; BUFFER_COUNT]);
    }

    /// Swaps the enabled pairs flagged in `drawn`. Last step of a frame;
    /// unflagged pairs keep their readable surface.
    pub fn swap_drawn(&mut self, drawn: &[bool; BUFFER_COUNT]) {
        for (pair, drawn) in self.pairs.iter_mut().zip(drawn) {
            if let (Some(pair), true) = (pair.as_mut(), *drawn) {
                pair.swap();
            }
        }
    }

    pub fn destroy_all(&mut self, backend: &mut B) {
        for id in BufferId::ALL {
            self.disable(backend, id);
        }
    }

    pub fn is_enabled(&self, id: BufferId) -> bool {
        self.pairs[id.index()].is_some()
    }

    pub fn enabled_count(&self) -> usize {
        self.pairs.iter().flatten().count()
    }

    /// Previous completed frame of `id`, if its pair exists.
    pub fn readable_texture(&self, backend: &B, id: BufferId) -> Option<B::Texture> {
        self.pairs[id.index()]
            .as_ref()
            .map(|pair| pair.readable_texture(backend))
    }

    pub fn written_texture(&self, backend: &B, id: BufferId) -> Option<B::Texture> {
        self.pairs[id.index()]
            .as_ref()
            .map(|pair| pair.written_texture(backend))
    }

    /// Binds the write surface of `id`. Returns `false` when it has no pair.
    pub fn bind_for_write(&self, backend: &mut B, id: BufferId) -> bool {
        match &self.pairs[id.index()] {
            Some(pair) => {
                pair.bind_for_write(backend);
                true
            }
            None => false,
        }
    }
}
