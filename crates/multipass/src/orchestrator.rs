use std::array;

use tracing::{debug, info, trace, warn};

use crate::backend::{Backend, QuadDraw, TextureCatalog, UniformProvider};
use crate::error::{CompileError, ConfigurationError};
use crate::manager::TargetManager;
use crate::program::{compile_pass_source, PassSlot};
use crate::transpile::{transpile, DEBUG_TONEMAP_SOURCE};
use crate::types::{
    BufferId, ChannelBinding, ChannelBindings, PassId, BUFFER_COUNT, CHANNEL_COUNT, RENDER_ORDER,
};
use crate::uniforms::FrameUniforms;

const SLOT_COUNT: usize = BUFFER_COUNT + 1;
const IMAGE_SLOT: usize = BUFFER_COUNT;

/// One pass of a loaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPass {
    pub pass: PassId,
    pub source: String,
    pub channels: ChannelBindings,
}

impl DocumentPass {
    pub fn new(pass: PassId, source: impl Into<String>, channels: ChannelBindings) -> Self {
        Self {
            pass,
            source: source.into(),
            channels,
        }
    }
}

/// Compiles the passes of a multi-pass document and executes them once per
/// frame in the fixed order Buffer A, B, C, D, Image.
///
/// Every buffer pass writes the front surface of its pair and every reader
/// samples the back surface, so all buffer reads (self-reference included)
/// observe the previous frame. After Image, the pairs of the buffers that
/// drew this frame are swapped; a buffer that was skipped keeps presenting
/// its last successfully rendered content.
pub struct Orchestrator<B: Backend> {
    slots: [PassSlot<B>; SLOT_COUNT],
    common_source: String,
    targets: TargetManager<B>,
    width: u32,
    height: u32,
    debug_buffer: Option<BufferId>,
    debug_program: Option<B::Program>,
    debug_failed: bool,
    frame_index: u64,
}

impl<B: Backend> Orchestrator<B> {
    /// Creates an orchestrator for a `width` x `height` presentation. Buffer
    /// pairs are allocated lazily once a buffer pass compiles.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            slots: array::from_fn(|_| PassSlot::default()),
            common_source: String::new(),
            targets: TargetManager::new(),
            width,
            height,
            debug_buffer: None,
            debug_program: None,
            debug_failed: false,
            frame_index: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn targets(&self) -> &TargetManager<B> {
        &self.targets
    }

    /// Number of frames rendered since creation or the last document load.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn common_source(&self) -> &str {
        &self.common_source
    }

    /// Replaces the shared source. Already compiled passes keep their
    /// programs until they are recompiled.
    pub fn set_common_source(&mut self, source: impl Into<String>) {
        self.common_source = source.into();
    }

    /// Compiles `raw` for `pass` and installs it on success.
    ///
    /// `Common` only stores the shared source. Blank source disables the
    /// pass (and destroys its buffer pair) without reporting an error. On
    /// failure the pass is disabled and the diagnostic is recorded; no other
    /// pass is affected.
    pub fn compile_pass(
        &mut self,
        backend: &mut B,
        pass: PassId,
        raw: &str,
        channels: ChannelBindings,
    ) -> Result<(), CompileError> {
        let Some(index) = pass.slot_index() else {
            self.set_common_source(raw);
            return Ok(());
        };

        if raw.trim().is_empty() {
            debug!(pass = %pass, "empty source; disabling pass");
            *self.slots[index].channels_mut() = channels;
            self.disable_pass(backend, pass);
            return Ok(());
        }

        match compile_pass_source(backend, pass, &self.common_source, raw) {
            Ok(program) => {
                self.slots[index].install(program, channels);
                if let Some(id) = pass.buffer() {
                    self.ensure_target(backend, id);
                }
                Ok(())
            }
            Err(err) => {
                self.slots[index].fail(pass, &err);
                Err(err)
            }
        }
    }

    /// Recompiles Image with its current channel bindings.
    pub fn compile_main_pass(&mut self, backend: &mut B, raw: &str) -> Result<(), CompileError> {
        let channels = *self.slots[IMAGE_SLOT].channels();
        self.compile_pass(backend, PassId::Image, raw, channels)
    }

    /// Recompiles a buffer pass with its current channel bindings.
    pub fn compile_buffer_pass(
        &mut self,
        backend: &mut B,
        id: BufferId,
        raw: &str,
    ) -> Result<(), CompileError> {
        let channels = *self.slots[id.index()].channels();
        self.compile_pass(backend, id.pass(), raw, channels)
    }

    /// Stops running `pass` and releases its buffer pair. The compiled
    /// program is kept until replaced.
    pub fn disable_pass(&mut self, backend: &mut B, pass: PassId) {
        let Some(index) = pass.slot_index() else {
            self.common_source.clear();
            return;
        };
        self.slots[index].disable();
        if let Some(id) = pass.buffer() {
            self.targets.disable(backend, id);
        }
    }

    pub fn is_pass_enabled(&self, pass: PassId) -> bool {
        pass.slot_index()
            .is_some_and(|index| self.slots[index].is_enabled())
    }

    /// Last compile error of `pass`, prefixed with its name.
    pub fn pass_error(&self, pass: PassId) -> Option<&str> {
        pass.slot_index()
            .and_then(|index| self.slots[index].last_error())
    }

    /// Every recorded error in render order, separated by blank lines.
    pub fn all_errors(&self) -> String {
        RENDER_ORDER
            .iter()
            .filter_map(|pass| self.pass_error(*pass))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn has_valid_main_pass(&self) -> bool {
        let image = &self.slots[IMAGE_SLOT];
        image.is_enabled() && image.is_compiled()
    }

    pub fn channel_bindings(&self, pass: PassId) -> Option<&ChannelBindings> {
        pass.slot_index().map(|index| self.slots[index].channels())
    }

    /// Rebinds one input channel. Takes effect on the next frame.
    pub fn set_channel_binding(
        &mut self,
        pass: PassId,
        channel: usize,
        binding: ChannelBinding,
    ) -> Result<(), ConfigurationError> {
        let index = pass
            .slot_index()
            .ok_or(ConfigurationError::NotRenderable(pass.name()))?;
        self.slots[index].channels_mut().set(channel, binding)
    }

    /// Replaces the Image step with a tone-mapped view of `buffer`. While the
    /// buffer has no pair or the view fails to compile, Image renders as usual.
    pub fn set_debug_buffer(&mut self, buffer: Option<BufferId>) {
        if self.debug_buffer != buffer {
            debug!(buffer = ?buffer, "debug buffer view changed");
        }
        self.debug_buffer = buffer;
    }

    pub fn debug_buffer(&self) -> Option<BufferId> {
        self.debug_buffer
    }

    /// Most recently completed output of `id`.
    pub fn buffer_texture(&self, backend: &B, id: BufferId) -> Option<B::Texture> {
        self.targets.readable_texture(backend, id)
    }

    /// Reallocates buffer pairs for a new presentation size, discarding
    /// feedback history. No-op when the size is unchanged.
    pub fn resize(&mut self, backend: &mut B, width: u32, height: u32) {
        if (self.width, self.height) == (width, height) {
            return;
        }
        info!(width, height, "resizing multipass targets");
        self.width = width;
        self.height = height;
        self.targets.resize(backend, width, height);
    }

    /// Clears all buffer pairs to transparent black.
    pub fn reset_buffers(&mut self, backend: &mut B) {
        self.targets.clear_all(backend);
    }

    /// Replaces the whole document.
    ///
    /// Passes missing from `passes` are disabled, Common is applied before any
    /// other pass compiles, and every buffer is cleared afterwards so no stale
    /// feedback leaks into the new document. Returns the passes that failed.
    pub fn load_document(
        &mut self,
        backend: &mut B,
        passes: &[DocumentPass],
    ) -> Vec<(PassId, CompileError)> {
        for pass in RENDER_ORDER {
            if !passes.iter().any(|entry| entry.pass == pass) {
                self.disable_pass(backend, pass);
            }
        }

        let common = passes
            .iter()
            .rev()
            .find(|entry| entry.pass == PassId::Common)
            .map(|entry| entry.source.clone())
            .unwrap_or_default();
        self.set_common_source(common);

        let mut failures = Vec::new();
        for entry in passes.iter().filter(|entry| entry.pass.is_renderable()) {
            if let Err(err) = self.compile_pass(backend, entry.pass, &entry.source, entry.channels) {
                failures.push((entry.pass, err));
            }
        }

        self.targets.clear_all(backend);
        self.frame_index = 0;
        info!(
            passes = passes.len(),
            failed = failures.len(),
            buffers = self.targets.enabled_count(),
            "loaded multipass document"
        );
        failures
    }

    /// Renders one frame.
    ///
    /// Passes that are disabled, failed to compile or whose buffer could not
    /// be allocated are skipped; the rest of the frame still runs. Only the
    /// pairs of buffers that drew are swapped.
    pub fn render_frame<C, U, Q>(
        &mut self,
        backend: &mut B,
        catalog: &C,
        uniforms: &mut U,
        quad: &mut Q,
    ) where
        C: TextureCatalog<B::Texture> + ?Sized,
        U: UniformProvider + ?Sized,
        Q: QuadDraw<B> + ?Sized,
    {
        backend.begin_frame();
        let mut drawn = [false; BUFFER_COUNT];

        for pass in RENDER_ORDER {
            if pass == PassId::Image {
                if let Some(id) = self.debug_buffer {
                    if self.draw_debug_view(backend, id, uniforms, quad) {
                        continue;
                    }
                }
            }

            let Some(index) = pass.slot_index() else {
                continue;
            };
            if self.slots[index].active_program().is_none() {
                trace!(pass = %pass, "skipping inactive pass");
                continue;
            }

            match pass.buffer() {
                Some(id) => {
                    if !self.ensure_target(backend, id) {
                        continue;
                    }
                    self.targets.bind_for_write(backend, id);
                    backend.clear_bound();
                }
                None => backend.bind_presentation(),
            }

            let slot = &self.slots[index];
            let Some(program) = slot.active_program() else {
                continue;
            };
            backend.use_program(program);
            let mut frame = uniforms.uniforms(pass);
            self.bind_channels(backend, catalog, slot.channels(), &mut frame);
            backend.set_uniforms(&frame);
            quad.draw(backend);
            backend.unbind();
            if let Some(id) = pass.buffer() {
                drawn[id.index()] = true;
            }
        }

        self.targets.swap_drawn(&drawn);
        backend.end_frame();
        self.frame_index += 1;
    }

    /// Releases every program and buffer pair.
    pub fn teardown(&mut self, backend: &mut B) {
        self.targets.destroy_all(backend);
        for slot in &mut self.slots {
            slot.clear();
        }
        self.common_source.clear();
        self.debug_program = None;
        self.debug_failed = false;
        self.frame_index = 0;
        debug!("multipass orchestrator torn down");
    }

    /// Makes sure the pair for `id` exists. Returns `false` when it could not
    /// be allocated.
    fn ensure_target(&mut self, backend: &mut B, id: BufferId) -> bool {
        if self.width == 0 || self.height == 0 {
            trace!(buffer = %id, "resolution unknown; deferring allocation");
            return false;
        }
        if self.targets.is_enabled(id) && self.targets.dimensions() == (self.width, self.height) {
            return true;
        }
        match self.targets.initialize(backend, id, self.width, self.height) {
            Ok(()) => true,
            Err(err) => {
                warn!(buffer = %id, error = %err, "skipping buffer without render target");
                false
            }
        }
    }

    fn bind_channels<C>(
        &self,
        backend: &mut B,
        catalog: &C,
        channels: &ChannelBindings,
        frame: &mut FrameUniforms,
    ) where
        C: TextureCatalog<B::Texture> + ?Sized,
    {
        for (channel, binding) in channels.slots().iter().enumerate() {
            let (texture, resolution) = match *binding {
                ChannelBinding::None => (None, [0.0; 3]),
                ChannelBinding::Texture(index) => match catalog.resolve(index) {
                    Some(entry) => (
                        Some(entry.texture),
                        [entry.width as f32, entry.height as f32, 1.0],
                    ),
                    None => {
                        trace!(channel, index, "catalog texture unavailable");
                        (None, [0.0; 3])
                    }
                },
                ChannelBinding::Buffer(id) => match self.targets.readable_texture(backend, id) {
                    Some(texture) => {
                        let (width, height) = self.targets.dimensions();
                        (Some(texture), [width as f32, height as f32, 1.0])
                    }
                    None => {
                        trace!(channel, buffer = %id, "buffer input not allocated");
                        (None, [0.0; 3])
                    }
                },
            };
            backend.bind_channel(channel, texture.as_ref());
            frame.set_channel_resolution(channel, resolution);
        }
    }

    /// Draws the tone-mapped view of `id` into the presentation target.
    /// Returns `false` without drawing when the buffer has no pair or the
    /// view does not compile; the compile is retried on the next frame.
    fn draw_debug_view<U, Q>(
        &mut self,
        backend: &mut B,
        id: BufferId,
        uniforms: &mut U,
        quad: &mut Q,
    ) -> bool
    where
        U: UniformProvider + ?Sized,
        Q: QuadDraw<B> + ?Sized,
    {
        let Some(texture) = self.targets.readable_texture(backend, id) else {
            trace!(buffer = %id, "debug buffer not allocated; drawing Image");
            return false;
        };
        if self.debug_program.is_none() {
            match backend.compile_program("debug tonemap", &transpile(DEBUG_TONEMAP_SOURCE)) {
                Ok(program) => {
                    self.debug_program = Some(program);
                    self.debug_failed = false;
                }
                Err(err) => {
                    if !self.debug_failed {
                        warn!(error = %err, "debug view failed to compile");
                    }
                    self.debug_failed = true;
                    return false;
                }
            }
        }
        let Some(program) = &self.debug_program else {
            return false;
        };

        backend.bind_presentation();
        backend.use_program(program);
        let mut frame = uniforms.uniforms(PassId::Image);
        let (width, height) = self.targets.dimensions();
        backend.bind_channel(0, Some(&texture));
        frame.set_channel_resolution(0, [width as f32, height as f32, 1.0]);
        for channel in 1..CHANNEL_COUNT {
            backend.bind_channel(channel, None);
            frame.set_channel_resolution(channel, [0.0; 3]);
        }
        backend.set_uniforms(&frame);
        quad.draw(backend);
        backend.unbind();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftBackend;

    fn backend() -> SoftBackend {
        let mut backend = SoftBackend::with_presentation(4, 4);
        backend.register_kernel("red", |_| [1.0, 0.0, 0.0, 1.0]);
        backend
    }

    const RED: &str = "// kernel: red\nvoid mainImage(out vec4 c, in vec2 p) { c = vec4(1, 0, 0, 1); }";

    #[test]
    fn common_pass_only_stores_shared_source() {
        let mut backend = backend();
        let mut orchestrator = Orchestrator::new(4, 4);
        orchestrator
            .compile_pass(&mut backend, PassId::Common, "float k = 1.0;", ChannelBindings::new())
            .unwrap();
        assert_eq!(orchestrator.common_source(), "float k = 1.0;");
        assert!(!orchestrator.is_pass_enabled(PassId::Common));
        assert!(matches!(
            orchestrator.set_channel_binding(PassId::Common, 0, ChannelBinding::None),
            Err(ConfigurationError::NotRenderable("Common"))
        ));
    }

    #[test]
    fn compile_allocates_buffer_pair_and_reports_main_pass() {
        let mut backend = backend();
        let mut orchestrator = Orchestrator::new(4, 4);
        assert!(!orchestrator.has_valid_main_pass());
        orchestrator
            .compile_buffer_pass(&mut backend, BufferId::C, RED)
            .unwrap();
        assert!(orchestrator.targets().is_enabled(BufferId::C));
        orchestrator.compile_main_pass(&mut backend, RED).unwrap();
        assert!(orchestrator.has_valid_main_pass());
        assert_eq!(orchestrator.all_errors(), "");
    }

    #[test]
    fn errors_are_joined_in_render_order() {
        let mut backend = backend();
        let mut orchestrator = Orchestrator::new(4, 4);
        let broken = "void mainImage(";
        orchestrator
            .compile_pass(&mut backend, PassId::Image, broken, ChannelBindings::new())
            .unwrap_err();
        orchestrator
            .compile_pass(&mut backend, PassId::BufferA, broken, ChannelBindings::new())
            .unwrap_err();
        let errors = orchestrator.all_errors();
        let parts: Vec<_> = errors.split("\n\n").collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("[Buffer A] "));
        assert!(parts[1].starts_with("[Image] "));
    }

    #[test]
    fn recompiling_fixes_a_failed_pass() {
        let mut backend = backend();
        let mut orchestrator = Orchestrator::new(4, 4);
        orchestrator
            .compile_pass(&mut backend, PassId::Image, "void mainImage(", ChannelBindings::new())
            .unwrap_err();
        assert!(orchestrator.pass_error(PassId::Image).is_some());
        orchestrator.compile_main_pass(&mut backend, RED).unwrap();
        assert!(orchestrator.pass_error(PassId::Image).is_none());
        assert!(orchestrator.is_pass_enabled(PassId::Image));
    }

    #[test]
    fn teardown_releases_everything() {
        let mut backend = backend();
        let mut orchestrator = Orchestrator::new(4, 4);
        orchestrator
            .compile_buffer_pass(&mut backend, BufferId::A, RED)
            .unwrap();
        orchestrator.teardown(&mut backend);
        assert_eq!(backend.live_surfaces(), 0);
        assert!(!orchestrator.is_pass_enabled(PassId::BufferA));
        assert_eq!(orchestrator.frame_index(), 0);
    }

    #[test]
    fn unknown_resolution_defers_buffer_allocation() {
        let mut backend = backend();
        let mut orchestrator = Orchestrator::new(0, 0);
        orchestrator
            .compile_buffer_pass(&mut backend, BufferId::B, RED)
            .unwrap();
        assert!(!orchestrator.targets().is_enabled(BufferId::B));

        orchestrator.resize(&mut backend, 4, 4);
        orchestrator.render_frame(
            &mut backend,
            &crate::backend::EmptyCatalog,
            &mut crate::uniforms::FrameClock::new(4, 4),
            &mut crate::backend::FullscreenTriangle,
        );
        assert!(orchestrator.targets().is_enabled(BufferId::B));
    }
}
