use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::CompileError;
use crate::transpile::{merge_common, transpile};
use crate::types::{ChannelBindings, PassId};

/// Merges `common` ahead of `raw`, transpiles and compiles the result.
///
/// Nothing is installed here; callers decide when the returned program
/// replaces the active one.
pub fn compile_pass_source<B: Backend>(
    backend: &mut B,
    pass: PassId,
    common: &str,
    raw: &str,
) -> Result<B::Program, CompileError> {
    let source = transpile(&merge_common(common, raw));
    match backend.compile_program(pass.name(), &source) {
        Ok(program) => {
            info!(pass = %pass, bytes = source.len(), "compiled pass");
            Ok(program)
        }
        Err(err) => {
            warn!(pass = %pass, error = %err, "pass failed to compile");
            Err(err)
        }
    }
}

/// Compiled program state of one renderable pass.
pub struct PassSlot<B: Backend> {
    program: Option<B::Program>,
    channels: ChannelBindings,
    enabled: bool,
    compiled: bool,
    last_error: Option<String>,
}

impl<B: Backend> Default for PassSlot<B> {
    fn default() -> Self {
        Self {
            program: None,
            channels: ChannelBindings::new(),
            enabled: false,
            compiled: false,
            last_error: None,
        }
    }
}

impl<B: Backend> PassSlot<B> {
    /// Program to draw with, if the slot is enabled and compiled.
    pub fn active_program(&self) -> Option<&B::Program> {
        if self.enabled && self.compiled {
            self.program.as_ref()
        } else {
            None
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn channels(&self) -> &ChannelBindings {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelBindings {
        &mut self.channels
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Replaces the program and marks the slot runnable.
    pub fn install(&mut self, program: B::Program, channels: ChannelBindings) {
        self.program = Some(program);
        self.channels = channels;
        self.enabled = true;
        self.compiled = true;
        self.last_error = None;
    }

    /// Records a failed compile. The previous program is kept but not run.
    pub fn fail(&mut self, pass: PassId, err: &CompileError) {
        self.enabled = false;
        self.compiled = false;
        self.last_error = Some(format!("[{}] {}", pass.name(), err.diagnostic()));
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.last_error = None;
    }

    /// Drops the program and resets the slot.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftBackend;

    const KERNEL_SOURCE: &str = "// kernel: solid\nvoid mainImage(out vec4 c, in vec2 p) { c = vec4(1.0); }\n";

    #[test]
    fn failed_compile_keeps_previous_program_but_disables() {
        let mut backend = SoftBackend::new();
        backend.register_kernel("solid", |_| [1.0, 1.0, 1.0, 1.0]);
        let mut slot: PassSlot<SoftBackend> = PassSlot::default();

        let program = compile_pass_source(&mut backend, PassId::BufferA, "", KERNEL_SOURCE).unwrap();
        slot.install(program, ChannelBindings::new());
        assert!(slot.active_program().is_some());

        let err = compile_pass_source(&mut backend, PassId::BufferA, "", "void mainImage(").unwrap_err();
        slot.fail(PassId::BufferA, &err);
        assert!(slot.active_program().is_none());
        assert!(!slot.is_enabled());
        assert!(!slot.is_compiled());
        assert!(slot.last_error().unwrap().starts_with("[Buffer A] "));
    }

    #[test]
    fn common_source_is_merged_ahead_of_pass() {
        let mut backend = SoftBackend::new();
        backend.register_kernel("solid", |_| [0.0; 4]);
        let common = "// kernel: solid\nfloat helper() { return 1.0; }";
        let pass = "void mainImage(out vec4 c, in vec2 p) { c = vec4(helper()); }";
        assert!(compile_pass_source(&mut backend, PassId::Image, common, pass).is_ok());
        assert!(compile_pass_source(&mut backend, PassId::Image, "", pass).is_err());
    }
}
