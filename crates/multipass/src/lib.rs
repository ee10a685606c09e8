//! Multi-pass fragment renderer with ShaderToy-style feedback buffers.
//!
//! A document is up to four buffer passes (A-D), a final Image pass and a
//! Common source merged ahead of each of them. Every frame runs the passes
//! in a fixed order and, at the end, swaps the double-buffered targets of
//! the buffers that drew:
//!
//! ```text
//!   compile_pass(source) ─▶ merge Common ─▶ transpile ─▶ Backend::compile_program
//!                                                              │
//!   render_frame():                                            ▼
//!     Buffer A ─▶ Buffer B ─▶ Buffer C ─▶ Buffer D ─▶ Image ─▶ swap_drawn()
//!        │ write front                                  │ write presentation
//!        └─ read back (previous frame) ◀────────────────┘
//! ```
//!
//! `fragCoord` is the backend's native fragment coordinate without a flip.
//! With wgpu the origin is the top-left pixel and y grows downward, which is
//! upside down relative to bottom-left conventions. Buffer reads and catalog
//! images follow the same orientation, so feedback and texture lookups line
//! up with what a pass wrote.
//!
//! The core is generic over [`Backend`]. [`gpu::WgpuBackend`] renders
//! headlessly with `wgpu`; [`soft::SoftBackend`] evaluates Rust kernels on
//! the CPU and is what the test-suite drives.

pub mod backend;
pub mod error;
pub mod gpu;
pub mod manager;
pub mod orchestrator;
pub mod program;
pub mod soft;
pub mod target;
pub mod transpile;
pub mod types;
pub mod uniforms;

pub use backend::{
    Backend, CatalogTexture, EmptyCatalog, FullscreenTriangle, QuadDraw, TextureCatalog,
    UniformProvider,
};
pub use error::{AllocationError, CompileError, ConfigurationError};
pub use manager::TargetManager;
pub use orchestrator::{DocumentPass, Orchestrator};
pub use target::{RenderTarget, TargetPair};
pub use transpile::{merge_common, transpile};
pub use types::{
    BufferId, ChannelBinding, ChannelBindings, PassId, BUFFER_COUNT, CHANNEL_COUNT, RENDER_ORDER,
};
pub use uniforms::{effective_time_scale, FrameClock, FrameUniforms};
