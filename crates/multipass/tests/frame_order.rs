use std::time::{Duration, Instant};

use multipass::soft::SoftBackend;
use multipass::{
    BufferId, ChannelBinding, ChannelBindings, EmptyCatalog, FrameClock, FullscreenTriangle,
    Orchestrator, PassId,
};

const SIZE: u32 = 4;

fn pass_source(kernel: &str) -> String {
    format!(
        "// kernel: {kernel}\nvoid mainImage(out vec4 fragColor, in vec2 fragCoord) {{\n    fragColor = vec4(0.0);\n}}\n"
    )
}

fn backend() -> SoftBackend {
    let mut backend = SoftBackend::with_presentation(SIZE, SIZE);
    // Adds one to whatever channel 0 held last frame.
    backend.register_kernel("accumulate", |f| {
        let previous = f.same_texel(0);
        [previous[0] + 1.0, 0.0, 0.0, 1.0]
    });
    backend.register_kernel("copy", |f| f.same_texel(0));
    backend.register_kernel("coord", |f| [f.frag_coord[0], f.frag_coord[1], 0.0, 1.0]);
    backend.register_kernel("white", |_| [1.0, 1.0, 1.0, 1.0]);
    backend
}

fn channel0(binding: ChannelBinding) -> ChannelBindings {
    ChannelBindings::new().with(0, binding).unwrap()
}

fn render(orchestrator: &mut Orchestrator<SoftBackend>, backend: &mut SoftBackend, clock: &mut FrameClock) {
    clock.tick(Instant::now());
    orchestrator.render_frame(backend, &EmptyCatalog, clock, &mut FullscreenTriangle);
}

fn clock() -> FrameClock {
    FrameClock::fixed_step(SIZE, SIZE, Duration::from_millis(16))
}

fn red_at(backend: &SoftBackend, orchestrator: &Orchestrator<SoftBackend>, id: BufferId) -> f32 {
    let texture = orchestrator.buffer_texture(backend, id).unwrap();
    backend.pixel(texture, 1, 1).unwrap()[0]
}

#[test]
fn self_referencing_buffer_sees_previous_frame() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferA,
            &pass_source("accumulate"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();

    for expected in 1..=4 {
        render(&mut orchestrator, &mut backend, &mut clock);
        assert_eq!(red_at(&backend, &orchestrator, BufferId::A), expected as f32);
    }
    assert_eq!(orchestrator.frame_index(), 4);
}

#[test]
fn image_reads_buffer_output_of_previous_frame() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferA,
            &pass_source("accumulate"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::Image,
            &pass_source("copy"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();

    for frame in 0..4 {
        render(&mut orchestrator, &mut backend, &mut clock);
        // Buffer A wrote frame + 1 this frame; Image sampled last frame's value.
        assert_eq!(backend.presentation_pixel(2, 2).unwrap()[0], frame as f32);
        assert_eq!(red_at(&backend, &orchestrator, BufferId::A), (frame + 1) as f32);
    }
}

#[test]
fn later_buffer_reads_earlier_buffer_from_previous_frame() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferA,
            &pass_source("accumulate"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferB,
            &pass_source("copy"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();

    render(&mut orchestrator, &mut backend, &mut clock);
    render(&mut orchestrator, &mut backend, &mut clock);
    assert_eq!(red_at(&backend, &orchestrator, BufferId::A), 2.0);
    assert_eq!(red_at(&backend, &orchestrator, BufferId::B), 1.0);
}

#[test]
fn broken_buffer_does_not_stop_other_passes() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferA,
            &pass_source("accumulate"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();
    let err = orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferB,
            "void mainImage(out vec4 c, in vec2 p) { c = vec4(1.0; }",
            ChannelBindings::new(),
        )
        .unwrap_err();
    assert!(!err.diagnostic().is_empty());
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::Image,
            &pass_source("copy"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();

    assert!(!orchestrator.is_pass_enabled(PassId::BufferB));
    assert!(orchestrator.is_pass_enabled(PassId::BufferA));
    assert!(orchestrator.has_valid_main_pass());
    let errors = orchestrator.all_errors();
    assert!(errors.starts_with("[Buffer B] "));
    assert!(!errors.contains("[Buffer A]"));
    assert!(!errors.contains("[Image]"));

    render(&mut orchestrator, &mut backend, &mut clock);
    render(&mut orchestrator, &mut backend, &mut clock);
    assert_eq!(backend.draw_calls(), 4);
    assert_eq!(backend.presentation_pixel(0, 0).unwrap()[0], 1.0);
}

#[test]
fn failed_buffer_keeps_last_rendered_content() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferA,
            &pass_source("accumulate"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::Image,
            &pass_source("copy"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();
    for _ in 0..3 {
        render(&mut orchestrator, &mut backend, &mut clock);
    }
    assert_eq!(red_at(&backend, &orchestrator, BufferId::A), 3.0);

    orchestrator
        .compile_buffer_pass(&mut backend, BufferId::A, "void mainImage(out vec4 c, in vec2 p) {")
        .unwrap_err();
    assert!(orchestrator.targets().is_enabled(BufferId::A));
    for _ in 0..4 {
        render(&mut orchestrator, &mut backend, &mut clock);
        assert_eq!(backend.presentation_pixel(2, 2).unwrap()[0], 3.0);
        assert_eq!(red_at(&backend, &orchestrator, BufferId::A), 3.0);
    }
}

#[test]
fn passes_compiled_before_a_failure_keep_rendering() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferA,
            &pass_source("accumulate"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::BufferB,
            &pass_source("copy"),
            channel0(ChannelBinding::Buffer(BufferId::A)),
        )
        .unwrap();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::Image,
            &pass_source("copy"),
            channel0(ChannelBinding::Buffer(BufferId::B)),
        )
        .unwrap();
    render(&mut orchestrator, &mut backend, &mut clock);
    render(&mut orchestrator, &mut backend, &mut clock);
    assert_eq!(red_at(&backend, &orchestrator, BufferId::A), 2.0);
    assert_eq!(red_at(&backend, &orchestrator, BufferId::B), 1.0);
    assert_eq!(backend.draw_calls(), 6);

    orchestrator
        .compile_buffer_pass(&mut backend, BufferId::B, "void mainImage(out vec4 c, in vec2 p) { c = ; }}")
        .unwrap_err();
    assert!(orchestrator.is_pass_enabled(PassId::BufferA));
    assert!(orchestrator.has_valid_main_pass());

    for frame in 3..=5 {
        render(&mut orchestrator, &mut backend, &mut clock);
        assert_eq!(red_at(&backend, &orchestrator, BufferId::A), frame as f32);
        assert_eq!(red_at(&backend, &orchestrator, BufferId::B), 1.0);
        assert_eq!(backend.presentation_pixel(1, 1).unwrap()[0], 1.0);
    }
    assert_eq!(backend.draw_calls(), 6 + 3 * 2);
}

#[test]
fn image_receives_native_fragment_coordinates() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    orchestrator
        .compile_pass(&mut backend, PassId::Image, &pass_source("coord"), ChannelBindings::new())
        .unwrap();

    render(&mut orchestrator, &mut backend, &mut clock);
    assert_eq!(backend.presentation_pixel(0, 0), Some([0.5, 0.5, 0.0, 1.0]));
    assert_eq!(backend.presentation_pixel(3, 1), Some([3.5, 1.5, 0.0, 1.0]));
}

#[test]
fn debug_view_replaces_image_and_leaves_buffers_running() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    orchestrator
        .compile_pass(&mut backend, PassId::BufferA, &pass_source("white"), ChannelBindings::new())
        .unwrap();
    orchestrator
        .compile_pass(&mut backend, PassId::Image, &pass_source("coord"), ChannelBindings::new())
        .unwrap();
    orchestrator.set_debug_buffer(Some(BufferId::A));

    render(&mut orchestrator, &mut backend, &mut clock);
    assert_eq!(backend.presentation_pixel(0, 0).unwrap()[0], 0.0);

    render(&mut orchestrator, &mut backend, &mut clock);
    let expected = 0.5_f32.powf(1.0 / 2.2);
    let pixel = backend.presentation_pixel(0, 0).unwrap();
    assert!((pixel[0] - expected).abs() < 1e-5);
    assert_eq!(pixel[3], 1.0);
    assert_eq!(red_at(&backend, &orchestrator, BufferId::A), 1.0);

    orchestrator.set_debug_buffer(None);
    render(&mut orchestrator, &mut backend, &mut clock);
    assert_eq!(backend.presentation_pixel(0, 0), Some([0.5, 0.5, 0.0, 1.0]));
}

#[test]
fn allocation_failure_skips_only_that_buffer() {
    let mut backend = backend();
    let mut orchestrator = Orchestrator::new(SIZE, SIZE);
    let mut clock = clock();
    backend.fail_allocations_after(2);
    orchestrator
        .compile_pass(&mut backend, PassId::BufferA, &pass_source("white"), ChannelBindings::new())
        .unwrap();
    orchestrator
        .compile_pass(&mut backend, PassId::BufferB, &pass_source("white"), ChannelBindings::new())
        .unwrap();
    orchestrator
        .compile_pass(
            &mut backend,
            PassId::Image,
            &pass_source("copy"),
            channel0(ChannelBinding::Buffer(BufferId::B)),
        )
        .unwrap();
    assert!(orchestrator.targets().is_enabled(BufferId::A));
    assert!(!orchestrator.targets().is_enabled(BufferId::B));

    render(&mut orchestrator, &mut backend, &mut clock);
    assert_eq!(backend.draw_calls(), 2);
    assert_eq!(backend.presentation_pixel(0, 0), Some([0.0; 4]));

    backend.allow_allocations();
    render(&mut orchestrator, &mut backend, &mut clock);
    assert!(orchestrator.targets().is_enabled(BufferId::B));
    assert_eq!(backend.draw_calls(), 5);
}
