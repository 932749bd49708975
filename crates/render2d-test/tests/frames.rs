//! Frame orchestration against the mock device.

use approx::assert_relative_eq;
use ash::vk;
use render2d_core::{Color, OrthoBounds, Rect, Transform2d};
use render2d_gpu::GpuError;
use render2d_render::{
    FrameConfig, FrameOrchestrator, FrameOutcome, FrameTargets, SkipReason, TransformUniforms,
    COLOR_UNIFORM_SIZE, QUAD_INDICES, QUAD_VERTICES,
};
use render2d_test::mock::DEVICE_LOCAL_TYPE;
use render2d_test::{Call, TestHarness};

fn square() -> Rect {
    Rect::from_xywh(100.0, 100.0, 200.0, 300.0)
}

fn run(orchestrator: &mut FrameOrchestrator, frames: usize) -> Vec<FrameOutcome> {
    (0..frames)
        .map(|_| orchestrator.draw_rect(square(), Color::RED).unwrap())
        .collect()
}

#[test]
fn ring_size_defaults_to_image_count_minus_one() {
    let three = TestHarness::with_image_count(3, 800, 600);
    let four = TestHarness::with_image_count(4, 800, 600);

    assert_eq!(
        three
            .orchestrator(FrameConfig::default())
            .unwrap()
            .frames_in_flight(),
        2
    );
    assert_eq!(
        four.orchestrator(FrameConfig::default())
            .unwrap()
            .frames_in_flight(),
        3
    );
    assert_eq!(
        three
            .orchestrator(FrameConfig::default().with_frames_in_flight(0))
            .unwrap()
            .frames_in_flight(),
        1
    );
}

#[test]
fn ring_cycles_through_slots() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness
        .orchestrator(FrameConfig::default().with_frames_in_flight(2))
        .unwrap();

    let outcomes = run(&mut orchestrator, 5);

    let slots: Vec<_> = outcomes.iter().map(FrameOutcome::slot).collect();
    assert_eq!(slots, [0, 1, 0, 1, 0]);
    assert!(outcomes.iter().all(FrameOutcome::is_presented));

    // Image indices come from the swapchain, not from the ring.
    let images: Vec<_> = outcomes
        .iter()
        .map(|outcome| match outcome {
            FrameOutcome::Presented { image_index, .. } => *image_index,
            FrameOutcome::Skipped { .. } => unreachable!(),
        })
        .collect();
    assert_eq!(images, [0, 1, 2, 0, 1]);

    assert_eq!(orchestrator.current_index(), 1);
    assert_eq!(orchestrator.frame_count(), 5);
    assert_eq!(orchestrator.slot(0).unwrap().submissions(), 3);
    assert_eq!(orchestrator.slot(1).unwrap().submissions(), 2);
    harness.check_violations().unwrap();
}

#[test]
fn every_reuse_waits_on_the_slot_fence_first() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness
        .orchestrator(FrameConfig::default().with_frames_in_flight(2))
        .unwrap();
    harness.mock.clear_calls();

    run(&mut orchestrator, 6);

    let calls = harness.mock.calls();
    let mut last_submit: std::collections::HashMap<vk::Fence, usize> = Default::default();
    for (position, call) in calls.iter().enumerate() {
        let Call::Submit { fence, .. } = call else {
            continue;
        };
        if *fence == vk::Fence::null() {
            continue;
        }
        let since = last_submit.get(fence).copied().unwrap_or(0);
        let waited = calls[since..position].iter().any(|c| {
            matches!(c, Call::WaitForFences { fences, .. } if fences.contains(fence))
        });
        let reset = calls[since..position]
            .iter()
            .any(|c| matches!(c, Call::ResetFences(fences) if fences.contains(fence)));
        assert!(waited, "submission at {position} did not wait on {fence:?}");
        assert!(reset, "submission at {position} did not reset {fence:?}");
        last_submit.insert(*fence, position);
    }
    assert_eq!(harness.mock.frame_submits().len(), 6);
    harness.check_violations().unwrap();
}

#[test]
fn frame_submission_waits_and_signals_the_slot_semaphores() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();

    orchestrator.draw_rect(square(), Color::BLUE).unwrap();

    let slot = orchestrator.slot(0).unwrap();
    let submits = harness.mock.frame_submits();
    assert_eq!(
        submits,
        [Call::Submit {
            command_buffers: vec![slot.command_buffer()],
            wait_semaphores: vec![slot.image_acquired()],
            wait_stages: vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            signal_semaphores: vec![slot.render_finished()],
            fence: slot.fence(),
        }]
    );
    assert_eq!(
        harness.mock.presents(),
        [Call::Present {
            image_index: 0,
            wait_semaphores: vec![slot.render_finished()],
        }]
    );
}

#[test]
fn draw_uses_the_quad_and_the_flipped_viewport() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();

    orchestrator.draw_rect(square(), Color::RED).unwrap();

    let draws = harness.mock.draws();
    assert_eq!(draws.len(), 1);
    let draw = &draws[0];

    assert_eq!(draw.index_count, 6);
    assert_eq!(draw.pipeline, harness.pipeline.pipeline);
    assert_eq!(draw.render_pass, harness.targets.render_pass);
    assert_eq!(draw.framebuffer, harness.targets.framebuffers[0]);
    assert_eq!(draw.clear_color, Some(Color::WHITE.to_array()));
    assert_eq!(
        draw.vertex_buffers,
        [orchestrator.geometry().vertex_buffer()]
    );
    assert_eq!(draw.index_buffer, orchestrator.geometry().index_buffer());

    let viewport = draw.viewport.unwrap();
    assert_relative_eq!(viewport.width, 800.0);
    assert_relative_eq!(viewport.y, 600.0);
    assert_relative_eq!(viewport.height, -600.0);
}

#[test]
fn each_slot_binds_its_own_device_local_uniforms() {
    let harness = TestHarness::new(800, 600);
    let orchestrator = harness
        .orchestrator(FrameConfig::default().with_frames_in_flight(2))
        .unwrap();

    let mut sets = Vec::new();
    for slot in orchestrator.slots() {
        let [transform, color] = *slot.bindings();
        assert_eq!(
            transform.buffer,
            slot.uniforms().transform_buffer().device_local().handle()
        );
        assert_eq!(
            color.buffer,
            slot.uniforms().color_buffer().device_local().handle()
        );
        assert_eq!(transform.range, TransformUniforms::SIZE);
        assert_eq!(color.range, COLOR_UNIFORM_SIZE);
        assert_eq!(
            harness.mock.buffer_memory_type(color.buffer),
            Some(DEVICE_LOCAL_TYPE)
        );
        sets.extend(slot.descriptor_sets());
    }

    sets.sort_by_key(|set| vk::Handle::as_raw(*set));
    sets.dedup();
    assert_eq!(sets.len(), 4);
}

#[test]
fn quad_geometry_is_uploaded_once() {
    let harness = TestHarness::new(800, 600);
    let orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();
    let geometry = orchestrator.geometry();

    assert_eq!(
        harness.mock.buffer_contents(geometry.vertex_buffer()).unwrap(),
        bytemuck::cast_slice::<_, u8>(&QUAD_VERTICES[..])
    );
    assert_eq!(
        harness.mock.buffer_contents(geometry.index_buffer()).unwrap(),
        bytemuck::cast_slice::<_, u8>(&QUAD_INDICES[..])
    );
    assert_eq!(geometry.index_type(), vk::IndexType::UINT16);
}

#[test]
fn uniforms_at_draw_time_match_the_frame() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();

    orchestrator.draw_rect(square(), Color::RED).unwrap();
    orchestrator
        .draw_rect(Rect::from_xywh(0.0, 0.0, 10.0, 10.0), Color::GREEN)
        .unwrap();
    orchestrator.draw_rect(square(), Color::YELLOW).unwrap();

    let draws = harness.mock.draws();
    let colors: Vec<_> = draws.iter().map(|d| d.color().unwrap()).collect();
    assert_eq!(colors, [Color::RED, Color::GREEN, Color::YELLOW]);

    let transform = draws[0].transform().unwrap();
    assert_eq!(transform.model, Transform2d::from(square()).matrix());
    assert_eq!(transform.projection, orchestrator.projection());
}

#[test]
fn screen_projection_maps_pixels_to_clip_space() {
    let harness = TestHarness::new(800, 600);
    let orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();

    let projection = orchestrator.projection();
    assert_relative_eq!(projection.x_axis.x, 2.0 / 800.0);
    assert_relative_eq!(projection.y_axis.y, -2.0 / 600.0);
}

#[test]
fn projection_can_be_replaced() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();

    let bounds = OrthoBounds::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0).unwrap();
    orchestrator.set_projection(bounds).unwrap();
    orchestrator
        .draw_frame(Transform2d::default(), Color::BLACK)
        .unwrap();

    let transform = harness.mock.draws()[0].transform().unwrap();
    assert_relative_eq!(transform.projection.x_axis.x, 1.0);

    let degenerate = OrthoBounds {
        right: -1.0,
        ..bounds
    };
    assert!(matches!(
        orchestrator.set_projection(degenerate),
        Err(GpuError::InvalidState(_))
    ));
    assert_eq!(orchestrator.projection(), bounds.matrix());
}

#[test]
fn screen_projection_reaches_the_drawn_uniforms() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();

    let bounds = OrthoBounds::new(0.0, 800.0, 600.0, 0.0, -1.0, 1.0).unwrap();
    orchestrator.set_projection(bounds).unwrap();
    let outcome = orchestrator.draw_rect(square(), Color::RED).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));

    let draw = &harness.mock.draws()[0];
    let transform = draw.transform().unwrap();
    assert_relative_eq!(transform.projection.x_axis.x, 0.0025);
    assert_relative_eq!(transform.projection.y_axis.y, -2.0 / 600.0);
    assert_relative_eq!(transform.model.x_axis.x, 200.0);
    assert_relative_eq!(transform.model.y_axis.y, 300.0);
    assert_relative_eq!(transform.model.w_axis.x, 100.0);
    assert_relative_eq!(transform.model.w_axis.y, 100.0);
    assert_eq!(draw.color(), Some(Color::RED));
    harness.check_violations().unwrap();
}

#[test]
fn acquire_failure_skips_submit_and_present_but_advances() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness
        .orchestrator(FrameConfig::default().with_frames_in_flight(2))
        .unwrap();
    harness
        .mock
        .fail_acquire_at(3, vk::Result::ERROR_OUT_OF_DATE_KHR);

    let outcomes = run(&mut orchestrator, 5);

    assert_eq!(
        outcomes[2],
        FrameOutcome::Skipped {
            slot: 0,
            reason: SkipReason::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR),
        }
    );
    assert!(outcomes[2].needs_rebuild());
    let slots: Vec<_> = outcomes.iter().map(FrameOutcome::slot).collect();
    assert_eq!(slots, [0, 1, 0, 1, 0]);

    assert_eq!(harness.mock.frame_submits().len(), 4);
    assert_eq!(harness.mock.presents().len(), 4);
    assert_eq!(orchestrator.frame_count(), 5);
    harness.check_violations().unwrap();
}

#[test]
fn submit_failure_repairs_the_slot() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness
        .orchestrator(FrameConfig::default().with_frames_in_flight(2))
        .unwrap();
    harness
        .mock
        .fail_frame_submit_at(2, vk::Result::ERROR_DEVICE_LOST);
    let old_fence = orchestrator.slot(1).unwrap().fence();

    let outcomes = run(&mut orchestrator, 5);

    assert_eq!(
        outcomes[1],
        FrameOutcome::Skipped {
            slot: 1,
            reason: SkipReason::Submit(vk::Result::ERROR_DEVICE_LOST),
        }
    );
    assert!(outcomes
        .iter()
        .enumerate()
        .all(|(i, outcome)| i == 1 || outcome.is_presented()));
    assert_ne!(orchestrator.slot(1).unwrap().fence(), old_fence);
    assert_eq!(orchestrator.slot(1).unwrap().submissions(), 1);
    harness.check_violations().unwrap();
}

#[test]
fn present_failure_is_reported_and_rendering_continues() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness
        .orchestrator(FrameConfig::default().with_frames_in_flight(2))
        .unwrap();
    harness
        .mock
        .fail_present_at(2, vk::Result::ERROR_OUT_OF_DATE_KHR);

    let outcomes = run(&mut orchestrator, 4);

    assert_eq!(
        outcomes[1],
        FrameOutcome::Skipped {
            slot: 1,
            reason: SkipReason::Present(vk::Result::ERROR_OUT_OF_DATE_KHR),
        }
    );
    assert!(outcomes[1].needs_rebuild());
    assert!(outcomes[2].is_presented() && outcomes[3].is_presented());
    assert_eq!(harness.mock.frame_submits().len(), 4);
    harness.check_violations().unwrap();
}

#[test]
fn out_of_range_image_index_is_skipped() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();
    harness.mock.set_next_image_index(7);

    let outcomes = run(&mut orchestrator, 3);

    assert_eq!(
        outcomes[0],
        FrameOutcome::Skipped {
            slot: 0,
            reason: SkipReason::InvalidImageIndex(7),
        }
    );
    assert!(outcomes[1].is_presented() && outcomes[2].is_presented());
    harness.check_violations().unwrap();
}

#[test]
fn failed_uniform_transfer_does_not_stop_the_frame() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();
    harness.mock.fail_transfer_submits(true);

    let outcome = orchestrator.draw_rect(square(), Color::GREEN).unwrap();

    assert!(outcome.is_presented());
    // The device-local uniforms were never written.
    assert_eq!(harness.mock.draws()[0].color(), Some(Color::default()));
    harness.check_violations().unwrap();
}

#[test]
fn stalled_gpu_times_out_with_a_bounded_wait() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness
        .orchestrator(
            FrameConfig::default()
                .with_frames_in_flight(2)
                .with_fence_timeout(1_000_000),
        )
        .unwrap();
    harness.mock.hold_fences(true);

    assert!(orchestrator.draw_rect(square(), Color::RED).unwrap().is_presented());
    assert!(orchestrator.draw_rect(square(), Color::RED).unwrap().is_presented());
    let result = orchestrator.draw_rect(square(), Color::RED);

    assert!(matches!(result, Err(GpuError::TimedOut(1_000_000))));
    // Nothing beyond the ring was ever submitted.
    assert_eq!(harness.mock.frame_submits().len(), 2);
    assert_eq!(orchestrator.current_index(), 1);

    harness.mock.hold_fences(false);
    drop(orchestrator);
    harness.check_violations().unwrap();
}

#[test]
fn replacing_targets_validates_them() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();

    let empty = FrameTargets {
        framebuffers: Vec::new(),
        ..harness.targets.clone()
    };
    assert!(matches!(
        orchestrator.set_targets(empty),
        Err(GpuError::InvalidState(_))
    ));

    let resized = render2d_test::fake_targets(&harness.mock, 1024, 720);
    orchestrator.set_targets(resized.clone()).unwrap();
    orchestrator
        .set_projection(OrthoBounds::screen(1024, 720))
        .unwrap();
    orchestrator.draw_rect(square(), Color::RED).unwrap();

    let draw = harness.mock.draws().pop().unwrap();
    assert!(resized.framebuffers.contains(&draw.framebuffer));
    assert_relative_eq!(draw.viewport.unwrap().height, -720.0);
}

#[test]
fn zero_sized_targets_are_rejected() {
    let harness = TestHarness::new(0, 600);

    assert!(matches!(
        harness.orchestrator(FrameConfig::default()),
        Err(render2d_test::TestError::Gpu(GpuError::InvalidState(_)))
    ));
    harness.check_released().unwrap();
}

#[test]
fn dropping_the_orchestrator_releases_everything() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();
    run(&mut orchestrator, 4);
    assert!(!harness.mock.live_objects().is_empty());

    drop(orchestrator);

    harness.check_released().unwrap();
    harness.check_violations().unwrap();
    assert_eq!(harness.mock.calls().last(), Some(&Call::DeviceWaitIdle));
}

#[test]
fn shutdown_waits_for_idle_and_releases_everything() {
    let harness = TestHarness::new(800, 600);
    let mut orchestrator = harness.orchestrator(FrameConfig::default()).unwrap();
    run(&mut orchestrator, 2);
    harness.mock.clear_calls();

    orchestrator.shutdown().unwrap();

    assert_eq!(harness.mock.calls(), [Call::DeviceWaitIdle]);
    harness.check_released().unwrap();
    harness.check_violations().unwrap();
}
