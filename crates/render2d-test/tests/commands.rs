//! Command pools, submission and blocking transfers.

use ash::vk;
use render2d_gpu::transfer::copy_buffer;
use render2d_gpu::{
    begin_command_buffer, end_command_buffer, submit_command_buffers, GpuBuffer, GpuDevice,
    GpuError, StagedBuffer,
};
use render2d_test::{Call, Command, TestHarness};

#[test]
fn pool_allocates_and_frees_primary_buffers() {
    let harness = TestHarness::new(800, 600);
    let pool = harness.command_pool().unwrap();

    let buffers = pool.allocate_many(3).unwrap();
    assert_eq!(buffers.len(), 3);
    assert_ne!(buffers[0], buffers[1]);
    assert_eq!(harness.mock.live_objects().command_buffers, 3);

    unsafe { pool.free(buffers[0]) };
    assert_eq!(harness.mock.live_objects().command_buffers, 2);

    drop(pool);
    harness.check_released().unwrap();
    harness.check_violations().unwrap();
}

#[test]
fn rejected_allocation_is_pool_exhausted() {
    let harness = TestHarness::new(800, 600);
    let pool = harness.command_pool().unwrap();
    harness.mock.fail_command_buffer_allocation(true);

    assert!(matches!(
        pool.allocate_one(),
        Err(GpuError::PoolExhausted(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
    ));
}

#[test]
fn pool_reset_discards_recorded_commands() {
    let harness = TestHarness::new(800, 600);
    let device = harness.device();
    let pool = harness.command_pool().unwrap();
    let cmd = pool.allocate_one().unwrap();

    unsafe {
        begin_command_buffer(&*device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap();
        device.cmd_draw_indexed(cmd, 6, 1, 0, 0, 0);
        end_command_buffer(&*device, cmd).unwrap();
    }
    assert!(matches!(
        harness.mock.recorded_commands(cmd).as_slice(),
        [Command::DrawIndexed { index_count: 6, .. }]
    ));

    unsafe { pool.reset().unwrap() };

    assert!(harness.mock.recorded_commands(cmd).is_empty());
    harness.check_violations().unwrap();
}

#[test]
fn rejected_submission_maps_to_submission_error() {
    let harness = TestHarness::new(800, 600);
    let device = harness.device();
    let pool = harness.command_pool().unwrap();
    let cmd = pool.allocate_one().unwrap();
    harness.mock.fail_transfer_submits(true);

    let result = unsafe {
        begin_command_buffer(&*device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap();
        end_command_buffer(&*device, cmd).unwrap();
        submit_command_buffers(
            &*device,
            harness.queues.graphics,
            &[cmd],
            &[],
            &[],
            &[],
            vk::Fence::null(),
        )
    };

    assert!(matches!(
        result,
        Err(GpuError::Submission(vk::Result::ERROR_DEVICE_LOST))
    ));
}

#[test]
fn staged_upload_lands_in_device_local_memory() {
    let harness = TestHarness::new(800, 600);
    let pool = harness.command_pool().unwrap();
    let mut staged =
        StagedBuffer::new(harness.device(), 32, vk::BufferUsageFlags::VERTEX_BUFFER).unwrap();
    let data: Vec<u8> = (0..32).collect();

    unsafe {
        staged
            .write_and_upload(&pool, harness.queues.graphics, &data)
            .unwrap();
    }

    assert!(staged.staging().is_mapped());
    assert!(!staged.device_local().is_mapped());
    assert_eq!(
        harness.mock.buffer_contents(staged.device_local().handle()),
        Some(data)
    );

    // One fenceless submission followed by a full idle wait, and the
    // throwaway command buffer went back to the pool.
    let calls = harness.mock.calls();
    let submit = calls
        .iter()
        .position(|call| matches!(call, Call::Submit { .. }))
        .unwrap();
    assert!(!calls[submit].is_frame_submit());
    assert_eq!(calls.get(submit + 1), Some(&Call::DeviceWaitIdle));
    assert_eq!(harness.mock.live_objects().command_buffers, 0);
    harness.check_violations().unwrap();
}

#[test]
fn copy_respects_region_offsets() {
    let harness = TestHarness::new(800, 600);
    let pool = harness.command_pool().unwrap();
    let mut src = GpuBuffer::new(
        harness.device(),
        64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
    .unwrap();
    let dst = GpuBuffer::new(
        harness.device(),
        64,
        vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    let data: Vec<u8> = (100..164).collect();
    src.write(&data).unwrap();

    let region = vk::BufferCopy {
        src_offset: 16,
        dst_offset: 32,
        size: 8,
    };
    unsafe { copy_buffer(&pool, harness.queues.graphics, &src, &dst, region).unwrap() };

    let contents = harness.mock.buffer_contents(dst.handle()).unwrap();
    assert_eq!(&contents[32..40], &data[16..24]);
    assert!(contents[..32].iter().all(|&b| b == 0));
    assert!(contents[40..].iter().all(|&b| b == 0));
}

#[test]
fn out_of_bounds_copy_is_rejected_before_recording() {
    let harness = TestHarness::new(800, 600);
    let pool = harness.command_pool().unwrap();
    let staged =
        StagedBuffer::new(harness.device(), 16, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
    harness.mock.clear_calls();

    let region = vk::BufferCopy {
        src_offset: 8,
        dst_offset: 0,
        size: 16,
    };
    let result = unsafe {
        copy_buffer(
            &pool,
            harness.queues.graphics,
            staged.staging(),
            staged.device_local(),
            region,
        )
    };

    assert!(matches!(result, Err(GpuError::InvalidState(_))));
    assert!(harness.mock.calls().is_empty());
}

#[test]
fn failed_transfer_still_frees_its_command_buffer() {
    let harness = TestHarness::new(800, 600);
    let pool = harness.command_pool().unwrap();
    let staged =
        StagedBuffer::new(harness.device(), 16, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
    harness.mock.fail_transfer_submits(true);

    let result = unsafe { staged.upload(&pool, harness.queues.graphics) };

    assert!(matches!(result, Err(GpuError::Submission(_))));
    assert_eq!(harness.mock.live_objects().command_buffers, 0);
    harness.check_violations().unwrap();
}

#[test]
fn failed_idle_wait_leaves_transfer_buffer_to_the_pool() {
    let harness = TestHarness::new(800, 600);
    let pool = harness.command_pool().unwrap();
    let staged =
        StagedBuffer::new(harness.device(), 16, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
    harness
        .mock
        .fail_wait_idle(Some(vk::Result::ERROR_DEVICE_LOST));

    let result = unsafe { staged.upload(&pool, harness.queues.graphics) };

    assert!(matches!(
        result,
        Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
    ));
    // Submitted but never confirmed complete, so it must not be freed yet.
    assert_eq!(harness.mock.live_objects().command_buffers, 1);

    harness.mock.fail_wait_idle(None);
    drop(pool);
    assert_eq!(harness.mock.live_objects().command_buffers, 0);
    harness.check_violations().unwrap();
}
