//! Buffer creation, memory type selection and host mappings.

use ash::vk;
use render2d_gpu::{select_memory_type, GpuBuffer, GpuDevice, GpuError};
use render2d_test::mock::{DEVICE_LOCAL_TYPE, HOST_VISIBLE_TYPE, UNIFIED_TYPE};
use render2d_test::{MockDevice, TestHarness};

const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

fn host_buffer(harness: &TestHarness, size: vk::DeviceSize) -> render2d_gpu::Result<GpuBuffer> {
    GpuBuffer::new(
        harness.device(),
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        HOST,
    )
}

fn device_buffer(harness: &TestHarness, size: vk::DeviceSize) -> render2d_gpu::Result<GpuBuffer> {
    GpuBuffer::new(
        harness.device(),
        size,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
}

#[test]
fn host_visible_buffer_is_mapped_and_writable() {
    let harness = TestHarness::new(800, 600);
    let mut buffer = host_buffer(&harness, 64).unwrap();

    assert!(buffer.is_mapped());
    assert_eq!(buffer.memory_type_index(), HOST_VISIBLE_TYPE);
    assert_eq!(buffer.size(), 64);

    buffer.write(&[1u32, 2, 3, 4]).unwrap();
    buffer.write_bytes(32, &[0xAB; 4]).unwrap();

    let contents = harness.mock.buffer_contents(buffer.handle()).unwrap();
    assert_eq!(&contents[..16], bytemuck::cast_slice::<u32, u8>(&[1, 2, 3, 4]));
    assert_eq!(&contents[32..36], &[0xAB; 4]);
    assert_eq!(buffer.mapped_bytes().unwrap(), contents.as_slice());
}

#[test]
fn device_local_buffer_is_not_mapped() {
    let harness = TestHarness::new(800, 600);
    let mut buffer = device_buffer(&harness, 64).unwrap();

    assert!(!buffer.is_mapped());
    assert!(buffer.mapped_bytes().is_none());
    assert_eq!(buffer.memory_type_index(), DEVICE_LOCAL_TYPE);
    assert!(matches!(
        buffer.write(&[0u8; 4]),
        Err(GpuError::InvalidState(_))
    ));
}

#[test]
fn writes_past_the_end_are_rejected() {
    let harness = TestHarness::new(800, 600);
    let mut buffer = host_buffer(&harness, 16).unwrap();

    assert!(buffer.write_bytes(8, &[0; 9]).is_err());
    assert!(buffer.write_bytes(u64::MAX, &[0; 2]).is_err());
    assert!(buffer.write_bytes(8, &[0; 8]).is_ok());
}

#[test]
fn zero_sized_buffers_are_rejected() {
    let harness = TestHarness::new(800, 600);

    assert!(matches!(
        host_buffer(&harness, 0),
        Err(GpuError::InvalidState(_))
    ));
    assert!(harness.mock.live_objects().is_empty());
}

#[test]
fn memory_type_selection_is_deterministic() {
    let mock = MockDevice::new();
    let properties = mock.memory_properties();

    let first = select_memory_type(&properties, 0b111, HOST);
    for _ in 0..8 {
        assert_eq!(select_memory_type(&properties, 0b111, HOST), first);
    }
    assert_eq!(first, Some(HOST_VISIBLE_TYPE));

    let harness = TestHarness::new(800, 600);
    let a = device_buffer(&harness, 32).unwrap();
    let b = device_buffer(&harness, 32).unwrap();
    assert_eq!(a.memory_type_index(), b.memory_type_index());
}

#[test]
fn restricted_type_bits_pick_the_first_allowed_match() {
    let harness = TestHarness::new(800, 600);
    harness.mock.set_memory_type_bits(0b100);

    let buffer = host_buffer(&harness, 32).unwrap();

    assert_eq!(buffer.memory_type_index(), UNIFIED_TYPE);
    assert!(buffer.is_mapped());
}

#[test]
fn missing_memory_type_is_reported_and_cleaned_up() {
    let harness = TestHarness::new(800, 600);
    harness.mock.set_memory_type_bits(0b001);

    let err = host_buffer(&harness, 32).err().unwrap();

    assert!(err.is_allocation_error());
    assert!(matches!(
        err,
        GpuError::NoSuitableMemoryType { type_bits: 0b001, .. }
    ));
    harness.check_released().unwrap();
    harness.check_violations().unwrap();
}

#[test]
fn allocation_failure_is_reported_and_cleaned_up() {
    let harness = TestHarness::new(800, 600);
    harness.mock.fail_memory_allocation(true);

    let err = device_buffer(&harness, 32).err().unwrap();

    assert!(matches!(err, GpuError::AllocationFailed(_)));
    harness.check_released().unwrap();
    harness.check_violations().unwrap();
}

#[test]
fn dropping_buffers_releases_memory_after_the_buffer() {
    let harness = TestHarness::new(800, 600);
    {
        let _host = host_buffer(&harness, 128).unwrap();
        let _device = device_buffer(&harness, 128).unwrap();

        let live = harness.mock.live_objects();
        assert_eq!(live.buffers, 2);
        assert_eq!(live.allocations, 2);
        assert_eq!(live.mapped, 1);
    }

    harness.check_released().unwrap();
    harness.check_violations().unwrap();
}
