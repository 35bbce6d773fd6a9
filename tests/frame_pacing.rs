//! 帧调度核心的集成测试
//!
//! 全部运行在 headless 设备上：`Retire::OnWait` 用于需要确定结果的场景，
//! `Retire::Latency` 用于模拟真正异步的 GPU。

use std::sync::Arc;
use std::time::Duration;

use nalgebra::{Matrix4, Vector3};

use frame_pacer::gfx::headless::{HeadlessDevice, HeadlessPresenter, Retire};
use frame_pacer::renderer::device::{CommandList, Device, Presenter};
use frame_pacer::renderer::{
    update_object_constants, BufferUsage, FenceGate, FrameResourceRing, FrameScheduler,
    ObjectConstants, RenderItem, SchedulerSettings, UploadBuffer, UploadQueue, Viewport,
    SWAP_CHAIN_BUFFER_COUNT,
};

type HeadlessScheduler = FrameScheduler<HeadlessDevice, HeadlessPresenter>;

fn scheduler(retire: Retire, settings: SchedulerSettings) -> HeadlessScheduler {
    let device = Arc::new(HeadlessDevice::new(retire));
    let presenter = HeadlessPresenter::new(&device, SWAP_CHAIN_BUFFER_COUNT, 640, 480);
    FrameScheduler::new(device, presenter, settings).unwrap()
}

fn latency() -> Retire {
    Retire::Latency(Duration::from_millis(2))
}

#[test]
fn test_next_waits_only_when_slot_is_in_flight() {
    let mut scheduler = scheduler(Retire::OnWait, SchedulerSettings::default());

    for frame in 0..12 {
        // 中途排空一次，之后的 N 帧都不应阻塞
        if frame == 7 {
            scheduler.flush().unwrap();
        }
        let ring = scheduler.ring();
        let next = (ring.current_index() + 1) % ring.len();
        let must_wait = !ring
            .get(next)
            .unwrap()
            .completion()
            .is_reached(scheduler.gate().completed_value());

        let stats = scheduler.render_frame(|_| Ok(())).unwrap();
        assert_eq!(stats.slot_index, next);
        assert_eq!(stats.waited, must_wait, "frame {}", frame);
    }
}

#[test]
fn test_ring_of_three_blocks_on_fourth_acquire() {
    let device = HeadlessDevice::new(Retire::OnWait);
    let mut gate = FenceGate::new(&device).unwrap();
    let mut ring = FrameResourceRing::new(&device, 3, 1, 1).unwrap();

    for expected in 0..3 {
        let index = ring.next(&device, &gate).unwrap().index();
        assert_eq!(index, expected);
        let value = gate.advance(&device).unwrap();
        ring.mark_submitted(value);
    }
    assert_eq!(gate.blocking_waits(), 0);
    assert_eq!(gate.completed_value(), 0);

    let index = ring.next(&device, &gate).unwrap().index();
    assert_eq!(index, 0);
    assert_eq!(gate.blocking_waits(), 1);
    // 只等到槽位 0 的目标值，后两帧仍在队列中
    assert_eq!(gate.completed_value(), 1);
    assert_eq!(device.pending_signals(), 2);
}

#[test]
fn test_completed_value_is_monotonic() {
    let mut scheduler = scheduler(latency(), SchedulerSettings::default());
    let mut last = 0;
    for _ in 0..30 {
        scheduler.render_frame(|_| Ok(())).unwrap();
        let completed = scheduler.gate().completed_value();
        assert!(completed >= last);
        assert!(completed <= scheduler.gate().signaled_value().value());
        last = completed;
    }
    let flushed = scheduler.flush().unwrap();
    assert!(scheduler.gate().completed_value() >= flushed.value());
}

#[test]
fn test_in_flight_frames_bounded_by_ring_size() {
    let settings = SchedulerSettings {
        frame_resources: 3,
        ..SchedulerSettings::default()
    };
    let mut scheduler = scheduler(Retire::Latency(Duration::from_millis(5)), settings);
    let device = Arc::clone(scheduler.device());
    let mut max_while_recording = 0;
    for _ in 0..20 {
        scheduler
            .render_frame(|_| {
                // 持有一个槽位时，其余最多 N-1 帧仍在 GPU 上
                max_while_recording = max_while_recording.max(device.pending_signals());
                Ok(())
            })
            .unwrap();
        let in_flight = scheduler.gate().signaled_value().value() - scheduler.gate().completed_value();
        assert!(in_flight <= 3, "{} frames in flight after submit", in_flight);
    }
    assert!(max_while_recording <= 2, "{} frames in flight while recording", max_while_recording);
}

#[test]
fn test_write_then_read_at_stride() {
    let device = HeadlessDevice::new(Retire::OnWait);
    let mut buffer: UploadBuffer<HeadlessDevice, ObjectConstants> =
        UploadBuffer::new(&device, 4, BufferUsage::Constant).unwrap();
    assert_eq!(buffer.stride(), 256);

    let values: Vec<ObjectConstants> = (0..4)
        .map(|i| ObjectConstants::new(&Matrix4::new_translation(&Vector3::new(i as f32, 2.0, 3.0))))
        .collect();
    for (i, value) in values.iter().enumerate() {
        buffer.write(i, value);
    }
    for (i, value) in values.iter().enumerate() {
        assert_eq!(buffer.read(i), *value);
        let raw = buffer.memory().read_bytes(i * 256, std::mem::size_of::<ObjectConstants>());
        assert_eq!(raw, bytemuck::bytes_of(value));
    }
}

#[test]
fn test_second_element_lands_one_stride_in() {
    let device = HeadlessDevice::new(Retire::OnWait);
    let mut buffer: UploadBuffer<HeadlessDevice, [f32; 4]> =
        UploadBuffer::new(&device, 2, BufferUsage::Constant).unwrap();
    let value = [1.0f32, 2.0, 3.0, 4.0];
    buffer.write(1, &value);

    assert_eq!(buffer.stride(), 256);
    assert_eq!(buffer.byte_size(), 512);
    assert_eq!(buffer.element_address(1), buffer.gpu_address() + 256);
    assert_eq!(buffer.memory().read_bytes(256, 16), bytemuck::bytes_of(&value));
    assert_eq!(buffer.memory().read_bytes(0, 16), vec![0u8; 16]);
}

#[test]
fn test_back_buffer_cycles_once_per_present() {
    let mut scheduler = scheduler(latency(), SchedulerSettings::default());
    let indices: Vec<usize> = (0..6)
        .map(|_| scheduler.render_frame(|_| Ok(())).unwrap().back_buffer_index)
        .collect();
    assert_eq!(indices, vec![0, 1, 0, 1, 0, 1]);
    assert_eq!(scheduler.presenter().presents(), 6);
    assert_eq!(scheduler.back_buffers().current_index(), 0);
}

#[test]
fn test_flush_waits_for_every_signal() {
    let device = HeadlessDevice::new(latency());
    let mut gate = FenceGate::new(&device).unwrap();
    for _ in 0..42 {
        gate.advance(&device).unwrap();
    }
    assert_eq!(gate.signaled_value().value(), 42);

    let flushed = gate.flush(&device).unwrap();
    assert_eq!(flushed.value(), 43);
    assert!(gate.completed_value() >= 42);
    assert_eq!(device.pending_signals(), 0);
}

#[test]
fn test_device_lost_is_reported_distinctly() {
    let mut scheduler = scheduler(latency(), SchedulerSettings::default());
    for _ in 0..4 {
        scheduler.render_frame(|_| Ok(())).unwrap();
    }
    scheduler.device().lose("driver reset");

    let err = scheduler.render_frame(|_| Ok(())).unwrap_err();
    assert!(err.is_device_lost(), "unexpected error: {}", err);
    assert!(err.to_string().contains("driver reset"));
    assert!(scheduler.flush().unwrap_err().is_device_lost());
}

#[test]
fn test_resize_drains_and_resets_back_buffers() {
    let mut scheduler = scheduler(latency(), SchedulerSettings::default());
    for _ in 0..3 {
        scheduler.render_frame(|_| Ok(())).unwrap();
    }
    assert!(scheduler.resize(1920, 1080).unwrap());

    assert_eq!(scheduler.presenter().extent(), (1920, 1080));
    assert_eq!(scheduler.viewport(), Viewport::full(1920, 1080));
    assert_eq!(scheduler.gate().completed_value(), scheduler.gate().signaled_value().value());
    assert_eq!(
        scheduler.back_buffers().current_index(),
        scheduler.presenter().current_back_buffer_index()
    );

    let stats = scheduler.render_frame(|_| Ok(())).unwrap();
    assert_eq!(stats.back_buffer_index, 0);
    assert!(!scheduler.resize(0, 0).unwrap());
}

#[test]
fn test_dirty_item_reaches_every_slot() {
    let settings = SchedulerSettings {
        object_count: 2,
        ..SchedulerSettings::default()
    };
    let frame_resources = settings.frame_resources;
    let mut scheduler = scheduler(latency(), settings);
    let mut items = vec![
        RenderItem::new(0, Matrix4::identity(), 3, frame_resources),
        RenderItem::new(1, Matrix4::identity(), 3, frame_resources),
    ];

    let mut written = Vec::new();
    for _ in 0..frame_resources + 1 {
        scheduler
            .render_frame(|frame| {
                written.push(update_object_constants(&mut items, &mut frame.slot.object_cb));
                for item in &items {
                    let address = frame.slot.object_cb.element_address(item.cb_index);
                    frame.list.set_constant_buffer(0, address);
                    frame.list.draw_instanced(item.vertex_count, item.instance_count);
                }
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(written, vec![2, 2, 2, 0]);

    let moved = Matrix4::new_translation(&Vector3::new(0.0, 5.0, 0.0));
    items[1].set_world(moved);
    for _ in 0..frame_resources {
        scheduler
            .render_frame(|frame| {
                assert_eq!(update_object_constants(&mut items, &mut frame.slot.object_cb), 1);
                Ok(())
            })
            .unwrap();
    }
    scheduler.flush().unwrap();
    for slot in 0..frame_resources {
        let resource = scheduler.ring().get(slot).unwrap();
        assert_eq!(resource.object_cb.read(1), ObjectConstants::new(&moved));
    }
}

#[test]
fn test_setup_upload_copies_before_release() {
    let mut scheduler = scheduler(latency(), SchedulerSettings::default());
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    let mut uploaded = None;
    scheduler
        .submit_setup(|device, list, uploads| {
            uploaded = Some(uploads.create_buffer_with_data(device, list, &data)?);
            Ok(())
        })
        .unwrap();

    assert_eq!(scheduler.uploads().pending(), 0);
    assert_eq!(uploaded.unwrap().contents(), data);
    assert_eq!(scheduler.device().stats().copied_bytes, 1000);
    scheduler.render_frame(|_| Ok(())).unwrap();
}

#[test]
fn test_staging_outlives_copy_until_fence_completes() {
    let device = HeadlessDevice::new(Retire::OnWait);
    let mut gate = FenceGate::new(&device).unwrap();
    let allocator = device.create_command_allocator().unwrap();
    let mut list = device.create_command_list(&allocator).unwrap();
    let mut uploads = UploadQueue::new();

    list.reset(&allocator).unwrap();
    let buffer = uploads.create_buffer_with_data(&device, &mut list, &[9u8; 16]).unwrap();
    list.close().unwrap();
    device.execute(&list).unwrap();
    let value = gate.advance(&device).unwrap();
    uploads.submitted(value);

    // 复制还没在 GPU 上执行，临时缓冲区必须保留
    assert_eq!(buffer.contents(), vec![0u8; 16]);
    assert_eq!(uploads.retire(gate.completed_value()), 0);
    assert_eq!(uploads.pending(), 1);

    gate.wait_until(&device, value).unwrap();
    assert_eq!(buffer.contents(), vec![9u8; 16]);
    assert_eq!(uploads.retire(gate.completed_value()), 1);
    assert_eq!(device.stats().dropped_copies, 0);
}
