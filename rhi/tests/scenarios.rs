//! End-to-end device scenarios running on the null backend.

use std::sync::Arc;

use kiln_core::gpu::Device as _;
use kiln_core::gpu::*;
use kiln_null::NullBackend;
use kiln_null::NullDevice;
use kiln_null::QueueEvent;
use kiln_null::RecordedBarrier;
use kiln_null::RecordedCommand;
use kiln_null::RecordedCopyLocation;
use kiln_rhi::CommandList;
use kiln_rhi::Device;
use kiln_rhi::*;

fn create_device() -> Device<NullBackend> {
    Device::new(
        NullDevice::new(),
        &DeviceDesc {
            rtv_heap_size: 64,
            dsv_heap_size: 64,
            srv_heap_size: 256,
            sampler_heap_size: 64,
            max_timer_queries: 16,
        },
    )
    .unwrap()
}

fn recorded_commands(list: &CommandList<NullBackend>) -> Vec<RecordedCommand> {
    list.native_command_list().unwrap().commands().to_vec()
}

fn texture_barriers(commands: &[RecordedCommand]) -> Vec<RecordedBarrier> {
    commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::ResourceBarriers(barriers) => Some(barriers.clone()),
            _ => None,
        })
        .flatten()
        .filter(|barrier| {
            matches!(
                barrier,
                RecordedBarrier::TextureTransition { .. } | RecordedBarrier::TextureUav { .. }
            )
        })
        .collect()
}

fn buffer_barriers(commands: &[RecordedCommand]) -> Vec<RecordedBarrier> {
    commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::ResourceBarriers(barriers) => Some(barriers.clone()),
            _ => None,
        })
        .flatten()
        .filter(|barrier| {
            matches!(
                barrier,
                RecordedBarrier::BufferTransition { .. } | RecordedBarrier::BufferUav { .. }
            )
        })
        .collect()
}

fn trivial_shader(shader_type: ShaderType) -> ShaderByteCode {
    ShaderByteCode::new(ShaderDesc::new(shader_type, "main"), &[0xDE, 0xAD, 0xBE, 0xEF])
}

struct GraphicsFixture {
    framebuffer: Arc<FrameBuffer<NullBackend>>,
    viewport: ViewportState,
}

fn graphics_fixture(device: &Device<NullBackend>) -> GraphicsFixture {
    let target = device
        .create_texture(TextureDesc::render_target(
            256,
            256,
            Format::RGBA8UNorm,
            "target",
        ))
        .unwrap();
    let framebuffer = device
        .create_frame_buffer(FrameBufferDesc {
            color_attachments: [FrameBufferAttachment::new(&target)].into_iter().collect(),
            depth_stencil_attachment: None,
        })
        .unwrap();
    GraphicsFixture {
        framebuffer,
        viewport: ViewportState::single(Viewport::new(256.0, 256.0)),
    }
}

fn pipeline_with_layouts(
    device: &Device<NullBackend>,
    fixture: &GraphicsFixture,
    layouts: &[Arc<BindingLayout>],
) -> Arc<GraphicsPipeline<NullBackend>> {
    device
        .create_graphics_pipeline(
            GraphicsPipelineDesc {
                vs: Some(trivial_shader(ShaderType::Vertex)),
                ps: Some(trivial_shader(ShaderType::Pixel)),
                binding_layouts: layouts.iter().cloned().collect(),
                ..Default::default()
            },
            &fixture.framebuffer,
        )
        .unwrap()
}

// Scenario A: clear a render target created in the common state, hand it to
// present. Exactly two whole-texture barriers.
#[test]
fn clear_and_present_emits_exactly_two_barriers() {
    let device = create_device();
    let texture = device
        .create_texture(TextureDesc {
            width: 256,
            height: 256,
            format: Format::RGBA8UNorm,
            is_render_target: true,
            use_clear_value: true,
            clear_value: Color::new(0.25, 0.5, 0.75, 1.0),
            initial_state: ResourceStates::COMMON,
            ..Default::default()
        })
        .unwrap();

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.clear_texture_float(
        &texture,
        ENTIRE_SUBRESOURCE_SET,
        Color::new(0.25, 0.5, 0.75, 1.0),
    )
    .unwrap();
    list.require_texture_state(&texture, ENTIRE_SUBRESOURCE_SET, ResourceStates::PRESENT)
        .unwrap();
    list.close().unwrap();

    let commands = recorded_commands(&list);
    let barriers = texture_barriers(&commands);
    assert_eq!(barriers.len(), 2);
    match &barriers[0] {
        RecordedBarrier::TextureTransition {
            subresource,
            before,
            after,
            ..
        } => {
            assert_eq!(*subresource, None);
            assert_eq!(*before, ResourceStates::COMMON);
            assert_eq!(*after, ResourceStates::RENDER_TARGET);
        }
        other => panic!("unexpected barrier {:?}", other),
    }
    match &barriers[1] {
        RecordedBarrier::TextureTransition { before, after, .. } => {
            assert_eq!(*before, ResourceStates::RENDER_TARGET);
            assert_eq!(*after, ResourceStates::PRESENT);
        }
        other => panic!("unexpected barrier {:?}", other),
    }

    // The clear itself used the texture's clear color.
    assert!(commands.iter().any(|command| matches!(
        command,
        RecordedCommand::ClearRenderTarget { color, .. } if *color == [0.25, 0.5, 0.75, 1.0]
    )));

    let value = device
        .execute_command_lists(&mut [&mut list], QueueType::Graphics)
        .unwrap();
    assert_eq!(value, 1);
    assert!(device.queue_last_completed(QueueType::Graphics) >= value);
    device.collect_garbage();
    assert_eq!(device.instances_in_flight(QueueType::Graphics), 0);
    assert_eq!(
        list.texture_subresource_state(&texture, 0, 0),
        ResourceStates::PRESENT
    );
}

// Scenario B: upload into a sampled texture, then sample it again.
#[test]
fn write_texture_uses_placed_footprint_and_two_barriers() {
    let device = create_device();
    let texture = device
        .create_texture(TextureDesc::shader_resource(4, 4, Format::R8UNorm, "small"))
        .unwrap();

    let data: Vec<u8> = (0..16u8).collect();
    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.write_texture(&texture, 0, 0, &data, 4, 0).unwrap();

    let commands = recorded_commands(&list);
    let barriers = texture_barriers(&commands);
    assert_eq!(barriers.len(), 1);
    match &barriers[0] {
        RecordedBarrier::TextureTransition { before, after, .. } => {
            assert_eq!(*before, ResourceStates::PIXEL_SHADER_RESOURCE);
            assert_eq!(*after, ResourceStates::COPY_DEST);
        }
        other => panic!("unexpected barrier {:?}", other),
    }

    // One placed-footprint copy with the 256-byte row pitch, placed on the
    // 512-byte alignment.
    let copy = commands
        .iter()
        .find_map(|command| match command {
            RecordedCommand::CopyTextureRegion { src, .. } => Some(src.clone()),
            _ => None,
        })
        .expect("missing texture copy");
    match copy {
        RecordedCopyLocation::PlacedFootprint { offset, row_pitch, .. } => {
            assert_eq!(row_pitch, TEXTURE_ROW_PITCH_ALIGNMENT);
            assert_eq!(offset % TEXTURE_PLACEMENT_ALIGNMENT, 0);
        }
        other => panic!("unexpected copy source {:?}", other),
    }
    assert!(list.upload_allocated_bytes() >= 256);

    // Sampling it again transitions back out of CopyDest.
    list.require_texture_state(
        &texture,
        ENTIRE_SUBRESOURCE_SET,
        ResourceStates::PIXEL_SHADER_RESOURCE,
    )
    .unwrap();
    list.commit_barriers().unwrap();
    let commands = recorded_commands(&list);
    let barriers = texture_barriers(&commands);
    assert_eq!(barriers.len(), 2);
    match &barriers[1] {
        RecordedBarrier::TextureTransition { before, after, .. } => {
            assert_eq!(*before, ResourceStates::COPY_DEST);
            assert_eq!(*after, ResourceStates::PIXEL_SHADER_RESOURCE);
        }
        other => panic!("unexpected barrier {:?}", other),
    }
    list.close().unwrap();
}

// Scenario C: volatile constant buffer churn across draws in one recording.
#[test]
fn volatile_cb_draws_see_the_latest_write() {
    let device = create_device();
    let fixture = graphics_fixture(&device);

    let layout = device
        .create_binding_layout(BindingLayoutDesc {
            items: [BindingLayoutItem::constant_buffer(0, true)].into_iter().collect(),
            ..Default::default()
        })
        .unwrap();
    let constants = device
        .create_buffer(BufferDesc::constant(256, true, "volatile"))
        .unwrap();
    let set = device
        .create_binding_set(
            BindingSetDesc::with_items([BindingSetItem::constant_buffer(0, &constants)]),
            &layout,
        )
        .unwrap();
    let pipeline = pipeline_with_layouts(&device, &fixture, &[layout]);

    let state = GraphicsState {
        pipeline: Some(pipeline),
        binding_sets: binding_sets([BindingSetHandle::Bound(set)]),
        framebuffer: Some(fixture.framebuffer.clone()),
        viewport: fixture.viewport.clone(),
        ..Default::default()
    };

    let draw = DrawArguments {
        vertex_or_index_count: 3,
        ..Default::default()
    };

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.write_buffer(&constants, &[1u8; 64], 0).unwrap();
    list.write_buffer(&constants, &[2u8; 64], 0).unwrap();
    list.set_graphics_state(&state).unwrap();
    list.draw(&draw).unwrap();
    list.write_buffer(&constants, &[3u8; 64], 0).unwrap();
    list.draw(&draw).unwrap();
    list.close().unwrap();

    let commands = recorded_commands(&list);
    let cbv_addresses: Vec<GpuVirtualAddress> = commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::SetGraphicsRootConstantBuffer { address, .. } => Some(*address),
            _ => None,
        })
        .collect();
    // One bind at state time (the second write's address), one re-patch
    // before the second draw.
    assert_eq!(cbv_addresses.len(), 2);
    assert_ne!(cbv_addresses[0], cbv_addresses[1]);

    let draw_positions: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter_map(|(index, command)| matches!(command, RecordedCommand::Draw(_)).then_some(index))
        .collect();
    let cbv_positions: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter_map(|(index, command)| {
            matches!(command, RecordedCommand::SetGraphicsRootConstantBuffer { .. })
                .then_some(index)
        })
        .collect();
    assert!(cbv_positions[0] < draw_positions[0]);
    assert!(draw_positions[0] < cbv_positions[1]);
    assert!(cbv_positions[1] < draw_positions[1]);

    // Volatile buffers never transition.
    assert!(buffer_barriers(&commands).is_empty());
}

#[test]
fn volatile_cb_use_before_write_fails() {
    let device = create_device();
    let fixture = graphics_fixture(&device);

    let layout = device
        .create_binding_layout(BindingLayoutDesc {
            items: [BindingLayoutItem::constant_buffer(0, true)].into_iter().collect(),
            ..Default::default()
        })
        .unwrap();
    let constants = device
        .create_buffer(BufferDesc::constant(256, true, "volatile"))
        .unwrap();
    let set = device
        .create_binding_set(
            BindingSetDesc::with_items([BindingSetItem::constant_buffer(0, &constants)]),
            &layout,
        )
        .unwrap();
    let pipeline = pipeline_with_layouts(&device, &fixture, &[layout]);

    let state = GraphicsState {
        pipeline: Some(pipeline),
        binding_sets: binding_sets([BindingSetHandle::Bound(set)]),
        framebuffer: Some(fixture.framebuffer.clone()),
        viewport: fixture.viewport.clone(),
        ..Default::default()
    };

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    assert_eq!(list.set_graphics_state(&state), Err(RhiError::UsageBug));
}

// Scenario D: descriptor-heap growth preserves live descriptors.
#[test]
fn descriptor_heap_grows_by_powers_of_two_and_preserves_contents() {
    let device = Device::<NullBackend>::new(
        NullDevice::new(),
        &DeviceDesc {
            srv_heap_size: 4,
            ..DeviceDesc::default()
        },
    )
    .unwrap();
    let heap = &device.descriptor_heaps().shader_resource;
    let native = device.native_device();
    let reserved = heap.reserved_slots();

    let formats = [
        Format::R8UNorm,
        Format::RG8UNorm,
        Format::RGBA8UNorm,
        Format::R16Float,
        Format::R32Float,
        Format::RG16Float,
        Format::RGBA16Float,
        Format::R32UInt,
        Format::RG32Float,
        Format::RGBA32Float,
    ];

    let mut live: Vec<(u32, Format)> = Vec::new();
    for (count, format) in formats.iter().enumerate() {
        let index = heap.allocate(native, 1).unwrap();
        unsafe {
            native.create_null_view(
                heap.cpu_handle(index),
                ResourceViewType::TextureSrv,
                *format,
            );
        }
        live.push((index, *format));

        match count + 1 {
            4 => assert_eq!(heap.capacity(), 4),
            5..=8 => assert_eq!(heap.capacity(), 8),
            9 | 10 => assert_eq!(heap.capacity(), 16),
            _ => {}
        }

        // Releases interleave between the second growth and the last
        // allocation.
        if count == 8 {
            for _ in 0..3 {
                let (released, _) = live.remove(1);
                heap.release(released, 1);
            }
        }
    }
    assert_eq!(heap.capacity(), 16);

    // Every live descriptor survived both growths byte-for-byte.
    for (index, format) in &live {
        let descriptor =
            heap.with_staged_heap(|staged| staged.descriptor(index + reserved));
        assert_eq!(
            descriptor,
            kiln_null::NullDescriptor::NullView {
                view_type: ResourceViewType::TextureSrv,
                format: *format,
            }
        );
    }
}

// Scenario E: cross-queue handoff orders the graphics submit behind a
// native wait on the compute fence.
#[test]
fn cross_queue_wait_precedes_the_dependent_submit() {
    let device = create_device();
    let buffer = device
        .create_buffer(BufferDesc::rw_structured(1024, 4, "shared"))
        .unwrap();

    let mut compute_list = device
        .create_command_list(CommandListDesc {
            queue_type: QueueType::Compute,
            ..Default::default()
        })
        .unwrap();
    compute_list.open().unwrap();
    compute_list.clear_buffer_uint(&buffer, 7).unwrap();
    compute_list.close().unwrap();
    let compute_value = device
        .execute_command_lists(&mut [&mut compute_list], QueueType::Compute)
        .unwrap();

    device
        .queue_wait_for_command_list(QueueType::Graphics, QueueType::Compute, compute_value)
        .unwrap();

    let readback = device
        .create_buffer(BufferDesc::read_back(1024, "readback"))
        .unwrap();
    let mut graphics_list = device.create_command_list(CommandListDesc::default()).unwrap();
    graphics_list.open().unwrap();
    graphics_list.copy_buffer(&readback, 0, &buffer, 0, 1024).unwrap();
    graphics_list.close().unwrap();
    device
        .execute_command_lists(&mut [&mut graphics_list], QueueType::Graphics)
        .unwrap();

    let compute_events = device
        .native_device()
        .queue(QueueType::Compute)
        .unwrap()
        .events();
    let compute_fence = compute_events
        .iter()
        .find_map(|event| match event {
            QueueEvent::Signal { fence, value } if *value == compute_value => Some(*fence),
            _ => None,
        })
        .expect("compute queue never signalled");

    let graphics_events = device
        .native_device()
        .queue(QueueType::Graphics)
        .unwrap()
        .events();
    let wait_position = graphics_events
        .iter()
        .position(|event| {
            *event
                == QueueEvent::Wait {
                    fence: compute_fence,
                    value: compute_value,
                }
        })
        .expect("graphics queue never waited on the compute fence");
    let execute_position = graphics_events
        .iter()
        .position(|event| matches!(event, QueueEvent::Execute { .. }))
        .expect("graphics queue never executed");
    assert!(wait_position < execute_position);
}

// Scenario F: a one-slot binding difference re-binds exactly one table.
#[test]
fn binding_diff_touches_only_the_changed_slot() {
    let device = create_device();
    let fixture = graphics_fixture(&device);

    let texture = device
        .create_texture(TextureDesc::shader_resource(16, 16, Format::RGBA8UNorm, "t"))
        .unwrap();

    let layouts: Vec<Arc<BindingLayout>> = (0..3)
        .map(|_| {
            device
                .create_binding_layout(BindingLayoutDesc {
                    items: [BindingLayoutItem::texture_srv(0)].into_iter().collect(),
                    ..Default::default()
                })
                .unwrap()
        })
        .collect();

    let make_set = |layout: &Arc<BindingLayout>| {
        device
            .create_binding_set(
                BindingSetDesc::with_items([BindingSetItem::texture_srv(0, &texture)]),
                layout,
            )
            .unwrap()
    };
    let set_a = make_set(&layouts[0]);
    let set_b = make_set(&layouts[1]);
    let set_b_prime = make_set(&layouts[1]);
    let set_c = make_set(&layouts[2]);

    let pipeline = pipeline_with_layouts(&device, &fixture, &layouts);

    let state_1 = GraphicsState {
        pipeline: Some(pipeline.clone()),
        binding_sets: binding_sets([
            BindingSetHandle::Bound(set_a.clone()),
            BindingSetHandle::Bound(set_b),
            BindingSetHandle::Bound(set_c.clone()),
        ]),
        framebuffer: Some(fixture.framebuffer.clone()),
        viewport: fixture.viewport.clone(),
        ..Default::default()
    };
    let state_2 = GraphicsState {
        binding_sets: binding_sets([
            BindingSetHandle::Bound(set_a),
            BindingSetHandle::Bound(set_b_prime),
            BindingSetHandle::Bound(set_c),
        ]),
        ..state_1.clone()
    };

    let draw = DrawArguments {
        vertex_or_index_count: 3,
        ..Default::default()
    };

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.set_graphics_state(&state_1).unwrap();
    list.draw(&draw).unwrap();
    list.set_graphics_state(&state_2).unwrap();
    list.draw(&draw).unwrap();
    list.close().unwrap();

    let commands = recorded_commands(&list);
    let draw_positions: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter_map(|(index, command)| matches!(command, RecordedCommand::Draw(_)).then_some(index))
        .collect();
    assert_eq!(draw_positions.len(), 2);

    let tables_before_first_draw = commands[..draw_positions[0]]
        .iter()
        .filter(|command| {
            matches!(command, RecordedCommand::SetGraphicsRootDescriptorTable { .. })
        })
        .count();
    assert_eq!(tables_before_first_draw, 3);

    let tables_between: Vec<u32> = commands[draw_positions[0]..draw_positions[1]]
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::SetGraphicsRootDescriptorTable { parameter_index, .. } => {
                Some(*parameter_index)
            }
            _ => None,
        })
        .collect();
    assert_eq!(tables_between, vec![1]);
}
