//! Lifecycle, pooling and cache properties of the core services.

use std::collections::HashSet;
use std::sync::Arc;

use kiln_core::gpu::*;
use kiln_null::NullBackend;
use kiln_null::NullDevice;
use kiln_null::RecordedCommand;
use kiln_rhi::CommandList;
use kiln_rhi::Device;
use kiln_rhi::*;

fn create_device() -> Device<NullBackend> {
    Device::new(NullDevice::new(), &DeviceDesc::default()).unwrap()
}

fn trivial_shader(shader_type: ShaderType) -> ShaderByteCode {
    ShaderByteCode::new(ShaderDesc::new(shader_type, "main"), &[1, 2, 3, 4])
}

fn recorded_commands(list: &CommandList<NullBackend>) -> Vec<RecordedCommand> {
    list.native_command_list().unwrap().commands().to_vec()
}

// Property 1: live allocations never overlap, across any interleaving that
// fits the grown capacity.
#[test]
fn allocator_round_trip_keeps_live_ranges_disjoint() {
    let device = Device::<NullBackend>::new(
        NullDevice::new(),
        &DeviceDesc {
            srv_heap_size: 8,
            ..DeviceDesc::default()
        },
    )
    .unwrap();
    let heap = &device.descriptor_heaps().shader_resource;
    let native = device.native_device();

    let mut live: Vec<(u32, u32)> = Vec::new();
    let sizes = [1u32, 3, 2, 1, 5, 4, 1, 2, 6, 3, 1, 8];
    for (step, size) in sizes.iter().enumerate() {
        let base = heap.allocate(native, *size).unwrap();
        live.push((base, *size));

        if step % 3 == 2 {
            let (base, size) = live.remove(step % live.len());
            heap.release(base, size);
        }

        let mut seen = HashSet::new();
        for (base, size) in &live {
            for slot in *base..*base + *size {
                assert!(seen.insert(slot), "slot {} allocated twice", slot);
            }
        }
    }
}

// Property 4: chunks restamped at submit become reusable once the fence
// passes; steady-state frames allocate no new memory.
#[test]
fn upload_chunks_are_reclaimed_after_fence_completion() {
    let device = create_device();
    let buffer = device.create_buffer(BufferDesc::vertex(96 * 1024, "vb")).unwrap();
    let payload = vec![7u8; 96 * 1024];

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();

    list.open().unwrap();
    list.write_buffer(&buffer, &payload, 0).unwrap();
    list.close().unwrap();
    device
        .execute_command_lists(&mut [&mut list], QueueType::Graphics)
        .unwrap();
    let after_first_frame = list.upload_allocated_bytes();
    assert!(after_first_frame >= 96 * 1024);

    for _ in 0..4 {
        device.collect_garbage();
        assert!(list.upload_reusable_chunks() >= 1);
        list.open().unwrap();
        list.write_buffer(&buffer, &payload, 0).unwrap();
        list.close().unwrap();
        device
            .execute_command_lists(&mut [&mut list], QueueType::Graphics)
            .unwrap();
        assert_eq!(list.upload_allocated_bytes(), after_first_frame);
    }
}

// Property 5: once the fence passes a list's submission, the next open()
// reuses the same allocator/list pair.
#[test]
fn command_list_pool_reuses_retired_lists() {
    let device = create_device();
    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();

    list.open().unwrap();
    list.close().unwrap();
    device
        .execute_command_lists(&mut [&mut list], QueueType::Graphics)
        .unwrap();
    assert_eq!(list.pooled_lists(), 1);

    // The null fence completes at signal time, so the pooled pair is free.
    list.open().unwrap();
    assert_eq!(list.pooled_lists(), 1);
    assert_eq!(list.native_command_list().unwrap().reset_count(), 1);
    list.close().unwrap();
}

// Property 6: the view cache hands out one index per distinct
// (type, subresource, format) key.
#[test]
fn texture_view_cache_returns_identical_indices() {
    let device = create_device();
    let texture = device
        .create_texture(TextureDesc {
            mip_levels: 4,
            ..TextureDesc::shader_resource(64, 64, Format::RGBA8UNorm, "cached")
        })
        .unwrap();

    let whole = TextureSubresourceSet {
        base_mip_level: 0,
        mip_level_count: 4,
        base_array_slice: 0,
        array_slice_count: 1,
    };
    let first = texture
        .view_index(TextureViewType::ShaderResource, Format::Unknown, whole, false)
        .unwrap();
    let second = texture
        .view_index(TextureViewType::ShaderResource, Format::Unknown, whole, false)
        .unwrap();
    assert_eq!(first, second);

    let single_mip = texture
        .view_index(
            TextureViewType::ShaderResource,
            Format::Unknown,
            TextureSubresourceSet::single(1, 0),
            false,
        )
        .unwrap();
    assert_ne!(first, single_mip);

    // A UAV over the same subresources is its own entry.
    let uav = texture
        .view_index(TextureViewType::UnorderedAccess, Format::Unknown, whole, false)
        .unwrap();
    assert_ne!(first, uav);
}

// Constant buffer views are first-class cache entries, same as SRVs.
#[test]
fn buffer_view_cache_covers_cbvs() {
    let device = create_device();
    let buffer = device
        .create_buffer(BufferDesc::constant(512, false, "cb"))
        .unwrap();

    let first = buffer
        .view_index(ResourceViewType::ConstantBuffer, ENTIRE_BUFFER_RANGE)
        .unwrap();
    let second = buffer
        .view_index(ResourceViewType::ConstantBuffer, ENTIRE_BUFFER_RANGE)
        .unwrap();
    assert_eq!(first, second);

    let srv = buffer
        .view_index(ResourceViewType::RawBufferSrv, ENTIRE_BUFFER_RANGE)
        .unwrap();
    assert_ne!(first, srv);

    let volatile = device
        .create_buffer(BufferDesc::constant(256, true, "volatile"))
        .unwrap();
    assert_eq!(
        volatile.view_index(ResourceViewType::ConstantBuffer, ENTIRE_BUFFER_RANGE),
        Err(RhiError::InvalidArgument)
    );
}

#[test]
fn buffer_write_and_readback_round_trip() {
    let device = create_device();
    let storage = device.create_buffer(BufferDesc::vertex(64, "data")).unwrap();
    let readback = device
        .create_buffer(BufferDesc::read_back(64, "readback"))
        .unwrap();

    let payload: Vec<u8> = (0..64u8).collect();
    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.write_buffer(&storage, &payload, 0).unwrap();
    list.copy_buffer(&readback, 0, &storage, 0, 64).unwrap();
    list.close().unwrap();
    device
        .execute_command_lists(&mut [&mut list], QueueType::Graphics)
        .unwrap();

    let mapped = readback.map().unwrap();
    let contents = unsafe { std::slice::from_raw_parts(mapped, 64) }.to_vec();
    readback.unmap();
    assert_eq!(contents, payload);
}

#[test]
fn staging_texture_maps_one_subresource_at_a_time() {
    let device = create_device();
    let staging = device
        .create_staging_texture(
            TextureDesc {
                mip_levels: 2,
                ..TextureDesc::shader_resource(8, 8, Format::R8UNorm, "staging")
            },
            CpuAccessMode::Read,
        )
        .unwrap();

    let mut row_pitch = 0u64;
    let slice = TextureSlice::for_subresource(1, 0);
    let pointer = staging.map(&slice, &mut row_pitch).unwrap();
    assert!(!pointer.is_null());
    assert_eq!(row_pitch, TEXTURE_ROW_PITCH_ALIGNMENT);

    let mut second_pitch = 0u64;
    assert_eq!(
        staging.map(&slice, &mut second_pitch).err(),
        Some(RhiError::UsageBug)
    );
    staging.unmap();
    assert!(staging.map(&slice, &mut second_pitch).is_ok());
    staging.unmap();
}

#[test]
fn bindless_set_resizes_and_authors_slots() {
    let device = create_device();
    let layout = device
        .create_bindless_layout(BindlessLayoutDesc {
            first_slot: 0,
            items: [BindingLayoutItem::texture_srv(1)].into_iter().collect(),
            ..Default::default()
        })
        .unwrap();
    let set = device.create_bindless_set(&layout, 8).unwrap();
    assert_eq!(set.capacity(), 8);

    let texture = device
        .create_texture(TextureDesc::shader_resource(4, 4, Format::RGBA8UNorm, "t"))
        .unwrap();
    set.set_slot(&BindingSetItem::texture_srv_subresources(
        3,
        &texture,
        TextureSubresourceSet::default(),
    ))
    .unwrap();

    set.resize(16, true).unwrap();
    assert_eq!(set.capacity(), 16);
    set.set_slot(&BindingSetItem::texture_srv(15, &texture)).unwrap();
    assert_eq!(
        set.set_slot(&BindingSetItem::texture_srv(16, &texture)).err(),
        Some(RhiError::InvalidArgument)
    );
}

#[test]
fn event_and_timer_queries_observe_the_fence() {
    let device = create_device();

    let timer = device.create_timer_query().unwrap();
    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.begin_timer_query(&timer).unwrap();
    list.begin_marker("measured span").unwrap();
    list.end_marker().unwrap();
    list.end_timer_query(&timer).unwrap();
    list.close().unwrap();
    device
        .execute_command_lists(&mut [&mut list], QueueType::Graphics)
        .unwrap();

    assert!(device.poll_timer_query(&timer));
    let elapsed = device.timer_query_time(&timer).unwrap();
    assert!(elapsed > 0.0);

    let event = device.create_event_query();
    assert!(!device.poll_event_query(&event));
    device.set_event_query(&event, QueueType::Graphics).unwrap();
    assert!(device.poll_event_query(&event));
    device.wait_event_query(&event).unwrap();
    device.reset_event_query(&event);
    assert!(!device.poll_event_query(&event));
}

#[test]
fn compute_volatile_cbs_patch_like_the_graphics_path() {
    let device = create_device();
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
    let pipeline = device
        .create_compute_pipeline(ComputePipelineDesc {
            cs: trivial_shader(ShaderType::Compute),
            binding_layouts: [layout].into_iter().collect(),
        })
        .unwrap();

    let state = ComputeState {
        pipeline: Some(pipeline),
        binding_sets: binding_sets([BindingSetHandle::Bound(set)]),
    };

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.write_buffer(&constants, &[1u8; 32], 0).unwrap();
    list.set_compute_state(&state).unwrap();
    list.dispatch(8, 8, 1).unwrap();
    list.write_buffer(&constants, &[2u8; 32], 0).unwrap();
    list.dispatch(8, 8, 1).unwrap();
    list.close().unwrap();

    let commands = recorded_commands(&list);
    let cbv_addresses: Vec<GpuVirtualAddress> = commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::SetComputeRootConstantBuffer { address, .. } => Some(*address),
            _ => None,
        })
        .collect();
    // Bound once at state time, re-patched before the second dispatch.
    assert_eq!(cbv_addresses.len(), 2);
    assert_ne!(cbv_addresses[0], cbv_addresses[1]);
}

#[test]
fn pipelines_sharing_layouts_share_the_root_signature() {
    let device = create_device();
    let target = device
        .create_texture(TextureDesc::render_target(64, 64, Format::RGBA8UNorm, "rt"))
        .unwrap();
    let framebuffer = device
        .create_frame_buffer(FrameBufferDesc {
            color_attachments: [FrameBufferAttachment::new(&target)].into_iter().collect(),
            depth_stencil_attachment: None,
        })
        .unwrap();
    let layout = device
        .create_binding_layout(BindingLayoutDesc {
            items: [BindingLayoutItem::texture_srv(0)].into_iter().collect(),
            ..Default::default()
        })
        .unwrap();
    let texture = device
        .create_texture(TextureDesc::shader_resource(4, 4, Format::RGBA8UNorm, "t"))
        .unwrap();
    let set = device
        .create_binding_set(
            BindingSetDesc::with_items([BindingSetItem::texture_srv(0, &texture)]),
            &layout,
        )
        .unwrap();

    let make_pipeline = || {
        device
            .create_graphics_pipeline(
                GraphicsPipelineDesc {
                    vs: Some(trivial_shader(ShaderType::Vertex)),
                    ps: Some(trivial_shader(ShaderType::Pixel)),
                    binding_layouts: [layout.clone()].into_iter().collect(),
                    ..Default::default()
                },
                &framebuffer,
            )
            .unwrap()
    };
    let pipeline_a = make_pipeline();
    let pipeline_b = make_pipeline();

    let base_state = GraphicsState {
        pipeline: Some(pipeline_a),
        binding_sets: binding_sets([BindingSetHandle::Bound(set)]),
        framebuffer: Some(framebuffer.clone()),
        viewport: ViewportState::single(Viewport::new(64.0, 64.0)),
        ..Default::default()
    };
    let second_state = GraphicsState {
        pipeline: Some(pipeline_b),
        ..base_state.clone()
    };

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.set_graphics_state(&base_state).unwrap();
    list.set_graphics_state(&second_state).unwrap();
    list.close().unwrap();

    // The memoised root signature means the second pipeline switch does not
    // re-set the root layout.
    let commands = recorded_commands(&list);
    let root_layout_sets = commands
        .iter()
        .filter(|command| matches!(command, RecordedCommand::SetGraphicsRootLayout(_)))
        .count();
    assert_eq!(root_layout_sets, 1);
    let pipeline_sets = commands
        .iter()
        .filter(|command| matches!(command, RecordedCommand::SetGraphicsPipeline(_)))
        .count();
    assert_eq!(pipeline_sets, 2);
}

#[test]
fn push_constants_lower_into_root_constants() {
    let device = create_device();
    let target = device
        .create_texture(TextureDesc::render_target(64, 64, Format::RGBA8UNorm, "rt"))
        .unwrap();
    let framebuffer = device
        .create_frame_buffer(FrameBufferDesc {
            color_attachments: [FrameBufferAttachment::new(&target)].into_iter().collect(),
            depth_stencil_attachment: None,
        })
        .unwrap();
    let layout = device
        .create_binding_layout(BindingLayoutDesc {
            items: [BindingLayoutItem::push_constants(0, 16)].into_iter().collect(),
            ..Default::default()
        })
        .unwrap();
    let pipeline = device
        .create_graphics_pipeline(
            GraphicsPipelineDesc {
                vs: Some(trivial_shader(ShaderType::Vertex)),
                ps: Some(trivial_shader(ShaderType::Pixel)),
                binding_layouts: [layout.clone()].into_iter().collect(),
                ..Default::default()
            },
            &framebuffer,
        )
        .unwrap();
    let set = device
        .create_binding_set(BindingSetDesc::default(), &layout)
        .unwrap();

    let state = GraphicsState {
        pipeline: Some(pipeline),
        binding_sets: binding_sets([BindingSetHandle::Bound(set)]),
        framebuffer: Some(framebuffer.clone()),
        viewport: ViewportState::single(Viewport::new(64.0, 64.0)),
        ..Default::default()
    };

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.set_graphics_state(&state).unwrap();
    list.set_push_constants(&[0xAB; 16]).unwrap();

    // Oversized data is rejected.
    assert_eq!(
        list.set_push_constants(&[0u8; 32]),
        Err(RhiError::InvalidArgument)
    );
    list.close().unwrap();

    let commands = recorded_commands(&list);
    let constants = commands
        .iter()
        .find_map(|command| match command {
            RecordedCommand::SetGraphicsRootConstants {
                parameter_index,
                words,
            } => Some((*parameter_index, words.clone())),
            _ => None,
        })
        .expect("push constants were not recorded");
    assert_eq!(constants.0, 0);
    assert_eq!(constants.1.len(), 4);
    assert!(constants.1.iter().all(|word| *word == 0xABABABAB));
}

#[test]
fn device_removal_latches_and_refuses_submits() {
    let device = create_device();
    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.close().unwrap();

    device.native_device().simulate_device_removal();
    assert_eq!(
        device.execute_command_lists(&mut [&mut list], QueueType::Graphics),
        Err(RhiError::DeviceRemoved)
    );
    // The latch holds: later submissions and recordings refuse outright.
    assert_eq!(
        device.execute_command_lists(&mut [&mut list], QueueType::Graphics),
        Err(RhiError::DeviceRemoved)
    );
    assert_eq!(list.open(), Err(RhiError::DeviceRemoved));
}

#[test]
fn ray_tracing_gracefully_reports_missing_backend_support() {
    let device = create_device();
    assert_eq!(
        device
            .create_ray_tracing_pipeline(RayTracingPipelineDesc::default(), &[])
            .err(),
        Some(RhiError::StatePolicyViolation)
    );
    assert_eq!(
        device
            .create_accel_struct(AccelStructDesc::default())
            .err(),
        Some(RhiError::StatePolicyViolation)
    );
}

#[test]
fn closed_lists_reject_commands() {
    let device = create_device();
    let texture = device
        .create_texture(TextureDesc::shader_resource(4, 4, Format::R8UNorm, "t"))
        .unwrap();
    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.close().unwrap();
    assert_eq!(
        list.require_texture_state(&texture, ENTIRE_SUBRESOURCE_SET, ResourceStates::COPY_DEST),
        Err(RhiError::StatePolicyViolation)
    );
    assert_eq!(
        list.write_texture(&texture, 0, 0, &[0u8; 16], 4, 0),
        Err(RhiError::StatePolicyViolation)
    );
    assert_eq!(Arc::strong_count(&texture), 1);
}

#[test]
fn instances_hold_resources_until_garbage_collection() {
    let device = create_device();
    let buffer = device.create_buffer(BufferDesc::vertex(256, "vb")).unwrap();

    let mut list = device.create_command_list(CommandListDesc::default()).unwrap();
    list.open().unwrap();
    list.write_buffer(&buffer, &[1u8; 64], 0).unwrap();
    list.close().unwrap();
    device
        .execute_command_lists(&mut [&mut list], QueueType::Graphics)
        .unwrap();

    // The in-flight instance still holds a strong reference.
    assert!(Arc::strong_count(&buffer) > 1);
    device.collect_garbage();
    assert_eq!(Arc::strong_count(&buffer), 1);
}
