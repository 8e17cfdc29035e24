use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::Mutex;

use smallvec::SmallVec;

use kiln_core::gpu::Device as _;
use kiln_core::gpu::*;

use crate::Buffer;
use crate::DeviceContext;
use crate::ResourceHandle;
use crate::ResourceId;
use crate::Sampler;
use crate::Texture;

/// Concrete binding of one layout slot: a resource plus its view selector.
pub struct BindingSetItem<B: GpuBackend> {
    pub resource: ResourceHandle<B>,
    pub slot: u32,
    pub view_type: ResourceViewType,
    pub format: Format,
    pub dimension: TextureDimension,
    pub subresources: TextureSubresourceSet,
    pub range: BufferRange,
}

impl<B: GpuBackend> Clone for BindingSetItem<B> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            slot: self.slot,
            view_type: self.view_type,
            format: self.format,
            dimension: self.dimension,
            subresources: self.subresources,
            range: self.range,
        }
    }
}

impl<B: GpuBackend> BindingSetItem<B> {
    fn base(slot: u32, view_type: ResourceViewType) -> Self {
        Self {
            resource: ResourceHandle::None,
            slot,
            view_type,
            format: Format::Unknown,
            dimension: TextureDimension::Unknown,
            subresources: ENTIRE_SUBRESOURCE_SET,
            range: ENTIRE_BUFFER_RANGE,
        }
    }

    pub fn texture_srv(slot: u32, texture: &Arc<Texture<B>>) -> Self {
        let desc = texture.desc();
        Self {
            resource: ResourceHandle::Texture(texture.clone()),
            format: desc.format,
            dimension: desc.dimension,
            ..Self::base(slot, ResourceViewType::TextureSrv)
        }
    }

    pub fn texture_srv_subresources(
        slot: u32,
        texture: &Arc<Texture<B>>,
        subresources: TextureSubresourceSet,
    ) -> Self {
        Self {
            subresources,
            ..Self::texture_srv(slot, texture)
        }
    }

    pub fn texture_uav(slot: u32, texture: &Arc<Texture<B>>) -> Self {
        let desc = texture.desc();
        Self {
            resource: ResourceHandle::Texture(texture.clone()),
            format: desc.format,
            dimension: desc.dimension,
            subresources: TextureSubresourceSet::default(),
            ..Self::base(slot, ResourceViewType::TextureUav)
        }
    }

    pub fn typed_buffer_srv(slot: u32, buffer: &Arc<Buffer<B>>) -> Self {
        let desc = buffer.desc();
        Self {
            resource: ResourceHandle::Buffer(buffer.clone()),
            format: desc.format,
            range: BufferRange::new(0, desc.byte_size),
            ..Self::base(slot, ResourceViewType::TypedBufferSrv)
        }
    }

    pub fn typed_buffer_uav(slot: u32, buffer: &Arc<Buffer<B>>) -> Self {
        Self {
            view_type: ResourceViewType::TypedBufferUav,
            ..Self::typed_buffer_srv(slot, buffer)
        }
    }

    pub fn structured_buffer_srv(slot: u32, buffer: &Arc<Buffer<B>>) -> Self {
        Self {
            view_type: ResourceViewType::StructuredBufferSrv,
            format: Format::Unknown,
            ..Self::typed_buffer_srv(slot, buffer)
        }
    }

    pub fn structured_buffer_uav(slot: u32, buffer: &Arc<Buffer<B>>) -> Self {
        Self {
            view_type: ResourceViewType::StructuredBufferUav,
            format: Format::Unknown,
            ..Self::typed_buffer_srv(slot, buffer)
        }
    }

    pub fn raw_buffer_srv(slot: u32, buffer: &Arc<Buffer<B>>) -> Self {
        Self {
            view_type: ResourceViewType::RawBufferSrv,
            format: Format::Unknown,
            ..Self::typed_buffer_srv(slot, buffer)
        }
    }

    pub fn raw_buffer_uav(slot: u32, buffer: &Arc<Buffer<B>>) -> Self {
        Self {
            view_type: ResourceViewType::RawBufferUav,
            format: Format::Unknown,
            ..Self::typed_buffer_srv(slot, buffer)
        }
    }

    /// Resolves to a volatile or static constant buffer binding based on the
    /// buffer's own description.
    pub fn constant_buffer(slot: u32, buffer: &Arc<Buffer<B>>) -> Self {
        let desc = buffer.desc();
        let view_type = if desc.is_volatile {
            ResourceViewType::VolatileConstantBuffer
        } else {
            ResourceViewType::ConstantBuffer
        };
        Self {
            resource: ResourceHandle::Buffer(buffer.clone()),
            range: BufferRange::new(0, desc.byte_size),
            ..Self::base(slot, view_type)
        }
    }

    pub fn sampler(slot: u32, sampler: &Arc<Sampler<B>>) -> Self {
        Self {
            resource: ResourceHandle::Sampler(sampler.clone()),
            ..Self::base(slot, ResourceViewType::Sampler)
        }
    }

    pub fn push_constants(slot: u32, byte_size: u32) -> Self {
        Self {
            range: BufferRange::new(0, byte_size as u64),
            ..Self::base(slot, ResourceViewType::PushConstants)
        }
    }

    pub fn accel_struct(slot: u32, buffer: &Arc<Buffer<B>>) -> Self {
        Self {
            resource: ResourceHandle::Buffer(buffer.clone()),
            ..Self::base(slot, ResourceViewType::AccelStruct)
        }
    }
}

pub struct BindingSetDesc<B: GpuBackend> {
    pub items: SmallVec<[BindingSetItem<B>; 16]>,
    /// When false the set is excluded from instance liveness tracking.
    pub track_liveness: bool,
}

impl<B: GpuBackend> Default for BindingSetDesc<B> {
    fn default() -> Self {
        Self {
            items: SmallVec::new(),
            track_liveness: true,
        }
    }
}

impl<B: GpuBackend> BindingSetDesc<B> {
    pub fn with_items(items: impl IntoIterator<Item = BindingSetItem<B>>) -> Self {
        Self {
            items: items.into_iter().collect(),
            track_liveness: true,
        }
    }
}

fn range_kind_for(view_type: ResourceViewType) -> Option<DescriptorRangeKind> {
    match view_type {
        ResourceViewType::TextureSrv
        | ResourceViewType::TypedBufferSrv
        | ResourceViewType::StructuredBufferSrv
        | ResourceViewType::RawBufferSrv
        | ResourceViewType::AccelStruct => Some(DescriptorRangeKind::Srv),
        ResourceViewType::TextureUav
        | ResourceViewType::TypedBufferUav
        | ResourceViewType::StructuredBufferUav
        | ResourceViewType::RawBufferUav => Some(DescriptorRangeKind::Uav),
        ResourceViewType::ConstantBuffer => Some(DescriptorRangeKind::Cbv),
        ResourceViewType::Sampler => Some(DescriptorRangeKind::Sampler),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct VolatileCbSlot {
    /// Root-parameter index relative to the layout's segment.
    pub root_index: u32,
    pub register: u32,
}

/// A bound layout lowered into its root-signature segment: push constants
/// first, then one root CBV per volatile constant buffer, then up to two
/// descriptor tables (SRV-etc and sampler).
pub(crate) struct BoundLayout {
    pub desc: BindingLayoutDesc,
    pub root_parameters: Vec<RootParameterDesc>,
    pub push_constants_root_index: Option<u32>,
    pub push_constants_size: u32,
    pub volatile_cbs: Vec<VolatileCbSlot>,
    pub srv_etc_ranges: Vec<DescriptorRange>,
    pub sampler_ranges: Vec<DescriptorRange>,
    pub srv_etc_table_size: u32,
    pub sampler_table_size: u32,
    pub srv_etc_root_index: Option<u32>,
    pub sampler_root_index: Option<u32>,
}

pub(crate) struct BindlessLayoutData {
    pub desc: BindlessLayoutDesc,
    pub root_parameter: RootParameterDesc,
}

pub(crate) enum LayoutInner {
    Bound(BoundLayout),
    Bindless(BindlessLayoutData),
}

/// The shape of one binding space, pre-lowered so root-signature assembly
/// is mere concatenation. Layouts are interned by identity: the id feeds
/// the root-signature hash.
pub struct BindingLayout {
    pub(crate) id: ResourceId,
    pub(crate) inner: LayoutInner,
}

impl BindingLayout {
    pub fn is_bindless(&self) -> bool {
        matches!(self.inner, LayoutInner::Bindless(_))
    }

    pub fn desc(&self) -> Option<&BindingLayoutDesc> {
        match &self.inner {
            LayoutInner::Bound(bound) => Some(&bound.desc),
            LayoutInner::Bindless(_) => None,
        }
    }

    pub fn bindless_desc(&self) -> Option<&BindlessLayoutDesc> {
        match &self.inner {
            LayoutInner::Bindless(data) => Some(&data.desc),
            LayoutInner::Bound(_) => None,
        }
    }

    pub(crate) fn bound(&self) -> Option<&BoundLayout> {
        match &self.inner {
            LayoutInner::Bound(bound) => Some(bound),
            LayoutInner::Bindless(_) => None,
        }
    }

    /// Lowers a bound layout description. Items of one kind must sit on
    /// contiguous slots; each discontinuity opens a fresh descriptor range.
    pub fn new_bound(desc: BindingLayoutDesc) -> RhiResult<Arc<BindingLayout>> {
        let mut current_type = ResourceViewType::None;
        let mut current_slot = u32::MAX;

        let mut push_constants: Option<(u32, u32)> = None;
        let mut volatile_cb_registers: Vec<u32> = Vec::new();
        let mut srv_etc_ranges: Vec<DescriptorRange> = Vec::new();
        let mut sampler_ranges: Vec<DescriptorRange> = Vec::new();
        let mut srv_etc_table_size = 0u32;
        let mut sampler_table_size = 0u32;

        for item in &desc.items {
            match item.view_type {
                ResourceViewType::None => {
                    log::error!("binding layout contains an empty item");
                    return Err(RhiError::InvalidArgument);
                }
                ResourceViewType::PushConstants => {
                    if push_constants.is_some() {
                        log::error!("a binding layout allows at most one push-constants item");
                        return Err(RhiError::InvalidArgument);
                    }
                    push_constants = Some((item.slot, item.size as u32));
                }
                ResourceViewType::VolatileConstantBuffer => {
                    volatile_cb_registers.push(item.slot);
                }
                view_type => {
                    let kind = range_kind_for(view_type).ok_or(RhiError::InvalidArgument)?;
                    let extend = view_type.normalized() == current_type.normalized()
                        && item.slot == current_slot.wrapping_add(1);

                    if kind == DescriptorRangeKind::Sampler {
                        if extend {
                            sampler_ranges.last_mut().unwrap().count += 1;
                        } else {
                            sampler_ranges.push(DescriptorRange {
                                kind,
                                base_slot: item.slot,
                                register_space: desc.register_space,
                                count: 1,
                                offset_in_table: sampler_table_size,
                            });
                        }
                        sampler_table_size += 1;
                    } else {
                        if extend {
                            srv_etc_ranges.last_mut().unwrap().count += 1;
                        } else {
                            srv_etc_ranges.push(DescriptorRange {
                                kind,
                                base_slot: item.slot,
                                register_space: desc.register_space,
                                count: 1,
                                offset_in_table: srv_etc_table_size,
                            });
                        }
                        srv_etc_table_size += 1;
                    }
                    current_type = view_type;
                    current_slot = item.slot;
                }
            }
        }

        // Assemble the segment. Root parameter indices below are relative
        // to this layout's first parameter.
        let mut root_parameters = Vec::new();
        let mut push_constants_root_index = None;
        let mut push_constants_size = 0;
        if let Some((slot, size)) = push_constants {
            root_parameters.push(RootParameterDesc {
                parameter: RootParameter::Constants {
                    slot,
                    register_space: desc.register_space,
                    num_32bit_values: size / 4,
                },
                visibility: desc.visibility,
            });
            push_constants_root_index = Some(root_parameters.len() as u32 - 1);
            push_constants_size = size;
        }

        let mut volatile_cbs = Vec::new();
        for register in volatile_cb_registers {
            root_parameters.push(RootParameterDesc {
                parameter: RootParameter::ConstantBufferView {
                    slot: register,
                    register_space: desc.register_space,
                },
                visibility: desc.visibility,
            });
            volatile_cbs.push(VolatileCbSlot {
                root_index: root_parameters.len() as u32 - 1,
                register,
            });
        }

        let mut srv_etc_root_index = None;
        if srv_etc_table_size > 0 {
            root_parameters.push(RootParameterDesc {
                parameter: RootParameter::DescriptorTable {
                    ranges: srv_etc_ranges.clone(),
                },
                visibility: desc.visibility,
            });
            srv_etc_root_index = Some(root_parameters.len() as u32 - 1);
        }

        let mut sampler_root_index = None;
        if sampler_table_size > 0 {
            root_parameters.push(RootParameterDesc {
                parameter: RootParameter::DescriptorTable {
                    ranges: sampler_ranges.clone(),
                },
                visibility: desc.visibility,
            });
            sampler_root_index = Some(root_parameters.len() as u32 - 1);
        }

        Ok(Arc::new(BindingLayout {
            id: ResourceId::next(),
            inner: LayoutInner::Bound(BoundLayout {
                desc,
                root_parameters,
                push_constants_root_index,
                push_constants_size,
                volatile_cbs,
                srv_etc_ranges,
                sampler_ranges,
                srv_etc_table_size,
                sampler_table_size,
                srv_etc_root_index,
                sampler_root_index,
            }),
        }))
    }

    /// Lowers a bindless layout: one unbounded range per item, all in a
    /// single descriptor-table root parameter.
    pub fn new_bindless(desc: BindlessLayoutDesc) -> RhiResult<Arc<BindingLayout>> {
        let mut ranges = Vec::new();
        for item in &desc.items {
            if matches!(
                item.view_type,
                ResourceViewType::PushConstants | ResourceViewType::VolatileConstantBuffer
            ) {
                log::error!(
                    "push constants and volatile constant buffers are illegal in a bindless layout"
                );
                return Err(RhiError::InvalidArgument);
            }
            let kind = range_kind_for(item.view_type).ok_or(RhiError::InvalidArgument)?;
            ranges.push(DescriptorRange {
                kind,
                base_slot: desc.first_slot,
                // In a bindless layout the item's slot field carries the
                // register space.
                register_space: item.slot,
                count: u32::MAX,
                offset_in_table: 0,
            });
        }

        let root_parameter = RootParameterDesc {
            parameter: RootParameter::DescriptorTable { ranges },
            visibility: desc.visibility,
        };

        Ok(Arc::new(BindingLayout {
            id: ResourceId::next(),
            inner: LayoutInner::Bindless(BindlessLayoutData {
                desc,
                root_parameter,
            }),
        }))
    }
}

pub type BindingLayoutArray = SmallVec<[Arc<BindingLayout>; MAX_BINDING_LAYOUTS]>;

/// The flattened root layout: every binding layout's segment concatenated,
/// memoised by content hash so pipelines sharing layouts share the native
/// object.
pub struct RootSignature<B: GpuBackend> {
    ctx: Arc<DeviceContext<B>>,
    pub(crate) native: B::RootLayout,
    pub(crate) layouts: SmallVec<[(Arc<BindingLayout>, u32); MAX_BINDING_LAYOUTS]>,
    pub(crate) push_constants: Option<(u32, u32)>,
    pub(crate) hash: u64,
}

pub(crate) fn root_signature_hash(layouts: &[Arc<BindingLayout>], allow_input_layout: bool) -> u64 {
    let mut hasher = DefaultHasher::new();
    for layout in layouts {
        layout.id.hash(&mut hasher);
    }
    allow_input_layout.hash(&mut hasher);
    hasher.finish()
}

impl<B: GpuBackend> RootSignature<B> {
    pub(crate) fn build(
        ctx: &Arc<DeviceContext<B>>,
        layouts: &[Arc<BindingLayout>],
        allow_input_layout: bool,
    ) -> RhiResult<Arc<RootSignature<B>>> {
        if layouts.len() > MAX_BINDING_LAYOUTS {
            log::error!("too many binding layouts: {}", layouts.len());
            return Err(RhiError::InvalidArgument);
        }
        let hash = root_signature_hash(layouts, allow_input_layout);
        {
            let cache = ctx.heaps.root_signature_cache.lock().unwrap();
            if let Some(existing) = cache.get(&hash).and_then(|weak| weak.upgrade()) {
                return Ok(existing);
            }
        }

        let mut parameters = Vec::new();
        let mut layout_offsets = SmallVec::new();
        let mut push_constants = None;

        for layout in layouts {
            let offset = parameters.len() as u32;
            layout_offsets.push((layout.clone(), offset));
            match &layout.inner {
                LayoutInner::Bindless(data) => {
                    parameters.push(data.root_parameter.clone());
                }
                LayoutInner::Bound(bound) => {
                    parameters.extend(bound.root_parameters.iter().cloned());
                    if bound.push_constants_size > 0 {
                        if push_constants.is_some() {
                            log::error!("at most one push-constants range per pipeline");
                            return Err(RhiError::InvalidArgument);
                        }
                        push_constants = Some((
                            bound.push_constants_root_index.unwrap() + offset,
                            bound.push_constants_size,
                        ));
                    }
                }
            }
        }

        let native = unsafe {
            ctx.device.create_root_layout(&RootLayoutDesc {
                parameters,
                allow_input_layout,
            })?
        };

        let root_signature = Arc::new(RootSignature {
            ctx: ctx.clone(),
            native,
            layouts: layout_offsets,
            push_constants,
            hash,
        });

        ctx.heaps
            .root_signature_cache
            .lock()
            .unwrap()
            .insert(hash, Arc::downgrade(&root_signature));
        Ok(root_signature)
    }

    pub(crate) fn layout_offset(&self, index: usize) -> Option<(&Arc<BindingLayout>, u32)> {
        self.layouts
            .get(index)
            .map(|(layout, offset)| (layout, *offset))
    }
}

impl<B: GpuBackend> Drop for RootSignature<B> {
    fn drop(&mut self) {
        let mut cache = self.ctx.heaps.root_signature_cache.lock().unwrap();
        if let Some(weak) = cache.get(&self.hash) {
            if weak.upgrade().is_none() {
                cache.remove(&self.hash);
            }
        }
    }
}

/// A binding set owns one contiguous SRV-etc run and one sampler run for its
/// whole lifetime, plus strong references to every bound resource.
pub struct BindingSet<B: GpuBackend> {
    ctx: Arc<DeviceContext<B>>,
    desc: BindingSetDesc<B>,
    layout: Arc<BindingLayout>,
    pub(crate) srv_etc_base: u32,
    pub(crate) srv_etc_size: u32,
    pub(crate) sampler_base: u32,
    pub(crate) sampler_size: u32,
    /// Relative root parameter indices, from the layout.
    pub(crate) srv_etc_root_index: Option<u32>,
    pub(crate) sampler_root_index: Option<u32>,
    /// (relative root index, bound buffer) for each volatile CB slot.
    pub(crate) volatile_cbs: Vec<(u32, Arc<Buffer<B>>)>,
    /// Indices into `desc.items` that need state transitions at bind time.
    pub(crate) transition_bindings: Vec<u16>,
    pub(crate) has_uavs: bool,
}

impl<B: GpuBackend> BindingSet<B> {
    pub(crate) fn new(
        ctx: Arc<DeviceContext<B>>,
        desc: BindingSetDesc<B>,
        layout: &Arc<BindingLayout>,
    ) -> RhiResult<Arc<BindingSet<B>>> {
        let Some(bound) = layout.bound() else {
            log::error!("binding sets require a bound layout; use create_bindless_set instead");
            return Err(RhiError::InvalidArgument);
        };

        let mut volatile_cbs = Vec::with_capacity(bound.volatile_cbs.len());
        for slot in &bound.volatile_cbs {
            let found = desc.items.iter().find(|item| {
                matches!(
                    item.view_type,
                    ResourceViewType::VolatileConstantBuffer | ResourceViewType::ConstantBuffer
                ) && item.slot == slot.register
            });
            let Some(buffer) = found.and_then(|item| item.resource.buffer()) else {
                log::error!(
                    "no constant buffer bound for volatile CB register {}",
                    slot.register
                );
                return Err(RhiError::InvalidArgument);
            };
            volatile_cbs.push((slot.root_index, buffer.clone()));
        }

        let mut transition_bindings = Vec::new();
        let mut has_uavs = false;

        let srv_etc_size = bound.srv_etc_table_size;
        let mut srv_etc_base = 0;
        if srv_etc_size > 0 {
            let heap = &ctx.heaps.shader_resource;
            srv_etc_base = heap.allocate(&ctx.device, srv_etc_size)?;

            let result = Self::author_srv_etc_views(
                &ctx,
                &desc,
                bound,
                srv_etc_base,
                &mut transition_bindings,
                &mut has_uavs,
            );
            if let Err(error) = result {
                heap.release(srv_etc_base, srv_etc_size);
                return Err(error);
            }
            heap.copy_to_shader_visible(&ctx.device, srv_etc_base, srv_etc_size);
        }

        let sampler_size = bound.sampler_table_size;
        let mut sampler_base = 0;
        if sampler_size > 0 {
            let heap = &ctx.heaps.sampler;
            sampler_base = heap.allocate(&ctx.device, sampler_size)?;

            let result = Self::author_sampler_views(&ctx, &desc, bound, sampler_base);
            if let Err(error) = result {
                heap.release(sampler_base, sampler_size);
                if srv_etc_size > 0 {
                    ctx.heaps.shader_resource.release(srv_etc_base, srv_etc_size);
                }
                return Err(error);
            }
            heap.copy_to_shader_visible(&ctx.device, sampler_base, sampler_size);
        }

        Ok(Arc::new(BindingSet {
            srv_etc_root_index: bound.srv_etc_root_index,
            sampler_root_index: bound.sampler_root_index,
            ctx,
            desc,
            layout: layout.clone(),
            srv_etc_base,
            srv_etc_size,
            sampler_base,
            sampler_size,
            volatile_cbs,
            transition_bindings,
            has_uavs,
        }))
    }

    fn author_srv_etc_views(
        ctx: &Arc<DeviceContext<B>>,
        desc: &BindingSetDesc<B>,
        bound: &BoundLayout,
        base_index: u32,
        transition_bindings: &mut Vec<u16>,
        has_uavs: &mut bool,
    ) -> RhiResult<()> {
        let heap = &ctx.heaps.shader_resource;
        for range in &bound.srv_etc_ranges {
            for i in 0..range.count {
                let register = range.base_slot + i;
                let handle = heap.cpu_handle(base_index + range.offset_in_table + i);

                let mut found = false;
                for (item_index, item) in desc.items.iter().enumerate() {
                    if item.slot != register {
                        continue;
                    }
                    let kind = match range_kind_for(item.view_type) {
                        Some(kind) => kind,
                        None => continue,
                    };
                    if kind != range.kind {
                        continue;
                    }

                    match (&item.resource, item.view_type) {
                        (ResourceHandle::Texture(texture), view_type) => {
                            let texture_view_type = if view_type.is_uav() {
                                *has_uavs = true;
                                TextureViewType::UnorderedAccess
                            } else {
                                TextureViewType::ShaderResource
                            };
                            unsafe {
                                ctx.device.create_texture_view(
                                    handle,
                                    texture_view_type,
                                    texture.native()?,
                                    &TextureViewDesc {
                                        format: item.format,
                                        dimension: if item.dimension == TextureDimension::Unknown {
                                            texture.desc().dimension
                                        } else {
                                            item.dimension
                                        },
                                        subresources: item
                                            .subresources
                                            .resolve(texture.desc(), false),
                                        is_read_only_dsv: false,
                                    },
                                );
                            }
                            transition_bindings.push(item_index as u16);
                        }
                        (ResourceHandle::Buffer(buffer), ResourceViewType::ConstantBuffer) => {
                            if buffer.desc().is_volatile {
                                log::error!(
                                    "volatile constant buffer bound to the static CBV register {}",
                                    register
                                );
                                return Err(RhiError::InvalidArgument);
                            }
                            unsafe {
                                ctx.device.create_buffer_view(
                                    handle,
                                    buffer.native()?,
                                    &BufferViewDesc {
                                        view_type: item.view_type,
                                        format: Format::Unknown,
                                        range: item.range.resolve(buffer.desc()),
                                        struct_stride: 0,
                                    },
                                );
                            }
                            transition_bindings.push(item_index as u16);
                        }
                        (ResourceHandle::Buffer(buffer), view_type) => {
                            if view_type.is_uav() {
                                *has_uavs = true;
                            }
                            unsafe {
                                ctx.device.create_buffer_view(
                                    handle,
                                    buffer.native()?,
                                    &BufferViewDesc {
                                        view_type,
                                        format: item.format,
                                        range: item.range.resolve(buffer.desc()),
                                        struct_stride: buffer.desc().struct_stride,
                                    },
                                );
                            }
                            transition_bindings.push(item_index as u16);
                        }
                        (ResourceHandle::None, view_type) => {
                            // Absent buffer views degrade to null views.
                            unsafe {
                                ctx.device.create_null_view(handle, view_type, item.format);
                            }
                            log::warn!(
                                "binding register {} has no resource, authoring a null view",
                                register
                            );
                        }
                        _ => {
                            log::error!("resource type mismatch at register {}", register);
                            return Err(RhiError::InvalidArgument);
                        }
                    }
                    found = true;
                    break;
                }

                if !found {
                    log::error!(
                        "binding set provides no item for register {} required by its layout",
                        register
                    );
                    return Err(RhiError::InvalidArgument);
                }
            }
        }
        Ok(())
    }

    fn author_sampler_views(
        ctx: &Arc<DeviceContext<B>>,
        desc: &BindingSetDesc<B>,
        bound: &BoundLayout,
        base_index: u32,
    ) -> RhiResult<()> {
        let heap = &ctx.heaps.sampler;
        for range in &bound.sampler_ranges {
            for i in 0..range.count {
                let register = range.base_slot + i;
                let handle = heap.cpu_handle(base_index + range.offset_in_table + i);

                let item = desc.items.iter().find(|item| {
                    item.view_type == ResourceViewType::Sampler && item.slot == register
                });
                let Some(sampler) = item.and_then(|item| item.resource.sampler()) else {
                    log::error!("binding set provides no sampler for register {}", register);
                    return Err(RhiError::InvalidArgument);
                };
                sampler.author_descriptor(handle);
            }
        }
        Ok(())
    }

    pub fn desc(&self) -> &BindingSetDesc<B> {
        &self.desc
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }
}

impl<B: GpuBackend> Drop for BindingSet<B> {
    fn drop(&mut self) {
        if self.srv_etc_size > 0 {
            self.ctx
                .heaps
                .shader_resource
                .release(self.srv_etc_base, self.srv_etc_size);
        }
        if self.sampler_size > 0 {
            self.ctx
                .heaps
                .sampler
                .release(self.sampler_base, self.sampler_size);
        }
    }
}

struct BindlessRun {
    base: u32,
    capacity: u32,
}

/// A bindless set: a capacity-sized descriptor run whose slots are authored
/// incrementally. Resizing reallocates the run; GPU-handle offsets held by
/// callers are invalid afterwards.
pub struct BindlessSet<B: GpuBackend> {
    ctx: Arc<DeviceContext<B>>,
    layout: Arc<BindingLayout>,
    run: Mutex<BindlessRun>,
    /// Strong references for authored slots, indexed by slot offset.
    items: Mutex<Vec<Option<ResourceHandle<B>>>>,
}

impl<B: GpuBackend> BindlessSet<B> {
    pub(crate) fn new(
        ctx: Arc<DeviceContext<B>>,
        layout: &Arc<BindingLayout>,
        capacity: u32,
    ) -> RhiResult<Arc<BindlessSet<B>>> {
        if !layout.is_bindless() {
            log::error!("create_bindless_set requires a bindless layout");
            return Err(RhiError::InvalidArgument);
        }
        if capacity == 0 {
            return Err(RhiError::InvalidArgument);
        }
        let base = ctx.heaps.shader_resource.allocate(&ctx.device, capacity)?;
        Ok(Arc::new(BindlessSet {
            ctx,
            layout: layout.clone(),
            run: Mutex::new(BindlessRun { base, capacity }),
            items: Mutex::new((0..capacity).map(|_| None).collect()),
        }))
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    pub fn capacity(&self) -> u32 {
        self.run.lock().unwrap().capacity
    }

    pub(crate) fn base_index(&self) -> u32 {
        self.run.lock().unwrap().base
    }

    /// Grows or shrinks the descriptor run. With `keep_contents` the old
    /// descriptors are copy-preserved through a native descriptor copy.
    pub fn resize(&self, new_capacity: u32, keep_contents: bool) -> RhiResult<()> {
        if new_capacity == 0 {
            return Err(RhiError::InvalidArgument);
        }
        let heap = &self.ctx.heaps.shader_resource;
        let mut run = self.run.lock().unwrap();
        if new_capacity == run.capacity {
            return Ok(());
        }

        let new_base = heap.allocate(&self.ctx.device, new_capacity)?;
        if keep_contents {
            let preserved = run.capacity.min(new_capacity);
            heap.copy_staged(&self.ctx.device, new_base, run.base, preserved);
            heap.copy_to_shader_visible(&self.ctx.device, new_base, preserved);
        }
        heap.release(run.base, run.capacity);
        run.base = new_base;
        run.capacity = new_capacity;

        let mut items = self.items.lock().unwrap();
        items.resize_with(new_capacity as usize, || None);
        if !keep_contents {
            items.iter_mut().for_each(|slot| *slot = None);
        }
        Ok(())
    }

    /// Authors one slot. `item.slot` is the offset inside this set's run.
    pub fn set_slot(&self, item: &BindingSetItem<B>) -> RhiResult<()> {
        let run = self.run.lock().unwrap();
        if item.slot >= run.capacity {
            log::error!(
                "bindless slot {} is out of range (capacity {})",
                item.slot,
                run.capacity
            );
            return Err(RhiError::InvalidArgument);
        }
        let heap = &self.ctx.heaps.shader_resource;
        let index = run.base + item.slot;
        let handle = heap.cpu_handle(index);

        match (&item.resource, item.view_type) {
            (ResourceHandle::Texture(texture), view_type) => {
                let texture_view_type = if view_type.is_uav() {
                    TextureViewType::UnorderedAccess
                } else {
                    TextureViewType::ShaderResource
                };
                unsafe {
                    self.ctx.device.create_texture_view(
                        handle,
                        texture_view_type,
                        texture.native()?,
                        &TextureViewDesc {
                            format: item.format,
                            dimension: if item.dimension == TextureDimension::Unknown {
                                texture.desc().dimension
                            } else {
                                item.dimension
                            },
                            subresources: item.subresources.resolve(texture.desc(), false),
                            is_read_only_dsv: false,
                        },
                    );
                }
            }
            (ResourceHandle::Buffer(buffer), view_type) => unsafe {
                self.ctx.device.create_buffer_view(
                    handle,
                    buffer.native()?,
                    &BufferViewDesc {
                        view_type,
                        format: item.format,
                        range: item.range.resolve(buffer.desc()),
                        struct_stride: buffer.desc().struct_stride,
                    },
                );
            },
            _ => {
                log::error!("bindless set_slot requires a texture or buffer resource");
                return Err(RhiError::InvalidArgument);
            }
        }
        heap.copy_to_shader_visible(&self.ctx.device, index, 1);
        self.items.lock().unwrap()[item.slot as usize] = Some(item.resource.clone());
        Ok(())
    }
}

impl<B: GpuBackend> Drop for BindlessSet<B> {
    fn drop(&mut self) {
        let run = self.run.lock().unwrap();
        self.ctx.heaps.shader_resource.release(run.base, run.capacity);
    }
}

/// Either flavor of binding set, as slotted into a pipeline state.
pub enum BindingSetHandle<B: GpuBackend> {
    Bound(Arc<BindingSet<B>>),
    Bindless(Arc<BindlessSet<B>>),
}

impl<B: GpuBackend> Clone for BindingSetHandle<B> {
    fn clone(&self) -> Self {
        match self {
            BindingSetHandle::Bound(set) => BindingSetHandle::Bound(set.clone()),
            BindingSetHandle::Bindless(set) => BindingSetHandle::Bindless(set.clone()),
        }
    }
}

impl<B: GpuBackend> BindingSetHandle<B> {
    pub fn layout(&self) -> &Arc<BindingLayout> {
        match self {
            BindingSetHandle::Bound(set) => set.layout(),
            BindingSetHandle::Bindless(set) => set.layout(),
        }
    }

    pub fn ptr_eq(&self, other: &BindingSetHandle<B>) -> bool {
        match (self, other) {
            (BindingSetHandle::Bound(a), BindingSetHandle::Bound(b)) => Arc::ptr_eq(a, b),
            (BindingSetHandle::Bindless(a), BindingSetHandle::Bindless(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_items_merge_into_one_range() {
        let desc = BindingLayoutDesc {
            items: [
                BindingLayoutItem::texture_srv(0),
                BindingLayoutItem::texture_srv(1),
                BindingLayoutItem::texture_srv(2),
                BindingLayoutItem::sampler(0),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let layout = BindingLayout::new_bound(desc).unwrap();
        let bound = layout.bound().unwrap();
        assert_eq!(bound.srv_etc_ranges.len(), 1);
        assert_eq!(bound.srv_etc_ranges[0].count, 3);
        assert_eq!(bound.srv_etc_table_size, 3);
        assert_eq!(bound.sampler_ranges.len(), 1);
        assert_eq!(bound.sampler_table_size, 1);
        // SRV-etc table first, sampler table second.
        assert_eq!(bound.srv_etc_root_index, Some(0));
        assert_eq!(bound.sampler_root_index, Some(1));
    }

    #[test]
    fn discontinuity_opens_a_new_range() {
        let desc = BindingLayoutDesc {
            items: [
                BindingLayoutItem::texture_srv(0),
                BindingLayoutItem::texture_srv(2),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let layout = BindingLayout::new_bound(desc).unwrap();
        let bound = layout.bound().unwrap();
        assert_eq!(bound.srv_etc_ranges.len(), 2);
        assert_eq!(bound.srv_etc_ranges[1].offset_in_table, 1);
    }

    #[test]
    fn kind_change_opens_a_new_range() {
        let desc = BindingLayoutDesc {
            items: [
                BindingLayoutItem::texture_srv(0),
                BindingLayoutItem::texture_uav(1),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let layout = BindingLayout::new_bound(desc).unwrap();
        let bound = layout.bound().unwrap();
        assert_eq!(bound.srv_etc_ranges.len(), 2);
        assert_eq!(bound.srv_etc_ranges[0].kind, DescriptorRangeKind::Srv);
        assert_eq!(bound.srv_etc_ranges[1].kind, DescriptorRangeKind::Uav);
    }

    #[test]
    fn push_constants_precede_volatile_cbs_and_tables() {
        let desc = BindingLayoutDesc {
            items: [
                BindingLayoutItem::texture_srv(0),
                BindingLayoutItem::constant_buffer(0, true),
                BindingLayoutItem::push_constants(1, 16),
                BindingLayoutItem::sampler(0),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let layout = BindingLayout::new_bound(desc).unwrap();
        let bound = layout.bound().unwrap();
        assert_eq!(bound.push_constants_root_index, Some(0));
        assert_eq!(bound.volatile_cbs.len(), 1);
        assert_eq!(bound.volatile_cbs[0].root_index, 1);
        assert_eq!(bound.srv_etc_root_index, Some(2));
        assert_eq!(bound.sampler_root_index, Some(3));
        assert_eq!(bound.root_parameters.len(), 4);
    }

    #[test]
    fn two_push_constants_items_fail() {
        let desc = BindingLayoutDesc {
            items: [
                BindingLayoutItem::push_constants(0, 16),
                BindingLayoutItem::push_constants(1, 16),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        assert_eq!(
            BindingLayout::new_bound(desc).err(),
            Some(RhiError::InvalidArgument)
        );
    }

    #[test]
    fn bindless_layout_rejects_volatile_items() {
        let desc = BindlessLayoutDesc {
            items: [BindingLayoutItem::constant_buffer(0, true)]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        assert_eq!(
            BindingLayout::new_bindless(desc).err(),
            Some(RhiError::InvalidArgument)
        );
    }

    #[test]
    fn bindless_ranges_are_unbounded() {
        let desc = BindlessLayoutDesc {
            first_slot: 4,
            items: [BindingLayoutItem::texture_srv(1)].into_iter().collect(),
            ..Default::default()
        };
        let layout = BindingLayout::new_bindless(desc).unwrap();
        match &layout.inner {
            LayoutInner::Bindless(data) => match &data.root_parameter.parameter {
                RootParameter::DescriptorTable { ranges } => {
                    assert_eq!(ranges.len(), 1);
                    assert!(ranges[0].is_unbounded());
                    assert_eq!(ranges[0].base_slot, 4);
                    assert_eq!(ranges[0].register_space, 1);
                }
                _ => panic!("expected a descriptor table"),
            },
            _ => panic!("expected a bindless layout"),
        }
    }
}
