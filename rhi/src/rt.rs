use std::sync::Arc;

use kiln_core::gpu::Device as _;
use kiln_core::gpu::*;

use crate::Buffer;
use crate::DeviceContext;

/// An acceleration structure: its description plus the storage buffer the
/// backend builds into. Building and ray-pipeline lowering are backend
/// extension points; a backend without support refuses creation.
pub struct AccelStruct<B: GpuBackend> {
    desc: AccelStructDesc,
    buffer: Arc<Buffer<B>>,
}

impl<B: GpuBackend> AccelStruct<B> {
    pub(crate) fn new(
        ctx: &Arc<DeviceContext<B>>,
        desc: AccelStructDesc,
    ) -> RhiResult<Arc<AccelStruct<B>>> {
        if !ctx.device.supports_ray_tracing() {
            log::error!("this backend does not support acceleration structures");
            return Err(RhiError::StatePolicyViolation);
        }
        let storage_size = Self::storage_size(&desc);
        let buffer = Buffer::new(
            ctx.clone(),
            BufferDesc::accel_struct(
                storage_size,
                desc.kind == AccelStructKind::TopLevel,
                &desc.name,
            ),
        )?;
        Ok(Arc::new(AccelStruct { desc, buffer }))
    }

    fn storage_size(desc: &AccelStructDesc) -> u64 {
        match desc.kind {
            // Conservative estimates; backends replace these with queried
            // prebuild sizes.
            AccelStructKind::TopLevel => (desc.max_instances as u64).max(1) * 64,
            AccelStructKind::BottomLevel => desc
                .geometries
                .iter()
                .map(|geometry| (geometry.vertex_count as u64) * 16 + 256)
                .sum::<u64>()
                .max(256),
        }
    }

    pub fn desc(&self) -> &AccelStructDesc {
        &self.desc
    }

    pub fn storage_buffer(&self) -> &Arc<Buffer<B>> {
        &self.buffer
    }

    pub fn gpu_address(&self) -> GpuVirtualAddress {
        self.buffer.gpu_address()
    }
}
