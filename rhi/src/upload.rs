use std::collections::VecDeque;
use std::sync::Arc;

use kiln_core::align_up_64;
use kiln_core::gpu::Buffer as _;
use kiln_core::gpu::Device as _;
use kiln_core::gpu::*;

use crate::DeviceContext;

pub const UPLOAD_CHUNK_SIZE_ALIGNMENT: u64 = 4096;
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 65536;

const VERSION_SUBMITTED_FLAG: u64 = 0x8000_0000_0000_0000;
const VERSION_QUEUE_SHIFT: u32 = 60;
const VERSION_ID_MASK: u64 = 0x0FFF_FFFF_FFFF_FFFF;

/// Packs (fence id, queue, submitted flag) into the single version word
/// upload chunks are stamped with.
pub fn make_version(id: u64, queue: QueueType, submitted: bool) -> u64 {
    let mut version = (id & VERSION_ID_MASK) | ((queue.index() as u64) << VERSION_QUEUE_SHIFT);
    if submitted {
        version |= VERSION_SUBMITTED_FLAG;
    }
    version
}

pub fn version_id(version: u64) -> u64 {
    version & VERSION_ID_MASK
}

pub fn version_submitted(version: u64) -> bool {
    (version & VERSION_SUBMITTED_FLAG) != 0
}

/// One mapped slab of upload memory. The CPU pointer stays valid for the
/// chunk's whole life; suballocations only move a write cursor.
pub struct UploadChunk<B: GpuBackend> {
    buffer: B::Buffer,
    cpu_ptr: *mut u8,
    gpu_address: GpuVirtualAddress,
    size: u64,
}

unsafe impl<B: GpuBackend> Send for UploadChunk<B> {}
unsafe impl<B: GpuBackend> Sync for UploadChunk<B> {}

impl<B: GpuBackend> UploadChunk<B> {
    pub fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<B: GpuBackend> Drop for UploadChunk<B> {
    fn drop(&mut self) {
        unsafe {
            self.buffer.unmap(0, self.size);
        }
    }
}

/// A transient region handed out by the upload manager. Holds its chunk
/// alive; the recorder parks a clone on the command-list instance so the
/// memory survives until the fence retires.
pub struct UploadAllocation<B: GpuBackend> {
    pub(crate) chunk: Arc<UploadChunk<B>>,
    pub(crate) offset: u64,
}

impl<B: GpuBackend> UploadAllocation<B> {
    pub fn buffer(&self) -> &B::Buffer {
        &self.chunk.buffer
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn cpu_ptr(&self) -> *mut u8 {
        unsafe { self.chunk.cpu_ptr.add(self.offset as usize) }
    }

    pub fn gpu_address(&self) -> GpuVirtualAddress {
        self.chunk.gpu_address.offset(self.offset)
    }

    pub fn write(&self, data: &[u8]) {
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.cpu_ptr(), data.len());
        }
    }
}

struct PooledChunk<B: GpuBackend> {
    chunk: Arc<UploadChunk<B>>,
    version: u64,
    write_end: u64,
}

/// Suballocates transient upload memory from fixed-size chunks and recycles
/// them on fence completion. Single-threaded; owned by the recorder of its
/// queue.
pub struct UploadManager<B: GpuBackend> {
    ctx: Arc<DeviceContext<B>>,
    queue_type: QueueType,
    default_chunk_size: u64,
    memory_limit: u64,
    allocated_memory: u64,
    current: Option<PooledChunk<B>>,
    pool: VecDeque<PooledChunk<B>>,
}

impl<B: GpuBackend> UploadManager<B> {
    pub(crate) fn new(
        ctx: Arc<DeviceContext<B>>,
        queue_type: QueueType,
        default_chunk_size: u64,
        memory_limit: u64,
    ) -> Self {
        Self {
            ctx,
            queue_type,
            default_chunk_size: if default_chunk_size == 0 {
                DEFAULT_UPLOAD_CHUNK_SIZE
            } else {
                default_chunk_size
            },
            memory_limit,
            allocated_memory: 0,
            current: None,
            pool: VecDeque::new(),
        }
    }

    pub fn suballocate(
        &mut self,
        size: u64,
        alignment: u64,
        recording_version: u64,
    ) -> RhiResult<UploadAllocation<B>> {
        let mut chunk_to_retire = None;

        if let Some(current) = self.current.as_mut() {
            let aligned_offset = align_up_64(current.write_end, alignment);
            let data_end = aligned_offset + size;
            if data_end <= current.chunk.size {
                current.write_end = data_end;
                return Ok(UploadAllocation {
                    chunk: current.chunk.clone(),
                    offset: aligned_offset,
                });
            }
            chunk_to_retire = self.current.take();
        }

        let last_completed = self
            .ctx
            .queue(self.queue_type)
            .map(|q| q.last_completed_value())
            .unwrap_or(0);

        // Look for a retired chunk that is big enough and whose submission
        // fence has been observed complete.
        let mut reuse_index = None;
        for (index, pooled) in self.pool.iter_mut().enumerate() {
            if version_submitted(pooled.version) && version_id(pooled.version) <= last_completed {
                pooled.version = 0;
            }
            if pooled.version == 0 && pooled.chunk.size >= size {
                reuse_index = Some(index);
                break;
            }
        }
        if let Some(index) = reuse_index {
            self.current = self.pool.remove(index);
        }

        if let Some(retired) = chunk_to_retire {
            self.pool.push_back(retired);
        }

        if self.current.is_none() {
            let chunk_size = align_up_64(
                size.max(self.default_chunk_size),
                UPLOAD_CHUNK_SIZE_ALIGNMENT,
            );
            if self.memory_limit > 0 && self.allocated_memory + chunk_size > self.memory_limit {
                log::error!(
                    "upload memory limit of {} bytes exceeded",
                    self.memory_limit
                );
                return Err(RhiError::OutOfResources);
            }
            let chunk = self.create_chunk(chunk_size)?;
            self.allocated_memory += chunk_size;
            self.current = Some(PooledChunk {
                chunk,
                version: 0,
                write_end: 0,
            });
        }

        let current = self.current.as_mut().unwrap();
        current.version = recording_version;
        current.write_end = size;
        Ok(UploadAllocation {
            chunk: current.chunk.clone(),
            offset: 0,
        })
    }

    /// Restamps every chunk of the closing recording with its submitted
    /// version so reclamation can watch the fence.
    pub fn submit_chunks(&mut self, recording_version: u64, submitted_version: u64) {
        if let Some(current) = self.current.take() {
            self.pool.push_back(current);
        }
        for pooled in self.pool.iter_mut() {
            if pooled.version == recording_version {
                pooled.version = submitted_version;
            }
        }
    }

    pub fn allocated_memory(&self) -> u64 {
        self.allocated_memory
    }

    /// Number of chunks currently reusable without waiting.
    pub fn reusable_chunks(&mut self) -> usize {
        let last_completed = self
            .ctx
            .queue(self.queue_type)
            .map(|q| q.last_completed_value())
            .unwrap_or(0);
        self.pool
            .iter()
            .filter(|pooled| {
                pooled.version == 0
                    || (version_submitted(pooled.version)
                        && version_id(pooled.version) <= last_completed)
            })
            .count()
    }

    fn create_chunk(&self, size: u64) -> RhiResult<Arc<UploadChunk<B>>> {
        let desc = BufferDesc {
            name: "upload chunk".to_string(),
            byte_size: size,
            cpu_access: CpuAccessMode::Write,
            ..Default::default()
        };
        let buffer = unsafe { self.ctx.device.create_buffer(&desc)? };
        let cpu_ptr = unsafe { buffer.map(0, size) }.ok_or_else(|| {
            log::error!("failed to map a new upload chunk of {} bytes", size);
            RhiError::NativeFailure
        })?;
        let gpu_address = buffer.gpu_address();
        Ok(Arc::new(UploadChunk {
            buffer,
            cpu_ptr,
            gpu_address,
            size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_word_round_trips() {
        let version = make_version(42, QueueType::Compute, false);
        assert_eq!(version_id(version), 42);
        assert!(!version_submitted(version));

        let submitted = make_version(42, QueueType::Compute, true);
        assert!(version_submitted(submitted));
        assert_eq!(version_id(submitted), 42);
        assert_ne!(version, submitted);

        // Queue type lands above the id bits.
        assert_ne!(
            make_version(7, QueueType::Graphics, false),
            make_version(7, QueueType::Transfer, false)
        );
    }
}
