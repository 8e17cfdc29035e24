use std::sync::Arc;

use smallvec::SmallVec;

use kiln_core::gpu::*;

use crate::Texture;

pub struct FrameBufferAttachment<B: GpuBackend> {
    pub texture: Arc<Texture<B>>,
    pub subresources: TextureSubresourceSet,
    /// `Format::Unknown` falls back to the texture's own format.
    pub format: Format,
    pub is_read_only: bool,
}

impl<B: GpuBackend> Clone for FrameBufferAttachment<B> {
    fn clone(&self) -> Self {
        Self {
            texture: self.texture.clone(),
            subresources: self.subresources,
            format: self.format,
            is_read_only: self.is_read_only,
        }
    }
}

impl<B: GpuBackend> FrameBufferAttachment<B> {
    pub fn new(texture: &Arc<Texture<B>>) -> Self {
        Self {
            texture: texture.clone(),
            subresources: TextureSubresourceSet::default(),
            format: Format::Unknown,
            is_read_only: false,
        }
    }

    pub fn with_subresources(mut self, subresources: TextureSubresourceSet) -> Self {
        self.subresources = subresources;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    pub fn effective_format(&self) -> Format {
        if self.format == Format::Unknown {
            self.texture.desc().format
        } else {
            self.format
        }
    }
}

pub struct FrameBufferDesc<B: GpuBackend> {
    pub color_attachments: SmallVec<[FrameBufferAttachment<B>; MAX_RENDER_TARGETS]>,
    pub depth_stencil_attachment: Option<FrameBufferAttachment<B>>,
}

impl<B: GpuBackend> Default for FrameBufferDesc<B> {
    fn default() -> Self {
        Self {
            color_attachments: SmallVec::new(),
            depth_stencil_attachment: None,
        }
    }
}

/// Canonical shape of a frame buffer: the per-slot target formats plus the
/// dimensions every attachment must agree on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameBufferInfo {
    pub rtv_formats: SmallVec<[Format; MAX_RENDER_TARGETS]>,
    pub depth_format: Option<Format>,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub width: u32,
    pub height: u32,
}

impl FrameBufferInfo {
    pub fn viewport(&self, min_depth: f32, max_depth: f32) -> Viewport {
        Viewport {
            min_x: 0.0,
            max_x: self.width as f32,
            min_y: 0.0,
            max_y: self.height as f32,
            min_depth,
            max_depth,
        }
    }
}

pub struct FrameBuffer<B: GpuBackend> {
    desc: FrameBufferDesc<B>,
    info: FrameBufferInfo,
    pub(crate) rtv_handles: SmallVec<[CpuDescriptorHandle; MAX_RENDER_TARGETS]>,
    pub(crate) dsv_handle: Option<CpuDescriptorHandle>,
}

impl<B: GpuBackend> FrameBuffer<B> {
    pub(crate) fn new(desc: FrameBufferDesc<B>) -> RhiResult<Arc<Self>> {
        if desc.color_attachments.is_empty() && desc.depth_stencil_attachment.is_none() {
            log::error!("frame buffer created without any attachments");
            return Err(RhiError::InvalidArgument);
        }
        if desc.color_attachments.len() > MAX_RENDER_TARGETS {
            log::error!(
                "frame buffer has {} color attachments, max is {}",
                desc.color_attachments.len(),
                MAX_RENDER_TARGETS
            );
            return Err(RhiError::InvalidArgument);
        }

        let mut info = FrameBufferInfo::default();
        let mut dims: Option<(u32, u32, u32)> = None;
        let mut check_dims = |attachment: &FrameBufferAttachment<B>| -> RhiResult<()> {
            let texture_desc = attachment.texture.desc();
            let width = (texture_desc.width >> attachment.subresources.base_mip_level).max(1);
            let height = (texture_desc.height >> attachment.subresources.base_mip_level).max(1);
            let this = (width, height, texture_desc.sample_count);
            match dims {
                None => {
                    dims = Some(this);
                    Ok(())
                }
                Some(existing) if existing == this => Ok(()),
                Some(_) => {
                    log::error!(
                        "frame buffer attachment '{}' disagrees on dimensions or sample count",
                        texture_desc.name
                    );
                    Err(RhiError::InvalidArgument)
                }
            }
        };

        for attachment in &desc.color_attachments {
            check_dims(attachment)?;
            info.rtv_formats.push(attachment.effective_format());
        }
        if let Some(depth) = &desc.depth_stencil_attachment {
            check_dims(depth)?;
            info.depth_format = Some(depth.effective_format());
        }

        let reference = desc
            .depth_stencil_attachment
            .as_ref()
            .or_else(|| desc.color_attachments.first())
            .unwrap();
        let reference_desc = reference.texture.desc();
        info.sample_count = reference_desc.sample_count;
        info.sample_quality = reference_desc.sample_quality;
        info.width = (reference_desc.width >> reference.subresources.base_mip_level).max(1);
        info.height = (reference_desc.height >> reference.subresources.base_mip_level).max(1);

        let mut rtv_handles = SmallVec::new();
        for attachment in &desc.color_attachments {
            rtv_handles.push(attachment.texture.view_cpu_handle(
                TextureViewType::RenderTarget,
                attachment.format,
                attachment.subresources,
                false,
            )?);
        }
        let dsv_handle = match &desc.depth_stencil_attachment {
            Some(depth) => Some(depth.texture.view_cpu_handle(
                TextureViewType::DepthStencil,
                depth.format,
                depth.subresources,
                depth.is_read_only,
            )?),
            None => None,
        };

        Ok(Arc::new(Self {
            desc,
            info,
            rtv_handles,
            dsv_handle,
        }))
    }

    pub fn desc(&self) -> &FrameBufferDesc<B> {
        &self.desc
    }

    pub fn info(&self) -> &FrameBufferInfo {
        &self.info
    }
}
