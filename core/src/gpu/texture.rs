use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    Unknown,
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    TextureCube,
    TextureCubeArray,
    Texture2DMS,
    Texture2DMSArray,
    Texture3D,
}

impl TextureDimension {
    pub fn has_array_slices(&self) -> bool {
        matches!(
            self,
            TextureDimension::Texture1DArray
                | TextureDimension::Texture2DArray
                | TextureDimension::TextureCube
                | TextureDimension::TextureCubeArray
                | TextureDimension::Texture2DMSArray
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub name: String,

    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_size: u32,
    pub mip_levels: u32,

    pub sample_count: u32,
    pub sample_quality: u32,

    pub format: Format,
    pub dimension: TextureDimension,

    pub is_shader_resource: bool,
    pub is_render_target: bool,
    pub is_depth_stencil: bool,
    pub is_uav: bool,
    pub is_typeless: bool,

    pub is_virtual: bool,

    pub use_clear_value: bool,
    pub clear_value: Color,

    pub initial_state: ResourceStates,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            width: 1,
            height: 1,
            depth: 1,
            array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            sample_quality: 0,
            format: Format::Unknown,
            dimension: TextureDimension::Texture2D,
            is_shader_resource: true,
            is_render_target: false,
            is_depth_stencil: false,
            is_uav: false,
            is_typeless: false,
            is_virtual: false,
            use_clear_value: false,
            clear_value: Color::BLACK,
            initial_state: ResourceStates::COMMON,
        }
    }
}

impl TextureDesc {
    pub fn render_target(width: u32, height: u32, format: Format, name: &str) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            format,
            is_render_target: true,
            use_clear_value: true,
            initial_state: ResourceStates::RENDER_TARGET,
            ..Default::default()
        }
    }

    pub fn depth(width: u32, height: u32, format: Format, name: &str) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            format,
            is_depth_stencil: true,
            use_clear_value: true,
            clear_value: Color::new(1.0, 0.0, 0.0, 0.0),
            initial_state: ResourceStates::DEPTH_WRITE,
            ..Default::default()
        }
    }

    pub fn shader_resource(width: u32, height: u32, format: Format, name: &str) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            format,
            initial_state: ResourceStates::PIXEL_SHADER_RESOURCE,
            ..Default::default()
        }
    }

    pub fn shader_resource_3d(width: u32, height: u32, depth: u32, format: Format, name: &str) -> Self {
        Self {
            depth,
            dimension: TextureDimension::Texture3D,
            ..Self::shader_resource(width, height, format, name)
        }
    }

    pub fn read_write(width: u32, height: u32, format: Format, name: &str) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            format,
            is_uav: true,
            initial_state: ResourceStates::UNORDERED_ACCESS,
            ..Default::default()
        }
    }

    pub fn num_subresources(&self) -> u32 {
        self.mip_levels * self.array_size
    }
}

/// A region of one subresource, used by copies. `u32::MAX` extents resolve
/// to the full mip dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSlice {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level: u32,
    pub array_slice: u32,
}

impl Default for TextureSlice {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            width: u32::MAX,
            height: u32::MAX,
            depth: u32::MAX,
            mip_level: 0,
            array_slice: 0,
        }
    }
}

impl TextureSlice {
    pub fn for_subresource(mip_level: u32, array_slice: u32) -> Self {
        Self {
            mip_level,
            array_slice,
            ..Default::default()
        }
    }

    pub fn resolve(&self, desc: &TextureDesc) -> TextureSlice {
        let mut ret = *self;
        debug_assert!(self.mip_level < desc.mip_levels);

        if self.width == u32::MAX {
            ret.width = (desc.width >> self.mip_level).max(1);
        }
        if self.height == u32::MAX {
            ret.height = (desc.height >> self.mip_level).max(1);
        }
        if self.depth == u32::MAX {
            ret.depth = if desc.dimension == TextureDimension::Texture3D {
                (desc.depth >> self.mip_level).max(1)
            } else {
                1
            };
        }
        ret
    }
}

/// A contiguous rectangle in (mip, array-slice) space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSubresourceSet {
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_slice: u32,
    pub array_slice_count: u32,
}

impl Default for TextureSubresourceSet {
    fn default() -> Self {
        Self {
            base_mip_level: 0,
            mip_level_count: 1,
            base_array_slice: 0,
            array_slice_count: 1,
        }
    }
}

pub const ENTIRE_SUBRESOURCE_SET: TextureSubresourceSet = TextureSubresourceSet {
    base_mip_level: 0,
    mip_level_count: u32::MAX,
    base_array_slice: 0,
    array_slice_count: u32::MAX,
};

impl TextureSubresourceSet {
    pub fn single(mip_level: u32, array_slice: u32) -> Self {
        Self {
            base_mip_level: mip_level,
            mip_level_count: 1,
            base_array_slice: array_slice,
            array_slice_count: 1,
        }
    }

    pub fn is_entire_texture(&self, desc: &TextureDesc) -> bool {
        if self.base_mip_level > 0 || self.base_mip_level + self.mip_level_count < desc.mip_levels {
            return false;
        }
        if desc.dimension.has_array_slices()
            && (self.base_array_slice > 0
                || self.base_array_slice + self.array_slice_count < desc.array_size)
        {
            return false;
        }
        true
    }

    pub fn resolve(&self, desc: &TextureDesc, single_mip_level: bool) -> TextureSubresourceSet {
        let mut ret = *self;
        if single_mip_level {
            ret.mip_level_count = 1;
        } else {
            let last_mip_plus_one = self
                .base_mip_level
                .saturating_add(self.mip_level_count)
                .min(desc.mip_levels);
            ret.mip_level_count = last_mip_plus_one.saturating_sub(self.base_mip_level);
        }

        if desc.dimension.has_array_slices() {
            let last_slice_plus_one = self
                .base_array_slice
                .saturating_add(self.array_slice_count)
                .min(desc.array_size);
            ret.array_slice_count = last_slice_plus_one.saturating_sub(self.base_array_slice);
        } else {
            ret.base_array_slice = 0;
            ret.array_slice_count = 1;
        }
        ret
    }
}

pub fn subresource_index(mip_level: u32, array_slice: u32, desc: &TextureDesc) -> u32 {
    mip_level + array_slice * desc.mip_levels
}

pub fn subresource_index_with_plane(
    mip_level: u32,
    array_slice: u32,
    plane: u32,
    mip_levels: u32,
    array_size: u32,
) -> u32 {
    mip_level + array_slice * mip_levels + plane * mip_levels * array_size
}

/// The four kinds of texture view a descriptor can hold. SRV and UAV views
/// live in the shader-resource heap, RTV and DSV in their CPU-only heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureViewType {
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
}

/// Linear-layout footprint of one texture subresource, used to place upload
/// and staging data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u64,
    pub rows: u32,
    pub row_size_bytes: u64,
}

impl SubresourceFootprint {
    pub fn total_bytes(&self) -> u64 {
        self.row_pitch * (self.rows as u64) * (self.depth as u64)
    }
}

pub fn subresource_footprint(desc: &TextureDesc, mip_level: u32) -> SubresourceFootprint {
    let width = (desc.width >> mip_level).max(1);
    let height = (desc.height >> mip_level).max(1);
    let depth = if desc.dimension == TextureDimension::Texture3D {
        (desc.depth >> mip_level).max(1)
    } else {
        1
    };
    let row_size_bytes = (width as u64) * desc.format.byte_size();
    SubresourceFootprint {
        offset: 0,
        format: desc.format,
        width,
        height,
        depth,
        row_pitch: crate::align_up_64(row_size_bytes, TEXTURE_ROW_PITCH_ALIGNMENT),
        rows: height,
        row_size_bytes,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerAddressMode {
    Clamp,
    Wrap,
    Border,
    Mirror,
    MirrorOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerReductionType {
    Standard,
    Comparison,
    Minimum,
    Maximum,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub name: String,

    pub border_color: Color,
    pub max_anisotropy: f32,
    pub mip_bias: f32,

    pub min_filter: bool,
    pub mag_filter: bool,
    pub mip_filter: bool,
    pub address_u: SamplerAddressMode,
    pub address_v: SamplerAddressMode,
    pub address_w: SamplerAddressMode,
    pub reduction_type: SamplerReductionType,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            border_color: Color::BLACK,
            max_anisotropy: 1.0,
            mip_bias: 0.0,
            min_filter: true,
            mag_filter: true,
            mip_filter: true,
            address_u: SamplerAddressMode::Wrap,
            address_v: SamplerAddressMode::Wrap,
            address_w: SamplerAddressMode::Wrap,
            reduction_type: SamplerReductionType::Standard,
        }
    }
}

impl SamplerDesc {
    pub fn with_address_mode(mut self, mode: SamplerAddressMode) -> Self {
        self.address_u = mode;
        self.address_v = mode;
        self.address_w = mode;
        self
    }

    pub fn with_filter(mut self, min_mag_mip: bool) -> Self {
        self.min_filter = min_mag_mip;
        self.mag_filter = min_mag_mip;
        self.mip_filter = min_mag_mip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mipped_array_desc() -> TextureDesc {
        TextureDesc {
            width: 64,
            height: 64,
            mip_levels: 4,
            array_size: 3,
            dimension: TextureDimension::Texture2DArray,
            ..Default::default()
        }
    }

    #[test]
    fn entire_subresource_set_resolves_to_full_texture() {
        let desc = mipped_array_desc();
        let resolved = ENTIRE_SUBRESOURCE_SET.resolve(&desc, false);
        assert_eq!(resolved.mip_level_count, 4);
        assert_eq!(resolved.array_slice_count, 3);
        assert!(resolved.is_entire_texture(&desc));
    }

    #[test]
    fn partial_set_is_not_entire() {
        let desc = mipped_array_desc();
        let set = TextureSubresourceSet::single(1, 0);
        assert!(!set.is_entire_texture(&desc));
    }

    #[test]
    fn non_array_dimension_ignores_slices() {
        let desc = TextureDesc {
            mip_levels: 2,
            ..Default::default()
        };
        let set = TextureSubresourceSet {
            base_mip_level: 0,
            mip_level_count: 2,
            base_array_slice: 5,
            array_slice_count: 9,
        };
        assert!(set.is_entire_texture(&desc));
        let resolved = set.resolve(&desc, false);
        assert_eq!(resolved.base_array_slice, 0);
        assert_eq!(resolved.array_slice_count, 1);
    }

    #[test]
    fn slice_resolve_uses_mip_extent() {
        let desc = TextureDesc {
            width: 256,
            height: 128,
            mip_levels: 3,
            ..Default::default()
        };
        let slice = TextureSlice::for_subresource(2, 0).resolve(&desc);
        assert_eq!(slice.width, 64);
        assert_eq!(slice.height, 32);
        assert_eq!(slice.depth, 1);
    }

    #[test]
    fn footprint_rounds_row_pitch() {
        let desc = TextureDesc {
            width: 4,
            height: 4,
            format: Format::R8UNorm,
            ..Default::default()
        };
        let footprint = subresource_footprint(&desc, 0);
        assert_eq!(footprint.row_size_bytes, 4);
        assert_eq!(footprint.row_pitch, TEXTURE_ROW_PITCH_ALIGNMENT);
        assert_eq!(footprint.total_bytes(), TEXTURE_ROW_PITCH_ALIGNMENT * 4);
    }

    #[test]
    fn subresource_index_layout() {
        let desc = mipped_array_desc();
        assert_eq!(subresource_index(0, 0, &desc), 0);
        assert_eq!(subresource_index(3, 0, &desc), 3);
        assert_eq!(subresource_index(0, 1, &desc), 4);
        assert_eq!(subresource_index(2, 2, &desc), 10);
    }
}
