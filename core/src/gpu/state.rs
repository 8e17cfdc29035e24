bitflags! {
    /// Logical resource states the tracker transitions between. A value of
    /// `empty()` is the common/undefined state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceStates: u32 {
        const CONSTANT_BUFFER          = 1 << 1;
        const VERTEX_BUFFER            = 1 << 2;
        const INDEX_BUFFER             = 1 << 3;
        const PIXEL_SHADER_RESOURCE    = 1 << 4;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 5;
        const UNORDERED_ACCESS         = 1 << 6;
        const RENDER_TARGET            = 1 << 7;
        const DEPTH_WRITE              = 1 << 8;
        const DEPTH_READ               = 1 << 9;
        const STREAM_OUT               = 1 << 10;
        const COPY_DEST                = 1 << 11;
        const COPY_SOURCE              = 1 << 12;
        const RESOLVE_DEST             = 1 << 13;
        const RESOLVE_SOURCE           = 1 << 14;
        const PRESENT                  = 1 << 15;
        const INDIRECT_ARGUMENT        = 1 << 16;
        const ACCEL_STRUCT_READ        = 1 << 17;
        const ACCEL_STRUCT_WRITE       = 1 << 18;
        const ACCEL_STRUCT_BUILD_INPUT = 1 << 19;
        const ACCEL_STRUCT_BUILD_BLAS  = 1 << 20;
    }
}

impl ResourceStates {
    pub const COMMON: ResourceStates = ResourceStates::empty();

    /// States in which the GPU may write the resource.
    pub fn is_gpu_write(&self) -> bool {
        self.intersects(
            ResourceStates::UNORDERED_ACCESS
                | ResourceStates::RENDER_TARGET
                | ResourceStates::DEPTH_WRITE
                | ResourceStates::COPY_DEST
                | ResourceStates::RESOLVE_DEST
                | ResourceStates::STREAM_OUT
                | ResourceStates::ACCEL_STRUCT_WRITE
                | ResourceStates::ACCEL_STRUCT_BUILD_BLAS,
        )
    }
}
