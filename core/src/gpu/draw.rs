use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            min_x: 0.0,
            max_x: width,
            min_y: 0.0,
            max_y: height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl Rect {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            min_x: 0,
            max_x: width,
            min_y: 0,
            max_y: height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewportState {
    pub viewports: SmallVec<[Viewport; 1]>,
    pub scissors: SmallVec<[Rect; 1]>,
}

impl ViewportState {
    pub fn single(viewport: Viewport) -> Self {
        let scissor = Rect {
            min_x: viewport.min_x as i32,
            max_x: viewport.max_x as i32,
            min_y: viewport.min_y as i32,
            max_y: viewport.max_y as i32,
        };
        let mut state = ViewportState::default();
        state.viewports.push(viewport);
        state.scissors.push(scissor);
        state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawArguments {
    /// Vertex count for `draw`, index count for `draw_indexed`.
    pub vertex_or_index_count: u32,
    pub instance_count: u32,
    pub start_index_location: u32,
    pub start_vertex_location: u32,
    pub start_instance_location: u32,
}

impl Default for DrawArguments {
    fn default() -> Self {
        Self {
            vertex_or_index_count: 0,
            instance_count: 1,
            start_index_location: 0,
            start_vertex_location: 0,
            start_instance_location: 0,
        }
    }
}

impl DrawArguments {
    pub fn full_screen_quad() -> Self {
        Self {
            vertex_or_index_count: 6,
            ..Default::default()
        }
    }
}
