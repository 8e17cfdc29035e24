#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapType {
    #[default]
    Default,
    Upload,
    Readback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapDesc {
    pub name: String,
    pub capacity: u64,
    pub heap_type: HeapType,
}

impl Default for HeapDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            capacity: 0,
            heap_type: HeapType::Default,
        }
    }
}

/// Placement requirements of a virtual resource, queried before
/// `bind_memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
}
