pub type BaseType = usize;

pub type Lpn = BaseType;
pub type BlockId = BaseType;
pub type PageIdx = BaseType;
pub type Counter = BaseType;

pub const PAGE_SIZE: BaseType = 4096;

/// Device geometry and policy thresholds, fixed for the lifetime of an
/// engine instance.
#[derive(Debug, Clone)]
pub struct FtlConfig {
    pub blocks: BaseType,
    pub pages_per_block: BaseType,
    /// Writes stall into garbage collection until at least this many
    /// erased, non-active blocks exist.
    pub reclaim_threshold: BaseType,
    /// An LPN written more than this many times classifies as hot.
    pub hot_threshold: Counter,
    /// Erase-count skew tolerated before wear leveling relocates data.
    pub wear_skew: Counter,
}

impl Default for FtlConfig {
    fn default() -> Self {
        FtlConfig {
            blocks: 128,
            pages_per_block: 64,
            reclaim_threshold: 5,
            hot_threshold: 10,
            wear_skew: 5,
        }
    }
}

impl FtlConfig {
    pub fn physical_pages(&self) -> BaseType {
        self.blocks * self.pages_per_block
    }

    pub fn capacity_bytes(&self) -> BaseType {
        self.physical_pages() * PAGE_SIZE
    }
}
