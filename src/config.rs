/// 目录项缓存参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcacheConfig {
    /// 哈希桶数量为 1 << hash_shift
    pub hash_shift: u32,
    /// 目录项总数上限, 超过后创建返回 ENOMEM
    pub max_entries: usize,
    /// 内存压力回收比例, 0 为不回收, 100 为默认
    pub cache_pressure: usize,
}

impl DcacheConfig {
    pub const DEFAULT_HASH_SHIFT: u32 = 12;
    pub const MAX_HASH_SHIFT: u32 = 24;

    pub const fn new() -> Self {
        Self {
            hash_shift: Self::DEFAULT_HASH_SHIFT,
            max_entries: 1 << 20,
            cache_pressure: 100,
        }
    }
    pub const fn with_hash_shift(mut self, shift: u32) -> Self {
        self.hash_shift = shift;
        self
    }
    pub const fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }
    pub const fn with_cache_pressure(mut self, pressure: usize) -> Self {
        self.cache_pressure = pressure;
        self
    }
    /// 桶数量, 超出范围的 hash_shift 会被截断
    pub fn bucket_count(&self) -> usize {
        1 << self.hash_shift.clamp(1, Self::MAX_HASH_SHIFT)
    }
}

impl Default for DcacheConfig {
    fn default() -> Self {
        Self::new()
    }
}
