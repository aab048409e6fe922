use core::sync::atomic::{AtomicUsize, Ordering};

/// 序列计数器
///
/// 读者方无锁读取, 但如果有写者将重试
///
/// seq为偶数时无写者, 奇数为写者正在修改. 写者之间的互斥由外部锁保证,
/// 读者会在读取后判断seq是否发生变化
pub struct SeqCount {
    seq: AtomicUsize,
}

impl SeqCount {
    pub const fn new() -> Self {
        Self {
            seq: AtomicUsize::new(0),
        }
    }
    #[inline(always)]
    pub fn value(&self) -> usize {
        self.seq.load(Ordering::Acquire)
    }
    /// 等待写者离开并返回当前序列号
    #[inline(always)]
    pub fn read_begin(&self) -> usize {
        let mut seq = self.seq.load(Ordering::Acquire);
        let mut try_count = 0usize;
        while seq % 2 != 0 {
            try_count += 1;
            if try_count == 0x10000000 {
                panic!("SeqCount: deadlock detected! try_count > {:#x}\n", try_count);
            }
            core::hint::spin_loop();
            seq = self.seq.load(Ordering::Acquire);
        }
        seq
    }
    /// 读取期间序列号发生了变化, 需要重试
    #[inline(always)]
    pub fn read_retry(&self, seq: usize) -> bool {
        core::sync::atomic::fence(Ordering::Acquire);
        self.seq.load(Ordering::Relaxed) != seq
    }
    /// 读者闭包, 写者介入时重新开始
    #[inline(always)]
    pub fn read<U>(&self, mut run: impl FnMut() -> U) -> U {
        loop {
            let seq = self.read_begin();
            let ret = run();
            if !self.read_retry(seq) {
                return ret;
            }
        }
    }
    /// # Safety
    ///
    /// 调用者持有写者锁
    #[inline(always)]
    pub unsafe fn write_begin(&self) {
        let seq = self.seq.load(Ordering::Relaxed);
        debug_assert!(seq % 2 == 0);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        core::sync::atomic::fence(Ordering::Release);
    }
    /// # Safety
    ///
    /// 调用者持有写者锁且之前调用过 write_begin
    #[inline(always)]
    pub unsafe fn write_end(&self) {
        let seq = self.seq.load(Ordering::Relaxed);
        debug_assert!(seq % 2 != 0);
        self.seq.store(seq.wrapping_add(1), Ordering::Release);
    }
}

impl Default for SeqCount {
    fn default() -> Self {
        Self::new()
    }
}
