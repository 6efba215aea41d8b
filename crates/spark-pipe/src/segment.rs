//! 分段链：管道的存储层。
//!
//! # 模块定位（Why）
//! - 管道不持有一整块固定缓冲，而是把数据切分到若干等长分段中：
//!   写端在头部追加分段，读端在尾部释放排空的分段，内存随消费逐步归还。
//! - 本模块只关心“字节放在哪里”，不感知线程、唤醒与关闭；
//!   这些协议由 [`crate::pipe`] 在外层组合。
//!
//! # 结构设计（How）
//! - `VecDeque<Segment>`：队首为尾分段（正在被读取），队尾为头分段（正在被写入）；
//!   队列顺序即分段之间的前向链接，追加与释放均为 O(1)。
//! - 每个 [`Segment`] 独占一块 `Vec<u8>`：`capacity` 恒等于分段容量 `B`，
//!   `len` 即已写入的字节数，因此头分段的 `len` 就是 `head_position`，
//!   非头分段的 `len` 恒为 `B`；读端边界统一取尾分段的 `len`。
//! - `tail_position` 是唯一需要额外记录的游标。
//!
//! # 不变量（What）
//! - 链在构造后、拆除前至少包含一个分段；
//! - `head_position ∈ [0, B]`，写满后立即分配新头分段；分配失败时头分段暂时停在 `B`，
//!   直到下一次写入补分配成功；
//! - `tail_position ∈ [0, boundary]`；尾分段读满且存在后继时立即释放。

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::error::{PipeError, Result};

/// 固定容量的独占内存块。
#[derive(Debug)]
pub(crate) struct Segment {
    id: u64,
    data: Vec<u8>,
}

impl Segment {
    /// 已写入的字节数。
    fn filled(&self) -> usize {
        self.data.len()
    }

    /// `Vec` 的实际容量可能略大于请求值，剩余空间以分段容量 `B` 为准。
    fn room(&self, capacity: usize) -> usize {
        capacity - self.data.len()
    }
}

/// 分段链在某一时刻的诊断快照。
///
/// 仅描述分段层面的状态；未读字节数由调用方在管道外自行统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainSnapshot {
    /// 当前链上的分段数量，拆除后为 0。
    pub segments: usize,
    /// 自构造以来累计分配的分段数量（含初始分段）。
    pub allocated_total: u64,
    /// 自构造以来累计释放的分段数量。
    pub released_total: u64,
    /// 头分段中下一个写入位置。
    pub head_position: usize,
    /// 尾分段中下一个读取位置。
    pub tail_position: usize,
    /// 管道是否已经进入关闭流程。
    pub closed: bool,
}

/// 从尾到头有序排列的分段序列。
#[derive(Debug)]
pub(crate) struct SegmentChain {
    segments: VecDeque<Segment>,
    capacity: usize,
    tail_position: usize,
    next_id: u64,
    released_total: u64,
    label: String,
    /// 剩余允许成功的分配次数，`None` 表示不限制。
    #[cfg(test)]
    allocation_budget: Option<u64>,
}

impl SegmentChain {
    /// 以单个空分段构造链。
    ///
    /// - **前置条件**：`capacity > 0`（由配置校验保证）；
    /// - **后置条件**：`head == tail`，两个游标均为 0。
    pub(crate) fn new(capacity: usize, label: impl Into<String>) -> Result<Self> {
        let mut chain = Self {
            segments: VecDeque::new(),
            capacity,
            tail_position: 0,
            next_id: 0,
            released_total: 0,
            label: label.into(),
            #[cfg(test)]
            allocation_budget: None,
        };
        let first = chain.allocate_segment()?;
        chain.append(first);
        Ok(chain)
    }

    /// 申请一个全新的分段，内容未初始化，尚未挂入链。
    ///
    /// 使用 `try_reserve_exact` 而非直接 `with_capacity`，
    /// 使内存不足以 [`PipeError::AllocationFailure`] 的形式同步返回。
    pub(crate) fn allocate_segment(&mut self) -> Result<Segment> {
        let mut data = Vec::new();
        if self.allocation_refused() || data.try_reserve_exact(self.capacity).is_err() {
            warn!(
                label = %self.label,
                capacity = self.capacity,
                "pipe segment allocation failed"
            );
            return Err(PipeError::AllocationFailure {
                capacity: self.capacity,
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        trace!(label = %self.label, segment = id, capacity = self.capacity, "segment allocated");
        Ok(Segment { id, data })
    }

    #[cfg(not(test))]
    fn allocation_refused(&mut self) -> bool {
        false
    }

    #[cfg(test)]
    fn allocation_refused(&mut self) -> bool {
        match &mut self.allocation_budget {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        }
    }

    /// 限制此后允许成功的分配次数，用于构造分配失败的场景。
    #[cfg(test)]
    pub(crate) fn set_allocation_budget(&mut self, budget: Option<u64>) {
        self.allocation_budget = budget;
    }

    /// 将新分段挂到当前头分段之后并使其成为新的头分段。
    pub(crate) fn append(&mut self, segment: Segment) {
        debug_assert!(segment.data.is_empty());
        self.segments.push_back(segment);
    }

    /// 释放尾分段并把读游标移动到其后继的起点。
    ///
    /// 仅当尾分段已被完全读取且存在后继时调用，此后再无任何路径会访问它。
    fn release_tail(&mut self) {
        debug_assert!(self.segments.len() > 1);
        debug_assert_eq!(self.tail_position, self.capacity);
        if let Some(old) = self.segments.pop_front() {
            self.released_total += 1;
            trace!(label = %self.label, segment = old.id, "segment released");
        }
        self.tail_position = 0;
    }

    /// 读满的尾分段在写端后来补上后继时，需在下一次读取前归还。
    fn release_drained_tail(&mut self) {
        if self.tail_position == self.capacity && self.segments.len() > 1 {
            self.release_tail();
        }
    }

    /// 头分段中下一个写入位置。
    pub(crate) fn head_position(&self) -> usize {
        self.segments.back().map_or(0, Segment::filled)
    }

    /// 尾分段中下一个读取位置。
    pub(crate) fn tail_position(&self) -> usize {
        self.tail_position
    }

    /// 当前是否没有任何可读字节。
    pub(crate) fn is_empty(&self) -> bool {
        match self.segments.len() {
            0 => true,
            1 => self.tail_position == self.head_position(),
            2 => self.tail_position == self.capacity && self.head_position() == 0,
            _ => false,
        }
    }

    /// 头分段写满时分配并挂入新的头分段，`head_position` 归零；未写满时不做任何事。
    ///
    /// 分配失败时链保持原状（头分段写满、没有后继），错误交给触发它的写入；
    /// 下一次写入会在复制之前再次调用本方法重试。
    pub(crate) fn ensure_head_room(&mut self) -> Result<()> {
        if self.head_position() < self.capacity {
            return Ok(());
        }
        let next = self.allocate_segment()?;
        self.append(next);
        Ok(())
    }

    /// 将 `src` 的前缀复制进头分段，返回复制的字节数，即 `min(src.len(), room)`。
    ///
    /// 调用方需先通过 [`ensure_head_room`](Self::ensure_head_room) 保证头分段有剩余空间。
    pub(crate) fn write_some(&mut self, src: &[u8]) -> usize {
        let capacity = self.capacity;
        let Some(head) = self.segments.back_mut() else {
            return 0;
        };
        let copied = src.len().min(head.room(capacity));
        head.data.extend_from_slice(&src[..copied]);
        copied
    }

    /// 从尾分段复制至多 `dst.len()` 字节，返回实际复制的字节数。
    ///
    /// 单次调用不跨越分段边界：可读字节少于 `dst.len()` 时返回部分结果，
    /// 这是正常路径而非错误。
    pub(crate) fn read_some(&mut self, dst: &mut [u8]) -> usize {
        self.release_drained_tail();
        let Some(tail) = self.segments.front() else {
            return 0;
        };
        let boundary = tail.filled();
        let available = boundary - self.tail_position;
        let copied = dst.len().min(available);
        dst[..copied].copy_from_slice(&tail.data[self.tail_position..self.tail_position + copied]);
        self.tail_position += copied;

        if self.tail_position == self.capacity && self.segments.len() > 1 {
            self.release_tail();
        }
        copied
    }

    /// 由尾至头释放全部分段（包括最后的头分段），返回释放数量。
    pub(crate) fn release_all(&mut self) -> usize {
        let mut released = 0;
        while let Some(segment) = self.segments.pop_front() {
            trace!(label = %self.label, segment = segment.id, "segment released");
            released += 1;
        }
        self.released_total += released as u64;
        self.tail_position = 0;
        released
    }

    pub(crate) fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            segments: self.segments.len(),
            allocated_total: self.next_id,
            released_total: self.released_total,
            head_position: self.head_position(),
            tail_position: self.tail_position(),
            closed: false,
        }
    }
}
