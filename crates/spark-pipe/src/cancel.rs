use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::Waker,
};

use futures_util::task::AtomicWaker;

/// 取消令牌，用于打断挂起中的 [`read_async`](crate::PipeReader::read_async_with)。
///
/// # 设计背景（Why）
/// - 读端在管道为空时会无限期挂起；调用方需要一种不依赖关闭整条管道的方式放弃等待。
/// - 与直接丢弃 Future 不同，令牌让被打断的读取以 [`PipeError::Cancelled`](crate::PipeError::Cancelled)
///   结束，调用方可以把“主动放弃”与“流结束”区分开。
///
/// # 逻辑解析（How）
/// - 内部使用 [`AtomicBool`] 表达取消状态，通过 [`Arc`] 在任务之间共享；
/// - 挂起的读取把自身唤醒器登记在令牌上，`cancel` 置位后立即唤醒它。
///
/// # 契约说明（What）
/// - `cancel` 仅在首次置位时返回 `true`；
/// - 被取消的读取不会消费任何字节，读端游标保持原位，下一次读取照常工作。
///
/// # 设计取舍与风险（Trade-offs）
/// - 令牌只保存一个唤醒器，对应管道“单读端”的约束；
///   在多个读取之间共享同一令牌时只有最近登记的那个会被立即唤醒，其余在下一次轮询时观察到取消。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    waker: AtomicWaker,
}

impl Cancellation {
    /// 创建处于“未取消”状态的令牌。
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询当前是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 标记取消并唤醒挂起中的读取。
    ///
    /// 返回值为 `true` 表示本次调用首次触发取消。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.inner.waker.wake();
        first
    }

    pub(crate) fn register(&self, waker: &Waker) {
        self.inner.waker.register(waker);
    }
}
