//
// 启用 `--cfg loom` 时切换到 Loom 提供的原子类型、互斥锁与条件变量，
// 让模型检查直接驱动真实的入口与拆除协议。
#[cfg(any(loom, spark_loom))]
use std::sync::PoisonError;
#[cfg(not(any(loom, spark_loom)))]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::fmt;

#[cfg(any(loom, spark_loom))]
use loom::sync::{
    Condvar, Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
#[cfg(not(any(loom, spark_loom)))]
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{PipeError, Result};

/// `Lifecycle` 负责统计在途操作并为拆除流程提供“已排空”信号。
///
/// # 教案级注释
/// - **意图 (Why)**：
///   - 关闭可能与读写并发发生；分段内存只能在所有已通过入口检查的操作退出之后释放；
///   - 与分段链本身的同步解耦，拆除方只需等待计数归零，而不必了解读写路径的内部细节。
/// - **设计与逻辑 (How)**：
///   - 入口先递增 `in_flight`，再检查 `closed`；关闭方先置位 `closed`，再等待计数归零。
///     两侧均使用 `SeqCst`，因此任一操作要么观察到关闭并退出，要么被关闭方计入等待；
///   - [`InFlightGuard`] 在 `Drop` 中递减计数，归零时在 `drained_lock` 下广播 `drained`，
///     读写路径即使 panic 也能正确退出；
///   - 等待方在持有 `drained_lock` 的前提下复查计数，避免唤醒丢失。
/// - **契约 (What)**：
///   - **前置条件**：无；
///   - **后置条件**：`begin_close` 仅在首次调用时返回 `true`；`wait_drained` 返回时计数为 0，
///     此后的 `enter` 必然返回 [`PipeError::Closed`]。
/// - **风险与权衡 (Trade-offs & Gotchas)**：
///   - 被拒绝的入口会短暂递增计数并触发一次多余的广播，等待方通过复查计数吸收；
///   - 计数只用于门控拆除，不提供读写互斥，单读单写由句柄类型保证。
pub struct Lifecycle {
    closed: AtomicBool,
    in_flight: AtomicUsize,
    drained_lock: Mutex<()>,
    drained: Condvar,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained_lock: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    /// 登记一次读写操作的开始。
    ///
    /// 管道已关闭时返回 [`PipeError::Closed`]，调用方在此之前不得修改任何管道状态。
    pub fn enter(&self) -> Result<InFlightGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard { lifecycle: self };
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipeError::Closed);
        }
        Ok(guard)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 置位关闭标记，返回本次调用是否为首次关闭。
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// 阻塞直至在途操作全部退出。
    #[cfg(not(any(loom, spark_loom)))]
    pub fn wait_drained(&self) {
        let mut guard = self.lock_drained();
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            self.drained.wait(&mut guard);
        }
    }

    /// 阻塞直至在途操作全部退出。
    #[cfg(any(loom, spark_loom))]
    pub fn wait_drained(&self) {
        let mut guard = self.lock_drained();
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            guard = self
                .drained
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    #[cfg(not(any(loom, spark_loom)))]
    fn lock_drained(&self) -> MutexGuard<'_, ()> {
        self.drained_lock.lock()
    }

    #[cfg(any(loom, spark_loom))]
    fn lock_drained(&self) -> MutexGuard<'_, ()> {
        self.drained_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前在途操作数量。
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// 在途操作的 RAII 守卫。
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.lifecycle.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _lock = self.lifecycle.lock_drained();
            self.lifecycle.drained.notify_all();
        }
    }
}
