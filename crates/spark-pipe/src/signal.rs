use std::{task::Waker, time::Instant};

use futures_util::task::AtomicWaker;
use parking_lot::{Condvar, MutexGuard};

/// “有数据可读”的脉冲式唤醒原语。
///
/// # 设计动机（Why）
/// - 阻塞读与可挂起读需要共享同一个“数据可用 / 已关闭”的事实来源，
///   因此同一次脉冲同时驱动条件变量（阻塞线程）与 [`AtomicWaker`]（挂起的 Future）。
///
/// # 契约说明（What）
/// - 脉冲不累积：`pulse` 至多释放一个阻塞等待者，没有等待者时脉冲直接丢弃；
/// - 等待方必须在持有状态锁的前提下复查状态后再等待，唤醒后也必须复查，
///   不得假设一次唤醒恰好对应自己等待的数据；
/// - 写端在释放状态锁之后发出脉冲即可：等待方进入 `wait` 时会原子地释放锁，
///   写端拿到锁意味着等待方已经登记。
#[derive(Debug, Default)]
pub(crate) struct DataSignal {
    ready: Condvar,
    waker: AtomicWaker,
}

impl DataSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 唤醒至多一个等待中的读端。
    pub(crate) fn pulse(&self) {
        self.ready.notify_one();
        self.waker.wake();
    }

    /// 唤醒全部等待者，供关闭流程使用。
    pub(crate) fn broadcast(&self) {
        self.ready.notify_all();
        self.waker.wake();
    }

    /// 在条件变量上阻塞，期间释放 `guard` 对应的锁。
    pub(crate) fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
        self.ready.wait(guard);
    }

    /// 带截止时间的阻塞等待。
    pub(crate) fn wait_until<T>(&self, guard: &mut MutexGuard<'_, T>, deadline: Instant) {
        // 超时与否都交给调用方复查状态和截止时间。
        let _ = self.ready.wait_until(guard, deadline);
    }

    /// 为挂起中的读端登记唤醒器。
    pub(crate) fn register(&self, waker: &Waker) {
        self.waker.register(waker);
    }
}
