#![cfg(any(loom, spark_loom))]

//! 以 Loom 穷举调度，直接驱动管道真实的 [`Lifecycle`]：入口计数、关闭置位与排空等待。
//!
//! # 教案式说明
//! - **意图 (Why)**：拆除与读写并发时，只要入口检查与关闭置位的顺序出错，
//!   或者排空广播丢失，就可能出现操作通过检查后分段已被释放、或关闭方永久阻塞的交错。
//! - **逻辑 (How)**：`freed` 模拟分段内存；操作线程通过 `enter` 后断言 `freed == false`，
//!   关闭线程按管道拆除的顺序执行 `begin_close` → `wait_drained` → 置位 `freed`。
//!   `wait_drained` 在条件变量上真实阻塞，若广播丢失 Loom 会报告死锁。
//! - **契约 (What)**：所有交错下操作要么被拒绝，要么在释放之前完成访问；拆除恰好执行一次。
//!
//! 运行方式：`RUSTFLAGS="--cfg loom" cargo test -p spark-pipe --test loom_lifecycle --release`。

use loom::{
    model,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};
use spark_pipe::Lifecycle;

struct Teardown {
    lifecycle: Lifecycle,
    freed: AtomicBool,
}

impl Teardown {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            freed: AtomicBool::new(false),
        }
    }

    /// 返回 `true` 表示操作通过入口并完成了一次分段访问。
    fn operate(&self) -> bool {
        match self.lifecycle.enter() {
            Ok(_guard) => {
                assert!(
                    !self.freed.load(Ordering::SeqCst),
                    "通过入口检查的操作不得观察到已释放的分段"
                );
                true
            }
            Err(_) => false,
        }
    }

    /// 返回 `true` 表示本次调用执行了拆除。
    fn close(&self) -> bool {
        if !self.lifecycle.begin_close() {
            return false;
        }
        self.lifecycle.wait_drained();
        self.freed.store(true, Ordering::SeqCst);
        true
    }
}

#[test]
fn close_never_frees_under_an_admitted_operation() {
    model(|| {
        let teardown = Arc::new(Teardown::new());

        let worker = {
            let teardown = Arc::clone(&teardown);
            thread::spawn(move || teardown.operate())
        };

        assert!(teardown.close());
        let _ = worker.join().expect("操作线程不应 panic");
        assert!(teardown.freed.load(Ordering::SeqCst));
        assert_eq!(teardown.lifecycle.in_flight(), 0);
        assert!(!teardown.operate(), "关闭之后的操作必须被拒绝");
    });
}

#[test]
fn close_waits_for_both_sides_to_leave() {
    model(|| {
        let teardown = Arc::new(Teardown::new());

        let writer = {
            let teardown = Arc::clone(&teardown);
            thread::spawn(move || teardown.operate())
        };
        let reader = {
            let teardown = Arc::clone(&teardown);
            thread::spawn(move || teardown.operate())
        };

        assert!(teardown.close());
        let _ = writer.join().expect("写线程不应 panic");
        let _ = reader.join().expect("读线程不应 panic");
        assert_eq!(teardown.lifecycle.in_flight(), 0);
    });
}

#[test]
fn concurrent_close_runs_teardown_once() {
    model(|| {
        let teardown = Arc::new(Teardown::new());

        let first = {
            let teardown = Arc::clone(&teardown);
            thread::spawn(move || teardown.close())
        };
        let second = teardown.close();

        let first = first.join().expect("关闭线程不应 panic");
        assert!(first ^ second, "恰有一次关闭执行拆除");
        assert!(teardown.lifecycle.is_closed());
    });
}
