//! `spark-pipe` 提供单生产者/单消费者的无界内存字节管道。
//!
//! # 模块定位（Why）
//! - 写端可以任意领先于读端：写入的字节按顺序交付给读端，积压多少由调用方自行约束；
//! - 内存以固定容量的分段为单位申请与归还，读端每排空一个分段就立即释放，
//!   而不是长期持有一整块按峰值分配的缓冲；
//! - 关闭与读写可以并发发生，拆除流程保证任何分段都不会在读写仍在访问时被释放。
//!
//! # 设计概要（How）
//! - `segment` 模块维护分段链：头部追加、尾部释放，配合两个游标描述可读区间；
//! - `signal` 模块提供脉冲式唤醒，阻塞读与可挂起读共享同一事实来源；
//! - `lifecycle` 模块统计在途操作，为拆除提供“已排空”信号；
//! - `pipe` 模块将三者组合为 [`PipeWriter`]/[`PipeReader`] 两个不可克隆的句柄，
//!   `io` 模块再把它们接入 `std::io` 与 `futures::io` 生态。
//!
//! # 使用示例
//! ```
//! use spark_pipe::pipe;
//!
//! let (mut writer, mut reader) = pipe().expect("创建管道失败");
//! writer.write(b"hello").expect("写入失败");
//! writer.finish();
//!
//! let mut buf = [0u8; 16];
//! let read = reader.read(&mut buf).expect("读取失败");
//! assert_eq!(&buf[..read], b"hello");
//! assert_eq!(reader.read(&mut buf).expect("流结束不是错误"), 0);
//! ```

mod cancel;
mod config;
mod error;
mod io;
mod lifecycle;
mod pipe;
mod segment;
mod signal;

pub use cancel::Cancellation;
pub use config::{DEFAULT_SEGMENT_CAPACITY, PipeConfig, PipeConfigBuilder};
pub use error::{PipeError, Result};
pub use pipe::{PipeCloser, PipeReader, PipeWriter, ReadFuture, pipe, pipe_with};
pub use segment::ChainSnapshot;

/// 仅在 Loom 模型检查下导出，供 `tests/loom_lifecycle.rs` 直接驱动真实的拆除协议。
#[cfg(any(loom, spark_loom))]
#[doc(hidden)]
pub use lifecycle::{InFlightGuard, Lifecycle};
