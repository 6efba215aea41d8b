//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为管道读写、关闭与配置阶段的全部失败路径提供集中定义；
//! - 明确区分“流已关闭”“内存分配失败”“调用方取消”三类语义，
//!   并保证“流结束”（`Ok(0)`）永远不会以错误形式出现。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，可直接交给 `anyhow` 等上层框架；
//! - 通过 `From<PipeError> for std::io::Error` 接入标准 IO 生态，
//!   使 `Read`/`Write`/`AsyncRead`/`AsyncWrite` 实现能够直接 `?` 传播。

use std::{io, time::Duration};

use thiserror::Error;

/// 管道操作的统一返回类型。
pub type Result<T, E = PipeError> = core::result::Result<T, E>;

/// 管道错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：每个变体对应调用方需要分别处置的一类情况：
///   关闭后误用、分配失败（致命）、主动取消与超时（未消费任何数据）。
/// - **契约 (What)**：
///   - 所有变体满足 `Send + Sync + 'static`；
///   - 内部不做任何重试，错误总是同步返回给触发它的调用；
///   - `Cancelled`/`TimedOut` 发生时管道的读端游标保持不变，下一次调用可继续读取。
/// - **设计权衡 (Trade-offs)**：`InvalidConfig` 使用 `String` 保存原因，
///   仅在构造期出现，额外分配可忽略。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PipeError {
    /// 管道已经进入关闭流程，拒绝新的读写。
    #[error("pipe is closed")]
    Closed,

    /// 申请新分段时无法获得内存。
    ///
    /// - **契约 (What)**：`capacity` 为本次申请的分段字节数；已经复制进管道的字节保持有效，
    ///   写入在失败点截断。
    #[error("failed to allocate a pipe segment of {capacity} bytes")]
    AllocationFailure { capacity: usize },

    /// 挂起中的读取被调用方通过 [`Cancellation`](crate::Cancellation) 取消。
    #[error("pending pipe read was cancelled")]
    Cancelled,

    /// 带超时的阻塞读取在期限内没有等到数据。
    #[error("pipe read timed out after {waited:?}")]
    TimedOut { waited: Duration },

    /// 构造参数不合法。
    #[error("invalid pipe configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl PipeError {
    /// 判断错误是否由调用方主动放弃等待造成（取消或超时）。
    pub fn is_interrupted(&self) -> bool {
        matches!(self, PipeError::Cancelled | PipeError::TimedOut { .. })
    }
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        let kind = match &err {
            PipeError::Closed => io::ErrorKind::BrokenPipe,
            PipeError::AllocationFailure { .. } => io::ErrorKind::OutOfMemory,
            PipeError::Cancelled => io::ErrorKind::Interrupted,
            PipeError::TimedOut { .. } => io::ErrorKind::TimedOut,
            PipeError::InvalidConfig { .. } => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}
