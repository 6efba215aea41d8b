//! 管道句柄与读写、唤醒、拆除协议。
//!
//! # 模块定位（Why）
//! - 把 [`SegmentChain`] 的存储能力、[`DataSignal`] 的唤醒能力与 [`Lifecycle`] 的在途计数
//!   组合为一条单生产者/单消费者字节管道；
//! - 写端与读端以两个不可克隆的句柄发放，所有读写方法要求 `&mut self`，
//!   “同一时刻至多一个写者、至多一个读者”由类型系统保证，而不是调用方自律。
//!
//! # 协议概要（How）
//! - 写：登记在途 → 分轮复制进头分段（每轮持锁，轮间释放锁让读端穿插） → 复制完成后发出一次脉冲；
//! - 读：登记在途 → 持锁检查是否有数据；为空且未结束时在信号上等待，醒来后复查；
//! - 拆除：置位关闭 → 持锁广播唤醒 → 等待在途操作全部退出 → 由尾至头释放全部分段。
//!
//! # 契约（What）
//! - 字节严格先进先出；一次读取只返回尾分段内的连续字节，可能少于请求量；
//! - `Ok(0)` 只表示流结束（写端已 `finish` 且数据读尽，或管道已关闭），从不表示失败；
//! - 关闭后新的读写返回 [`PipeError::Closed`]；关闭时正在阻塞的读取返回 `Ok(0)`。

use std::{
    fmt, mem,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    cancel::Cancellation,
    config::PipeConfig,
    error::{PipeError, Result},
    lifecycle::Lifecycle,
    segment::{ChainSnapshot, SegmentChain},
    signal::DataSignal,
};

/// 使用默认配置（1024 字节分段）创建管道。
pub fn pipe() -> Result<(PipeWriter, PipeReader)> {
    pipe_with(PipeConfig::default())
}

/// 按给定配置创建管道，返回写端与读端句柄。
///
/// # 契约说明（What）
/// - **前置条件**：`config` 通过 [`PipeConfig::validate`]；
/// - **后置条件**：链上恰有一个空分段；两端句柄共享同一份状态，可分别移交给不同线程或任务；
/// - **错误**：配置非法返回 [`PipeError::InvalidConfig`]，首个分段无法分配返回
///   [`PipeError::AllocationFailure`]。
pub fn pipe_with(config: PipeConfig) -> Result<(PipeWriter, PipeReader)> {
    config.validate()?;
    let label = config.label_or_default().to_owned();
    let chain = SegmentChain::new(config.segment_capacity, label.clone())?;
    debug!(
        label = %label,
        segment_capacity = config.segment_capacity,
        "pipe created"
    );
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            chain: Some(chain),
            write_finished: false,
            retired: ChainSnapshot::default(),
        }),
        signal: DataSignal::new(),
        lifecycle: Lifecycle::new(),
        label,
    });
    Ok((
        PipeWriter {
            shared: Arc::clone(&shared),
            finished: false,
        },
        PipeReader {
            shared,
            parked: false,
        },
    ))
}

/// 两端共享的管道状态。
#[derive(Debug)]
struct Shared {
    state: Mutex<PipeState>,
    signal: DataSignal,
    lifecycle: Lifecycle,
    label: String,
}

#[derive(Debug)]
struct PipeState {
    /// 拆除后为 `None`。
    chain: Option<SegmentChain>,
    write_finished: bool,
    /// 拆除时留存的最后快照，供诊断使用。
    retired: ChainSnapshot,
}

/// 一次非阻塞读取尝试的结果。
enum ReadAttempt {
    Data(usize),
    EndOfStream,
    Empty,
}

impl PipeState {
    fn try_read(&mut self, dst: &mut [u8], closed: bool) -> ReadAttempt {
        let Some(chain) = self.chain.as_mut() else {
            return ReadAttempt::EndOfStream;
        };
        if !chain.is_empty() {
            return ReadAttempt::Data(chain.read_some(dst));
        }
        if self.write_finished || closed {
            ReadAttempt::EndOfStream
        } else {
            ReadAttempt::Empty
        }
    }
}

impl Shared {
    /// 写路径主体，调用方已持有在途守卫。
    ///
    /// `copied` 累计已经进入管道的字节数，出错时调用方据此得知写入截断的位置；
    /// 只要复制了字节就发出一次脉冲，即使随后失败。
    fn append(&self, src: &[u8], copied: &mut usize) -> Result<()> {
        let outcome = self.append_rounds(src, copied);
        if *copied > 0 {
            self.signal.pulse();
        }
        outcome
    }

    /// 每轮持锁一次：补足头分段空间 → 复制 → 头分段写满则立即挂入后继。
    fn append_rounds(&self, src: &[u8], copied: &mut usize) -> Result<()> {
        while *copied < src.len() {
            let mut state = self.state.lock();
            if state.write_finished {
                return Err(PipeError::Closed);
            }
            let chain = state.chain.as_mut().ok_or(PipeError::Closed)?;
            chain.ensure_head_room()?;
            *copied += chain.write_some(&src[*copied..]);
            chain.ensure_head_room()?;
        }
        Ok(())
    }

    /// 阻塞读路径主体，`deadline` 为 `None` 时无限期等待。
    fn read_blocking(&self, dst: &mut [u8], deadline: Option<(Instant, Duration)>) -> Result<usize> {
        let _op = self.lifecycle.enter()?;
        if dst.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        loop {
            match state.try_read(dst, self.lifecycle.is_closed()) {
                ReadAttempt::Data(read) => return Ok(read),
                ReadAttempt::EndOfStream => return Ok(0),
                ReadAttempt::Empty => {}
            }
            match deadline {
                None => self.signal.wait(&mut state),
                Some((deadline, waited)) => {
                    if Instant::now() >= deadline {
                        return Err(PipeError::TimedOut { waited });
                    }
                    self.signal.wait_until(&mut state, deadline);
                }
            }
        }
    }

    fn finish(&self) {
        {
            let mut state = self.state.lock();
            if state.write_finished {
                return;
            }
            state.write_finished = true;
        }
        debug!(label = %self.label, "pipe writer finished");
        self.signal.broadcast();
    }

    /// 拆除流程，所有关闭入口最终都汇聚到这里。
    ///
    /// 1. 置位关闭标记，重复调用直接返回；
    /// 2. 持锁广播，阻塞中的读端醒来后观察到关闭并以 `Ok(0)` 退出；
    /// 3. 等待在途计数归零，此后不再有任何操作触及分段；
    /// 4. 由尾至头释放全部分段。
    fn close(&self) {
        if !self.lifecycle.begin_close() {
            return;
        }
        debug!(
            label = %self.label,
            in_flight = self.lifecycle.in_flight(),
            "pipe closing"
        );
        {
            let _state = self.state.lock();
            self.signal.broadcast();
        }
        self.lifecycle.wait_drained();

        let mut state = self.state.lock();
        if let Some(mut chain) = state.chain.take() {
            let released = chain.release_all();
            state.retired = chain.snapshot();
            debug!(label = %self.label, released, "pipe closed, segments released");
        }
    }

    fn snapshot(&self) -> ChainSnapshot {
        let state = self.state.lock();
        let mut snapshot = match state.chain.as_ref() {
            Some(chain) => chain.snapshot(),
            None => state.retired,
        };
        snapshot.closed = self.lifecycle.is_closed();
        snapshot
    }
}

/// 管道写端。
///
/// # 教案式说明
/// - **意图 (Why)**：写端是唯一能向头分段追加字节的入口；不实现 `Clone`，
///   多个并发写者因此无法表达。
/// - **契约 (What)**：
///   - `write` 从不因缓冲积压而阻塞，内存上限由调用方在管道外自行控制；
///   - `finish` 表示不再写入，读端读尽剩余字节后得到 `Ok(0)`；
///   - 句柄被丢弃时自动 `finish`，但不会释放尚未读取的数据。
pub struct PipeWriter {
    shared: Arc<Shared>,
    finished: bool,
}

impl PipeWriter {
    /// 将 `src` 全部追加到管道，完成后唤醒读端。
    ///
    /// # 执行逻辑（How）
    /// 1. 登记在途操作；管道已关闭时返回 [`PipeError::Closed`]，不做任何修改；
    /// 2. 逐轮复制进头分段，头分段写满即挂入新的空分段；
    /// 3. 复制结束后发出一次脉冲。
    ///
    /// # 错误
    /// - [`PipeError::Closed`]：管道已关闭或写端已 `finish`；
    /// - [`PipeError::AllocationFailure`]：分段申请失败，由本次写入同步返回；
    ///   此前已复制的字节仍可被读取，下一次写入会重新申请。
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        let _op = self.shared.lifecycle.enter()?;
        if self.finished {
            return Err(PipeError::Closed);
        }
        if src.is_empty() {
            return Ok(());
        }
        self.shared.append(src, &mut 0)
    }

    /// 将 [`Buf`] 中剩余的全部字节写入管道，逐块复制而不做额外拼接。
    ///
    /// `buf` 按实际进入管道的字节数推进：传入 `&mut buf` 时，出错后剩余部分即尚未写入的字节，
    /// 可以原样重试而不会重复写入。
    pub fn write_buf<B: Buf>(&mut self, mut buf: B) -> Result<()> {
        let _op = self.shared.lifecycle.enter()?;
        if self.finished {
            return Err(PipeError::Closed);
        }
        while buf.has_remaining() {
            let mut copied = 0;
            let outcome = self.shared.append(buf.chunk(), &mut copied);
            buf.advance(copied);
            outcome?;
        }
        Ok(())
    }

    /// 可挂起形式的写入。
    ///
    /// 写入从不挂起，返回的 Future 在首次轮询时即完成，数据语义与 [`write`](Self::write) 完全一致。
    pub async fn write_async(&mut self, src: &[u8]) -> Result<()> {
        self.write(src)
    }

    /// 声明不再写入；读端读尽剩余数据后观察到流结束。重复调用无副作用。
    pub fn finish(&mut self) {
        if mem::replace(&mut self.finished, true) {
            return;
        }
        self.shared.finish();
    }

    /// 关闭整条管道并释放全部分段，详见 [`PipeCloser::close`]。
    pub fn close(&self) {
        self.shared.close();
    }

    /// 派生一个可在第三方线程中触发关闭的句柄。
    pub fn closer(&self) -> PipeCloser {
        PipeCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 分段链诊断快照。
    pub fn snapshot(&self) -> ChainSnapshot {
        self.shared.snapshot()
    }

    pub(crate) fn poll_finish(&mut self) -> Poll<Result<()>> {
        self.finish();
        Poll::Ready(Ok(()))
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeWriter")
            .field("label", &self.shared.label)
            .field("finished", &self.finished)
            .finish()
    }
}

/// 管道读端。
///
/// # 教案式说明
/// - **意图 (Why)**：读端是唯一能推进尾游标、释放排空分段的入口；不实现 `Clone`。
/// - **契约 (What)**：
///   - 管道为空时 `read` 阻塞直到写入、`finish` 或关闭；
///   - 返回值可能小于缓冲长度，部分读取是正常结果，下一次读取从上一次停下的位置继续；
///   - `Ok(0)` 仅表示流结束。
/// - **风险提示**：`parked` 记录上一次可挂起读取停在等待状态；此后若管道被关闭，
///   下一次轮询以 `Ok(0)` 收尾，与阻塞形式“等待中被关闭”的语义保持一致。
pub struct PipeReader {
    shared: Arc<Shared>,
    parked: bool,
}

impl PipeReader {
    /// 阻塞读取至多 `dst.len()` 字节。
    ///
    /// # 错误
    /// - [`PipeError::Closed`]：进入时管道已关闭。等待期间被关闭则返回 `Ok(0)`。
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.parked = false;
        self.shared.read_blocking(dst, None)
    }

    /// 最多等待 `timeout` 的阻塞读取；超时返回 [`PipeError::TimedOut`]，不消费任何字节。
    ///
    /// 截止时间超出 [`Instant`] 的表示范围时按无限期等待处理。
    pub fn read_timeout(&mut self, dst: &mut [u8], timeout: Duration) -> Result<usize> {
        self.parked = false;
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.shared.read_blocking(dst, Some((deadline, timeout))),
            None => self.shared.read_blocking(dst, None),
        }
    }

    /// 读取至多 `max` 字节并以 [`Bytes`] 返回；空 `Bytes` 表示流结束。
    pub fn read_chunk(&mut self, max: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(max);
        let read = self.read(&mut buf)?;
        buf.truncate(read);
        Ok(buf.freeze())
    }

    /// 可挂起形式的读取。丢弃返回的 Future 不会消费任何字节。
    pub fn read_async<'a>(&'a mut self, dst: &'a mut [u8]) -> ReadFuture<'a> {
        ReadFuture {
            reader: self,
            dst,
            cancel: None,
        }
    }

    /// 可被 [`Cancellation`] 打断的挂起读取；取消后以 [`PipeError::Cancelled`] 完成。
    pub fn read_async_with<'a>(
        &'a mut self,
        dst: &'a mut [u8],
        cancel: &'a Cancellation,
    ) -> ReadFuture<'a> {
        ReadFuture {
            reader: self,
            dst,
            cancel: Some(cancel),
        }
    }

    /// 关闭整条管道并释放全部分段，详见 [`PipeCloser::close`]。
    pub fn close(&self) {
        self.shared.close();
    }

    /// 派生一个可在第三方线程中触发关闭的句柄。
    pub fn closer(&self) -> PipeCloser {
        PipeCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 分段链诊断快照。
    pub fn snapshot(&self) -> ChainSnapshot {
        self.shared.snapshot()
    }

    /// 可挂起读取的单次轮询。
    ///
    /// # 执行逻辑（How）
    /// 1. 先在取消令牌上登记唤醒器再检查标记，取消优先于一切数据；
    /// 2. 每次轮询单独登记在途操作，挂起期间不占用计数，关闭方不会因无人轮询而永久等待；
    /// 3. 持锁尝试读取；为空时在锁内登记唤醒器后返回 `Pending`，写端在锁外脉冲时必然看到该登记。
    pub(crate) fn poll_read_inner(
        &mut self,
        cx: &mut Context<'_>,
        dst: &mut [u8],
        cancel: Option<&Cancellation>,
    ) -> Poll<Result<usize>> {
        if let Some(cancel) = cancel {
            cancel.register(cx.waker());
            if cancel.is_cancelled() {
                self.parked = false;
                return Poll::Ready(Err(PipeError::Cancelled));
            }
        }
        let _op = match self.shared.lifecycle.enter() {
            Ok(op) => op,
            Err(err) => {
                let was_parked = mem::take(&mut self.parked);
                return Poll::Ready(if was_parked { Ok(0) } else { Err(err) });
            }
        };
        if dst.is_empty() {
            self.parked = false;
            return Poll::Ready(Ok(0));
        }

        let mut state = self.shared.state.lock();
        match state.try_read(dst, self.shared.lifecycle.is_closed()) {
            ReadAttempt::Data(read) => {
                self.parked = false;
                Poll::Ready(Ok(read))
            }
            ReadAttempt::EndOfStream => {
                self.parked = false;
                Poll::Ready(Ok(0))
            }
            ReadAttempt::Empty => {
                self.shared.signal.register(cx.waker());
                self.parked = true;
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReader")
            .field("label", &self.shared.label)
            .field("parked", &self.parked)
            .finish()
    }
}

/// [`PipeReader::read_async`] 与 [`PipeReader::read_async_with`] 返回的 Future。
#[must_use = "futures do nothing unless polled"]
pub struct ReadFuture<'a> {
    reader: &'a mut PipeReader,
    dst: &'a mut [u8],
    cancel: Option<&'a Cancellation>,
}

impl core::future::Future for ReadFuture<'_> {
    type Output = Result<usize>;

    fn poll(self: core::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.reader.poll_read_inner(cx, this.dst, this.cancel)
    }
}

impl Drop for ReadFuture<'_> {
    fn drop(&mut self) {
        // 未完成即被丢弃的读取不应影响下一次读取对关闭的判定。
        self.reader.parked = false;
    }
}

impl fmt::Debug for ReadFuture<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadFuture")
            .field("capacity", &self.dst.len())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// 可克隆的关闭句柄，供不持有读写端的第三方（例如驱动循环）触发拆除。
#[derive(Clone)]
pub struct PipeCloser {
    shared: Arc<Shared>,
}

impl PipeCloser {
    /// 拆除管道。
    ///
    /// # 契约说明（What）
    /// - 置位关闭后唤醒阻塞中的读端（其以 `Ok(0)` 返回），随后阻塞等待所有已进入的读写退出，
    ///   最后由尾至头释放全部分段；
    /// - 幂等：重复调用直接返回；
    /// - 在读写操作内部（同一线程）调用不会发生，句柄借用规则保证了这一点。
    pub fn close(&self) {
        self.shared.close();
    }

    /// 管道是否已进入关闭流程。
    pub fn is_closed(&self) -> bool {
        self.shared.lifecycle.is_closed()
    }

    /// 分段链诊断快照。
    pub fn snapshot(&self) -> ChainSnapshot {
        self.shared.snapshot()
    }
}

impl fmt::Debug for PipeCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeCloser")
            .field("label", &self.shared.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}
