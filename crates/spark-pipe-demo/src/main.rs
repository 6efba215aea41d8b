//! 管道驱动示例：一个写任务持续领先，一个读任务缓慢消费，
//! 出站积压超过阈值时由写任务自行暂停。
//!
//! # 使用方法
//! ```bash
//! RUST_LOG=info cargo run -p spark-pipe-demo
//! SPARK_PIPE_THROTTLE_BYTES=65536 SPARK_PIPE_READER_PAUSE_MS=10 cargo run -p spark-pipe-demo
//! ```
//! 按 Ctrl-C 结束：取消读取、关闭管道并等待两个任务退出。
//!
//! # 设计要点（Why）
//! - 积压计数由驱动方维护，管道本身不提供字节计数，也不做背压；
//! - 读任务使用可取消的挂起读取，取消与流结束在日志中可以区分。

mod config;

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use spark_pipe::{Cancellation, PipeError, PipeReader, PipeWriter, pipe_with};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::DemoConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DemoConfig::from_env()?;
    info!(?config, "starting pipe demo");

    let (writer, reader) = pipe_with(config.pipe.clone()).context("failed to create pipe")?;
    let closer = writer.closer();
    let outstanding = Arc::new(AtomicI64::new(0));
    let cancel = Cancellation::new();

    let writer_task = tokio::spawn(produce(
        writer,
        Arc::clone(&outstanding),
        cancel.clone(),
        config.clone(),
    ));
    let reader_task = tokio::spawn(consume(
        reader,
        Arc::clone(&outstanding),
        cancel.clone(),
        config.clone(),
    ));

    let mut ticker = tokio::time::interval(config.report_interval);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                info!(outstanding = outstanding.load(Ordering::Relaxed), "pipe backlog");
            }
        }
    }

    cancel.cancel();
    tokio::task::spawn_blocking(move || closer.close())
        .await
        .context("close task panicked")?;

    let written = writer_task.await.context("writer task panicked")??;
    let read = reader_task.await.context("reader task panicked")??;
    info!(
        written,
        read,
        outstanding = outstanding.load(Ordering::Relaxed),
        "pipe demo finished"
    );
    Ok(())
}

/// 写任务：每轮写入 `chunk_size` 字节，积压超过阈值时暂停 `throttle_pause`。
async fn produce(
    mut writer: PipeWriter,
    outstanding: Arc<AtomicI64>,
    cancel: Cancellation,
    config: DemoConfig,
) -> Result<u64> {
    let chunk = vec![0u8; config.chunk_size];
    let mut written = 0u64;
    while !cancel.is_cancelled() {
        match writer.write_async(&chunk).await {
            Ok(()) => {}
            Err(PipeError::Closed) => break,
            Err(err) => return Err(err).context("pipe write failed"),
        }
        written += chunk.len() as u64;
        let backlog = outstanding.fetch_add(chunk.len() as i64, Ordering::Relaxed) + chunk.len() as i64;
        if backlog > config.throttle_threshold {
            tokio::time::sleep(config.throttle_pause).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
    Ok(written)
}

/// 读任务：每轮读取至多 `chunk_size` 字节后暂停 `reader_pause`。
async fn consume(
    mut reader: PipeReader,
    outstanding: Arc<AtomicI64>,
    cancel: Cancellation,
    config: DemoConfig,
) -> Result<u64> {
    let mut buf = vec![0u8; config.chunk_size];
    let mut read_total = 0u64;
    loop {
        match reader.read_async_with(&mut buf, &cancel).await {
            Ok(0) => {
                info!("pipe reached end of stream");
                break;
            }
            Ok(read) => {
                read_total += read as u64;
                outstanding.fetch_sub(read as i64, Ordering::Relaxed);
            }
            Err(PipeError::Cancelled) => {
                info!("pipe read cancelled");
                break;
            }
            Err(PipeError::Closed) => {
                warn!("pipe closed before reader finished");
                break;
            }
            Err(err) => return Err(err).context("pipe read failed"),
        }
        if cancel.is_cancelled() {
            break;
        }
        tokio::time::sleep(config.reader_pause).await;
    }
    Ok(read_total)
}
