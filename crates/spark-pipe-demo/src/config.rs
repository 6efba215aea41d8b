use std::{env, time::Duration};

use anyhow::{Context, Result};
use spark_pipe::{DEFAULT_SEGMENT_CAPACITY, PipeConfig};

/// 驱动示例的运行参数。
///
/// # 教案式说明
/// - **意图 (Why)**：管道本身不做背压，节流策略完全由驱动方决定；
///   这里把策略中的每个阈值都暴露为环境变量，便于观察不同取值下的内存曲线。
/// - **契约 (What)**：所有字段都有默认值；环境变量存在但无法解析时启动失败，而不是静默回落。
#[derive(Clone, Debug)]
pub struct DemoConfig {
    pub pipe: PipeConfig,
    pub chunk_size: usize,
    pub throttle_threshold: i64,
    pub throttle_pause: Duration,
    pub reader_pause: Duration,
    pub report_interval: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            pipe: PipeConfig {
                segment_capacity: DEFAULT_SEGMENT_CAPACITY,
                label: Some("demo".to_owned()),
            },
            chunk_size: 2048,
            throttle_threshold: 1024 * 1024,
            throttle_pause: Duration::from_secs(1),
            reader_pause: Duration::from_millis(100),
            report_interval: Duration::from_secs(1),
        }
    }
}

impl DemoConfig {
    /// 以默认值为基线，叠加 `SPARK_PIPE_*` 环境变量。
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(capacity) = parse_var::<usize>("SPARK_PIPE_SEGMENT_CAPACITY")? {
            config.pipe.segment_capacity = capacity;
        }
        if let Some(chunk) = parse_var::<usize>("SPARK_PIPE_CHUNK_SIZE")? {
            config.chunk_size = chunk;
        }
        if let Some(threshold) = parse_var::<i64>("SPARK_PIPE_THROTTLE_BYTES")? {
            config.throttle_threshold = threshold;
        }
        if let Some(ms) = parse_var::<u64>("SPARK_PIPE_THROTTLE_PAUSE_MS")? {
            config.throttle_pause = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("SPARK_PIPE_READER_PAUSE_MS")? {
            config.reader_pause = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("SPARK_PIPE_REPORT_INTERVAL_MS")? {
            config.report_interval = Duration::from_millis(ms);
        }
        config.pipe.validate()?;
        anyhow::ensure!(config.chunk_size > 0, "SPARK_PIPE_CHUNK_SIZE must be positive");
        Ok(config)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("failed to parse {name}={raw}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {name}")),
    }
}
