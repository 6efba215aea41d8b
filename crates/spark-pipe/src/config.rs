use serde::Deserialize;

use crate::error::{PipeError, Result};

/// 分段容量的默认值（字节）。
pub const DEFAULT_SEGMENT_CAPACITY: usize = 1024;

/// `PipeConfig` 描述单个管道实例的构造参数。
///
/// # 设计动机（Why）
/// - 分段容量在实例生命周期内固定，决定了分配粒度与释放粒度；
///   调用方需要在吞吐（大分段）与内存回收及时性（小分段）之间自行取舍。
/// - `label` 仅用于日志字段，便于在同一进程内区分多条管道。
///
/// # 契约说明（What）
/// - 支持 `serde` 反序列化，缺省字段回落到 [`Default`]，
///   因此配置文件中只写 `segment_capacity = 4096` 也是合法输入；
/// - 反序列化不做校验，进入 [`pipe_with`](crate::pipe_with) 前会调用 [`validate`](Self::validate)。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipeConfig {
    pub segment_capacity: usize,
    pub label: Option<String>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            label: None,
        }
    }
}

impl PipeConfig {
    /// 返回链式构造器。
    pub fn builder() -> PipeConfigBuilder {
        PipeConfigBuilder::default()
    }

    /// 校验参数合法性。
    ///
    /// - **前置条件**：无；
    /// - **后置条件**：返回 `Ok(())` 时 `segment_capacity > 0`。
    pub fn validate(&self) -> Result<()> {
        if self.segment_capacity == 0 {
            return Err(PipeError::InvalidConfig {
                reason: "segment_capacity must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }

    /// 日志中使用的标签，未设置时为 `"pipe"`。
    pub(crate) fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("pipe")
    }
}

/// [`PipeConfig`] 的构造器。
#[derive(Debug, Default)]
pub struct PipeConfigBuilder {
    config: PipeConfig,
}

impl PipeConfigBuilder {
    /// 设置分段容量。
    pub fn segment_capacity(mut self, capacity: usize) -> Self {
        self.config.segment_capacity = capacity;
        self
    }

    /// 设置日志标签。
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = Some(label.into());
        self
    }

    /// 校验并产出配置。
    pub fn build(self) -> Result<PipeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
