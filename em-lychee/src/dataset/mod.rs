//! 数据集装配: 任务选择与逐任务样本生产者.

use std::sync::Arc;

use rand::rngs::StdRng;

use crate::augment::{AugmentError, Compose};
use crate::config::ConfigError;
use crate::data::VolumeSet;
use crate::{consts, Idx3d};

mod affinity;
mod mito;
mod sample;
mod synapse;

pub use affinity::AffinitySource;
pub use mito::{MitoSkeletonSource, MitoSource};
pub use sample::{Sample, VolumeDataset};
pub use synapse::{PolaritySource, SynapseSource};

/// 数据集工作模式.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 训练: 带放回的随机抽样, 无限循环.
    Train,

    /// 测试: 确定性滑窗遍历, 覆盖完整体数据.
    Test,
}

/// 抽样运行时错误. 向抽样调用方透传, 绝不静默替换成全零样本.
#[derive(Debug)]
pub enum DrawError {
    /// 增广链错误.
    Augment(AugmentError),

    /// 重抽多次后仍未满足前景占比要求. 参数为尝试次数.
    ForegroundScarce(u32),

    /// 测试模式索引越界. `(索引, 总数)`
    IndexOutOfRange(usize, usize),
}

impl From<AugmentError> for DrawError {
    fn from(e: AugmentError) -> Self {
        DrawError::Augment(e)
    }
}

/// 任务选择器. 从闭集整数任务码解码, 配置阶段穷尽校验.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// 神经元 affinity 预测.
    Affinity,

    /// 突触检测.
    Synapse,

    /// 带极性的突触检测.
    SynapsePolarity,

    /// 线粒体分割.
    Mito,

    /// 带骨架距离辅助目标的线粒体分割.
    MitoSkeleton,
}

impl Task {
    /// 从整数任务码解码. 未知任务码是配置错误.
    pub fn from_code(code: u8) -> Result<Self, ConfigError> {
        match code {
            consts::task::AFFINITY => Ok(Task::Affinity),
            consts::task::SYNAPSE => Ok(Task::Synapse),
            consts::task::SYNAPSE_POLARITY => Ok(Task::SynapsePolarity),
            consts::task::MITO => Ok(Task::Mito),
            consts::task::MITO_SKELETON => Ok(Task::MitoSkeleton),
            other => Err(ConfigError::UnknownTask(other)),
        }
    }

    /// 任务码.
    pub fn code(&self) -> u8 {
        match self {
            Task::Affinity => consts::task::AFFINITY,
            Task::Synapse => consts::task::SYNAPSE,
            Task::SynapsePolarity => consts::task::SYNAPSE_POLARITY,
            Task::Mito => consts::task::MITO,
            Task::MitoSkeleton => consts::task::MITO_SKELETON,
        }
    }

    /// 任务的可读名称, 用于诊断输出.
    pub fn name(&self) -> &'static str {
        match self {
            Task::Affinity => "neuron affinity",
            Task::Synapse => "synapse detection",
            Task::SynapsePolarity => "synapse polarity detection",
            Task::Mito => "mitochondria segmentation",
            Task::MitoSkeleton => "mitochondria segmentation with skeleton transform",
        }
    }

    /// 任务目标张量的通道数.
    pub fn out_channels(&self) -> usize {
        match self {
            Task::Affinity => 3,
            Task::Synapse => 1,
            Task::SynapsePolarity => 3,
            Task::Mito => 1,
            Task::MitoSkeleton => 1,
        }
    }

    /// 任务是否要求加载 validity mask?
    pub fn needs_mask(&self) -> bool {
        matches!(self, Task::MitoSkeleton)
    }
}

/// 逐任务样本生产者的公共契约.
///
/// 测试模式下长度有限 (每个滑窗位置一个样本), 训练模式下无界,
/// `draw` 的索引仅用于再现性划分, 不参与随机源.
pub trait SampleSource: Send + Sync {
    /// 测试模式返回样本总数; 训练模式返回 `None` (无界).
    fn len(&self) -> Option<usize>;

    /// 抽取一个样本. 训练模式下内部随机; 测试模式下由 `index` 确定.
    fn draw(&self, index: usize, rng: &mut StdRng) -> Result<Sample, DrawError>;

    /// 目标张量通道数.
    fn target_channels(&self) -> usize;
}

/// 按任务构建样本生产者, 并完成与体数据相关的配置校验.
///
/// `sample_size` 是体数据上实际裁剪的尺寸 (训练增广时为协商尺寸);
/// `stride` 仅测试模式使用.
pub fn make_source(
    task: Task,
    volumes: Arc<VolumeSet>,
    sample_size: Idx3d,
    stride: Idx3d,
    augmentor: Option<Compose>,
    mode: Mode,
    min_foreground: f64,
) -> Result<Box<dyn SampleSource>, ConfigError> {
    if mode == Mode::Train {
        if volumes.labels().is_none() {
            return Err(ConfigError::LabelRequired);
        }
        if task.needs_mask() && volumes.masks().is_none() {
            return Err(ConfigError::MaskRequired(task.code()));
        }
    }

    let base = VolumeDataset::new(volumes, sample_size, stride, mode, augmentor, min_foreground)?;

    Ok(match task {
        Task::Affinity => Box::new(AffinitySource::new(base)),
        Task::Synapse => Box::new(SynapseSource::new(base)),
        Task::SynapsePolarity => Box::new(PolaritySource::new(base)),
        Task::Mito => Box::new(MitoSource::new(base)),
        Task::MitoSkeleton => Box::new(MitoSkeletonSource::new(base)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_decode_exhaustive() {
        for (code, task) in [
            (0u8, Task::Affinity),
            (1, Task::Synapse),
            (11, Task::SynapsePolarity),
            (2, Task::Mito),
            (22, Task::MitoSkeleton),
        ] {
            let t = Task::from_code(code).unwrap();
            assert_eq!(t, task);
            assert_eq!(t.code(), code);
        }
    }

    #[test]
    fn test_unknown_task_rejected() {
        for code in [3u8, 10, 21, 255] {
            assert_eq!(
                Task::from_code(code).unwrap_err(),
                ConfigError::UnknownTask(code)
            );
        }
    }

    #[test]
    fn test_only_skeleton_needs_mask() {
        assert!(Task::MitoSkeleton.needs_mask());
        for t in [Task::Affinity, Task::Synapse, Task::SynapsePolarity, Task::Mito] {
            assert!(!t.needs_mask());
        }
    }
}
