//! 数据管线的配置面.
//!
//! 该模块只负责描述配置, 不做命令行解析. 上层程序可以自行构造
//! [`PipelineConfig`], 或 (在打开 `serde` feature 时) 从配置文件反序列化.

use crate::consts::aug_defaults;
use crate::{Idx3d, Scale3d};
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 配置错误. 均为致命错误, 检测到后立即上抛, 不做重试.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// image 列表与 label 列表长度不一致. `(image 个数, label 个数)`
    MismatchedLabelCount(usize, usize),

    /// image 列表与 mask 列表长度不一致. `(image 个数, mask 个数)`
    MismatchedMaskCount(usize, usize),

    /// 未知的任务码.
    UnknownTask(u8),

    /// 任务需要 validity mask, 但配置中没有加载 mask.
    MaskRequired(u8),

    /// 训练模式需要 label, 但配置中没有给出 label 列表.
    LabelRequired,

    /// (协商后的) 采样尺寸超过了某个 padding 后体数据的尺寸.
    /// `(体数据索引, 体数据形状, 采样尺寸)`
    SampleExceedsVolume(usize, Idx3d, Idx3d),

    /// 滑窗步长为零.
    ZeroStride,

    /// batch size 为零.
    ZeroBatch,
}

/// 体数据来源. 多个文件共享一个目录前缀, 文件名用 `@` 连接.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sources {
    /// 共享目录前缀.
    pub dir: PathBuf,

    /// `@` 连接的 image 文件名列表.
    pub images: String,

    /// `@` 连接的 label 文件名列表. 训练模式必须给出.
    pub labels: Option<String>,

    /// `@` 连接的 validity mask 文件名列表.
    pub masks: Option<String>,
}

/// 将 `@` 连接的文件名列表展开为带目录前缀的全路径.
fn split_at_sign(dir: &Path, joined: &str) -> Vec<PathBuf> {
    joined.split('@').map(|name| dir.join(name)).collect()
}

impl Sources {
    /// 展开所有 image 全路径.
    pub fn image_paths(&self) -> Vec<PathBuf> {
        split_at_sign(&self.dir, &self.images)
    }

    /// 展开所有 label 全路径. 未配置时返回 `None`.
    pub fn label_paths(&self) -> Option<Vec<PathBuf>> {
        self.labels.as_ref().map(|j| split_at_sign(&self.dir, j))
    }

    /// 展开所有 mask 全路径. 未配置时返回 `None`.
    pub fn mask_paths(&self) -> Option<Vec<PathBuf>> {
        self.masks.as_ref().map(|j| split_at_sign(&self.dir, j))
    }
}

/// 获取 `{用户主目录}/dataset` 目录, 作为未显式配置时的数据目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 增广链参数. 逐变换的触发概率与强度.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AugParams {
    /// 旋转触发概率.
    pub rotate_p: f64,

    /// 预裁剪缩放触发概率.
    pub rescale_p: f64,

    /// 预裁剪缩放区间.
    pub rescale_range: (f64, f64),

    /// 翻转触发概率.
    pub flip_p: f64,

    /// 弹性形变触发概率.
    pub elastic_p: f64,

    /// 弹性形变强度 (体素).
    pub elastic_alpha: f64,

    /// 弹性形变粗网格步长 (体素).
    pub elastic_sigma: f64,

    /// 灰度扰动触发概率.
    pub grayscale_p: f64,

    /// 缺失小块触发概率.
    pub missing_parts_p: f64,

    /// 缺失整切片触发概率.
    pub missing_section_p: f64,

    /// 每次触发最多缺失的切片数.
    pub missing_section_num: usize,

    /// 切片错位触发概率.
    pub misalign_p: f64,

    /// 切片错位的最大平面位移 (体素).
    pub misalign_displacement: usize,
}

impl Default for AugParams {
    fn default() -> Self {
        Self {
            rotate_p: aug_defaults::ROTATE_P,
            rescale_p: aug_defaults::RESCALE_P,
            rescale_range: (aug_defaults::RESCALE_LO, aug_defaults::RESCALE_HI),
            flip_p: aug_defaults::FLIP_P,
            elastic_p: aug_defaults::ELASTIC_P,
            elastic_alpha: aug_defaults::ELASTIC_ALPHA,
            elastic_sigma: aug_defaults::ELASTIC_SIGMA,
            grayscale_p: aug_defaults::GRAYSCALE_P,
            missing_parts_p: aug_defaults::MISSING_PARTS_P,
            missing_section_p: aug_defaults::MISSING_SECTION_P,
            missing_section_num: aug_defaults::MISSING_SECTION_NUM,
            misalign_p: aug_defaults::MISALIGN_P,
            misalign_displacement: aug_defaults::MISALIGN_DISPLACEMENT,
        }
    }
}

/// 数据管线配置. 被数据集装配层 ([`crate::loader`]) 消费.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    /// 体数据来源.
    pub sources: Sources,

    /// 各轴重采样因子. `(1, 1, 1)` 表示不重采样.
    pub scale: Scale3d,

    /// 各轴对称反射 padding 宽度.
    pub pad: Idx3d,

    /// 标签边界加宽量 (体素). 0 表示不加宽.
    pub label_erosion: usize,

    /// 任务码. 见 [`crate::consts::task`].
    pub task: u8,

    /// 训练时网络输入的名义采样尺寸.
    pub sample_size: Idx3d,

    /// 测试时滑窗裁剪尺寸.
    pub test_size: Idx3d,

    /// 测试时滑窗步长.
    pub test_stride: Idx3d,

    /// batch 大小.
    pub batch_size: usize,

    /// worker 个数. 0 表示取 CPU 逻辑核数.
    pub workers: usize,

    /// 是否启用增广.
    pub augment: bool,

    /// 增广链参数.
    pub aug: AugParams,

    /// 训练抽样时 label 前景占比下限. 0 表示不做前景检查.
    pub min_foreground: f64,

    /// 随机种子. `None` 表示从系统熵初始化.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: Sources::default(),
            scale: (1.0, 1.0, 1.0),
            pad: (0, 0, 0),
            label_erosion: 0,
            task: crate::consts::task::AFFINITY,
            sample_size: (8, 64, 64),
            test_size: (8, 64, 64),
            test_stride: (4, 32, 32),
            batch_size: 1,
            workers: 0,
            augment: true,
            aug: AugParams::default(),
            min_foreground: 0.0,
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// 实际 worker 个数. 配置为 0 时回落到 CPU 逻辑核数.
    #[inline]
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    /// 基本合法性检查. 与体数据相关的检查 (采样尺寸 vs 体数据尺寸)
    /// 在装配层完成, 因为只有装配层同时知道两者.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        let (sz, sh, sw) = self.test_stride;
        if sz == 0 || sh == 0 || sw == 0 {
            return Err(ConfigError::ZeroStride);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_at_sign() {
        let s = Sources {
            dir: PathBuf::from("/data/em"),
            images: "a.npz@b.npz".to_string(),
            labels: Some("a_label.npz".to_string()),
            masks: None,
        };
        assert_eq!(
            s.image_paths(),
            vec![PathBuf::from("/data/em/a.npz"), PathBuf::from("/data/em/b.npz")]
        );
        assert_eq!(s.label_paths().unwrap().len(), 1);
        assert!(s.mask_paths().is_none());
    }

    #[test]
    fn test_validate_rejects_degenerate() {
        let mut cfg = PipelineConfig::default();
        cfg.batch_size = 0;
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroBatch);

        let mut cfg = PipelineConfig::default();
        cfg.test_stride = (1, 0, 1);
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroStride);
    }
}
