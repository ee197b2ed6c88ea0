//! 按任务定制的批拼接策略.

use ndarray::{s, Array5};

use crate::dataset::Sample;
use crate::Idx3d;

/// 一个迭代产出的批. 消费后即弃.
#[derive(Debug)]
pub enum Batch {
    /// 训练批: image/target 堆叠为 `(B, C, z, h, w)` 张量.
    Train {
        /// 输入张量, 通道数 1.
        image: Array5<f32>,

        /// 目标张量, 通道数由任务决定.
        target: Array5<f32>,

        /// validity mask, 加载了 mask 时存在.
        mask: Option<Array5<f32>>,
    },

    /// 骨架距离任务的训练批: 额外携带辅助目标.
    TrainSkeleton {
        /// 输入张量.
        image: Array5<f32>,

        /// 二值目标张量.
        target: Array5<f32>,

        /// 骨架距离辅助目标, 形状与 target 不同源 (由距离场拼接).
        skeleton: Array5<f32>,

        /// validity mask.
        mask: Option<Array5<f32>>,
    },

    /// 测试批: 滑窗位置与 image, 供下游拼接.
    Test {
        /// 每个样本的 (体数据索引, 滑窗原点).
        positions: Vec<(usize, Idx3d)>,

        /// 输入张量.
        image: Array5<f32>,
    },
}

/// 批拼接策略. 与样本生产者一起在装配阶段按任务选定.
pub trait Collate: Send + Sync {
    /// 将一组样本拼接为批. 样本组非空由调用方保证.
    fn collate(&self, samples: Vec<Sample>) -> Batch;
}

/// 将各样本的 image 堆叠为 `(B, 1, z, h, w)`.
fn stack_images(samples: &[Sample]) -> Array5<f32> {
    let (nz, nh, nw) = samples[0].image.dim();
    let mut out = Array5::zeros((samples.len(), 1, nz, nh, nw));
    for (b, sample) in samples.iter().enumerate() {
        out.slice_mut(s![b, 0, .., .., ..]).assign(&sample.image);
    }
    out
}

/// 将各样本的 target 堆叠为 `(B, C, z, h, w)`.
fn stack_targets(samples: &[Sample]) -> Array5<f32> {
    let first = samples[0].target.as_ref().expect("训练样本必有 target");
    let (c, nz, nh, nw) = first.dim();
    let mut out = Array5::zeros((samples.len(), c, nz, nh, nw));
    for (b, sample) in samples.iter().enumerate() {
        out.slice_mut(s![b, .., .., .., ..])
            .assign(sample.target.as_ref().expect("训练样本必有 target"));
    }
    out
}

/// 将各样本的 mask 堆叠为 `(B, 1, z, h, w)`. 全部缺失时返回 `None`.
fn stack_masks(samples: &[Sample]) -> Option<Array5<f32>> {
    samples[0].mask.as_ref()?;
    let (nz, nh, nw) = samples[0].mask.as_ref().unwrap().dim();
    let mut out = Array5::zeros((samples.len(), 1, nz, nh, nw));
    for (b, sample) in samples.iter().enumerate() {
        out.slice_mut(s![b, 0, .., .., ..])
            .assign(sample.mask.as_ref().expect("mask 存在性逐批一致"));
    }
    Some(out)
}

/// 通用训练批拼接.
pub struct StackCollate;

impl Collate for StackCollate {
    fn collate(&self, samples: Vec<Sample>) -> Batch {
        assert!(!samples.is_empty());
        Batch::Train {
            image: stack_images(&samples),
            target: stack_targets(&samples),
            mask: stack_masks(&samples),
        }
    }
}

/// 骨架距离任务的训练批拼接: 目标张量之外再拼接距离场.
pub struct SkeletonCollate;

impl Collate for SkeletonCollate {
    fn collate(&self, samples: Vec<Sample>) -> Batch {
        assert!(!samples.is_empty());
        let (nz, nh, nw) = samples[0].image.dim();
        let mut skeleton = Array5::zeros((samples.len(), 1, nz, nh, nw));
        for (b, sample) in samples.iter().enumerate() {
            skeleton
                .slice_mut(s![b, 0, .., .., ..])
                .assign(sample.aux.as_ref().expect("骨架任务样本必有辅助目标"));
        }
        Batch::TrainSkeleton {
            image: stack_images(&samples),
            target: stack_targets(&samples),
            skeleton,
            mask: stack_masks(&samples),
        }
    }
}

/// 测试批拼接: 只堆叠 image, 并保留滑窗定位信息.
pub struct TestCollate;

impl Collate for TestCollate {
    fn collate(&self, samples: Vec<Sample>) -> Batch {
        assert!(!samples.is_empty());
        Batch::Test {
            positions: samples.iter().map(|s| (s.volume, s.origin)).collect(),
            image: stack_images(&samples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn sample(fill: f32) -> Sample {
        Sample {
            volume: 0,
            origin: (0, 0, 0),
            image: Array3::from_elem((2, 4, 4), fill),
            target: Some(Array4::from_elem((3, 2, 4, 4), fill)),
            mask: None,
            aux: None,
        }
    }

    #[test]
    fn test_stack_shapes() {
        let b = StackCollate.collate(vec![sample(0.1), sample(0.2)]);
        let Batch::Train { image, target, mask } = b else {
            panic!("期望训练批");
        };
        assert_eq!(image.dim(), (2, 1, 2, 4, 4));
        assert_eq!(target.dim(), (2, 3, 2, 4, 4));
        assert!(mask.is_none());
        assert_eq!(image[(0, 0, 0, 0, 0)], 0.1);
        assert_eq!(image[(1, 0, 1, 3, 3)], 0.2);
    }

    #[test]
    fn test_test_collate_keeps_positions() {
        let mut s1 = sample(0.0);
        s1.origin = (0, 4, 8);
        s1.target = None;
        let b = TestCollate.collate(vec![s1]);
        let Batch::Test { positions, image } = b else {
            panic!("期望测试批");
        };
        assert_eq!(positions, vec![(0, (0, 4, 8))]);
        assert_eq!(image.dim(), (1, 1, 2, 4, 4));
    }
}
