//! 神经元 affinity 任务的样本生产者.

use ndarray::Array4;
use rand::rngs::StdRng;

use super::sample::{Sample, VolumeDataset};
use super::{DrawError, Mode, SampleSource};
use crate::consts::is_foreground;
use crate::Volume;

/// 由实例标签构建 3 通道最近邻 affinity 目标.
///
/// 通道依次对应 z/h/w 轴: 体素与它沿该轴的前驱同属一个非零实例时为 1.
/// 各轴首个体素没有前驱, affinity 记 0.
pub(crate) fn affinity_target(label: &Volume) -> Array4<f32> {
    let (nz, nh, nw) = label.dim();

    Array4::from_shape_fn((3, nz, nh, nw), |(c, z, h, w)| {
        let cur = label[(z, h, w)];
        if !is_foreground(cur) {
            return 0.0;
        }
        let prev = match c {
            0 if z > 0 => label[(z - 1, h, w)],
            1 if h > 0 => label[(z, h - 1, w)],
            2 if w > 0 => label[(z, h, w - 1)],
            _ => return 0.0,
        };
        if prev == cur {
            1.0
        } else {
            0.0
        }
    })
}

/// affinity 任务样本生产者.
pub struct AffinitySource {
    base: VolumeDataset,
}

impl AffinitySource {
    /// 包装抽样核心.
    pub fn new(base: VolumeDataset) -> Self {
        Self { base }
    }
}

impl SampleSource for AffinitySource {
    fn len(&self) -> Option<usize> {
        self.base.len()
    }

    fn target_channels(&self) -> usize {
        3
    }

    fn draw(&self, index: usize, rng: &mut StdRng) -> Result<Sample, DrawError> {
        match self.base.mode() {
            Mode::Train => {
                let (volume, origin, s) = self.base.draw_train(rng)?;
                // 训练模式下构造方保证 label 存在.
                let target = affinity_target(s.label.as_ref().unwrap());
                Ok(Sample {
                    volume,
                    origin,
                    image: s.image,
                    target: Some(target),
                    mask: s.mask,
                    aux: None,
                })
            }
            Mode::Test => {
                let (volume, origin, image) = self.base.draw_test(index)?;
                Ok(Sample { volume, origin, image, target: None, mask: None, aux: None })
            }
        }
    }
}
