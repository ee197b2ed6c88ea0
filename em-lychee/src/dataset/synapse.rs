//! 突触检测任务 (含极性变体) 的样本生产者.

use ndarray::Array4;
use rand::rngs::StdRng;

use super::sample::{Sample, VolumeDataset};
use super::{DrawError, Mode, SampleSource};
use crate::consts::is_foreground;
use crate::Volume;

/// 二值化前景目标, 单通道.
pub(crate) fn binary_target(label: &Volume) -> Array4<f32> {
    let (nz, nh, nw) = label.dim();
    Array4::from_shape_fn((1, nz, nh, nw), |(_, z, h, w)| {
        if is_foreground(label[(z, h, w)]) {
            1.0
        } else {
            0.0
        }
    })
}

/// 带极性的突触目标, 3 通道: 前突触 (奇数实例 id)、后突触
/// (偶数非零实例 id)、全体前景.
pub(crate) fn polarity_target(label: &Volume) -> Array4<f32> {
    let (nz, nh, nw) = label.dim();
    Array4::from_shape_fn((3, nz, nh, nw), |(c, z, h, w)| {
        let p = label[(z, h, w)];
        if !is_foreground(p) {
            return 0.0;
        }
        let odd = (p as i64) % 2 != 0;
        let hit = match c {
            0 => odd,
            1 => !odd,
            _ => true,
        };
        if hit {
            1.0
        } else {
            0.0
        }
    })
}

/// 构造只在目标构建函数上有差异的样本生产者.
macro_rules! synapse_like_source {
    ($(#[$doc:meta])* $name:ident, $channels:expr, $build:path) => {
        $(#[$doc])*
        pub struct $name {
            base: VolumeDataset,
        }

        impl $name {
            /// 包装抽样核心.
            pub fn new(base: VolumeDataset) -> Self {
                Self { base }
            }
        }

        impl SampleSource for $name {
            fn len(&self) -> Option<usize> {
                self.base.len()
            }

            fn target_channels(&self) -> usize {
                $channels
            }

            fn draw(&self, index: usize, rng: &mut StdRng) -> Result<Sample, DrawError> {
                match self.base.mode() {
                    Mode::Train => {
                        let (volume, origin, s) = self.base.draw_train(rng)?;
                        let target = $build(s.label.as_ref().unwrap());
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
                        Ok(Sample {
                            volume,
                            origin,
                            image,
                            target: None,
                            mask: None,
                            aux: None,
                        })
                    }
                }
            }
        }
    };
}

synapse_like_source!(
    /// 突触检测样本生产者: 单通道二值目标.
    SynapseSource,
    1,
    binary_target
);

synapse_like_source!(
    /// 带极性的突触检测样本生产者: 3 通道 (前/后/全体) 目标.
    PolaritySource,
    3,
    polarity_target
);
