//! 轴翻转与平面转置.

use ndarray::Axis;
use rand::rngs::StdRng;
use rand::Rng;

use super::{Augment, AugSample};
use crate::{Idx3d, Volume};

/// 随机轴翻转. 从 16 种变体 (三轴翻转 x 平面转置) 中等概率抽取一种,
/// 平面转置仅在平面为正方形时参与.
pub struct Flip {
    p: f64,
}

impl Flip {
    /// 以触发概率 `p` 构建.
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

/// 按位掩码翻转/转置单个体数据. bit0/1/2 分别翻转 z/h/w 轴,
/// bit3 转置平面 (调用方保证平面为正方形).
fn flip_volume(v: &Volume, bits: u8) -> Volume {
    let mut view = v.view();
    if bits & 1 != 0 {
        view.invert_axis(Axis(0));
    }
    if bits & 2 != 0 {
        view.invert_axis(Axis(1));
    }
    if bits & 4 != 0 {
        view.invert_axis(Axis(2));
    }
    if bits & 8 != 0 {
        view = view.permuted_axes([0, 2, 1]);
    }
    view.as_standard_layout().to_owned()
}

impl Augment for Flip {
    fn name(&self) -> &'static str {
        "flip"
    }

    fn prob(&self) -> f64 {
        self.p
    }

    fn margin(&self, _nominal: Idx3d) -> Idx3d {
        (0, 0, 0)
    }

    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng) {
        let (_, nh, nw) = sample.shape();
        let mut bits: u8 = rng.gen_range(0..16);
        if nh != nw {
            // 非正方形平面不能转置.
            bits &= 0b0111;
        }
        sample.apply_each(|v| flip_volume(v, bits));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_flip_involution() {
        let v = Array3::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 100 + h * 10 + w) as f32);
        for bits in 0..8u8 {
            let twice = flip_volume(&flip_volume(&v, bits), bits);
            assert_eq!(twice, v, "bits = {bits}");
        }
    }

    #[test]
    fn test_flip_keeps_alignment() {
        let mut s = AugSample {
            image: Array3::from_shape_fn((2, 4, 4), |(z, h, w)| (z * 16 + h * 4 + w) as f32),
            label: Some(Array3::from_shape_fn((2, 4, 4), |(z, h, w)| {
                (z * 16 + h * 4 + w) as f32
            })),
            mask: None,
        };
        let mut rng = rand::SeedableRng::seed_from_u64(3);
        Flip::new(1.0).transform(&mut s, &mut rng);
        assert_eq!(&s.image, s.label.as_ref().unwrap());
    }

    #[test]
    fn test_transpose_swaps_plane() {
        let v = Array3::from_shape_fn((1, 2, 2), |(_, h, w)| (h * 2 + w) as f32);
        let t = flip_volume(&v, 8);
        assert_eq!(t[(0, 0, 1)], v[(0, 1, 0)]);
        assert_eq!(t[(0, 1, 0)], v[(0, 0, 1)]);
    }
}
