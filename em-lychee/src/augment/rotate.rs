//! 平面内任意角度旋转.

use rand::rngs::StdRng;
use rand::Rng;
use std::f64::consts::{SQRT_2, TAU};

use super::{warp_inplane, Augment, AugSample};
use crate::Idx3d;

/// 绕平面中心的随机角度旋转. 所有 z 切片共用同一角度,
/// image 双线性插值, label/mask 最近邻.
pub struct Rotate {
    p: f64,
}

impl Rotate {
    /// 以触发概率 `p` 构建.
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

impl Augment for Rotate {
    fn name(&self) -> &'static str {
        "rotate"
    }

    fn prob(&self) -> f64 {
        self.p
    }

    fn margin(&self, nominal: Idx3d) -> Idx3d {
        // 名义区域的外接圆直径为 sqrt(2) * 边长, 两侧各需一半差值.
        let side = nominal.1.max(nominal.2) as f64;
        let m = (side * (SQRT_2 - 1.0) / 2.0).ceil() as usize;
        (0, m, m)
    }

    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng) {
        let (_, nh, nw) = sample.shape();
        let angle = rng.gen_range(0.0..TAU);
        let (sin, cos) = angle.sin_cos();
        let (ch, cw) = ((nh - 1) as f64 / 2.0, (nw - 1) as f64 / 2.0);

        // 输出坐标逆旋回源坐标.
        warp_inplane(sample, |_z, h, w| {
            let (dh, dw) = (h - ch, w - cw);
            (ch + cos * dh - sin * dw, cw + sin * dh + cos * dw)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::SeedableRng;

    /// 标记体素对齐性: 旋转后 image 峰值位置与 label 标记位置
    /// 在插值容差 (Chebyshev 距离 1) 内一致; 中心标记则完全不动.
    #[test]
    fn test_marked_voxel_alignment() {
        let shape = (2, 17, 17);
        let mark = (1usize, 8usize, 8usize); // 旋转中心

        let mut image = Array3::zeros(shape);
        image[mark] = 1.0;
        let mut label = Array3::zeros(shape);
        label[mark] = 1.0;

        let mut s = AugSample { image, label: Some(label), mask: None };
        let mut rng = StdRng::seed_from_u64(11);
        Rotate::new(1.0).transform(&mut s, &mut rng);

        // 中心点是旋转不动点: label 标记仍在原处且唯一.
        let label = s.label.as_ref().unwrap();
        assert_eq!(label[mark], 1.0);
        assert_eq!(label.iter().filter(|&&v| v != 0.0).count(), 1);

        // image 峰值落在标记位置的插值邻域内.
        let (mut best, mut best_pos) = (f32::MIN, (0, 0, 0));
        for ((z, h, w), &v) in s.image.indexed_iter() {
            if v > best {
                best = v;
                best_pos = (z, h, w);
            }
        }
        assert!(best > 0.2);
        assert!(best_pos.1.abs_diff(mark.1) <= 1 && best_pos.2.abs_diff(mark.2) <= 1);
    }

    /// 离心标记体素: 每个存活的 label 标记处, image 都在
    /// 插值邻域内留有显著质量 (两者做的是同一几何).
    #[test]
    fn test_offcenter_alignment_within_tolerance() {
        let shape = (1, 33, 33);
        let mark = (0usize, 16usize, 22usize);

        let mut image = Array3::zeros(shape);
        image[mark] = 1.0;
        let mut label = Array3::zeros(shape);
        label[mark] = 7.0;

        let mut s = AugSample { image, label: Some(label), mask: None };
        let mut rng = StdRng::seed_from_u64(5);
        Rotate::new(1.0).transform(&mut s, &mut rng);

        let label = s.label.as_ref().unwrap();
        let mut marked = 0usize;
        for ((z, h, w), &v) in label.indexed_iter() {
            if v == 0.0 {
                continue;
            }
            marked += 1;
            assert_eq!(v, 7.0, "最近邻不发明新标签值");
            let mut near_mass = 0.0f32;
            for hh in h.saturating_sub(1)..=(h + 1).min(shape.1 - 1) {
                for ww in w.saturating_sub(1)..=(w + 1).min(shape.2 - 1) {
                    near_mass += s.image[(z, hh, ww)];
                }
            }
            assert!(near_mass > 0.2, "({z}, {h}, {w}) 附近缺少 image 质量");
        }
        // 单位质量的最近邻映射最多落到少数几个输出体素.
        assert!(marked <= 4);
    }

    #[test]
    fn test_margin_formula() {
        let r = Rotate::new(1.0);
        // 128 * (sqrt(2) - 1) / 2 = 26.5... -> 27.
        assert_eq!(r.margin((4, 128, 128)), (0, 27, 27));
        assert_eq!(r.margin((4, 128, 128)).0, 0);
    }
}
