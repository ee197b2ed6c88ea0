//! 裁剪前随机平面缩放.

use rand::rngs::StdRng;
use rand::Rng;

use super::{warp_inplane, Augment, AugSample};
use crate::Idx3d;

/// 绕平面中心的随机缩放. 缩放比在 `[lo, hi]` 内均匀抽取,
/// 所有 z 切片共用; image 双线性, label/mask 最近邻.
pub struct Rescale {
    p: f64,
    lo: f64,
    hi: f64,
}

impl Rescale {
    /// 以触发概率 `p` 和缩放区间 `range` 构建.
    ///
    /// 要求 `0 < lo <= hi`, 否则 panic.
    pub fn new(p: f64, range: (f64, f64)) -> Self {
        let (lo, hi) = range;
        assert!(lo > 0.0 && lo <= hi, "非法缩放区间");
        Self { p, lo, hi }
    }
}

impl Augment for Rescale {
    fn name(&self) -> &'static str {
        "rescale"
    }

    fn prob(&self) -> f64 {
        self.p
    }

    fn margin(&self, nominal: Idx3d) -> Idx3d {
        // 缩小 (s < 1) 时输出要向外采样, 余量由下界决定.
        let side = nominal.1.max(nominal.2) as f64;
        let m = (side / 2.0 * (1.0 / self.lo - 1.0)).max(0.0).ceil() as usize;
        (0, m, m)
    }

    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng) {
        let (_, nh, nw) = sample.shape();
        let s = rng.gen_range(self.lo..=self.hi);
        let (ch, cw) = ((nh - 1) as f64 / 2.0, (nw - 1) as f64 / 2.0);

        warp_inplane(sample, |_z, h, w| (ch + (h - ch) / s, cw + (w - cw) / s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::SeedableRng;

    #[test]
    fn test_identity_range_is_noop() {
        let v = Array3::from_shape_fn((2, 8, 8), |(z, h, w)| (z * 64 + h * 8 + w) as f32);
        let mut s = AugSample { image: v.clone(), label: None, mask: None };
        let mut rng = StdRng::seed_from_u64(0);
        Rescale::new(1.0, (1.0, 1.0)).transform(&mut s, &mut rng);

        for (a, b) in s.image.iter().zip(v.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_margin_from_lower_bound() {
        let r = Rescale::new(1.0, (0.8, 1.2));
        // 64 / 2 * (1/0.8 - 1) = 8.
        assert_eq!(r.margin((4, 64, 64)), (0, 8, 8));

        let r = Rescale::new(1.0, (1.0, 1.2));
        assert_eq!(r.margin((4, 64, 64)), (0, 0, 0));
    }
}
