//! 平滑随机弹性形变.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use super::{warp_inplane, Augment, AugSample};
use crate::Idx3d;

/// 平面内弹性形变. 在步长为 `sigma` 的粗网格上抽取法向随机位移,
/// 双线性上采样成平滑位移场, 所有 z 切片共用.
///
/// 位移幅度被截断在 `alpha` 之内, 使协商余量是硬保证而不是概率保证.
pub struct Elastic {
    p: f64,
    alpha: f64,
    sigma: f64,
}

impl Elastic {
    /// 以触发概率 `p`, 形变强度 `alpha` (体素), 平滑步长 `sigma`
    /// (体素) 构建. 要求两者为正, 否则 panic.
    pub fn new(p: f64, alpha: f64, sigma: f64) -> Self {
        assert!(alpha > 0.0 && sigma > 0.0, "非法弹性形变参数");
        Self { p, alpha, sigma }
    }

    /// 抽取一张 `(nh, nw)` 的平滑位移分量场.
    fn draw_field(&self, nh: usize, nw: usize, rng: &mut StdRng) -> Array2<f64> {
        let gh = (nh as f64 / self.sigma).ceil() as usize + 2;
        let gw = (nw as f64 / self.sigma).ceil() as usize + 2;

        // 粗网格位移, 截断到 [-alpha, alpha].
        let normal = Normal::new(0.0, self.alpha / 3.0).unwrap();
        let coarse = Array2::from_shape_fn((gh, gw), |_| {
            normal.sample(rng).clamp(-self.alpha, self.alpha)
        });

        // 双线性上采样. 凸组合不会超出粗网格的幅度范围.
        Array2::from_shape_fn((nh, nw), |(h, w)| {
            let fh = h as f64 / self.sigma;
            let fw = w as f64 / self.sigma;
            let (h0, w0) = (fh.floor() as usize, fw.floor() as usize);
            let (h1, w1) = ((h0 + 1).min(gh - 1), (w0 + 1).min(gw - 1));
            let (th, tw) = (fh - h0 as f64, fw - w0 as f64);

            let top = coarse[(h0, w0)] * (1.0 - tw) + coarse[(h0, w1)] * tw;
            let bottom = coarse[(h1, w0)] * (1.0 - tw) + coarse[(h1, w1)] * tw;
            top * (1.0 - th) + bottom * th
        })
    }
}

impl Augment for Elastic {
    fn name(&self) -> &'static str {
        "elastic"
    }

    fn prob(&self) -> f64 {
        self.p
    }

    fn margin(&self, _nominal: Idx3d) -> Idx3d {
        let m = self.alpha.ceil() as usize;
        (0, m, m)
    }

    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng) {
        let (_, nh, nw) = sample.shape();
        let dh = self.draw_field(nh, nw, rng);
        let dw = self.draw_field(nh, nw, rng);

        warp_inplane(sample, |_z, h, w| {
            let (ih, iw) = (h as usize, w as usize);
            (h + dh[(ih, iw)], w + dw[(ih, iw)])
        });
    }
}
