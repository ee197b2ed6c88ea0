//! 灰度扰动. 只作用于 image.

use ndarray::Axis;
use rand::rngs::StdRng;
use rand::Rng;

use super::{Augment, AugSample};
use crate::Idx3d;

/// 亮度/对比度随机扰动. 等概率选择 3D 模式 (整卷同参数)
/// 或 2D 模式 (逐切片独立参数), 输出始终截断回 `[0, 1]`.
pub struct Grayscale {
    p: f64,
}

impl Grayscale {
    /// 以触发概率 `p` 构建.
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

/// 对一段体素施加 `y = a * (x - 0.5) + 0.5 + b` 并截断.
fn jitter<'a, I: Iterator<Item = &'a mut f32>>(it: I, a: f32, b: f32) {
    for x in it {
        *x = (a * (*x - 0.5) + 0.5 + b).clamp(0.0, 1.0);
    }
}

/// 抽取一组 (对比度, 亮度) 扰动参数.
fn draw_params(rng: &mut StdRng) -> (f32, f32) {
    let a = rng.gen_range(0.7..1.3);
    let b = rng.gen_range(-0.1..0.1);
    (a, b)
}

impl Augment for Grayscale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn prob(&self) -> f64 {
        self.p
    }

    fn margin(&self, _nominal: Idx3d) -> Idx3d {
        (0, 0, 0)
    }

    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng) {
        if rng.gen::<bool>() {
            // 3D 模式.
            let (a, b) = draw_params(rng);
            jitter(sample.image.iter_mut(), a, b);
        } else {
            // 2D 模式, 逐切片.
            for mut slice in sample.image.axis_iter_mut(Axis(0)) {
                let (a, b) = draw_params(rng);
                jitter(slice.iter_mut(), a, b);
            }
        }
    }
}
