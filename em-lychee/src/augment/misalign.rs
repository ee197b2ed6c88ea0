//! 相邻 section 间的错位模拟.

use rand::rngs::StdRng;
use rand::Rng;

use super::{depth_of, Augment, AugSample};
use crate::{Idx3d, Volume};

/// 切片错位: 随机选择一个 z 分界, 其上所有切片整体平移一个
/// 不超过 `displacement` 的整数平面位移. 三个数组施加同一位移,
/// 整数平移下最近邻与平滑插值退化为同一映射, 对齐是精确的.
pub struct MisAlign {
    p: f64,
    displacement: usize,
}

impl MisAlign {
    /// 以触发概率 `p` 和最大平面位移 `displacement` (体素) 构建.
    pub fn new(p: f64, displacement: usize) -> Self {
        assert!(displacement >= 1, "位移上界至少为 1");
        Self { p, displacement }
    }
}

/// 从分界 `zs` 起整体平移 `(dh, dw)`, 越界 clamp 到边缘.
fn shift_from(v: &Volume, zs: usize, dh: isize, dw: isize) -> Volume {
    let (_, nh, nw) = v.dim();
    Volume::from_shape_fn(v.dim(), |(z, h, w)| {
        if z < zs {
            return v[(z, h, w)];
        }
        let sh = (h as isize + dh).clamp(0, nh as isize - 1) as usize;
        let sw = (w as isize + dw).clamp(0, nw as isize - 1) as usize;
        v[(z, sh, sw)]
    })
}

impl Augment for MisAlign {
    fn name(&self) -> &'static str {
        "misalign"
    }

    fn prob(&self) -> f64 {
        self.p
    }

    fn margin(&self, _nominal: Idx3d) -> Idx3d {
        (0, self.displacement, self.displacement)
    }

    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng) {
        let nz = depth_of(&sample.image);
        if nz < 2 {
            return;
        }

        let zs = rng.gen_range(1..nz);
        let d = self.displacement as isize;
        let dh = rng.gen_range(-d..=d);
        let dw = rng.gen_range(-d..=d);

        sample.apply_each(|v| shift_from(v, zs, dh, dw));
    }
}
