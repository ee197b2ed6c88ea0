//! 采集缺陷模拟: 缺失整切片与缺失小块. 只作用于 image.

use ndarray::s;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashSet;

use super::{depth_of, rand_index, Augment, AugSample};
use crate::Idx3d;

/// 缺失整切片模拟: 随机将至多 `num` 个 z 切片的 image 内容清零,
/// 模拟成像时整段丢失的 section.
pub struct MissingSection {
    p: f64,
    num: usize,
}

impl MissingSection {
    /// 以触发概率 `p` 和单次最大缺失切片数 `num` 构建.
    pub fn new(p: f64, num: usize) -> Self {
        assert!(num >= 1, "缺失切片数至少为 1");
        Self { p, num }
    }
}

impl Augment for MissingSection {
    fn name(&self) -> &'static str {
        "missing-section"
    }

    fn prob(&self) -> f64 {
        self.p
    }

    fn margin(&self, _nominal: Idx3d) -> Idx3d {
        (0, 0, 0)
    }

    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng) {
        let nz = depth_of(&sample.image);
        if nz <= 2 {
            return;
        }

        let count = rng.gen_range(1..=self.num);
        let mut picked = HashSet::new();
        for _ in 0..count {
            // 首尾切片保留, 避免测试期滑窗边界全黑.
            picked.insert(1 + rand_index(rng, nz - 2));
        }
        for z in picked {
            sample.image.slice_mut(s![z, .., ..]).fill(0.0);
        }
    }
}

/// 缺失小块模拟: 逐切片以固定概率挖去一个随机矩形 patch.
pub struct MissingParts {
    p: f64,
}

impl MissingParts {
    /// 以触发概率 `p` 构建.
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

impl Augment for MissingParts {
    fn name(&self) -> &'static str {
        "missing-parts"
    }

    fn prob(&self) -> f64 {
        self.p
    }

    fn margin(&self, _nominal: Idx3d) -> Idx3d {
        (0, 0, 0)
    }

    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng) {
        let (nz, nh, nw) = sample.shape();
        if nh < 8 || nw < 8 {
            return;
        }

        for z in 0..nz {
            // 平均 1/3 的切片受损.
            if rng.gen::<f64>() >= 1.0 / 3.0 {
                continue;
            }
            let rh = rng.gen_range(nh / 8..=nh / 4);
            let rw = rng.gen_range(nw / 8..=nw / 4);
            let h0 = rand_index(rng, nh - rh);
            let w0 = rand_index(rng, nw - rw);
            sample
                .image
                .slice_mut(s![z, h0..h0 + rh, w0..w0 + rw])
                .fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::SeedableRng;

    #[test]
    fn test_missing_section_blanks_image_only() {
        let shape = (6, 8, 8);
        let mut s = AugSample {
            image: Array3::from_elem(shape, 0.5),
            label: Some(Array3::from_elem(shape, 2.0)),
            mask: None,
        };
        let before_label = s.label.clone();

        let mut rng = StdRng::seed_from_u64(4);
        MissingSection::new(1.0, 2).transform(&mut s, &mut rng);

        let blank: Vec<usize> = (0..shape.0)
            .filter(|&z| (0..shape.1).all(|h| (0..shape.2).all(|w| s.image[(z, h, w)] == 0.0)))
            .collect();
        assert!(!blank.is_empty() && blank.len() <= 2);
        // 首尾切片保留.
        assert!(!blank.contains(&0) && !blank.contains(&(shape.0 - 1)));
        assert_eq!(s.label, before_label);
    }

    #[test]
    fn test_missing_parts_keeps_shape() {
        let shape = (4, 16, 16);
        let mut s = AugSample {
            image: Array3::from_elem(shape, 1.0),
            label: None,
            mask: None,
        };
        let mut rng = StdRng::seed_from_u64(6);
        MissingParts::new(1.0).transform(&mut s, &mut rng);

        assert_eq!(s.image.dim(), shape);
        // 只会清零, 不会产生其他值.
        assert!(s.image.iter().all(|&v| v == 0.0 || v == 1.0));
    }
}
