//! 线粒体分割任务 (含骨架距离变体) 的样本生产者.

use binary_heap_plus::BinaryHeap;
use ndarray::Array3;
use rand::rngs::StdRng;

use super::sample::{Sample, VolumeDataset};
use super::synapse::binary_target;
use super::{DrawError, Mode, SampleSource};
use crate::consts::is_foreground;
use crate::{Idx3d, Volume};

/// 线粒体分割样本生产者: 单通道二值目标.
pub struct MitoSource {
    base: VolumeDataset,
}

impl MitoSource {
    /// 包装抽样核心.
    pub fn new(base: VolumeDataset) -> Self {
        Self { base }
    }
}

impl SampleSource for MitoSource {
    fn len(&self) -> Option<usize> {
        self.base.len()
    }

    fn target_channels(&self) -> usize {
        1
    }

    fn draw(&self, index: usize, rng: &mut StdRng) -> Result<Sample, DrawError> {
        match self.base.mode() {
            Mode::Train => {
                let (volume, origin, s) = self.base.draw_train(rng)?;
                let target = binary_target(s.label.as_ref().unwrap());
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

/// 前景体素的 6 邻域.
fn diamond_neighbours((z, h, w): Idx3d, dim: Idx3d) -> impl Iterator<Item = Idx3d> {
    let candidates = [
        (z.wrapping_sub(1), h, w),
        (z + 1, h, w),
        (z, h.wrapping_sub(1), w),
        (z, h + 1, w),
        (z, h, w.wrapping_sub(1)),
        (z, h, w + 1),
    ];
    candidates
        .into_iter()
        .filter(move |&(a, b, c)| a < dim.0 && b < dim.1 && c < dim.2)
}

/// 骨架距离辅助目标: 前景内部到实例边界的归一化距离场.
///
/// 从所有边界前景体素 (存在背景 6 邻域或贴住裁剪边缘) 出发做
/// 多源最短路扩张, 步长按 6 邻域计 1; 距离除以全裁剪最大值归一到
/// `[0, 1]`. 距离在中轴 (骨架) 处取峰值, 背景恒 0.
pub(crate) fn skeleton_distance(label: &Volume) -> Volume {
    let dim = label.dim();
    let mut dist = Array3::from_elem(dim, f32::INFINITY);

    // 堆顶是当前距离最小的候选体素.
    let mut heap: BinaryHeap<(f32, Idx3d), _> =
        BinaryHeap::new_by(|a: &(f32, Idx3d), b: &(f32, Idx3d)| b.0.total_cmp(&a.0));

    for (pos, &p) in label.indexed_iter() {
        if !is_foreground(p) {
            dist[pos] = 0.0;
            continue;
        }
        let on_edge = pos.0 == 0
            || pos.0 == dim.0 - 1
            || pos.1 == 0
            || pos.1 == dim.1 - 1
            || pos.2 == 0
            || pos.2 == dim.2 - 1;
        let near_background = diamond_neighbours(pos, dim).any(|n| !is_foreground(label[n]));
        if on_edge || near_background {
            heap.push((1.0, pos));
        }
    }

    while let Some((d, pos)) = heap.pop() {
        if dist[pos] <= d {
            continue;
        }
        dist[pos] = d;
        for n in diamond_neighbours(pos, dim) {
            if is_foreground(label[n]) && dist[n] > d + 1.0 {
                heap.push((d + 1.0, n));
            }
        }
    }

    // 孤立的无边界情况不会出现 (整块前景也有裁剪边缘), 但保持防御:
    // 未触达的前景记 0.
    let mut max_d = 0.0f32;
    for d in dist.iter() {
        if d.is_finite() && *d > max_d {
            max_d = *d;
        }
    }
    if max_d == 0.0 {
        return Array3::zeros(dim);
    }
    dist.mapv(|d| if d.is_finite() { d / max_d } else { 0.0 })
}

/// 带骨架距离辅助目标的线粒体分割样本生产者.
///
/// 要求体数据组已加载 validity mask (装配层负责校验).
pub struct MitoSkeletonSource {
    base: VolumeDataset,
}

impl MitoSkeletonSource {
    /// 包装抽样核心.
    pub fn new(base: VolumeDataset) -> Self {
        Self { base }
    }
}

impl SampleSource for MitoSkeletonSource {
    fn len(&self) -> Option<usize> {
        self.base.len()
    }

    fn target_channels(&self) -> usize {
        1
    }

    fn draw(&self, index: usize, rng: &mut StdRng) -> Result<Sample, DrawError> {
        match self.base.mode() {
            Mode::Train => {
                let (volume, origin, s) = self.base.draw_train(rng)?;
                let label = s.label.as_ref().unwrap();
                let target = binary_target(label);
                let aux = skeleton_distance(label);
                Ok(Sample {
                    volume,
                    origin,
                    image: s.image,
                    target: Some(target),
                    mask: s.mask,
                    aux: Some(aux),
                })
            }
            Mode::Test => {
                let (volume, origin, image) = self.base.draw_test(index)?;
                Ok(Sample { volume, origin, image, target: None, mask: None, aux: None })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 距离场: 背景为 0, 边界前景最小, 中轴峰值为 1.
    #[test]
    fn test_skeleton_distance_profile() {
        // 3x3x7 块, w 方向中间 5 列前景.
        let label = Array3::from_shape_fn((3, 3, 7), |(_, _, w)| {
            if (1..6).contains(&w) {
                4.0
            } else {
                0.0
            }
        });
        let d = skeleton_distance(&label);

        assert_eq!(d[(1, 1, 0)], 0.0);
        assert_eq!(d[(1, 1, 6)], 0.0);
        // 内部剖面 (1, 1, *): 1, 2, 3, 2, 1, 向中轴递增.
        assert!(d[(1, 1, 3)] > d[(1, 1, 2)]);
        assert!(d[(1, 1, 2)] > d[(1, 1, 1)]);
        assert!((d[(1, 1, 3)] - 1.0).abs() < 1e-6);
        assert!(d.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_skeleton_distance_empty_label() {
        let label = Array3::zeros((2, 3, 3));
        let d = skeleton_distance(&label);
        assert!(d.iter().all(|&v| v == 0.0));
    }
}
