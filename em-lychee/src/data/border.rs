//! 标签边界加宽 (实例腐蚀).

use ndarray::{Array3, Zip};

use super::Volume;

/// 沿单轴做宽度为 `2*w + 1` 的滑动窗口极值. `pick` 选择保留的极值
/// (min 或 max). 窗口在数组边界处截断.
fn window_fold_axis(src: &Array3<f32>, axis: usize, w: usize, pick: fn(f32, f32) -> f32) -> Array3<f32> {
    let dim = src.dim();
    let n = [dim.0, dim.1, dim.2][axis];

    Array3::from_shape_fn(dim, |(z, h, x)| {
        let center = [z, h, x][axis];
        let lo = center.saturating_sub(w);
        let hi = (center + w).min(n - 1);

        let mut idx = [z, h, x];
        let mut acc = src[(z, h, x)];
        for i in lo..=hi {
            idx[axis] = i;
            acc = pick(acc, src[(idx[0], idx[1], idx[2])]);
        }
        acc
    })
}

/// 全 3D Chebyshev 窗口极值, 按轴分离计算.
fn window_extrema(src: &Array3<f32>, w: usize, pick: fn(f32, f32) -> f32) -> Array3<f32> {
    let mut acc = window_fold_axis(src, 0, w, pick);
    acc = window_fold_axis(&acc, 1, w, pick);
    window_fold_axis(&acc, 2, w, pick)
}

/// 原地加宽标签实例之间的边界: 所有在 Chebyshev 距离 `width` 内
/// 存在不同取值 (其他实例或背景) 的前景体素被置为背景.
///
/// 效果上每个实例沿三个轴各收缩 `width` 体素, 相邻实例之间留出
/// 至少 `2 * width` 的空隙.
///
/// `width == 0` 时不做任何事.
pub fn widen_border(label: &mut Volume, width: usize) {
    if width == 0 {
        return;
    }

    let lo = window_extrema(label, width, f32::min);
    let hi = window_extrema(label, width, f32::max);

    Zip::from(&mut *label).and(&lo).and(&hi).for_each(|p, &lo, &hi| {
        if lo != hi {
            *p = 0.0;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 两个相邻实例加宽后的最小间隙 >= 2e.
    #[test]
    fn test_widen_border_gap() {
        // 左半 id=1, 右半 id=2, 在 w=8 处相接.
        let mut label =
            Array3::from_shape_fn((3, 8, 16), |(_, _, w)| if w < 8 { 1.0 } else { 2.0 });
        let e = 2;
        widen_border(&mut label, e);

        for w in 0..16 {
            let col = label[(1, 4, w)];
            // 接缝两侧各 e 个体素被清空.
            if (8 - e..8 + e).contains(&w) {
                assert_eq!(col, 0.0, "w = {w}");
            }
        }
        // 间隙外的体素存活, 间隙宽度恰好为 2e.
        assert_eq!(label[(1, 4, 8 - e - 1)], 1.0);
        assert_eq!(label[(1, 4, 8 + e)], 2.0);
        let gap = (0..16).filter(|&w| label[(1, 4, w)] == 0.0).count();
        assert_eq!(gap, 2 * e);
    }

    /// 单实例体数据整体收缩, 内部核心存活.
    #[test]
    fn test_widen_border_shrinks_foreground() {
        let mut label = Array3::from_shape_fn((7, 7, 7), |(z, h, w)| {
            let inside = (1..6).contains(&z) && (1..6).contains(&h) && (1..6).contains(&w);
            if inside {
                5.0
            } else {
                0.0
            }
        });
        widen_border(&mut label, 1);

        // 核心 (3,3,3) 距实例边界 2 体素, 存活.
        assert_eq!(label[(3, 3, 3)], 5.0);
        // 实例表面体素被清空.
        assert_eq!(label[(1, 3, 3)], 0.0);
        assert_eq!(label[(3, 5, 5)], 0.0);
    }

    #[test]
    fn test_widen_border_zero_noop() {
        let mut label = Array3::from_elem((2, 2, 2), 3.0);
        let before = label.clone();
        widen_border(&mut label, 0);
        assert_eq!(label, before);
    }
}
