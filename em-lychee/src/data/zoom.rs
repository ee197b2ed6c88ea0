//! 各轴独立的体数据重采样.

use num::Float;

use super::Volume;
use crate::Scale3d;

/// 线性插值.
#[inline]
fn lerp<T: Float>(a: T, b: T, t: T) -> T {
    a + (b - a) * t
}

/// 按因子计算重采样后的轴长. 至少为 1.
#[inline]
fn scaled_len(n: usize, f: f64) -> usize {
    ((n as f64 * f).round() as usize).max(1)
}

/// 输出索引到源坐标的对齐映射. 端点对端点.
#[inline]
fn src_coord(i: usize, n_out: usize, n_in: usize) -> f64 {
    if n_out <= 1 {
        0.0
    } else {
        i as f64 * (n_in - 1) as f64 / (n_out - 1) as f64
    }
}

/// order-1 (三线性) 重采样. 用于 image 和 mask.
pub fn zoom_linear(src: &Volume, factor: Scale3d) -> Volume {
    let (nz, nh, nw) = src.dim();
    let dim = (
        scaled_len(nz, factor.0),
        scaled_len(nh, factor.1),
        scaled_len(nw, factor.2),
    );

    Volume::from_shape_fn(dim, |(z, h, w)| {
        let cz = src_coord(z, dim.0, nz);
        let ch = src_coord(h, dim.1, nh);
        let cw = src_coord(w, dim.2, nw);

        let (z0, h0, w0) = (cz.floor() as usize, ch.floor() as usize, cw.floor() as usize);
        let (z1, h1, w1) = ((z0 + 1).min(nz - 1), (h0 + 1).min(nh - 1), (w0 + 1).min(nw - 1));
        let (tz, th, tw) = (
            (cz - z0 as f64) as f32,
            (ch - h0 as f64) as f32,
            (cw - w0 as f64) as f32,
        );

        let c00 = lerp(src[(z0, h0, w0)], src[(z0, h0, w1)], tw);
        let c01 = lerp(src[(z0, h1, w0)], src[(z0, h1, w1)], tw);
        let c10 = lerp(src[(z1, h0, w0)], src[(z1, h0, w1)], tw);
        let c11 = lerp(src[(z1, h1, w0)], src[(z1, h1, w1)], tw);
        lerp(lerp(c00, c01, th), lerp(c10, c11, th), tz)
    })
}

/// order-0 (最近邻) 重采样. 用于 label, 避免发明小数标签类.
pub fn zoom_nearest(src: &Volume, factor: Scale3d) -> Volume {
    let (nz, nh, nw) = src.dim();
    let dim = (
        scaled_len(nz, factor.0),
        scaled_len(nh, factor.1),
        scaled_len(nw, factor.2),
    );

    Volume::from_shape_fn(dim, |(z, h, w)| {
        let iz = (src_coord(z, dim.0, nz).round() as usize).min(nz - 1);
        let ih = (src_coord(h, dim.1, nh).round() as usize).min(nh - 1);
        let iw = (src_coord(w, dim.2, nw).round() as usize).min(nw - 1);
        src[(iz, ih, iw)]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_identity_factor_keeps_values() {
        let src = Array3::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 12 + h * 4 + w) as f32);
        assert_eq!(zoom_linear(&src, (1.0, 1.0, 1.0)), src);
        assert_eq!(zoom_nearest(&src, (1.0, 1.0, 1.0)), src);
    }

    #[test]
    fn test_shape_rounding() {
        let src = Array3::<f32>::zeros((4, 10, 10));
        assert_eq!(zoom_linear(&src, (1.0, 0.5, 0.5)).dim(), (4, 5, 5));
        assert_eq!(zoom_nearest(&src, (0.25, 1.0, 1.0)).dim(), (1, 10, 10));
    }

    /// 最近邻重采样绝不发明新标签值.
    #[test]
    fn test_nearest_preserves_label_set() {
        let src = Array3::from_shape_fn((3, 6, 6), |(z, h, _)| ((z + h) % 3) as f32);
        let out = zoom_nearest(&src, (2.0, 0.5, 1.5));
        assert!(out.iter().all(|&v| v == 0.0 || v == 1.0 || v == 2.0));
    }

    /// 线性重采样在端点处保持原值.
    #[test]
    fn test_linear_endpoints() {
        let src = Array3::from_shape_fn((1, 1, 5), |(_, _, w)| w as f32);
        let out = zoom_linear(&src, (1.0, 1.0, 2.0));
        assert_eq!(out.dim(), (1, 1, 10));
        assert!((out[(0, 0, 0)] - 0.0).abs() < 1e-6);
        assert!((out[(0, 0, 9)] - 4.0).abs() < 1e-6);
    }
}
