//! image 灰度归一化.

use itertools::{Itertools, MinMaxResult};
use ordered_float::NotNan;

use super::Volume;

/// 将 image 灰度原地归一化到 `[0, 1]`.
///
/// 1. 数据已落在 `[0, 1]` 内时不做改动;
/// 2. 数据落在 `[0, 255]` 内时按 u8 灰度约定除以 255;
/// 3. 其他情况做 min-max 归一化 (全等值体数据置 0).
///
/// 任何体素非有限 (NaN/inf) 时返回 `false`, 数据不做改动.
pub(crate) fn normalize_unit(v: &mut Volume) -> bool {
    let Some((lo, hi)) = finite_extrema(v) else {
        return false;
    };

    if lo >= 0.0 && hi <= 1.0 {
        // 已归一化.
    } else if lo >= 0.0 && hi <= 255.0 {
        v.mapv_inplace(|x| x / 255.0);
    } else if hi > lo {
        v.mapv_inplace(|x| (x - lo) / (hi - lo));
    } else {
        v.fill(0.0);
    }
    true
}

/// 扫描全体体素, 返回 `(最小值, 最大值)`. 存在非有限体素时返回 `None`.
fn finite_extrema(v: &Volume) -> Option<(f32, f32)> {
    if v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    // 已排除 NaN, `NotNan::new` 不会失败.
    match v.iter().map(|&x| NotNan::new(x).unwrap()).minmax() {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(a) => Some((a.into_inner(), a.into_inner())),
        MinMaxResult::MinMax(lo, hi) => Some((lo.into_inner(), hi.into_inner())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_u8_range_divides_by_255() {
        let mut v = Array3::from_shape_fn((2, 2, 2), |(z, _, _)| if z == 0 { 0.0 } else { 255.0 });
        assert!(normalize_unit(&mut v));
        assert!(float_eq(v[(0, 0, 0)], 0.0));
        assert!(float_eq(v[(1, 0, 0)], 1.0));
    }

    #[test]
    fn test_unit_range_untouched() {
        let mut v = Array3::from_elem((2, 2, 2), 0.25);
        assert!(normalize_unit(&mut v));
        assert!(float_eq(v[(0, 0, 0)], 0.25));
    }

    #[test]
    fn test_minmax_fallback() {
        let mut v = Array3::from_shape_fn((1, 1, 3), |(_, _, w)| -1.0 + w as f32);
        assert!(normalize_unit(&mut v));
        assert!(float_eq(v[(0, 0, 0)], 0.0));
        assert!(float_eq(v[(0, 0, 1)], 0.5));
        assert!(float_eq(v[(0, 0, 2)], 1.0));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut v = Array3::from_elem((1, 1, 2), 0.5);
        v[(0, 0, 1)] = f32::NAN;
        assert!(!normalize_unit(&mut v));
    }
}
