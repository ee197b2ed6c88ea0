//! 对称反射 padding.

use super::Volume;
use crate::Idx3d;

/// 反射索引映射. 边界体素本身不重复 (numpy `reflect` 语义).
///
/// `n == 1` 时所有索引都映射到 0.
#[inline]
fn reflect_index(i: isize, n: usize) -> usize {
    debug_assert!(n >= 1);
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let mut i = i.rem_euclid(period);
    if i >= n as isize {
        i = period - i;
    }
    i as usize
}

/// 按 `pad` 在每个轴两侧对称反射 padding.
///
/// 输出形状为 `(nz + 2*pz, nh + 2*ph, nw + 2*pw)`.
pub fn reflect_pad(src: &Volume, pad: Idx3d) -> Volume {
    if pad == (0, 0, 0) {
        return src.clone();
    }

    let (nz, nh, nw) = src.dim();
    let (pz, ph, pw) = pad;
    let dim = (nz + 2 * pz, nh + 2 * ph, nw + 2 * pw);

    Volume::from_shape_fn(dim, |(z, h, w)| {
        let iz = reflect_index(z as isize - pz as isize, nz);
        let ih = reflect_index(h as isize - ph as isize, nh);
        let iw = reflect_index(w as isize - pw as isize, nw);
        src[(iz, ih, iw)]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_reflect_index_bounces() {
        // n = 4: ..., 2, 1, | 0, 1, 2, 3, | 2, 1, ...
        assert_eq!(reflect_index(-1, 4), 1);
        assert_eq!(reflect_index(-2, 4), 2);
        assert_eq!(reflect_index(0, 4), 0);
        assert_eq!(reflect_index(3, 4), 3);
        assert_eq!(reflect_index(4, 4), 2);
        assert_eq!(reflect_index(5, 4), 1);
        // 多次反弹.
        assert_eq!(reflect_index(7, 4), 1);
        assert_eq!(reflect_index(-4, 4), 2);
    }

    #[test]
    fn test_pad_shape() {
        let src = Array3::<f32>::zeros((4, 128, 128));
        assert_eq!(reflect_pad(&src, (0, 4, 4)).dim(), (4, 136, 136));
        assert_eq!(reflect_pad(&src, (0, 0, 0)).dim(), (4, 128, 128));
    }

    #[test]
    fn test_pad_values_mirror() {
        let src = Array3::from_shape_fn((1, 1, 4), |(_, _, w)| w as f32);
        let out = reflect_pad(&src, (0, 0, 2));
        let row: Vec<f32> = out.iter().copied().collect();
        assert_eq!(row, vec![2.0, 1.0, 0.0, 1.0, 2.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_pad_singleton_axis() {
        let src = Array3::from_elem((1, 2, 2), 7.0);
        let out = reflect_pad(&src, (1, 0, 0));
        assert_eq!(out.dim(), (3, 2, 2));
        assert!(out.iter().all(|&v| v == 7.0));
    }
}
