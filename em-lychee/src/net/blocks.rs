//! 网络基础单元: 3D 卷积、归一化、激活、残差块与平面池化/上采样.

use ndarray::{Array1, Array2, Array4, Array5, Axis};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::Idx3d;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 卷积边界 padding 模式.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PadMode {
    /// 越界补零.
    Zero,

    /// 复制边缘体素.
    Replicate,

    /// 反射 (边缘不重复).
    Reflect,
}

/// ELU 激活, alpha = 1.
#[inline]
pub(crate) fn elu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        x.exp_m1()
    }
}

/// sigmoid 压缩, 输出落在开区间 (0, 1).
#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 逐通道 3D padding.
fn pad_channelwise(x: &Array4<f32>, pad: Idx3d, mode: PadMode) -> Array4<f32> {
    if pad == (0, 0, 0) {
        return x.clone();
    }
    let (nc, nz, nh, nw) = x.dim();
    let (pz, ph, pw) = pad;

    /// 单轴越界索引解析. 返回 `None` 表示落在零区.
    fn resolve(i: isize, n: usize, mode: PadMode) -> Option<usize> {
        if (0..n as isize).contains(&i) {
            return Some(i as usize);
        }
        match mode {
            PadMode::Zero => None,
            PadMode::Replicate => Some(i.clamp(0, n as isize - 1) as usize),
            PadMode::Reflect => {
                if n == 1 {
                    return Some(0);
                }
                let period = 2 * (n as isize - 1);
                let mut i = i.rem_euclid(period);
                if i >= n as isize {
                    i = period - i;
                }
                Some(i as usize)
            }
        }
    }

    Array4::from_shape_fn((nc, nz + 2 * pz, nh + 2 * ph, nw + 2 * pw), |(c, z, h, w)| {
        let iz = resolve(z as isize - pz as isize, nz, mode);
        let ih = resolve(h as isize - ph as isize, nh, mode);
        let iw = resolve(w as isize - pw as isize, nw, mode);
        match (iz, ih, iw) {
            (Some(z), Some(h), Some(w)) => x[(c, z, h, w)],
            _ => 0.0,
        }
    })
}

/// 正交矩阵生成: 在较小的一侧做 modified Gram-Schmidt.
fn orthogonal_matrix(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f32> {
    let (k, n) = if rows <= cols { (rows, cols) } else { (cols, rows) };
    // 标准差取 1 即可, 随后归一化.
    let normal = Normal::new(0.0f64, 1.0).unwrap();

    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(k);
    while basis.len() < k {
        let mut v: Vec<f64> = (0..n).map(|_| normal.sample(rng)).collect();
        for b in basis.iter() {
            let dot: f64 = v.iter().zip(b.iter()).map(|(a, c)| a * c).sum();
            for (vi, bi) in v.iter_mut().zip(b.iter()) {
                *vi -= dot * bi;
            }
        }
        let norm = v.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm < 1e-8 {
            // 退化抽样, 重抽.
            continue;
        }
        for vi in v.iter_mut() {
            *vi /= norm;
        }
        basis.push(v);
    }

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        if rows <= cols {
            basis[r][c] as f32
        } else {
            basis[c][r] as f32
        }
    })
}

/// 3D 卷积层, 步长恒为 1, 权重在构造时正交初始化.
pub(crate) struct Conv3d {
    /// `(out, in, kz, kh, kw)` 排布.
    pub(crate) weight: Array5<f32>,
    pub(crate) bias: Array1<f32>,
    padding: Idx3d,
    pad_mode: PadMode,
}

impl Conv3d {
    pub fn new(
        in_c: usize,
        out_c: usize,
        kernel: Idx3d,
        padding: Idx3d,
        pad_mode: PadMode,
        rng: &mut StdRng,
    ) -> Self {
        let (kz, kh, kw) = kernel;
        let cols = in_c * kz * kh * kw;
        let m = orthogonal_matrix(out_c, cols, rng);
        let weight = Array5::from_shape_fn((out_c, in_c, kz, kh, kw), |(o, c, a, b, d)| {
            m[(o, ((c * kz + a) * kh + b) * kw + d)]
        });

        Self {
            weight,
            bias: Array1::zeros(out_c),
            padding,
            pad_mode,
        }
    }

    /// 前向卷积. 输入输出均为 `(C, z, h, w)`.
    pub fn forward(&self, x: &Array4<f32>) -> Array4<f32> {
        let padded = pad_channelwise(x, self.padding, self.pad_mode);
        let (in_c, nz, nh, nw) = padded.dim();
        let (out_c, wc, kz, kh, kw) = self.weight.dim();
        debug_assert_eq!(in_c, wc, "输入通道数与卷积核不符");

        let dim = (nz - kz + 1, nh - kh + 1, nw - kw + 1);
        let mut out = Array4::zeros((out_c, dim.0, dim.1, dim.2));

        let fill_plane = |o: usize, plane: &mut ndarray::ArrayViewMut3<f32>| {
            for z in 0..dim.0 {
                for h in 0..dim.1 {
                    for w in 0..dim.2 {
                        let mut acc = self.bias[o];
                        for c in 0..in_c {
                            for dz in 0..kz {
                                for dh in 0..kh {
                                    for dw in 0..kw {
                                        acc += padded[(c, z + dz, h + dh, w + dw)]
                                            * self.weight[(o, c, dz, dh, dw)];
                                    }
                                }
                            }
                        }
                        plane[(z, h, w)] = acc;
                    }
                }
            }
        };

        #[cfg(feature = "rayon")]
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(o, mut plane)| fill_plane(o, &mut plane));

        #[cfg(not(feature = "rayon"))]
        for (o, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
            fill_plane(o, &mut plane);
        }

        out
    }

    /// 可学习参数个数.
    pub fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// 逐通道仿射归一化 (推理形态: 使用运行统计量).
///
/// 构造时统计量为恒等 (均值 0, 方差 1), 训练循环在库外维护.
pub(crate) struct BatchNorm3d {
    pub(crate) gamma: Array1<f32>,
    pub(crate) beta: Array1<f32>,
    pub(crate) running_mean: Array1<f32>,
    pub(crate) running_var: Array1<f32>,
    eps: f32,
}

impl BatchNorm3d {
    pub fn new(channels: usize) -> Self {
        Self {
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            eps: 1e-5,
        }
    }

    pub fn forward(&self, x: &Array4<f32>) -> Array4<f32> {
        let mut out = x.clone();
        for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
            let scale = self.gamma[c] / (self.running_var[c] + self.eps).sqrt();
            let shift = self.beta[c] - self.running_mean[c] * scale;
            plane.mapv_inplace(|v| v * scale + shift);
        }
        out
    }

    pub fn num_params(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }
}

/// 卷积 + 归一化 + (可选) ELU 激活的复合单元.
pub(crate) struct ConvNormAct {
    conv: Conv3d,
    norm: BatchNorm3d,
    act: bool,
}

impl ConvNormAct {
    pub fn new(
        in_c: usize,
        out_c: usize,
        kernel: Idx3d,
        padding: Idx3d,
        pad_mode: PadMode,
        act: bool,
        rng: &mut StdRng,
    ) -> Self {
        Self {
            conv: Conv3d::new(in_c, out_c, kernel, padding, pad_mode, rng),
            norm: BatchNorm3d::new(out_c),
            act,
        }
    }

    /// 1x1x1 投影单元 (skip 路径与解码上采样使用).
    pub fn projection(in_c: usize, out_c: usize, pad_mode: PadMode, act: bool, rng: &mut StdRng) -> Self {
        Self::new(in_c, out_c, (1, 1, 1), (0, 0, 0), pad_mode, act, rng)
    }

    pub fn forward(&self, x: &Array4<f32>) -> Array4<f32> {
        let mut out = self.norm.forward(&self.conv.forward(x));
        if self.act {
            out.mapv_inplace(elu);
        }
        out
    }

    pub fn num_params(&self) -> usize {
        self.conv.num_params() + self.norm.num_params()
    }
}

/// 残差块: `elu(F(x) + x)`, 通道数变化时 skip 路径带学习投影.
pub(crate) struct ResidualBlock {
    conv1: ConvNormAct,
    conv2: ConvNormAct,
    projector: Option<ConvNormAct>,
}

impl ResidualBlock {
    fn new(
        in_c: usize,
        out_c: usize,
        kernel: Idx3d,
        padding: Idx3d,
        projection: bool,
        pad_mode: PadMode,
        rng: &mut StdRng,
    ) -> Self {
        Self {
            conv1: ConvNormAct::new(in_c, out_c, kernel, padding, pad_mode, true, rng),
            conv2: ConvNormAct::new(out_c, out_c, kernel, padding, pad_mode, false, rng),
            projector: (projection || in_c != out_c)
                .then(|| ConvNormAct::projection(in_c, out_c, pad_mode, false, rng)),
        }
    }

    /// 平面 (1, 3, 3) 核的残差块, 干路/尾路使用.
    pub fn block2d(in_c: usize, out_c: usize, projection: bool, pad_mode: PadMode, rng: &mut StdRng) -> Self {
        Self::new(in_c, out_c, (1, 3, 3), (0, 1, 1), projection, pad_mode, rng)
    }

    /// 立体 (3, 3, 3) 核的残差块, 编码/解码级联使用.
    pub fn block3d(in_c: usize, out_c: usize, projection: bool, pad_mode: PadMode, rng: &mut StdRng) -> Self {
        Self::new(in_c, out_c, (3, 3, 3), (1, 1, 1), projection, pad_mode, rng)
    }

    pub fn forward(&self, x: &Array4<f32>) -> Array4<f32> {
        let y = self.conv2.forward(&self.conv1.forward(x));
        let mut out = match self.projector.as_ref() {
            Some(p) => p.forward(x) + &y,
            None => x + &y,
        };
        out.mapv_inplace(elu);
        out
    }

    pub fn num_params(&self) -> usize {
        self.conv1.num_params()
            + self.conv2.num_params()
            + self.projector.as_ref().map_or(0, ConvNormAct::num_params)
    }
}

/// 平面 (1, 2, 2) 最大池化. z 轴不动, 平面两轴减半.
///
/// 平面尺寸为偶数是上游已校验的前置条件.
pub(crate) fn max_pool_inplane(x: &Array4<f32>) -> Array4<f32> {
    let (nc, nz, nh, nw) = x.dim();
    debug_assert!(nh % 2 == 0 && nw % 2 == 0);

    Array4::from_shape_fn((nc, nz, nh / 2, nw / 2), |(c, z, h, w)| {
        let (h2, w2) = (2 * h, 2 * w);
        x[(c, z, h2, w2)]
            .max(x[(c, z, h2, w2 + 1)])
            .max(x[(c, z, h2 + 1, w2)])
            .max(x[(c, z, h2 + 1, w2 + 1)])
    })
}

/// 平面 x2 三线性 (实际为逐切片双线性) 上采样, 角点不对齐语义.
pub(crate) fn upsample_inplane_x2(x: &Array4<f32>) -> Array4<f32> {
    let (nc, nz, nh, nw) = x.dim();

    Array4::from_shape_fn((nc, nz, nh * 2, nw * 2), |(c, z, h, w)| {
        // 输出像素中心映射回源坐标.
        let sh = (h as f64 + 0.5) / 2.0 - 0.5;
        let sw = (w as f64 + 0.5) / 2.0 - 0.5;
        let sh = sh.clamp(0.0, (nh - 1) as f64);
        let sw = sw.clamp(0.0, (nw - 1) as f64);

        let (h0, w0) = (sh.floor() as usize, sw.floor() as usize);
        let (h1, w1) = ((h0 + 1).min(nh - 1), (w0 + 1).min(nw - 1));
        let (th, tw) = ((sh - h0 as f64) as f32, (sw - w0 as f64) as f32);

        let top = x[(c, z, h0, w0)] * (1.0 - tw) + x[(c, z, h0, w1)] * tw;
        let bottom = x[(c, z, h1, w0)] * (1.0 - tw) + x[(c, z, h1, w1)] * tw;
        top * (1.0 - th) + bottom * th
    })
}
