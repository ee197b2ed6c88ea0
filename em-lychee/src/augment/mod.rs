//! 概率化增广链与采样尺寸协商.
//!
//! 每个增广 ([`Augment`]) 声明自己的触发概率和 context 余量 (margin);
//! [`Compose`] 在构建时按 `名义尺寸 + 2 * max(margin)` 协商出抽样尺寸,
//! 应用阶段按固定顺序执行整条链, 最后中心裁剪回名义尺寸.
//!
//! 余量取 max 而不是求和: 每个变换都在同一个超采样裁剪上工作,
//! 最坏的单个变换决定总开销, 链条加长不会让裁剪无界膨胀.

use log::debug;
use ndarray::{s, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use crate::config::AugParams;
use crate::{Idx3d, Volume};

mod elastic;
mod flip;
mod grayscale;
mod misalign;
mod missing;
mod rescale;
mod rotate;

pub use elastic::Elastic;
pub use flip::Flip;
pub use grayscale::Grayscale;
pub use misalign::MisAlign;
pub use missing::{MissingParts, MissingSection};
pub use rescale::Rescale;
pub use rotate::Rotate;

/// 增广运行时错误. 不被掩盖, 直接上抛给抽样调用方.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AugmentError {
    /// 输入裁剪形状与协商尺寸不符. `(期望, 实际)`
    WrongCropShape(Idx3d, Idx3d),
}

/// 一次抽样得到的对齐裁剪组. 三个数组几何上逐体素对应.
#[derive(Debug, Clone)]
pub struct AugSample {
    /// image 裁剪.
    pub image: Volume,

    /// label 裁剪. 测试模式下为 `None`.
    pub label: Option<Volume>,

    /// validity mask 裁剪.
    pub mask: Option<Volume>,
}

impl AugSample {
    /// 裁剪形状 (以 image 为准; 构造方保证三者一致).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.image.dim()
    }

    /// 对三个数组统一应用同一几何/数值变换.
    pub(crate) fn apply_each<F: Fn(&Volume) -> Volume>(&mut self, f: F) {
        self.image = f(&self.image);
        self.label = self.label.as_ref().map(&f);
        self.mask = self.mask.as_ref().map(&f);
    }
}

/// 单个增广变换的公共契约.
pub trait Augment: Send + Sync {
    /// 变换名, 用于诊断输出.
    fn name(&self) -> &'static str;

    /// 触发概率, `[0, 1]`.
    fn prob(&self) -> f64;

    /// 在给定名义输出尺寸下, 该变换每轴需要的额外 context 余量.
    /// 纯灰度变换恒为零向量.
    fn margin(&self, nominal: Idx3d) -> Idx3d;

    /// 对裁剪组施加变换. 改变几何的变换必须对 image/label/mask
    /// 施加同一几何 (image 平滑插值, label/mask 最近邻), 保持逐体素对齐.
    fn transform(&self, sample: &mut AugSample, rng: &mut StdRng);
}

/// 中心裁剪到 `out` 尺寸. `out` 每轴不得大于 `v`, 否则 panic.
pub(crate) fn center_crop(v: &Volume, out: Idx3d) -> Volume {
    let (nz, nh, nw) = v.dim();
    let (oz, oh, ow) = out;
    assert!(oz <= nz && oh <= nh && ow <= nw, "裁剪尺寸超过源尺寸");

    let (z0, h0, w0) = ((nz - oz) / 2, (nh - oh) / 2, (nw - ow) / 2);
    v.slice(s![z0..z0 + oz, h0..h0 + oh, w0..w0 + ow]).to_owned()
}

/// 平面内重采样: 按 `map` 给出的 (z, out_h, out_w) -> (src_h, src_w)
/// 映射重建整组裁剪. image 双线性, label/mask 最近邻, 越界处 clamp 到边缘.
pub(crate) fn warp_inplane<F>(sample: &mut AugSample, map: F)
where
    F: Fn(usize, f64, f64) -> (f64, f64),
{
    let dim = sample.image.dim();

    let image = Volume::from_shape_fn(dim, |(z, h, w)| {
        let (sh, sw) = map(z, h as f64, w as f64);
        bilinear_at(&sample.image, z, sh, sw)
    });
    let label = sample.label.as_ref().map(|l| {
        Volume::from_shape_fn(dim, |(z, h, w)| {
            let (sh, sw) = map(z, h as f64, w as f64);
            nearest_at(l, z, sh, sw)
        })
    });
    let mask = sample.mask.as_ref().map(|m| {
        Volume::from_shape_fn(dim, |(z, h, w)| {
            let (sh, sw) = map(z, h as f64, w as f64);
            nearest_at(m, z, sh, sw)
        })
    });

    sample.image = image;
    sample.label = label;
    sample.mask = mask;
}

/// 在第 `z` 层上按连续坐标双线性采样, 越界 clamp.
fn bilinear_at(v: &Volume, z: usize, ch: f64, cw: f64) -> f32 {
    let (_, nh, nw) = v.dim();
    let ch = ch.clamp(0.0, (nh - 1) as f64);
    let cw = cw.clamp(0.0, (nw - 1) as f64);

    let (h0, w0) = (ch.floor() as usize, cw.floor() as usize);
    let (h1, w1) = ((h0 + 1).min(nh - 1), (w0 + 1).min(nw - 1));
    let (th, tw) = ((ch - h0 as f64) as f32, (cw - w0 as f64) as f32);

    let top = v[(z, h0, w0)] * (1.0 - tw) + v[(z, h0, w1)] * tw;
    let bottom = v[(z, h1, w0)] * (1.0 - tw) + v[(z, h1, w1)] * tw;
    top * (1.0 - th) + bottom * th
}

/// 在第 `z` 层上按连续坐标最近邻采样, 越界 clamp.
fn nearest_at(v: &Volume, z: usize, ch: f64, cw: f64) -> f32 {
    let (_, nh, nw) = v.dim();
    let ih = (ch.round().clamp(0.0, (nh - 1) as f64)) as usize;
    let iw = (cw.round().clamp(0.0, (nw - 1) as f64)) as usize;
    v[(z, ih, iw)]
}

/// 有序增广链与协商出的抽样尺寸.
pub struct Compose {
    chain: Vec<Box<dyn Augment>>,
    nominal: Idx3d,
    sample_size: Idx3d,
}

impl Compose {
    /// 从有序变换链和名义输出尺寸构建管线.
    ///
    /// 抽样尺寸在此一次性协商完成: 每轴取
    /// `nominal + 2 * max_k(margin_k)`.
    pub fn new(chain: Vec<Box<dyn Augment>>, nominal: Idx3d) -> Self {
        let mut margin = (0usize, 0usize, 0usize);
        for aug in chain.iter() {
            let m = aug.margin(nominal);
            margin.0 = margin.0.max(m.0);
            margin.1 = margin.1.max(m.1);
            margin.2 = margin.2.max(m.2);
        }
        let sample_size = (
            nominal.0 + 2 * margin.0,
            nominal.1 + 2 * margin.1,
            nominal.2 + 2 * margin.2,
        );
        Self { chain, nominal, sample_size }
    }

    /// 按配置参数构建默认增广链. 顺序固定: 几何变换在前,
    /// 灰度/采集缺陷模拟在后, 使缺陷模拟看到几何一致的内容.
    pub fn default_chain(params: &AugParams, nominal: Idx3d) -> Self {
        let chain: Vec<Box<dyn Augment>> = vec![
            Box::new(Rotate::new(params.rotate_p)),
            Box::new(Rescale::new(params.rescale_p, params.rescale_range)),
            Box::new(Flip::new(params.flip_p)),
            Box::new(Elastic::new(params.elastic_p, params.elastic_alpha, params.elastic_sigma)),
            Box::new(Grayscale::new(params.grayscale_p)),
            Box::new(MissingParts::new(params.missing_parts_p)),
            Box::new(MissingSection::new(params.missing_section_p, params.missing_section_num)),
            Box::new(MisAlign::new(params.misalign_p, params.misalign_displacement)),
        ];
        Self::new(chain, nominal)
    }

    /// 协商出的抽样尺寸. 每轴 >= 名义尺寸.
    #[inline]
    pub fn sample_size(&self) -> Idx3d {
        self.sample_size
    }

    /// 名义输出尺寸.
    #[inline]
    pub fn nominal_size(&self) -> Idx3d {
        self.nominal
    }

    /// 对一个协商尺寸的裁剪组应用整条链, 并中心裁剪到名义尺寸.
    ///
    /// 每个变换以各自的概率独立触发; 触发与否, 输出形状都严格等于
    /// 名义尺寸. 裁剪形状与协商尺寸不符时返回 `Err`.
    pub fn apply(&self, sample: &mut AugSample, rng: &mut StdRng) -> Result<(), AugmentError> {
        if sample.shape() != self.sample_size {
            return Err(AugmentError::WrongCropShape(self.sample_size, sample.shape()));
        }

        for aug in self.chain.iter() {
            if rng.gen::<f64>() < aug.prob() {
                debug!("augment: {}", aug.name());
                aug.transform(sample, rng);
            }
        }

        let nominal = self.nominal;
        sample.apply_each(|v| center_crop(v, nominal));
        Ok(())
    }
}

/// 随机抽取 `[0, n)` 内的轴索引. 仅内部使用.
#[inline]
pub(crate) fn rand_index(rng: &mut StdRng, n: usize) -> usize {
    debug_assert!(n >= 1);
    rng.gen_range(0..n)
}

/// 取 z 轴切片个数.
#[inline]
pub(crate) fn depth_of(v: &Volume) -> usize {
    v.len_of(Axis(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::SeedableRng;

    /// 声明固定 margin 的桩变换.
    struct Stub(Idx3d);

    impl Augment for Stub {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn prob(&self) -> f64 {
            1.0
        }
        fn margin(&self, _nominal: Idx3d) -> Idx3d {
            self.0
        }
        fn transform(&self, _sample: &mut AugSample, _rng: &mut StdRng) {}
    }

    fn unit_sample(shape: Idx3d) -> AugSample {
        AugSample {
            image: Array3::from_elem(shape, 0.5),
            label: Some(Array3::from_elem(shape, 1.0)),
            mask: Some(Array3::from_elem(shape, 1.0)),
        }
    }

    /// 协商尺寸 = 名义尺寸 + 2 * max(margin), 单个最大需求占优.
    #[test]
    fn test_negotiation_takes_max_margin() {
        let chain: Vec<Box<dyn Augment>> = vec![
            Box::new(Stub((0, 0, 0))),
            Box::new(Stub((4, 4, 4))),
            Box::new(Stub((2, 2, 2))),
        ];
        let pipe = Compose::new(chain, (8, 16, 16));
        assert_eq!(pipe.sample_size(), (16, 24, 24));
        assert_eq!(pipe.nominal_size(), (8, 16, 16));
    }

    #[test]
    fn test_negotiated_not_below_nominal() {
        let pipe = Compose::default_chain(&crate::config::AugParams::default(), (4, 16, 16));
        let (nz, nh, nw) = pipe.nominal_size();
        let (sz, sh, sw) = pipe.sample_size();
        assert!(sz >= nz && sh >= nh && sw >= nw);
    }

    #[test]
    fn test_wrong_crop_shape_rejected() {
        let pipe = Compose::new(vec![Box::new(Stub((1, 1, 1)))], (4, 4, 4));
        let mut s = unit_sample((4, 4, 4)); // 期望 (6, 6, 6)
        let mut rng = StdRng::seed_from_u64(0);
        let err = pipe.apply(&mut s, &mut rng).unwrap_err();
        assert_eq!(err, AugmentError::WrongCropShape((6, 6, 6), (4, 4, 4)));
    }

    /// 100 次随机触发组合下, 整条默认链的输出形状恒等于名义尺寸.
    #[test]
    fn test_chain_shape_stable_100_trials() {
        let nominal = (4, 16, 16);
        let pipe = Compose::default_chain(&crate::config::AugParams::default(), nominal);
        let shape = pipe.sample_size();

        let mut rng = StdRng::seed_from_u64(7);
        for trial in 0..100 {
            let mut s = unit_sample(shape);
            pipe.apply(&mut s, &mut rng).unwrap();
            assert_eq!(s.image.dim(), nominal, "trial {trial}");
            assert_eq!(s.label.as_ref().unwrap().dim(), nominal);
            assert_eq!(s.mask.as_ref().unwrap().dim(), nominal);
        }
    }

    #[test]
    fn test_center_crop_takes_center() {
        let v = Array3::from_shape_fn((3, 5, 5), |(_, h, w)| (h * 5 + w) as f32);
        let c = center_crop(&v, (3, 3, 3));
        assert_eq!(c.dim(), (3, 3, 3));
        assert_eq!(c[(0, 0, 0)], (1 * 5 + 1) as f32);
        assert_eq!(c[(0, 2, 2)], (3 * 5 + 3) as f32);
    }
}
