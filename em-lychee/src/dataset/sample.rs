//! 抽样核心: 随机裁剪、滑窗遍历与前景占比约束.

use std::sync::Arc;

use ndarray::{s, Array4};
use rand::rngs::StdRng;
use rand::Rng;

use super::{DrawError, Mode};
use crate::augment::{AugSample, Compose};
use crate::config::ConfigError;
use crate::consts::is_foreground;
use crate::data::VolumeSet;
use crate::{Idx3d, Volume};

/// 前景占比不满足时的最大重抽次数.
const MAX_REDRAW: u32 = 64;

/// 一次抽样的成品.
///
/// 训练模式下 `image` 为名义尺寸, `target` 按任务构建;
/// 测试模式下只有 `image` (滑窗裁剪), 供下游拼接.
#[derive(Debug, Clone)]
pub struct Sample {
    /// 体数据索引.
    pub volume: usize,

    /// 裁剪原点 (测试模式下为滑窗位置, 供拼接定位).
    pub origin: Idx3d,

    /// image 裁剪.
    pub image: Volume,

    /// 任务目标, `(C, z, h, w)` 排布. 测试模式为 `None`.
    pub target: Option<Array4<f32>>,

    /// validity mask 裁剪.
    pub mask: Option<Volume>,

    /// 辅助目标 (骨架距离任务专用).
    pub aux: Option<Volume>,
}

/// 裁剪一个子块.
fn crop(v: &Volume, origin: Idx3d, size: Idx3d) -> Volume {
    let (z, h, w) = origin;
    let (sz, sh, sw) = size;
    v.slice(s![z..z + sz, h..h + sh, w..w + sw]).to_owned()
}

/// 逐任务样本生产者共享的抽样核心.
///
/// 持有共享只读的体数据组; 训练时按体数据有效原点数加权选卷,
/// 均匀抽原点, 按前景占比筛选后走增广链; 测试时做确定性滑窗遍历.
pub struct VolumeDataset {
    volumes: Arc<VolumeSet>,
    crop_size: Idx3d,
    mode: Mode,
    augmentor: Option<Compose>,
    min_foreground: f64,

    /// 训练: 各体数据有效原点数的前缀和, 用于加权选卷.
    weight_prefix: Vec<u64>,

    /// 测试: 预计算的 (体数据, 原点) 滑窗位置表.
    positions: Vec<(usize, Idx3d)>,
}

impl std::fmt::Debug for VolumeDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDataset")
            .field("num_volumes", &self.volumes.len())
            .field("crop_size", &self.crop_size)
            .field("mode", &self.mode)
            .field("has_augmentor", &self.augmentor.is_some())
            .field("min_foreground", &self.min_foreground)
            .field("weight_prefix", &self.weight_prefix)
            .field("num_positions", &self.positions.len())
            .finish()
    }
}

/// 单轴滑窗位置: 步长推进, 末端补一个贴边位置保证覆盖.
fn axis_positions(n: usize, size: usize, stride: usize) -> Vec<usize> {
    debug_assert!(size <= n && stride >= 1);
    let last = n - size;
    let mut ans: Vec<usize> = (0..=last).step_by(stride).collect();
    if *ans.last().unwrap() != last {
        ans.push(last);
    }
    ans
}

impl VolumeDataset {
    /// 构建抽样核心.
    ///
    /// `sample_size` 是在体数据上实际裁剪的尺寸 (训练增广时传协商尺寸).
    /// 任何体数据容不下该尺寸时返回配置错误 —— 这同时覆盖了
    /// "协商增广足迹超过可用体数据" 的检查.
    pub fn new(
        volumes: Arc<VolumeSet>,
        sample_size: Idx3d,
        stride: Idx3d,
        mode: Mode,
        augmentor: Option<Compose>,
        min_foreground: f64,
    ) -> Result<Self, ConfigError> {
        let crop_size = match augmentor.as_ref() {
            Some(a) => a.sample_size(),
            None => sample_size,
        };

        let mut weight_prefix = Vec::with_capacity(volumes.len());
        let mut acc = 0u64;
        for i in 0..volumes.len() {
            let (nz, nh, nw) = volumes.shape(i);
            let (cz, ch, cw) = crop_size;
            if cz > nz || ch > nh || cw > nw {
                return Err(ConfigError::SampleExceedsVolume(i, (nz, nh, nw), crop_size));
            }
            acc += ((nz - cz + 1) * (nh - ch + 1) * (nw - cw + 1)) as u64;
            weight_prefix.push(acc);
        }

        let positions = if mode == Mode::Test {
            let mut ans = Vec::new();
            for i in 0..volumes.len() {
                let (nz, nh, nw) = volumes.shape(i);
                let (cz, ch, cw) = crop_size;
                for &z in axis_positions(nz, cz, stride.0).iter() {
                    for &h in axis_positions(nh, ch, stride.1).iter() {
                        for &w in axis_positions(nw, cw, stride.2).iter() {
                            ans.push((i, (z, h, w)));
                        }
                    }
                }
            }
            ans
        } else {
            Vec::new()
        };

        Ok(Self {
            volumes,
            crop_size,
            mode,
            augmentor,
            min_foreground,
            weight_prefix,
            positions,
        })
    }

    /// 工作模式.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 测试模式滑窗位置总数. 训练模式返回 `None`.
    #[inline]
    pub fn len(&self) -> Option<usize> {
        (self.mode == Mode::Test).then_some(self.positions.len())
    }

    /// 该核心是否没有任何可抽位置?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// 按有效原点数加权抽取体数据索引.
    fn pick_volume(&self, rng: &mut StdRng) -> usize {
        // 构造时保证 total > 0.
        let total = *self.weight_prefix.last().unwrap();
        let t = rng.gen_range(0..total);
        self.weight_prefix.partition_point(|&acc| acc <= t)
    }

    /// 训练抽样: 选卷 -> 抽原点 -> 前景占比筛选 -> 增广 -> 名义尺寸裁剪组.
    ///
    /// 返回 `(体数据索引, 原点, 增广后的对齐裁剪组)`.
    pub fn draw_train(&self, rng: &mut StdRng) -> Result<(usize, Idx3d, AugSample), DrawError> {
        debug_assert_eq!(self.mode, Mode::Train);
        let (cz, ch, cw) = self.crop_size;

        for _ in 0..MAX_REDRAW {
            let vi = self.pick_volume(rng);
            let (nz, nh, nw) = self.volumes.shape(vi);
            let origin = (
                rng.gen_range(0..=nz - cz),
                rng.gen_range(0..=nh - ch),
                rng.gen_range(0..=nw - cw),
            );

            let label = self
                .volumes
                .labels()
                .map(|ls| crop(&ls[vi], origin, self.crop_size));

            // 前景占比筛选在增广前做, 不合格就重抽.
            if self.min_foreground > 0.0 {
                if let Some(l) = label.as_ref() {
                    let fg = l.iter().filter(|&&p| is_foreground(p)).count();
                    if (fg as f64) < self.min_foreground * l.len() as f64 {
                        continue;
                    }
                }
            }

            let mut sample = AugSample {
                image: crop(&self.volumes.images()[vi], origin, self.crop_size),
                label,
                mask: self
                    .volumes
                    .masks()
                    .map(|ms| crop(&ms[vi], origin, self.crop_size)),
            };

            if let Some(aug) = self.augmentor.as_ref() {
                aug.apply(&mut sample, rng)?;
            }
            return Ok((vi, origin, sample));
        }
        Err(DrawError::ForegroundScarce(MAX_REDRAW))
    }

    /// 测试抽样: 第 `index` 个滑窗位置的 image 裁剪.
    pub fn draw_test(&self, index: usize) -> Result<(usize, Idx3d, Volume), DrawError> {
        debug_assert_eq!(self.mode, Mode::Test);
        let (vi, origin) = *self
            .positions
            .get(index)
            .ok_or(DrawError::IndexOutOfRange(index, self.positions.len()))?;
        let image = crop(&self.volumes.images()[vi], origin, self.crop_size);
        Ok((vi, origin, image))
    }
}
