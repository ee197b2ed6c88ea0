//! 多尺度残差 U-Net 的拓扑装配与前向调度.

use ndarray::{s, Array4, Array5};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::blocks::{
    max_pool_inplane, sigmoid, upsample_inplane_x2, ConvNormAct, PadMode, ResidualBlock,
};

/// 网络构造与前向的错误. 形状前置条件在进入级联前检查,
/// 绝不把错位张量送进 skip 相加.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// 每级通道宽度列表太短 (至少需要 3 项: 干路 + 一级 + bottleneck).
    BadFilters(usize),

    /// 输入通道数不符. `(期望, 实际)`
    ChannelMismatch(usize, usize),

    /// 平面输入尺寸不能被 `2^(depth + 1)` 整除. `((h, w), 除数)`
    ShapeUnaligned((usize, usize), usize),
}

/// 网络超参数.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnetConfig {
    /// 输入通道数.
    pub in_channel: usize,

    /// 输出通道数.
    pub out_channel: usize,

    /// 每级通道宽度, 长度为 `depth + 2`.
    pub filters: Vec<usize>,

    /// 卷积边界 padding 模式.
    pub pad_mode: PadMode,

    /// 权重初始化种子 (再现性契约).
    pub seed: u64,
}

impl Default for UnetConfig {
    fn default() -> Self {
        Self {
            in_channel: 1,
            out_channel: 3,
            filters: vec![28, 36, 48, 64, 80],
            pad_mode: PadMode::Replicate,
            seed: 0,
        }
    }
}

/// 残差 U-Net.
///
/// 干路做各向异性 embedding (宽平面感受野, 单位深度), 编码级联逐级
/// 加宽通道并只在平面两轴池化; 解码级联镜像展开, skip 以逐元素相加
/// 融合 (通道数对齐, 不做拼接); 输出经 sigmoid 得到逐体素概率.
pub struct UnetResidual {
    in_channel: usize,
    out_channel: usize,
    depth: usize,

    // 干路: 各向异性 embedding + 平面残差块.
    stem_embed: ConvNormAct,
    stem_conv: ConvNormAct,
    stem_res: ResidualBlock,

    // 编码级联, 每级: 通道加宽卷积 + 3D 残差块.
    down: Vec<(ConvNormAct, ResidualBlock)>,

    // bottleneck: 通道加宽 + 投影残差块.
    center_conv: ConvNormAct,
    center_res: ResidualBlock,

    // 解码级联, 每级: 卷积 + 3D 残差块.
    up: Vec<(ConvNormAct, ResidualBlock)>,

    // 逐级 1x1x1 降通道卷积 (上采样前), 共 depth + 1 个.
    reduce: Vec<ConvNormAct>,

    // 尾路: 卷积 + 平面残差块 + 无激活的输出映射.
    tail_conv: ConvNormAct,
    tail_res: ResidualBlock,
    tail_out: ConvNormAct,
}

impl std::fmt::Debug for UnetResidual {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnetResidual")
            .field("in_channel", &self.in_channel)
            .field("out_channel", &self.out_channel)
            .field("depth", &self.depth)
            .finish()
    }
}

impl UnetResidual {
    /// 按超参数构造网络, 所有可学习张量正交初始化.
    pub fn new(cfg: &UnetConfig) -> Result<Self, NetError> {
        if cfg.filters.len() < 3 {
            return Err(NetError::BadFilters(cfg.filters.len()));
        }
        let depth = cfg.filters.len() - 2;
        let f = &cfg.filters;
        let pm = cfg.pad_mode;
        let rng = &mut StdRng::seed_from_u64(cfg.seed);

        let stem_embed =
            ConvNormAct::new(cfg.in_channel, f[0], (1, 5, 5), (0, 2, 2), pm, true, rng);
        let stem_conv = ConvNormAct::new(f[0], f[0], (1, 3, 3), (0, 1, 1), pm, true, rng);
        let stem_res = ResidualBlock::block2d(f[0], f[0], false, pm, rng);

        let down = (0..depth)
            .map(|x| {
                (
                    ConvNormAct::new(f[x], f[x + 1], (1, 3, 3), (0, 1, 1), pm, true, rng),
                    ResidualBlock::block3d(f[x + 1], f[x + 1], false, pm, rng),
                )
            })
            .collect();

        let center_conv =
            ConvNormAct::new(f[depth], f[depth + 1], (1, 3, 3), (0, 1, 1), pm, true, rng);
        let center_res = ResidualBlock::block3d(f[depth + 1], f[depth + 1], true, pm, rng);

        let up = (0..depth)
            .map(|x| {
                (
                    ConvNormAct::new(f[x + 1], f[x + 1], (1, 3, 3), (0, 1, 1), pm, true, rng),
                    ResidualBlock::block3d(f[x + 1], f[x + 1], false, pm, rng),
                )
            })
            .collect();

        let reduce = (0..=depth)
            .map(|x| ConvNormAct::projection(f[x + 1], f[x], pm, true, rng))
            .collect();

        let tail_conv = ConvNormAct::new(f[0], f[0], (1, 3, 3), (0, 1, 1), pm, true, rng);
        let tail_res = ResidualBlock::block2d(f[0], f[0], false, pm, rng);
        let tail_out =
            ConvNormAct::new(f[0], cfg.out_channel, (1, 5, 5), (0, 2, 2), pm, false, rng);

        Ok(Self {
            in_channel: cfg.in_channel,
            out_channel: cfg.out_channel,
            depth,
            stem_embed,
            stem_conv,
            stem_res,
            down,
            center_conv,
            center_res,
            up,
            reduce,
            tail_conv,
            tail_res,
            tail_out,
        })
    }

    /// 级联深度 (不含干路与 bottleneck).
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 平面输入尺寸必须被该除数整除 (干路一次池化 + 编码 `depth` 次).
    #[inline]
    pub fn required_divisor(&self) -> usize {
        1 << (self.depth + 1)
    }

    /// 可学习参数总数.
    pub fn num_params(&self) -> usize {
        let mut n = self.stem_embed.num_params()
            + self.stem_conv.num_params()
            + self.stem_res.num_params()
            + self.center_conv.num_params()
            + self.center_res.num_params()
            + self.tail_conv.num_params()
            + self.tail_res.num_params()
            + self.tail_out.num_params();
        for (c, r) in self.down.iter().chain(self.up.iter()) {
            n += c.num_params() + r.num_params();
        }
        for c in self.reduce.iter() {
            n += c.num_params();
        }
        n
    }

    /// 形状前置条件检查: 通道数与平面尺寸整除性.
    ///
    /// 违反整除性时 skip 相加无法对齐, 属于致命配置错误,
    /// 在进入任何一级之前确定性地失败.
    pub fn check_input(&self, dim: (usize, usize, usize, usize, usize)) -> Result<(), NetError> {
        let (_, c, _, h, w) = dim;
        if c != self.in_channel {
            return Err(NetError::ChannelMismatch(self.in_channel, c));
        }
        let div = self.required_divisor();
        if h % div != 0 || w % div != 0 {
            return Err(NetError::ShapeUnaligned((h, w), div));
        }
        Ok(())
    }

    /// 单样本前向调度. 输入 `(C, z, h, w)`, 前置条件已由批入口检查.
    fn forward_one(&self, x: Array4<f32>) -> Array4<f32> {
        // 编码.
        let stem = self
            .stem_res
            .forward(&self.stem_conv.forward(&self.stem_embed.forward(&x)));
        let mut x = max_pool_inplane(&stem);

        let mut skips = Vec::with_capacity(self.depth);
        for (conv, res) in self.down.iter() {
            let u = res.forward(&conv.forward(&x));
            x = max_pool_inplane(&u);
            skips.push(u);
        }

        // bottleneck.
        x = self.center_res.forward(&self.center_conv.forward(&x));

        // 解码: 升采样 + 相加 skip.
        for i in (0..self.depth).rev() {
            let up = upsample_inplane_x2(&self.reduce[i + 1].forward(&x));
            x = self.up[i].0.forward(&(&skips[i] + &up));
            x = self.up[i].1.forward(&x);
        }

        let up = upsample_inplane_x2(&self.reduce[0].forward(&x));
        let x = stem + up;

        let mut out = self
            .tail_out
            .forward(&self.tail_res.forward(&self.tail_conv.forward(&x)));
        out.mapv_inplace(sigmoid);
        out
    }

    /// 批前向. 输入 `(B, C, z, h, w)`, 输出空间形状不变,
    /// 通道数为配置的输出通道数, 逐体素落在开区间 (0, 1).
    pub fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>, NetError> {
        self.check_input(x.dim())?;
        let (b, _, nz, nh, nw) = x.dim();

        let mut out = Array5::zeros((b, self.out_channel, nz, nh, nw));
        for i in 0..b {
            let y = self.forward_one(x.slice(s![i, .., .., .., ..]).to_owned());
            out.slice_mut(s![i, .., .., .., ..]).assign(&y);
        }
        Ok(out)
    }
}
