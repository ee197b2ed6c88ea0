//! 通用常量.

/// 任务码.
pub mod task {
    /// 神经元 affinity 预测任务码.
    pub const AFFINITY: u8 = 0;

    /// 突触检测任务码.
    pub const SYNAPSE: u8 = 1;

    /// 带极性的突触检测任务码.
    pub const SYNAPSE_POLARITY: u8 = 11;

    /// 线粒体分割任务码.
    pub const MITO: u8 = 2;

    /// 带骨架距离辅助目标的线粒体分割任务码.
    pub const MITO_SKELETON: u8 = 22;
}

/// 标签体素是否属于前景 (非零实例)?
#[inline]
pub fn is_foreground(p: f32) -> bool {
    p != 0.0
}

/// 标签体素是否属于背景?
#[inline]
pub fn is_background(p: f32) -> bool {
    p == 0.0
}

/// 默认增广链参数. 与上游任务使用的配置保持一致.
pub mod aug_defaults {
    /// 旋转触发概率.
    pub const ROTATE_P: f64 = 1.0;

    /// 预裁剪缩放触发概率.
    pub const RESCALE_P: f64 = 0.5;

    /// 翻转触发概率.
    pub const FLIP_P: f64 = 1.0;

    /// 弹性形变触发概率.
    pub const ELASTIC_P: f64 = 0.75;

    /// 弹性形变强度 (体素).
    pub const ELASTIC_ALPHA: f64 = 12.0;

    /// 弹性形变平滑度 (粗网格步长, 体素).
    pub const ELASTIC_SIGMA: f64 = 16.0;

    /// 灰度扰动触发概率.
    pub const GRAYSCALE_P: f64 = 0.75;

    /// 缺失小块触发概率.
    pub const MISSING_PARTS_P: f64 = 0.9;

    /// 缺失整切片触发概率.
    pub const MISSING_SECTION_P: f64 = 0.5;

    /// 每次触发最多缺失的切片数.
    pub const MISSING_SECTION_NUM: usize = 2;

    /// 切片错位触发概率.
    pub const MISALIGN_P: f64 = 1.0;

    /// 切片错位的最大平面位移 (体素).
    pub const MISALIGN_DISPLACEMENT: usize = 16;

    /// 预裁剪缩放下界.
    pub const RESCALE_LO: f64 = 0.85;

    /// 预裁剪缩放上界.
    pub const RESCALE_HI: f64 = 1.15;
}
