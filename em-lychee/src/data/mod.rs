//! 3D 体数据基础结构与加载预处理.

use log::info;
use ndarray::Array3;

use crate::config::{ConfigError, PipelineConfig};
use crate::Idx3d;

mod border;
mod intensity;
mod io;
mod pad;
mod zoom;

pub use border::widen_border;
pub use pad::reflect_pad;
pub use zoom::{zoom_linear, zoom_nearest};

/// 单个 3D 体数据. 按 `(z, h, w)` 排布, 行优先存储.
///
/// image 归一化到 `[0, 1]`; label 保存实例 id (背景为 0) 的浮点转写;
/// mask 为 0/1 有效性掩码.
pub type Volume = Array3<f32>;

/// 加载错误. 包括致命的配置错误与数据一致性错误, 均不可恢复:
/// 任何一个体数据失败, 整个集合都不会被返回.
#[derive(Debug)]
pub enum LoadError {
    /// 配置错误.
    Config(ConfigError),

    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// npz 容器读取错误.
    Npz(ndarray_npy::ReadNpzError),

    /// npy 数组读取错误.
    Npy(ndarray_npy::ReadNpyError),

    /// nii 文件读取错误.
    Nifti(nifti::NiftiError),

    /// 无法从文件扩展名识别容器格式.
    UnsupportedFormat(std::path::PathBuf),

    /// 容器中的数据不是三维的. `(路径, 实际维数)`
    NotVolumetric(std::path::PathBuf, usize),

    /// image 含有 NaN/inf 体素. 参数为体数据索引.
    NonFinite(usize),

    /// 预处理后 image/label 形状不一致. `(索引, image 形状, label 形状)`
    LabelShapeMismatch(usize, Idx3d, Idx3d),

    /// 预处理后 image/mask 形状不一致. `(索引, image 形状, mask 形状)`
    MaskShapeMismatch(usize, Idx3d, Idx3d),
}

impl From<ConfigError> for LoadError {
    fn from(e: ConfigError) -> Self {
        LoadError::Config(e)
    }
}

/// 互相平行的 image/label/mask 体数据组.
///
/// 不变式: 对每个索引 `i`, 预处理后 `image[i]`, `label[i]`, `mask[i]`
/// (后两者存在时) 形状一致. 违反时在加载阶段直接失败, 绝不静默截断.
///
/// 该结构在加载后只读. 数据集协作者通过共享引用访问.
#[derive(Debug, Clone)]
pub struct VolumeSet {
    images: Vec<Volume>,
    labels: Option<Vec<Volume>>,
    masks: Option<Vec<Volume>>,
}

/// 对单个 image 体数据执行完整预处理链.
///
/// 顺序固定: 归一化 -> 重采样 (order-1) -> 反射 padding.
fn process_image(mut v: Volume, cfg: &PipelineConfig, index: usize) -> Result<Volume, LoadError> {
    if !intensity::normalize_unit(&mut v) {
        return Err(LoadError::NonFinite(index));
    }
    if cfg.scale != (1.0, 1.0, 1.0) {
        v = zoom_linear(&v, cfg.scale);
    }
    Ok(reflect_pad(&v, cfg.pad))
}

/// 对单个 label 体数据执行完整预处理链.
///
/// 顺序固定: 重采样 (order-0, 不发明小数标签) -> 边界加宽 -> 反射 padding.
fn process_label(mut v: Volume, cfg: &PipelineConfig) -> Volume {
    if cfg.scale != (1.0, 1.0, 1.0) {
        v = zoom_nearest(&v, cfg.scale);
    }
    if cfg.label_erosion != 0 {
        widen_border(&mut v, cfg.label_erosion);
    }
    reflect_pad(&v, cfg.pad)
}

/// 对单个 mask 体数据执行完整预处理链. 数值不做归一化.
fn process_mask(mut v: Volume, cfg: &PipelineConfig) -> Volume {
    if cfg.scale != (1.0, 1.0, 1.0) {
        v = zoom_linear(&v, cfg.scale);
    }
    reflect_pad(&v, cfg.pad)
}

impl VolumeSet {
    /// 按配置从存储加载一组体数据.
    ///
    /// `with_labels` 为 `true` (训练模式) 时要求配置给出 label 列表,
    /// 且 label 列表与 image 列表等长; mask 列表可选, 给出时同样要求等长.
    ///
    /// 每个体数据按固定顺序预处理 (归一化 -> 重采样 -> 边界加宽 ->
    /// 反射 padding), 完成后逐索引强制形状一致.
    pub fn load(cfg: &PipelineConfig, with_labels: bool) -> Result<Self, LoadError> {
        let image_paths = cfg.sources.image_paths();

        let label_paths = if with_labels {
            let paths = cfg.sources.label_paths().ok_or(ConfigError::LabelRequired)?;
            if paths.len() != image_paths.len() {
                return Err(ConfigError::MismatchedLabelCount(image_paths.len(), paths.len()).into());
            }
            Some(paths)
        } else {
            None
        };

        let mask_paths = match (with_labels, cfg.sources.mask_paths()) {
            (true, Some(paths)) => {
                if paths.len() != image_paths.len() {
                    return Err(
                        ConfigError::MismatchedMaskCount(image_paths.len(), paths.len()).into()
                    );
                }
                Some(paths)
            }
            _ => None,
        };

        let mut images = Vec::with_capacity(image_paths.len());
        let mut labels = label_paths.as_ref().map(|p| Vec::with_capacity(p.len()));
        let mut masks = mask_paths.as_ref().map(|p| Vec::with_capacity(p.len()));

        for (i, path) in image_paths.iter().enumerate() {
            let image = process_image(io::read_volume(path)?, cfg, i)?;
            info!("volume {i}: image shape {:?}", image.dim());

            if let (Some(paths), Some(out)) = (label_paths.as_ref(), labels.as_mut()) {
                let label = process_label(io::read_volume(&paths[i])?, cfg);
                info!("volume {i}: label shape {:?}", label.dim());
                if label.dim() != image.dim() {
                    return Err(LoadError::LabelShapeMismatch(i, image.dim(), label.dim()));
                }
                out.push(label);
            }

            if let (Some(paths), Some(out)) = (mask_paths.as_ref(), masks.as_mut()) {
                let mask = process_mask(io::read_volume(&paths[i])?, cfg);
                info!("volume {i}: mask shape {:?}", mask.dim());
                if mask.dim() != image.dim() {
                    return Err(LoadError::MaskShapeMismatch(i, image.dim(), mask.dim()));
                }
                out.push(mask);
            }

            images.push(image);
        }

        Ok(Self { images, labels, masks })
    }

    /// 从内存中已就绪的数组直接构建体数据组, 跳过文件系统与预处理.
    ///
    /// 形状一致性检查与 [`Self::load`] 相同. 列表长度不一致或形状不一致
    /// 时返回 `Err`.
    pub fn from_arrays(
        images: Vec<Volume>,
        labels: Option<Vec<Volume>>,
        masks: Option<Vec<Volume>>,
    ) -> Result<Self, LoadError> {
        if let Some(ls) = labels.as_ref() {
            if ls.len() != images.len() {
                return Err(ConfigError::MismatchedLabelCount(images.len(), ls.len()).into());
            }
            for (i, (img, lab)) in images.iter().zip(ls.iter()).enumerate() {
                if img.dim() != lab.dim() {
                    return Err(LoadError::LabelShapeMismatch(i, img.dim(), lab.dim()));
                }
            }
        }
        if let Some(ms) = masks.as_ref() {
            if ms.len() != images.len() {
                return Err(ConfigError::MismatchedMaskCount(images.len(), ms.len()).into());
            }
            for (i, (img, m)) in images.iter().zip(ms.iter()).enumerate() {
                if img.dim() != m.dim() {
                    return Err(LoadError::MaskShapeMismatch(i, img.dim(), m.dim()));
                }
            }
        }
        Ok(Self { images, labels, masks })
    }

    /// 体数据组内体数据的个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// 体数据组是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// 所有 image 体数据.
    #[inline]
    pub fn images(&self) -> &[Volume] {
        &self.images
    }

    /// 所有 label 体数据. 测试模式下为 `None`.
    #[inline]
    pub fn labels(&self) -> Option<&[Volume]> {
        self.labels.as_deref()
    }

    /// 所有 mask 体数据. 未配置时为 `None`.
    #[inline]
    pub fn masks(&self) -> Option<&[Volume]> {
        self.masks.as_deref()
    }

    /// 第 `i` 个体数据的形状.
    #[inline]
    pub fn shape(&self, i: usize) -> Idx3d {
        self.images[i].dim()
    }
}
