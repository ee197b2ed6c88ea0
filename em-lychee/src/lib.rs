#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 为大规模电镜 (EM) 体数据的 3D 分割训练/推理提供结构化的
//! 数据准备管线和残差 U-Net 前向网络.
//!
//! 该 crate 目前仅提供 `safe` 接口. 在非期望情况下, 程序会直接 panic,
//! 而不会导致内存错误. As what Rust promises.
//!
//! # 模块总览
//!
//! ### 体数据加载与预处理
//!
//! 从 npz/npy/nii 容器读取一个或多个 image/label/mask 体数据三元组,
//! 做灰度归一化、各向重采样、标签边界加宽和反射 padding,
//! 并强制三元组形状一致.
//!
//! 实现位于 `em-lychee/src/data`.
//!
//! ### 增广管线
//!
//! 由一串带触发概率的几何/灰度变换组成. 管线在构建时协商出满足所有变换
//! context 需求的最小采样尺寸, 并在每次抽样后按固定顺序应用整条链.
//!
//! 实现位于 `em-lychee/src/augment`.
//!
//! ### 数据集装配与批组装
//!
//! 按任务码选择样本生产者 (affinity, synapse, synapse-polarity,
//! mitochondria, mitochondria + skeleton), 接上体数据与协商尺寸,
//! 并用 worker pool + 有界队列做预取和按任务定制的批拼接.
//!
//! 实现位于 `em-lychee/src/dataset` 和 `em-lychee/src/loader`.
//!
//! ### 残差 U-Net
//!
//! 各向异性 embedding 干路 + 可配置深度的下采样/上采样级联,
//! skip 以逐元素相加融合, 输出逐体素 sigmoid 概率图.
//!
//! 实现位于 `em-lychee/src/net`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量. 约定为 `(z, h, w)` 排布.
pub type Idx3d = (usize, usize, usize);

/// 三维各轴缩放因子, `(z, h, w)` 排布.
pub type Scale3d = (f64, f64, f64);

pub mod consts;

pub mod config;

mod data;

pub use data::{LoadError, Volume, VolumeSet};

pub mod augment;

pub mod dataset;

pub mod loader;

pub mod net;

pub mod prelude;
