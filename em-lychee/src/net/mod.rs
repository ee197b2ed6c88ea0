//! 残差 U-Net 前向网络.
//!
//! 拓扑调度按深度参数一次性生成; 前向传递是纯函数,
//! 训练循环 (优化器/损失/反向传播) 与 checkpoint 读写均在库外.

mod blocks;
mod unet;

pub use blocks::PadMode;
pub use unet::{NetError, UnetConfig, UnetResidual};
