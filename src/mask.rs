// 该文件是 Shanan （山南西风） 项目的一部分。
// src/mask.rs - 实例掩码后处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;

pub mod affine;
pub mod binarize;
pub mod processor;
pub mod warp;

pub use self::affine::{AffineSolver, AffineTransform, Convention, CropBox};
pub use self::binarize::{DEFAULT_MASK_THRESHOLD, binarize};
pub use self::processor::{InstanceMaskProcessor, InstanceMaskProcessorBuilder, MaskConfig};
pub use self::warp::{BilinearWarp, MaskImage, MaskView, WarpAffine, WarpError};

#[derive(Error, Debug)]
pub enum MaskError {
  #[error("不支持的输入: {0}")]
  UnsupportedInput(String),
  #[error("掩码处理失败: {0}")]
  OperationFailed(String),
  #[error("检测框宽高非正: {0:?}")]
  InvalidGeometry([f32; 4]),
  #[error("配置错误: {0}")]
  Config(String),
}

impl MaskError {
  pub fn unsupported(msg: &str) -> Self {
    MaskError::UnsupportedInput(msg.to_string())
  }

  pub fn failed(msg: &str) -> Self {
    MaskError::OperationFailed(msg.to_string())
  }
}
