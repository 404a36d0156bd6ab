// 该文件是 Shanan （山南西风） 项目的一部分。
// src/mask/binarize.rs - 掩码二值化
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

use image::GrayImage;

use crate::mask::MaskImage;

pub const DEFAULT_MASK_THRESHOLD: f32 = 0.5;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// 严格大于阈值的像素为 255，其余为 0
pub fn binarize(mask: &MaskImage, threshold: f32) -> GrayImage {
  let (width, height) = mask.dimensions();
  let mut out = GrayImage::new(width, height);
  for (dst, &src) in out.iter_mut().zip(mask.iter()) {
    *dst = if src > threshold {
      FOREGROUND
    } else {
      BACKGROUND
    };
  }
  out
}
