// 该文件是 Shanan （山南西风） 项目的一部分。
// src/mask/warp.rs - 掩码仿射重采样
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

use image::{ImageBuffer, Luma};
use thiserror::Error;

use crate::mask::AffineTransform;

/// 借用推理输出内存的单通道浮点掩码
pub type MaskView<'a> = ImageBuffer<Luma<f32>, &'a [f32]>;
/// 重采样后的单通道浮点掩码
pub type MaskImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 按仿射变换对浮点掩码重采样的能力
///
/// 变换按逆映射使用：输出像素 `(u, v)` 取源掩码在 `transform.map(u, v)` 处的值。
/// 加速后端（NPU/GPU）实现同一接口即可替换默认的 CPU 实现。
pub trait WarpAffine: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn warp_affine(
    &self,
    mask: &MaskView<'_>,
    transform: &AffineTransform,
    width: u32,
    height: u32,
  ) -> Result<MaskImage, Self::Error>;
}

#[derive(Error, Debug)]
pub enum WarpError {
  #[error("源掩码为空: {width}x{height}")]
  EmptySource { width: u32, height: u32 },
  #[error("变换矩阵包含非有限值: {0:?}")]
  NonFiniteTransform([f32; 6]),
}

/// CPU 双线性插值，边界复制
#[derive(Debug, Clone, Copy, Default)]
pub struct BilinearWarp;

// 一维插值抽头：value = src[i0] + w1 * (src[i1] - src[i0])
#[derive(Debug, Clone, Copy)]
struct Tap {
  i0: usize,
  i1: usize,
  w1: f32,
}

// 变换轴对齐，x/y 方向可分离，每列/每行只需计算一次
fn taps(out_len: u32, scale: f32, offset: f32, src_len: u32) -> Vec<Tap> {
  let last = src_len as usize - 1;
  (0..out_len)
    .map(|o| {
      // 先夹紧坐标再插值，等价于边界复制
      let s = (scale * o as f32 + offset).clamp(0.0, last as f32);
      let base = s.floor();
      let i0 = base as usize;
      Tap {
        i0,
        i1: (i0 + 1).min(last),
        w1: s - base,
      }
    })
    .collect()
}

impl WarpAffine for BilinearWarp {
  type Error = WarpError;

  fn warp_affine(
    &self,
    mask: &MaskView<'_>,
    transform: &AffineTransform,
    width: u32,
    height: u32,
  ) -> Result<MaskImage, Self::Error> {
    let (src_w, src_h) = mask.dimensions();
    if src_w == 0 || src_h == 0 {
      return Err(WarpError::EmptySource {
        width: src_w,
        height: src_h,
      });
    }
    if !transform.is_finite() {
      return Err(WarpError::NonFiniteTransform(transform.matrix()));
    }

    let mut out = MaskImage::new(width, height);
    if width == 0 || height == 0 {
      return Ok(out);
    }

    let cols = taps(width, transform.fx, transform.tx, src_w);
    let rows = taps(height, transform.fy, transform.ty, src_h);

    let src: &[f32] = mask.as_raw();
    let stride = src_w as usize;

    for (dst_row, ty) in out.chunks_exact_mut(width as usize).zip(rows.iter()) {
      let r0 = &src[ty.i0 * stride..][..stride];
      let r1 = &src[ty.i1 * stride..][..stride];
      for (dst, tx) in dst_row.iter_mut().zip(cols.iter()) {
        let top = r0[tx.i0] + tx.w1 * (r0[tx.i1] - r0[tx.i0]);
        let bottom = r1[tx.i0] + tx.w1 * (r1[tx.i1] - r1[tx.i0]);
        *dst = top + ty.w1 * (bottom - top);
      }
    }

    Ok(out)
  }
}
