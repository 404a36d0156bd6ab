// 该文件是 Shanan （山南西风） 项目的一部分。
// src/mask/affine.rs - 掩码到原图的仿射变换求解
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

use crate::{detection::ImageSize, mask::MaskError};

// 裁剪框四周各扩展 1 像素
const CROP_PADDING: f32 = 1.0;

/// 掩码与检测框的配准方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Convention {
  /// 两阶段检测器（Mask R-CNN 类）：掩码对齐到裁剪后的检测框
  #[default]
  TwoStage,
  /// 单阶段检测器（RTMDet-Ins 类）：掩码对齐到裁剪前的网络输出框
  SingleStage,
}

/// 仅含缩放与平移的轴对齐仿射变换 `[fx, 0, tx, 0, fy, ty]`
///
/// 以逆映射形式保存：裁剪框内像素 `(u, v)` 对应掩码中的 `(fx * u + tx, fy * v + ty)`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
  pub fx: f32,
  pub tx: f32,
  pub fy: f32,
  pub ty: f32,
}

impl AffineTransform {
  pub fn matrix(&self) -> [f32; 6] {
    [self.fx, 0.0, self.tx, 0.0, self.fy, self.ty]
  }

  #[inline]
  pub fn map(&self, u: f32, v: f32) -> (f32, f32) {
    (self.fx * u + self.tx, self.fy * v + self.ty)
  }

  pub fn is_finite(&self) -> bool {
    self.matrix().iter().all(|v| v.is_finite())
  }
}

/// 原图中的裁剪框，即输出掩码的画布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl CropBox {
  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AffineSolver {
  convention: Convention,
}

impl AffineSolver {
  pub fn new(convention: Convention) -> Self {
    Self { convention }
  }

  pub fn convention(&self) -> Convention {
    self.convention
  }

  /// 检测框外扩 1 像素后裁剪到原图范围，宽高非正时为空
  pub fn crop_box(bbox: &[f32; 4], image: ImageSize) -> CropBox {
    let (x0, y0, x1, y1) = Self::crop_corners(bbox, image);
    Self::crop_from_corners(x0, y0, x1, y1)
  }

  fn crop_from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> CropBox {
    CropBox {
      x: x0 as u32,
      y: y0 as u32,
      width: (x1 - x0).round().max(0.0) as u32,
      height: (y1 - y0).round().max(0.0) as u32,
    }
  }

  fn crop_corners(bbox: &[f32; 4], image: ImageSize) -> (f32, f32, f32, f32) {
    let x0 = (bbox[0].floor() - CROP_PADDING).max(0.0);
    let y0 = (bbox[1].floor() - CROP_PADDING).max(0.0);
    let x1 = (bbox[2].ceil() + CROP_PADDING).min(image.width as f32);
    let y1 = (bbox[3].ceil() + CROP_PADDING).min(image.height as f32);
    (x0, y0, x1, y1)
  }

  /// 求解掩码到裁剪框的变换
  ///
  /// `raw_box` 是裁剪前的网络输出框，仅单阶段约定需要。
  /// 宽或高非正（含 NaN）的检测框返回 [`MaskError::InvalidGeometry`]。
  pub fn solve(
    &self,
    bbox: &[f32; 4],
    mask_width: u32,
    mask_height: u32,
    raw_box: Option<&[f32; 4]>,
    image: ImageSize,
  ) -> Result<(AffineTransform, CropBox), MaskError> {
    let box_w = bbox[2] - bbox[0];
    let box_h = bbox[3] - bbox[1];
    if !(box_w > 0.0 && box_h > 0.0) {
      return Err(MaskError::InvalidGeometry(*bbox));
    }

    let (x0, y0, x1, y1) = Self::crop_corners(bbox, image);
    let crop = Self::crop_from_corners(x0, y0, x1, y1);

    // align_corners = false：按像素中心对齐
    let (fx, fy, origin_x, origin_y) = match self.convention {
      Convention::TwoStage => (
        mask_width as f32 / box_w,
        mask_height as f32 / box_h,
        0.0,
        0.0,
      ),
      Convention::SingleStage => {
        let raw = raw_box.ok_or_else(|| MaskError::unsupported("单阶段约定需要原始检测框"))?;
        (
          (raw[2] - raw[0]) / box_w,
          (raw[3] - raw[1]) / box_h,
          raw[0],
          raw[1],
        )
      }
    };

    let transform = AffineTransform {
      fx,
      tx: (x0 + 0.5 - bbox[0]) * fx - 0.5 + origin_x,
      fy,
      ty: (y0 + 0.5 - bbox[1]) * fy - 0.5 + origin_y,
    };

    if !transform.is_finite() {
      return Err(MaskError::OperationFailed(format!(
        "变换矩阵包含非有限值: {:?}",
        transform.matrix()
      )));
    }

    Ok((transform, crop))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EPS: f32 = 1e-5;

  fn image() -> ImageSize {
    ImageSize::new(100, 100)
  }

  #[test]
  fn two_stage_scale_from_mask_size() {
    let solver = AffineSolver::new(Convention::TwoStage);
    let bbox = [10.0, 10.0, 30.0, 30.0];
    let (t, crop) = solver.solve(&bbox, 28, 28, None, image()).unwrap();

    assert!((t.fx - 1.4).abs() < EPS);
    assert!((t.fy - 1.4).abs() < EPS);
    // (9 + 0.5 - 10) * 1.4 - 0.5
    assert!((t.tx + 1.2).abs() < EPS);
    assert!((t.ty + 1.2).abs() < EPS);
    assert_eq!(
      crop,
      CropBox {
        x: 9,
        y: 9,
        width: 22,
        height: 22
      }
    );
  }

  #[test]
  fn two_stage_uses_width_for_x_and_height_for_y() {
    let solver = AffineSolver::new(Convention::TwoStage);
    let bbox = [0.0, 0.0, 40.0, 20.0];
    let (t, _) = solver.solve(&bbox, 28, 14, None, image()).unwrap();
    assert!((t.fx - 0.7).abs() < EPS);
    assert!((t.fy - 0.7).abs() < EPS);
  }

  #[test]
  fn identity_scale_is_pure_shift() {
    let solver = AffineSolver::new(Convention::TwoStage);
    let bbox = [10.0, 20.0, 30.0, 40.0];
    let (t, crop) = solver.solve(&bbox, 20, 20, None, image()).unwrap();
    assert_eq!(t.fx, 1.0);
    assert_eq!(t.fy, 1.0);
    assert_eq!(t.tx, crop.x as f32 - bbox[0]);
    assert_eq!(t.ty, crop.y as f32 - bbox[1]);
    // 裁剪框第 1 个像素即检测框左上角
    assert_eq!(t.map(1.0, 1.0), (0.0, 0.0));
  }

  #[test]
  fn single_stage_unclipped_reduces_to_crop_offset() {
    let solver = AffineSolver::new(Convention::SingleStage);
    let bbox = [10.0, 12.0, 30.0, 44.0];
    let (t, crop) = solver
      .solve(&bbox, 160, 160, Some(&bbox), image())
      .unwrap();
    assert_eq!(t.fx, 1.0);
    assert_eq!(t.fy, 1.0);
    assert_eq!(t.tx, crop.x as f32);
    assert_eq!(t.ty, crop.y as f32);
  }

  #[test]
  fn single_stage_scale_from_raw_box() {
    let solver = AffineSolver::new(Convention::SingleStage);
    // 网络输出框超出原图，被裁剪到 [0, 100]
    let raw = [-20.0, 10.0, 100.0, 70.0];
    let bbox = [0.0, 5.0, 100.0, 35.0];
    let (t, crop) = solver.solve(&bbox, 80, 80, Some(&raw), image()).unwrap();
    assert!((t.fx - 1.2).abs() < EPS);
    assert!((t.fy - 2.0).abs() < EPS);
    assert_eq!(crop.x, 0);
    assert_eq!(crop.width, 100);
    // (0 + 0.5 - 0) * 1.2 - 0.5 - 20
    assert!((t.tx + 19.9).abs() < EPS);
  }

  #[test]
  fn single_stage_without_raw_box_is_rejected() {
    let solver = AffineSolver::new(Convention::SingleStage);
    let err = solver
      .solve(&[1.0, 1.0, 5.0, 5.0], 28, 28, None, image())
      .unwrap_err();
    assert!(matches!(err, MaskError::UnsupportedInput(_)));
  }

  #[test]
  fn degenerate_box_is_invalid_geometry() {
    let solver = AffineSolver::new(Convention::TwoStage);
    for bbox in [
      [5.0, 5.0, 5.0, 8.0],
      [5.0, 5.0, 9.0, 5.0],
      [9.0, 5.0, 5.0, 8.0],
      [f32::NAN, 5.0, 9.0, 8.0],
    ] {
      let err = solver.solve(&bbox, 28, 28, None, image()).unwrap_err();
      assert!(matches!(err, MaskError::InvalidGeometry(_)));
    }
  }

  #[test]
  fn crop_clips_to_image_bounds() {
    let crop = AffineSolver::crop_box(&[0.4, 0.2, 99.5, 99.9], image());
    assert_eq!(
      crop,
      CropBox {
        x: 0,
        y: 0,
        width: 100,
        height: 100
      }
    );
  }

  #[test]
  fn crop_outside_image_is_empty() {
    let crop = AffineSolver::crop_box(&[150.0, 10.0, 160.0, 20.0], image());
    assert!(crop.is_empty());
  }

  #[test]
  fn crop_inside_image_is_never_empty() {
    let solver = AffineSolver::new(Convention::TwoStage);
    let image = ImageSize::new(37, 23);
    let steps = [0.0f32, 0.25, 0.5, 0.99];
    for x in 0..36 {
      for y in 0..22 {
        for dx in steps {
          for dy in steps {
            let x0 = x as f32 + dx;
            let y0 = y as f32 + dy;
            let bbox = [x0, y0, (x0 + 0.75).min(37.0), (y0 + 0.5).min(23.0)];
            let (_, crop) = solver.solve(&bbox, 28, 28, None, image).unwrap();
            assert!(crop.width >= 1 && crop.height >= 1, "{:?}", bbox);
            assert!(crop.x + crop.width <= image.width);
            assert!(crop.y + crop.height <= image.height);
          }
        }
      }
    }
  }
}
