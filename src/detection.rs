// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detection.rs - 检测结果与实例掩码
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

/// 原图尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
  pub width: u32,
  pub height: u32,
}

impl ImageSize {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

/// 原图坐标系下的二值掩码，只覆盖裁剪框范围
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMask {
  /// 裁剪框左上角 x 坐标
  pub x: u32,
  /// 裁剪框左上角 y 坐标
  pub y: u32,
  /// 裁剪框大小的 8 位掩码，前景为 255
  pub image: GrayImage,
}

impl InstanceMask {
  pub fn empty_at(x: u32, y: u32) -> Self {
    Self {
      x,
      y,
      image: GrayImage::new(0, 0),
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn is_empty(&self) -> bool {
    self.width() == 0 || self.height() == 0
  }

  /// 将掩码按其裁剪框位置贴到原图大小的画布上，超出画布的部分被裁掉
  pub fn paste_into(&self, canvas: &mut GrayImage) {
    if self.is_empty() {
      return;
    }
    image::imageops::replace(canvas, &self.image, self.x as i64, self.y as i64);
  }
}

/// 上游解码、NMS 和坐标缩放之后的单个检测
#[derive(Debug, Clone)]
pub struct Detection {
  /// 在原始掩码批次和原始检测框批次中的行号
  pub index: usize,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，已裁剪到原图范围
  pub score: f32,
  pub label: u32,
  /// 由掩码后处理填充
  pub mask: Option<InstanceMask>,
}

impl Detection {
  pub fn new(index: usize, bbox: [f32; 4], score: f32, label: u32) -> Self {
    Self {
      index,
      bbox,
      score,
      label,
      mask: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Luma;

  #[test]
  fn paste_places_crop_at_origin() {
    let mut mask = InstanceMask {
      x: 2,
      y: 1,
      image: GrayImage::new(3, 2),
    };
    mask.image.put_pixel(0, 0, Luma([255]));
    mask.image.put_pixel(2, 1, Luma([255]));

    let mut canvas = GrayImage::new(8, 8);
    mask.paste_into(&mut canvas);

    assert_eq!(canvas.get_pixel(2, 1)[0], 255);
    assert_eq!(canvas.get_pixel(4, 2)[0], 255);
    assert_eq!(canvas.pixels().filter(|p| p[0] == 255).count(), 2);
  }

  #[test]
  fn paste_clips_at_canvas_border() {
    let mask = InstanceMask {
      x: 6,
      y: 6,
      image: GrayImage::from_pixel(4, 4, Luma([255])),
    };
    let mut canvas = GrayImage::new(8, 8);
    mask.paste_into(&mut canvas);
    assert_eq!(canvas.pixels().filter(|p| p[0] == 255).count(), 4);
  }

  #[test]
  fn empty_mask_reports_empty() {
    let mask = InstanceMask::empty_at(4, 5);
    assert!(mask.is_empty());
    let mut canvas = GrayImage::new(8, 8);
    mask.paste_into(&mut canvas);
    assert!(canvas.pixels().all(|p| p[0] == 0));
  }
}
