// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 实例掩码可视化
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

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::Detection;

const OVERLAY_ALPHA: f32 = 0.5;
const PALETTE_SIZE: usize = 80; // COCO 类别数

/// 将检测框和掩码叠加到原图上
pub struct MaskOverlay {
  alpha: f32,
  colors: Vec<Rgb<u8>>,
}

impl Default for MaskOverlay {
  fn default() -> Self {
    // 每个类别一种颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      alpha: OVERLAY_ALPHA,
      colors,
    }
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl MaskOverlay {
  pub fn with_alpha(mut self, alpha: f32) -> Self {
    self.alpha = alpha.clamp(0.0, 1.0);
    self
  }

  pub fn color_of(&self, label: u32) -> Rgb<u8> {
    self.colors[label as usize % self.colors.len()]
  }

  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for det in detections {
      let color = self.color_of(det.label);

      if let Some(mask) = &det.mask {
        for (mx, my, pixel) in mask.image.enumerate_pixels() {
          if pixel[0] == 0 {
            continue;
          }
          let (x, y) = (mask.x + mx, mask.y + my);
          if x >= image.width() || y >= image.height() {
            continue;
          }
          let dst = image.get_pixel_mut(x, y);
          for c in 0..3 {
            let blended = dst[c] as f32 * (1.0 - self.alpha) + color[c] as f32 * self.alpha;
            dst[c] = blended.round() as u8;
          }
        }
      }

      // 边界框
      let x = det.bbox[0].floor() as i32;
      let y = det.bbox[1].floor() as i32;
      let width = (det.bbox[2] - det.bbox[0]).ceil() as u32;
      let height = (det.bbox[3] - det.bbox[1]).ceil() as u32;
      if width > 0 && height > 0 {
        draw_hollow_rect_mut(image, Rect::at(x, y).of_size(width, height), color);
      }
    }
  }
}
