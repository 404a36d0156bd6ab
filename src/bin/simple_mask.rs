// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_mask.rs - 掩码后处理演示
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use image::{Rgb, RgbImage};
use tracing::info;
use url::Url;

use shanan_mask::{
  Convention, Detection, FromUrl, InstanceMaskProcessorBuilder, Tensor, output::MaskOverlay,
};

// 两阶段模型的掩码分辨率
const RCNN_MASK_SIZE: usize = 28;
// 单阶段模型的掩码相对原图的下采样倍数
const SINGLE_STAGE_STRIDE: f32 = 4.0;

/// 掩码后处理演示参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 掩码后处理配置，例如 mask://?mask_thr_binary=0.5&rcnn
  #[arg(long, value_name = "CONFIG", default_value = "mask://?rcnn")]
  pub config: Url,
  /// 原图宽度
  #[arg(long, default_value = "320")]
  pub width: u32,
  /// 原图高度
  #[arg(long, default_value = "240")]
  pub height: u32,
  /// 输出图像路径
  #[arg(long, value_name = "OUTPUT", default_value = "mask.png")]
  pub output: PathBuf,
}

// 以 (cx, cy) 为圆心、半径 r 的软圆盘，值域 [0, 1]
fn disk(width: usize, height: usize, cx: f32, cy: f32, r: f32) -> Vec<f32> {
  let mut data = Vec::with_capacity(width * height);
  for y in 0..height {
    for x in 0..width {
      let d = ((x as f32 + 0.5 - cx).powi(2) + (y as f32 + 0.5 - cy).powi(2)).sqrt();
      data.push((r - d + 0.5).clamp(0.0, 1.0));
    }
  }
  data
}

fn synthesize(
  convention: Convention,
  boxes: &[[f32; 4]],
  width: u32,
  height: u32,
) -> Result<(Tensor, Tensor)> {
  let num = boxes.len();
  match convention {
    Convention::TwoStage => {
      // 每个检测一张对齐到检测框的 28x28 掩码
      let size = RCNN_MASK_SIZE;
      let half = size as f32 / 2.0;
      let masks = (0..num)
        .flat_map(|_| disk(size, size, half, half, half - 2.0))
        .collect();
      let dets = boxes.iter().flat_map(|b| [b[0], b[1], b[2], b[3], 1.0]).collect();
      Ok((
        Tensor::from_f32(&[1, num, size, size], masks)?,
        Tensor::from_f32(&[1, num, 5], dets)?,
      ))
    }
    Convention::SingleStage => {
      // 掩码覆盖整个网络输入，原始框位于掩码坐标系
      let mw = (width as f32 / SINGLE_STAGE_STRIDE).ceil() as usize;
      let mh = (height as f32 / SINGLE_STAGE_STRIDE).ceil() as usize;
      let raw: Vec<[f32; 4]> = boxes
        .iter()
        .map(|b| (*b).map(|v| v / SINGLE_STAGE_STRIDE))
        .collect();
      let masks = raw
        .iter()
        .flat_map(|r| {
          let (cx, cy) = ((r[0] + r[2]) / 2.0, (r[1] + r[3]) / 2.0);
          let radius = (r[2] - r[0]).min(r[3] - r[1]) / 2.0 - 0.5;
          disk(mw, mh, cx, cy, radius)
        })
        .collect();
      let dets = raw.iter().flat_map(|r| [r[0], r[1], r[2], r[3], 1.0]).collect();
      Ok((
        Tensor::from_f32(&[1, num, mh, mw], masks)?,
        Tensor::from_f32(&[1, num, 5], dets)?,
      ))
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("掩码后处理配置: {}", args.config);
  info!("原图尺寸: {}x{}", args.width, args.height);
  info!("输出路径: {}", args.output.display());

  let processor = InstanceMaskProcessorBuilder::from_url(&args.config)?.build()?;

  let (w, h) = (args.width as f32, args.height as f32);
  let boxes = [
    [w * 0.1, h * 0.2, w * 0.4, h * 0.7],
    [w * 0.5, h * 0.1, w * 0.9, h * 0.5],
    [w * 0.45, h * 0.55, w * 0.75, h * 0.95],
  ];
  let (raw_masks, raw_dets) = synthesize(processor.convention(), &boxes, args.width, args.height)?;

  let mut detections: Vec<Detection> = boxes
    .iter()
    .enumerate()
    .map(|(i, b)| Detection::new(i, *b, 0.9, i as u32 * 7))
    .collect();

  processor.process_masks(&mut detections, &raw_masks, &raw_dets, args.width, args.height)?;

  for det in &detections {
    if let Some(mask) = &det.mask {
      let area = mask.image.pixels().filter(|p| p[0] > 0).count();
      info!(
        "检测 {}: 裁剪框 ({}, {}) {}x{}, 前景像素 {}",
        det.index,
        mask.x,
        mask.y,
        mask.width(),
        mask.height(),
        area
      );
    }
  }

  let mut image = RgbImage::from_pixel(args.width, args.height, Rgb([48, 48, 48]));
  MaskOverlay::default().draw_detections(&mut image, &detections);
  image.save(&args.output)?;
  info!("保存图像到文件: {}", args.output.display());

  Ok(())
}
