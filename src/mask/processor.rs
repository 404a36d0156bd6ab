// 该文件是 Shanan （山南西风） 项目的一部分。
// src/mask/processor.rs - 实例掩码后处理流程
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

use std::time::Instant;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::{Detection, ImageSize, InstanceMask},
  mask::{
    AffineSolver, BilinearWarp, Convention, DEFAULT_MASK_THRESHOLD, MaskError, MaskView,
    WarpAffine, binarize,
  },
  tensor::{Tensor, TensorType},
};

const MASK_SCHEME: &str = "mask";
const MASK_TENSOR_RANK: usize = 4;
const DETS_TENSOR_RANK: usize = 3;
const DETS_MIN_CHANNELS: usize = 4;
const BATCH_SIZE: usize = 1;

const THRESHOLD_KEY: &str = "mask_thr_binary";
const RCNN_KEY: &str = "rcnn";

/// 掩码后处理配置，在流水线构建时确定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskConfig {
  pub mask_thr_binary: f32,
  pub convention: Convention,
}

impl Default for MaskConfig {
  fn default() -> Self {
    Self {
      mask_thr_binary: DEFAULT_MASK_THRESHOLD,
      convention: Convention::TwoStage,
    }
  }
}

impl MaskConfig {
  /// 从模型部署配置中的 `params` 对象读取
  ///
  /// 含有 `rcnn` 键时使用两阶段约定，否则使用单阶段约定。
  pub fn from_params(params: &serde_json::Value) -> Result<Self, MaskError> {
    let params = params
      .as_object()
      .ok_or_else(|| MaskError::Config(format!("params 必须是对象, 实际为: {}", params)))?;

    let mut config = MaskConfig::default();
    if let Some(value) = params.get(THRESHOLD_KEY) {
      config.mask_thr_binary = value.as_f64().ok_or_else(|| {
        MaskError::Config(format!("{} 必须是数值, 实际为: {}", THRESHOLD_KEY, value))
      })? as f32;
    }
    config.convention = if params.contains_key(RCNN_KEY) {
      Convention::TwoStage
    } else {
      Convention::SingleStage
    };

    Ok(config)
  }
}

impl FromUrlWithScheme for MaskConfig {
  const SCHEME: &'static str = MASK_SCHEME;
}

impl FromUrl for MaskConfig {
  type Error = MaskError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(MaskError::Config(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut config = MaskConfig {
      convention: Convention::SingleStage,
      ..MaskConfig::default()
    };
    for (k, v) in url.query_pairs() {
      if k == THRESHOLD_KEY {
        config.mask_thr_binary = v
          .parse::<f32>()
          .map_err(|e| MaskError::Config(format!("无法解析 {}={}: {}", THRESHOLD_KEY, v, e)))?;
      } else if k == RCNN_KEY {
        config.convention = Convention::TwoStage;
      }
    }

    Ok(config)
  }
}

pub struct InstanceMaskProcessorBuilder<W = BilinearWarp> {
  config: MaskConfig,
  warp: W,
}

impl Default for InstanceMaskProcessorBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl InstanceMaskProcessorBuilder {
  pub fn new() -> Self {
    Self {
      config: MaskConfig::default(),
      warp: BilinearWarp,
    }
  }
}

impl FromUrl for InstanceMaskProcessorBuilder {
  type Error = MaskError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(Self::new().config(MaskConfig::from_url(url)?))
  }
}

impl<W> InstanceMaskProcessorBuilder<W> {
  pub fn config(mut self, config: MaskConfig) -> Self {
    self.config = config;
    self
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.config.mask_thr_binary = threshold;
    self
  }

  pub fn convention(mut self, convention: Convention) -> Self {
    self.config.convention = convention;
    self
  }

  /// 替换重采样后端
  pub fn warp<V: WarpAffine>(self, warp: V) -> InstanceMaskProcessorBuilder<V> {
    InstanceMaskProcessorBuilder {
      config: self.config,
      warp,
    }
  }

  pub fn build(self) -> Result<InstanceMaskProcessor<W>, MaskError>
  where
    W: WarpAffine,
  {
    if !self.config.mask_thr_binary.is_finite() {
      error!("掩码二值化阈值无效: {}", self.config.mask_thr_binary);
      return Err(MaskError::Config(format!(
        "掩码二值化阈值无效: {}",
        self.config.mask_thr_binary
      )));
    }

    info!(
      "掩码后处理: 约定 {:?}, 二值化阈值 {}",
      self.config.convention, self.config.mask_thr_binary
    );

    Ok(InstanceMaskProcessor {
      solver: AffineSolver::new(self.config.convention),
      threshold: self.config.mask_thr_binary,
      warp: self.warp,
    })
  }
}

/// 校验后的批次输入，去掉了批次维度
struct Batch<'a> {
  masks: &'a [f32],
  mask_width: u32,
  mask_height: u32,
  boxes: &'a [f32],
  box_channels: usize,
}

impl<'a> Batch<'a> {
  fn validate(
    detections: &[Detection],
    raw_masks: &'a Tensor,
    raw_detections: &'a Tensor,
    image: ImageSize,
  ) -> Result<Self, MaskError> {
    // masks: [batch, num_detections, mask_height, mask_width]
    if raw_masks.rank() != MASK_TENSOR_RANK || raw_masks.tensor_type() != TensorType::Float32 {
      error!(
        "不支持的 masks 张量, 形状: {:?}, 类型: {}",
        raw_masks.shape(),
        raw_masks.tensor_type()
      );
      return Err(MaskError::UnsupportedInput(format!(
        "masks 张量必须是 {} 维 f32, 实际形状 {:?}, 类型 {}",
        MASK_TENSOR_RANK,
        raw_masks.shape(),
        raw_masks.tensor_type()
      )));
    }

    // dets: [batch, num_detections, channels]
    if raw_detections.rank() != DETS_TENSOR_RANK
      || raw_detections.tensor_type() != TensorType::Float32
    {
      error!(
        "不支持的 dets 张量, 形状: {:?}, 类型: {}",
        raw_detections.shape(),
        raw_detections.tensor_type()
      );
      return Err(MaskError::UnsupportedInput(format!(
        "dets 张量必须是 {} 维 f32, 实际形状 {:?}, 类型 {}",
        DETS_TENSOR_RANK,
        raw_detections.shape(),
        raw_detections.tensor_type()
      )));
    }

    let (mask_shape, dets_shape) = (raw_masks.shape(), raw_detections.shape());
    if mask_shape[0] != BATCH_SIZE || dets_shape[0] != BATCH_SIZE {
      error!(
        "批次大小必须为 {}, masks: {}, dets: {}",
        BATCH_SIZE, mask_shape[0], dets_shape[0]
      );
      return Err(MaskError::unsupported("批次大小必须为 1"));
    }

    let num = mask_shape[1];
    if dets_shape[1] != num {
      error!("masks 有 {} 个检测, dets 有 {} 个检测", num, dets_shape[1]);
      return Err(MaskError::UnsupportedInput(format!(
        "masks 与 dets 检测数量不一致: {} != {}",
        num, dets_shape[1]
      )));
    }

    if dets_shape[2] < DETS_MIN_CHANNELS {
      error!("dets 通道数 {} 少于 {}", dets_shape[2], DETS_MIN_CHANNELS);
      return Err(MaskError::unsupported("dets 每行至少需要 4 个坐标"));
    }

    let mask_height = u32::try_from(mask_shape[2]).ok().filter(|&h| h > 0);
    let mask_width = u32::try_from(mask_shape[3]).ok().filter(|&w| w > 0);
    let (Some(mask_height), Some(mask_width)) = (mask_height, mask_width) else {
      error!("掩码尺寸无效: {}x{}", mask_shape[3], mask_shape[2]);
      return Err(MaskError::UnsupportedInput(format!(
        "掩码尺寸无效: {}x{}",
        mask_shape[3], mask_shape[2]
      )));
    };

    if detections.len() > num {
      error!("检测数量 {} 多于张量中的 {}", detections.len(), num);
      return Err(MaskError::UnsupportedInput(format!(
        "检测数量 {} 多于张量中的 {}",
        detections.len(),
        num
      )));
    }

    if let Some(det) = detections.iter().find(|det| det.index >= num) {
      error!("检测索引 {} 超出范围 {}", det.index, num);
      return Err(MaskError::UnsupportedInput(format!(
        "检测索引 {} 超出范围 {}",
        det.index, num
      )));
    }

    if image.width == 0 || image.height == 0 {
      error!("原图尺寸无效: {}x{}", image.width, image.height);
      return Err(MaskError::UnsupportedInput(format!(
        "原图尺寸无效: {}x{}",
        image.width, image.height
      )));
    }

    let (Some(masks), Some(boxes)) = (raw_masks.as_f32(), raw_detections.as_f32()) else {
      return Err(MaskError::unsupported("张量元素类型必须为 f32"));
    };

    Ok(Self {
      masks,
      mask_width,
      mask_height,
      boxes,
      box_channels: dets_shape[2],
    })
  }

  fn mask(&self, index: usize) -> Result<MaskView<'a>, MaskError> {
    let plane = self.mask_width as usize * self.mask_height as usize;
    let data = &self.masks[index * plane..(index + 1) * plane];
    MaskView::from_raw(self.mask_width, self.mask_height, data)
      .ok_or_else(|| MaskError::failed("掩码切片长度与形状不一致"))
  }

  fn raw_box(&self, index: usize) -> [f32; 4] {
    let row = &self.boxes[index * self.box_channels..];
    [row[0], row[1], row[2], row[3]]
  }
}

/// 将网络输出的逐检测掩码还原为原图坐标下的二值掩码
pub struct InstanceMaskProcessor<W = BilinearWarp> {
  solver: AffineSolver,
  threshold: f32,
  warp: W,
}

impl<W: WarpAffine> InstanceMaskProcessor<W> {
  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn convention(&self) -> Convention {
    self.solver.convention()
  }

  /// 为每个检测计算掩码并写入 `Detection::mask`
  ///
  /// `raw_masks` 形状为 `[1, N, H, W]`，`raw_detections` 形状为 `[1, N, >=4]`，
  /// 均为 f32。输入校验失败返回 [`MaskError::UnsupportedInput`]，
  /// 任一检测处理失败返回 [`MaskError::OperationFailed`]；出错时不修改任何检测。
  pub fn process_masks(
    &self,
    detections: &mut [Detection],
    raw_masks: &Tensor,
    raw_detections: &Tensor,
    image_width: u32,
    image_height: u32,
  ) -> Result<(), MaskError> {
    debug!("masks.shape: {:?}", raw_masks.shape());
    debug!("dets.shape: {:?}", raw_detections.shape());

    let start = Instant::now();
    let image = ImageSize::new(image_width, image_height);
    let batch = Batch::validate(detections, raw_masks, raw_detections, image)?;

    #[cfg(feature = "parallel")]
    let masks = {
      use rayon::prelude::*;
      detections
        .par_iter()
        .map(|det| self.process_one(det, &batch, image))
        .collect::<Result<Vec<_>, _>>()?
    };

    #[cfg(not(feature = "parallel"))]
    let masks = detections
      .iter()
      .map(|det| self.process_one(det, &batch, image))
      .collect::<Result<Vec<_>, _>>()?;

    for (det, mask) in detections.iter_mut().zip(masks) {
      det.mask = Some(mask);
    }

    info!(
      "掩码后处理完成: {} 个检测, 耗时: {:.2?}",
      detections.len(),
      start.elapsed()
    );
    Ok(())
  }

  fn process_one(
    &self,
    det: &Detection,
    batch: &Batch<'_>,
    image: ImageSize,
  ) -> Result<InstanceMask, MaskError> {
    let mask = batch.mask(det.index)?;
    let raw_box = batch.raw_box(det.index);

    let (transform, crop) = match self.solver.solve(
      &det.bbox,
      batch.mask_width,
      batch.mask_height,
      Some(&raw_box),
      image,
    ) {
      Ok(solved) => solved,
      Err(MaskError::InvalidGeometry(bbox)) => {
        // 退化框仍是有效检测，给出空掩码
        warn!("检测 {} 的检测框退化: {:?}, 输出空掩码", det.index, bbox);
        let crop = AffineSolver::crop_box(&det.bbox, image);
        return Ok(InstanceMask::empty_at(crop.x, crop.y));
      }
      Err(e) => return Err(e),
    };

    debug!(
      "检测 {}: 掩码 {}x{}, 裁剪框 {:?}, 变换 {:?}",
      det.index,
      batch.mask_width,
      batch.mask_height,
      crop,
      transform.matrix()
    );

    if crop.is_empty() {
      return Ok(InstanceMask::empty_at(crop.x, crop.y));
    }

    let warped = self
      .warp
      .warp_affine(&mask, &transform, crop.width, crop.height)
      .map_err(|e| {
        error!("检测 {} 重采样失败: {}", det.index, e);
        MaskError::OperationFailed(e.to_string())
      })?;

    Ok(InstanceMask {
      x: crop.x,
      y: crop.y,
      image: binarize(&warped, self.threshold),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_from_url() {
    let url = Url::parse("mask://?mask_thr_binary=0.35&rcnn").unwrap();
    let config = MaskConfig::from_url(&url).unwrap();
    assert_eq!(config.mask_thr_binary, 0.35);
    assert_eq!(config.convention, Convention::TwoStage);

    let url = Url::parse("mask://").unwrap();
    let config = MaskConfig::from_url(&url).unwrap();
    assert_eq!(config.mask_thr_binary, DEFAULT_MASK_THRESHOLD);
    assert_eq!(config.convention, Convention::SingleStage);
  }

  #[test]
  fn config_from_url_rejects_bad_input() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(matches!(
      MaskConfig::from_url(&url),
      Err(MaskError::Config(_))
    ));

    let url = Url::parse("mask://?mask_thr_binary=half").unwrap();
    assert!(matches!(
      MaskConfig::from_url(&url),
      Err(MaskError::Config(_))
    ));
  }

  #[test]
  fn config_from_params() {
    let params = serde_json::json!({ "mask_thr_binary": 0.6, "rcnn": {} });
    let config = MaskConfig::from_params(&params).unwrap();
    assert!((config.mask_thr_binary - 0.6).abs() < 1e-6);
    assert_eq!(config.convention, Convention::TwoStage);

    let params = serde_json::json!({});
    let config = MaskConfig::from_params(&params).unwrap();
    assert_eq!(config.mask_thr_binary, DEFAULT_MASK_THRESHOLD);
    assert_eq!(config.convention, Convention::SingleStage);

    assert!(MaskConfig::from_params(&serde_json::json!([1, 2])).is_err());
    assert!(MaskConfig::from_params(&serde_json::json!({ "mask_thr_binary": "x" })).is_err());
  }

  #[test]
  fn builder_applies_settings() {
    let processor = InstanceMaskProcessorBuilder::new()
      .threshold(0.3)
      .convention(Convention::SingleStage)
      .build()
      .unwrap();
    assert_eq!(processor.threshold(), 0.3);
    assert_eq!(processor.convention(), Convention::SingleStage);

    let url = Url::parse("mask://?rcnn").unwrap();
    let processor = InstanceMaskProcessorBuilder::from_url(&url)
      .unwrap()
      .build()
      .unwrap();
    assert_eq!(processor.convention(), Convention::TwoStage);
  }

  #[test]
  fn builder_rejects_non_finite_threshold() {
    let result = InstanceMaskProcessorBuilder::new().threshold(f32::NAN).build();
    assert!(matches!(result, Err(MaskError::Config(_))));
  }

  #[test]
  fn raw_box_reads_first_four_channels() {
    let masks = Tensor::from_f32(&[1, 2, 1, 1], vec![0.0; 2]).unwrap();
    let dets = Tensor::from_f32(
      &[1, 2, 5],
      vec![1.0, 2.0, 3.0, 4.0, 0.9, 5.0, 6.0, 7.0, 8.0, 0.8],
    )
    .unwrap();
    let batch = Batch::validate(&[], &masks, &dets, ImageSize::new(10, 10)).unwrap();
    assert_eq!(batch.raw_box(0), [1.0, 2.0, 3.0, 4.0]);
    assert_eq!(batch.raw_box(1), [5.0, 6.0, 7.0, 8.0]);
  }
}
