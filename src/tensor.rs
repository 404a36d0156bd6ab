// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - 推理输出张量定义
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
  Float32,
  Float16,
  Int8,
  UInt8,
  Int32,
  Int64,
}

impl std::fmt::Display for TensorType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      TensorType::Float32 => "f32",
      TensorType::Float16 => "f16",
      TensorType::Int8 => "i8",
      TensorType::UInt8 => "u8",
      TensorType::Int32 => "i32",
      TensorType::Int64 => "i64",
    };
    f.write_str(name)
  }
}

/// 张量元素存储，`Float16` 以原始位模式保存
#[derive(Debug, Clone)]
pub enum TensorData {
  Float32(Box<[f32]>),
  Float16(Box<[u16]>),
  Int8(Box<[i8]>),
  UInt8(Box<[u8]>),
  Int32(Box<[i32]>),
  Int64(Box<[i64]>),
}

impl TensorData {
  pub fn len(&self) -> usize {
    match self {
      TensorData::Float32(data) => data.len(),
      TensorData::Float16(data) => data.len(),
      TensorData::Int8(data) => data.len(),
      TensorData::UInt8(data) => data.len(),
      TensorData::Int32(data) => data.len(),
      TensorData::Int64(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn tensor_type(&self) -> TensorType {
    match self {
      TensorData::Float32(_) => TensorType::Float32,
      TensorData::Float16(_) => TensorType::Float16,
      TensorData::Int8(_) => TensorType::Int8,
      TensorData::UInt8(_) => TensorType::UInt8,
      TensorData::Int32(_) => TensorType::Int32,
      TensorData::Int64(_) => TensorType::Int64,
    }
  }
}

#[derive(Error, Debug)]
pub enum TensorError {
  #[error("张量形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 行优先布局的推理输出张量
#[derive(Debug, Clone)]
pub struct Tensor {
  shape: Box<[usize]>,
  data: TensorData,
}

impl Tensor {
  pub fn new(shape: &[usize], data: TensorData) -> Result<Self, TensorError> {
    let expected = shape.iter().product::<usize>();
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape: shape.into(),
      data,
    })
  }

  pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::Float32(data.into_boxed_slice()))
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn rank(&self) -> usize {
    self.shape.len()
  }

  pub fn tensor_type(&self) -> TensorType {
    self.data.tensor_type()
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.data {
      TensorData::Float32(data) => Some(data),
      _ => None,
    }
  }
}
