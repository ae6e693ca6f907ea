// 该文件是 Guanshan（关山月）项目的一部分。
// src/engine.rs - 引擎与绑定描述表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::debug;

use crate::device::{DeviceError, DeviceRuntime, TensorType};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("引擎加载错误: {0}")]
  Load(DeviceError),
  #[error("找不到绑定: {0}")]
  BindingNotFound(String),
  #[error("不支持的张量类型: {0:?}")]
  UnsupportedDataType(TensorType),
}

/// 检测管线实际出现的元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
  Float32,
  Int8,
}

impl ElementType {
  pub fn size_of(self) -> usize {
    match self {
      ElementType::Float32 => 4,
      ElementType::Int8 => 1,
    }
  }
}

impl TryFrom<TensorType> for ElementType {
  type Error = EngineError;

  fn try_from(dtype: TensorType) -> Result<Self, EngineError> {
    match dtype {
      TensorType::Float32 => Ok(ElementType::Float32),
      TensorType::Int8 => Ok(ElementType::Int8),
      other => Err(EngineError::UnsupportedDataType(other)),
    }
  }
}

/// 一个绑定的描述，加载时创建后不再变化。
/// 单样本字节数恒等于元素数乘以元素宽度。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDesc {
  pub index: usize,
  pub name: String,
  pub element_type: ElementType,
  pub element_count: usize,
  pub per_sample_size: usize,
}

/// 按引擎定义的索引顺序枚举全部绑定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingTable {
  descs: Box<[BindingDesc]>,
}

impl BindingTable {
  pub fn from_engine<R: DeviceRuntime>(
    runtime: &R,
    engine: &R::Engine,
  ) -> Result<Self, EngineError> {
    let count = runtime.num_bindings(engine);
    let mut descs = Vec::with_capacity(count);
    for index in 0..count {
      let name = runtime
        .binding_name(engine, index)
        .map_err(EngineError::Load)?;
      let dims = runtime
        .binding_dims(engine, index)
        .map_err(EngineError::Load)?;
      let dtype = runtime
        .binding_type(engine, index)
        .map_err(EngineError::Load)?;
      let element_type = ElementType::try_from(dtype)?;
      let element_count = dims.iter().product::<usize>();
      let per_sample_size = element_count * element_type.size_of();
      debug!(
        "绑定 {}: {} {:?} {} 元素, 单样本 {} 字节",
        index, name, dims, element_count, per_sample_size
      );
      descs.push(BindingDesc {
        index,
        name,
        element_type,
        element_count,
        per_sample_size,
      });
    }
    Ok(BindingTable {
      descs: descs.into_boxed_slice(),
    })
  }

  pub fn index_of(&self, name: &str) -> Result<usize, EngineError> {
    self
      .descs
      .iter()
      .find(|d| d.name == name)
      .map(|d| d.index)
      .ok_or_else(|| EngineError::BindingNotFound(name.to_string()))
  }

  pub fn get(&self, index: usize) -> Option<&BindingDesc> {
    self.descs.get(index)
  }

  pub fn iter(&self) -> impl Iterator<Item = &BindingDesc> {
    self.descs.iter()
  }

  pub fn len(&self) -> usize {
    self.descs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.descs.is_empty()
  }
}

mod loader;
pub use self::loader::{LoadedEngine, load_engine};

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::{BindingKind, SimRuntime, sim::SimBinding, sim::write_engine_blob};

  fn sample_blob() -> Vec<u8> {
    write_engine_blob(
      &[
        SimBinding {
          name: "data".to_string(),
          kind: BindingKind::Input,
          dtype: TensorType::Float32,
          dims: vec![3, 300, 300],
        },
        SimBinding {
          name: "detection_out".to_string(),
          kind: BindingKind::Output,
          dtype: TensorType::Float32,
          dims: vec![200, 7],
        },
      ],
      b"w",
    )
  }

  #[test]
  fn table_enumerates_in_engine_order() {
    let runtime = SimRuntime::new();
    let engine = runtime.deserialize_engine(&sample_blob()).unwrap();
    let table = BindingTable::from_engine(&runtime, &engine).unwrap();

    assert_eq!(table.len(), 2);
    let input = table.get(0).unwrap();
    assert_eq!(input.name, "data");
    assert_eq!(input.element_count, 3 * 300 * 300);
    let output = table.get(1).unwrap();
    assert_eq!(output.name, "detection_out");
    assert_eq!(output.element_count, 200 * 7);
  }

  #[test]
  fn per_sample_size_matches_count_times_width() {
    let runtime = SimRuntime::new();
    let engine = runtime.deserialize_engine(&sample_blob()).unwrap();
    let table = BindingTable::from_engine(&runtime, &engine).unwrap();

    for desc in table.iter() {
      assert_eq!(
        desc.per_sample_size,
        desc.element_count * desc.element_type.size_of()
      );
    }
  }

  #[test]
  fn index_of_resolves_and_rejects() {
    let runtime = SimRuntime::new();
    let engine = runtime.deserialize_engine(&sample_blob()).unwrap();
    let table = BindingTable::from_engine(&runtime, &engine).unwrap();

    assert_eq!(table.index_of("data").unwrap(), 0);
    assert_eq!(table.index_of("detection_out").unwrap(), 1);
    assert!(matches!(
      table.index_of("keep_count"),
      Err(EngineError::BindingNotFound(_))
    ));
  }

  #[test]
  fn unrecognized_type_fails_fast() {
    let blob = write_engine_blob(
      &[SimBinding {
        name: "data".to_string(),
        kind: BindingKind::Input,
        dtype: TensorType::Float16,
        dims: vec![3, 8, 8],
      }],
      &[],
    );
    let runtime = SimRuntime::new();
    let engine = runtime.deserialize_engine(&blob).unwrap();
    let err = BindingTable::from_engine(&runtime, &engine).unwrap_err();
    assert!(matches!(
      err,
      EngineError::UnsupportedDataType(TensorType::Float16)
    ));
  }

  #[test]
  fn element_widths() {
    assert_eq!(ElementType::Float32.size_of(), 4);
    assert_eq!(ElementType::Int8.size_of(), 1);
  }
}
