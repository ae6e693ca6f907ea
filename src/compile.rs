// 该文件是 Guanshan（关山月）项目的一部分。
// src/compile.rs - 离线引擎编译
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
use tracing::{debug, info};

use crate::device::{
  BindingKind, TensorType,
  sim::{SimBinding, write_engine_blob},
};

#[derive(Error, Debug)]
pub enum CompileError {
  #[error("网络描述解析失败: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("网络描述无效: {0}")]
  Description(String),
}

fn parse_kind(value: Option<&str>, binding: &str) -> Result<BindingKind, CompileError> {
  match value {
    Some("input") => Ok(BindingKind::Input),
    Some("output") => Ok(BindingKind::Output),
    other => Err(CompileError::Description(format!(
      "绑定 {} 的 kind 无效: {:?}",
      binding, other
    ))),
  }
}

fn parse_dtype(value: Option<&str>, binding: &str) -> Result<TensorType, CompileError> {
  match value {
    Some("float32") => Ok(TensorType::Float32),
    Some("float16") => Ok(TensorType::Float16),
    Some("int8") => Ok(TensorType::Int8),
    Some("int32") => Ok(TensorType::Int32),
    other => Err(CompileError::Description(format!(
      "绑定 {} 的 dtype 无效: {:?}",
      binding, other
    ))),
  }
}

/// 把网络拓扑描述（JSON）与权重载荷编译为序列化引擎。
/// 产物只能由配套的仿真运行时反序列化，与引擎格式约定一致。
pub fn compile_network(description: &str, weights: &[u8]) -> Result<Vec<u8>, CompileError> {
  let doc: serde_json::Value = serde_json::from_str(description)?;
  let network_name = doc.get("name").and_then(|v| v.as_str()).unwrap_or("network");
  info!("编译网络: {}", network_name);

  let declared = doc
    .get("bindings")
    .and_then(|v| v.as_array())
    .ok_or_else(|| CompileError::Description("缺少 bindings 数组".to_string()))?;

  let mut bindings = Vec::with_capacity(declared.len());
  for (index, entry) in declared.iter().enumerate() {
    let name = entry
      .get("name")
      .and_then(|v| v.as_str())
      .ok_or_else(|| CompileError::Description(format!("绑定 {} 缺少 name", index)))?;
    let kind = parse_kind(entry.get("kind").and_then(|v| v.as_str()), name)?;
    let dtype = parse_dtype(entry.get("dtype").and_then(|v| v.as_str()), name)?;

    let dims = entry
      .get("dims")
      .and_then(|v| v.as_array())
      .ok_or_else(|| CompileError::Description(format!("绑定 {} 缺少 dims", name)))?
      .iter()
      .map(|d| {
        d.as_u64()
          .filter(|&x| x > 0)
          .map(|x| x as usize)
          .ok_or_else(|| {
            CompileError::Description(format!("绑定 {} 的维度必须为正整数", name))
          })
      })
      .collect::<Result<Vec<_>, _>>()?;
    if dims.is_empty() {
      return Err(CompileError::Description(format!(
        "绑定 {} 的 dims 为空",
        name
      )));
    }

    debug!("绑定 {}: {:?} {:?} {:?}", name, kind, dtype, dims);
    bindings.push(SimBinding {
      name: name.to_string(),
      kind,
      dtype,
      dims,
    });
  }

  if bindings.is_empty() {
    return Err(CompileError::Description(
      "网络至少需要一个绑定".to_string(),
    ));
  }

  info!("序列化引擎, 权重 {} 字节", weights.len());
  Ok(write_engine_blob(&bindings, weights))
}
