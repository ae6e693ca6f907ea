// 该文件是 Guanshan（关山月）项目的一部分。
// src/engine/loader.rs - 引擎加载
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

use tracing::{debug, info};

use crate::device::DeviceRuntime;
use crate::engine::{BindingTable, EngineError};

/// 一次加载的完整产物：引擎句柄、执行上下文与绑定描述表。
/// 三者要么全部有效，要么一个都不返回。
#[derive(Debug)]
pub struct LoadedEngine<R: DeviceRuntime> {
  pub engine: R::Engine,
  pub context: R::Context,
  pub table: BindingTable,
}

pub fn load_engine<R: DeviceRuntime>(
  runtime: &R,
  blob: &[u8],
) -> Result<LoadedEngine<R>, EngineError> {
  debug!("反序列化引擎, {} 字节", blob.len());
  let engine = runtime
    .deserialize_engine(blob)
    .map_err(EngineError::Load)?;

  let table = BindingTable::from_engine(runtime, &engine)?;

  let context = runtime
    .create_context(&engine)
    .map_err(EngineError::Load)?;

  info!("引擎加载完成, 共 {} 个绑定", table.len());
  Ok(LoadedEngine {
    engine,
    context,
    table,
  })
}
