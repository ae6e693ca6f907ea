// 该文件是 Guanshan（关山月）项目的一部分。
// src/memory.rs - 设备缓冲池
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::debug;

use crate::device::{DeviceBuffer, DeviceError, DeviceRuntime};
use crate::engine::BindingTable;

#[derive(Error, Debug)]
pub enum MemoryError {
  #[error("设备缓冲区分配失败: {0}")]
  Allocation(DeviceError),
  #[error("绑定索引越界: {0}")]
  OutOfRange(usize),
}

/// 每个绑定一个设备缓冲区，按绑定索引寻址。
/// 缓冲区在进程收尾时随池一起释放。
#[derive(Debug)]
pub struct BufferPool<B> {
  buffers: Vec<B>,
}

impl<B: DeviceBuffer> BufferPool<B> {
  /// 为绑定表的每一项分配 `单样本字节数 × 最大批大小` 的设备内存。
  /// 中途分配失败时，已分配的缓冲区随之全部释放。
  pub fn allocate<R: DeviceRuntime<Buffer = B>>(
    runtime: &R,
    table: &BindingTable,
    max_batch_size: usize,
  ) -> Result<Self, MemoryError> {
    let mut buffers = Vec::with_capacity(table.len());
    for desc in table.iter() {
      let size = desc.per_sample_size * max_batch_size;
      debug!("为绑定 {} ({}) 分配 {} 字节", desc.index, desc.name, size);
      let buffer = runtime.allocate(size).map_err(MemoryError::Allocation)?;
      buffers.push(buffer);
    }
    Ok(BufferPool { buffers })
  }

  pub fn get(&self, index: usize) -> Result<&B, MemoryError> {
    self.buffers.get(index).ok_or(MemoryError::OutOfRange(index))
  }

  pub fn get_mut(&mut self, index: usize) -> Result<&mut B, MemoryError> {
    self
      .buffers
      .get_mut(index)
      .ok_or(MemoryError::OutOfRange(index))
  }

  pub fn as_mut_slice(&mut self) -> &mut [B] {
    &mut self.buffers
  }

  pub fn len(&self) -> usize {
    self.buffers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffers.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::{
    BindingKind, SimRuntime, TensorType,
    sim::{SimBinding, write_engine_blob},
  };
  use crate::engine::BindingTable;
  use std::sync::atomic::Ordering;

  fn sample_table(runtime: &SimRuntime) -> BindingTable {
    let blob = write_engine_blob(
      &[
        SimBinding {
          name: "data".to_string(),
          kind: BindingKind::Input,
          dtype: TensorType::Float32,
          dims: vec![3, 8, 8],
        },
        SimBinding {
          name: "detection_out".to_string(),
          kind: BindingKind::Output,
          dtype: TensorType::Float32,
          dims: vec![4, 7],
        },
      ],
      &[],
    );
    let engine = runtime.deserialize_engine(&blob).unwrap();
    BindingTable::from_engine(runtime, &engine).unwrap()
  }

  #[test]
  fn batch_sizes_scale_linearly() {
    let runtime = SimRuntime::new();
    let table = sample_table(&runtime);

    let single = BufferPool::allocate(&runtime, &table, 1).unwrap();
    let batched = BufferPool::allocate(&runtime, &table, 8).unwrap();

    for index in 0..table.len() {
      let a = single.get(index).unwrap().size();
      let b = batched.get(index).unwrap().size();
      assert_eq!(b, a * 8);
    }
  }

  #[test]
  fn out_of_range_index_rejected() {
    let runtime = SimRuntime::new();
    let table = sample_table(&runtime);
    let pool = BufferPool::allocate(&runtime, &table, 1).unwrap();
    assert!(matches!(pool.get(2), Err(MemoryError::OutOfRange(2))));
  }

  #[test]
  fn partial_failure_releases_allocated_buffers() {
    let runtime = SimRuntime::new();
    let state = runtime.state();
    let table = sample_table(&runtime);

    // 两个绑定，只允许一次分配成功
    state.alloc_budget.store(1, Ordering::SeqCst);
    let err = BufferPool::allocate(&runtime, &table, 1).unwrap_err();
    assert!(matches!(err, MemoryError::Allocation(_)));
    assert_eq!(state.live_buffers.load(Ordering::SeqCst), 0);
  }
}
