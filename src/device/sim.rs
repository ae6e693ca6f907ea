// 该文件是 Guanshan（关山月）项目的一部分。
// src/device/sim.rs - 仿真设备运行时
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

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use tracing::debug;

use crate::device::{BindingKind, DeviceBuffer, DeviceError, DeviceRuntime, TensorType};

// 引擎文件格式:
//   魔数 "GSE1" | u16 版本 | u16 绑定数
//   每个绑定: u8 方向 | u8 类型标签 | u8 维数 | u8 名称长度 | 名称 | u32 × 维数
//   u64 权重长度 | 权重载荷
const ENGINE_MAGIC: &[u8; 4] = b"GSE1";
const ENGINE_VERSION: u16 = 1;

/// 仿真引擎中的绑定声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBinding {
  pub name: String,
  pub kind: BindingKind,
  pub dtype: TensorType,
  pub dims: Vec<usize>,
}

fn type_tag(dtype: TensorType) -> u8 {
  match dtype {
    TensorType::Float32 => 0,
    TensorType::Float16 => 1,
    TensorType::Int8 => 2,
    TensorType::Int32 => 3,
  }
}

fn type_from_tag(tag: u8) -> Option<TensorType> {
  match tag {
    0 => Some(TensorType::Float32),
    1 => Some(TensorType::Float16),
    2 => Some(TensorType::Int8),
    3 => Some(TensorType::Int32),
    _ => None,
  }
}

/// 将绑定表与权重载荷序列化为引擎文件
pub fn write_engine_blob(bindings: &[SimBinding], weights: &[u8]) -> Vec<u8> {
  let mut blob = Vec::new();
  blob.extend_from_slice(ENGINE_MAGIC);
  blob.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
  blob.extend_from_slice(&(bindings.len() as u16).to_le_bytes());
  for binding in bindings {
    blob.push(match binding.kind {
      BindingKind::Input => 0,
      BindingKind::Output => 1,
    });
    blob.push(type_tag(binding.dtype));
    blob.push(binding.dims.len() as u8);
    blob.push(binding.name.len() as u8);
    blob.extend_from_slice(binding.name.as_bytes());
    for &extent in &binding.dims {
      blob.extend_from_slice(&(extent as u32).to_le_bytes());
    }
  }
  blob.extend_from_slice(&(weights.len() as u64).to_le_bytes());
  blob.extend_from_slice(weights);
  blob
}

struct Cursor<'a> {
  data: &'a [u8],
  pos: usize,
}

impl<'a> Cursor<'a> {
  fn take(&mut self, n: usize) -> Result<&'a [u8], DeviceError> {
    if n > self.data.len() - self.pos {
      return Err(DeviceError::Deserialize(format!(
        "引擎文件截断: 偏移 {} 处需要 {} 字节",
        self.pos, n
      )));
    }
    let slice = &self.data[self.pos..self.pos + n];
    self.pos += n;
    Ok(slice)
  }

  fn take_u8(&mut self) -> Result<u8, DeviceError> {
    Ok(self.take(1)?[0])
  }

  fn take_u16(&mut self) -> Result<u16, DeviceError> {
    let s = self.take(2)?;
    Ok(u16::from_le_bytes([s[0], s[1]]))
  }

  fn take_u32(&mut self) -> Result<u32, DeviceError> {
    let s = self.take(4)?;
    Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
  }

  fn take_u64(&mut self) -> Result<u64, DeviceError> {
    let s = self.take(8)?;
    Ok(u64::from_le_bytes([
      s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
    ]))
  }
}

fn parse_engine_blob(blob: &[u8]) -> Result<Vec<SimBinding>, DeviceError> {
  let mut cur = Cursor { data: blob, pos: 0 };

  if cur.take(4)? != ENGINE_MAGIC {
    return Err(DeviceError::Deserialize("引擎文件魔数不匹配".to_string()));
  }
  let version = cur.take_u16()?;
  if version != ENGINE_VERSION {
    return Err(DeviceError::Deserialize(format!(
      "引擎版本不兼容: {}",
      version
    )));
  }

  let count = cur.take_u16()? as usize;
  let mut bindings = Vec::with_capacity(count);
  for _ in 0..count {
    let kind = match cur.take_u8()? {
      0 => BindingKind::Input,
      1 => BindingKind::Output,
      other => {
        return Err(DeviceError::Deserialize(format!(
          "无效的绑定方向: {}",
          other
        )));
      }
    };
    let dtype = type_from_tag(cur.take_u8()?)
      .ok_or_else(|| DeviceError::Deserialize("无效的张量类型标签".to_string()))?;
    let ndims = cur.take_u8()? as usize;
    let name_len = cur.take_u8()? as usize;
    let name = String::from_utf8(cur.take(name_len)?.to_vec())
      .map_err(|_| DeviceError::Deserialize("绑定名称不是合法 UTF-8".to_string()))?;
    let mut dims = Vec::with_capacity(ndims);
    for _ in 0..ndims {
      dims.push(cur.take_u32()? as usize);
    }
    bindings.push(SimBinding {
      name,
      kind,
      dtype,
      dims,
    });
  }

  // 权重载荷只校验长度，内容对仿真执行无意义
  let weights_len = cur.take_u64()? as usize;
  cur.take(weights_len)?;

  Ok(bindings)
}

/// 仿真运行时的可观测状态
#[derive(Debug)]
pub struct SimState {
  pub h2d_copies: AtomicUsize,
  pub d2h_copies: AtomicUsize,
  pub executions: AtomicUsize,
  pub live_buffers: AtomicUsize,
  pub fail_h2d: AtomicBool,
  pub fail_d2h: AtomicBool,
  pub fail_execute: AtomicBool,
  /// 剩余可成功的分配次数，usize::MAX 表示不限制
  pub alloc_budget: AtomicUsize,
  canned: Mutex<HashMap<usize, Vec<u8>>>,
}

impl Default for SimState {
  fn default() -> Self {
    SimState {
      h2d_copies: AtomicUsize::new(0),
      d2h_copies: AtomicUsize::new(0),
      executions: AtomicUsize::new(0),
      live_buffers: AtomicUsize::new(0),
      fail_h2d: AtomicBool::new(false),
      fail_d2h: AtomicBool::new(false),
      fail_execute: AtomicBool::new(false),
      alloc_budget: AtomicUsize::new(usize::MAX),
      canned: Mutex::new(HashMap::new()),
    }
  }
}

impl SimState {
  /// 预置某个输出绑定在下次执行时写入的内容
  pub fn set_canned_output(&self, index: usize, bytes: Vec<u8>) {
    let mut canned = self.canned.lock().unwrap_or_else(|e| e.into_inner());
    canned.insert(index, bytes);
  }
}

/// 主机内存仿真运行时。
///
/// 反序列化本仓库离线编译器产出的引擎文件，前向执行把输出绑定
/// 填充为预置内容（默认全零）。无硬件环境下用于开发与测试。
#[derive(Debug)]
pub struct SimRuntime {
  state: Arc<SimState>,
}

impl SimRuntime {
  pub fn new() -> Self {
    SimRuntime {
      state: Arc::new(SimState::default()),
    }
  }

  /// 观测句柄，供测试检查拷贝与执行次数、注入故障
  pub fn state(&self) -> Arc<SimState> {
    Arc::clone(&self.state)
  }
}

impl Default for SimRuntime {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug)]
pub struct SimEngine {
  bindings: Vec<SimBinding>,
}

#[derive(Debug)]
pub struct SimContext {
  bindings: Vec<SimBinding>,
}

#[derive(Debug)]
pub struct SimBuffer {
  data: Vec<u8>,
  state: Arc<SimState>,
}

impl Drop for SimBuffer {
  fn drop(&mut self) {
    self.state.live_buffers.fetch_sub(1, Ordering::SeqCst);
  }
}

impl DeviceBuffer for SimBuffer {
  fn size(&self) -> usize {
    self.data.len()
  }

  fn copy_from_host(&mut self, data: &[u8]) -> Result<(), DeviceError> {
    if self.state.fail_h2d.load(Ordering::SeqCst) {
      return Err(DeviceError::CopyToDevice("注入的拷贝故障".to_string()));
    }
    if data.len() > self.data.len() {
      return Err(DeviceError::CopyToDevice(format!(
        "长度 {} 超过缓冲区 {}",
        data.len(),
        self.data.len()
      )));
    }
    self.data[..data.len()].copy_from_slice(data);
    self.state.h2d_copies.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn copy_to_host(&self, out: &mut [u8]) -> Result<(), DeviceError> {
    if self.state.fail_d2h.load(Ordering::SeqCst) {
      return Err(DeviceError::CopyToHost("注入的拷贝故障".to_string()));
    }
    if out.len() > self.data.len() {
      return Err(DeviceError::CopyToHost(format!(
        "长度 {} 超过缓冲区 {}",
        out.len(),
        self.data.len()
      )));
    }
    out.copy_from_slice(&self.data[..out.len()]);
    self.state.d2h_copies.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

impl DeviceRuntime for SimRuntime {
  type Engine = SimEngine;
  type Context = SimContext;
  type Buffer = SimBuffer;

  fn deserialize_engine(&self, blob: &[u8]) -> Result<SimEngine, DeviceError> {
    let bindings = parse_engine_blob(blob)?;
    debug!("仿真引擎就绪, {} 个绑定", bindings.len());
    Ok(SimEngine { bindings })
  }

  fn create_context(&self, engine: &SimEngine) -> Result<SimContext, DeviceError> {
    Ok(SimContext {
      bindings: engine.bindings.clone(),
    })
  }

  fn allocate(&self, size: usize) -> Result<SimBuffer, DeviceError> {
    let budget = self.state.alloc_budget.load(Ordering::SeqCst);
    if budget == 0 {
      return Err(DeviceError::OutOfMemory(size));
    }
    if budget != usize::MAX {
      self.state.alloc_budget.store(budget - 1, Ordering::SeqCst);
    }
    self.state.live_buffers.fetch_add(1, Ordering::SeqCst);
    Ok(SimBuffer {
      data: vec![0u8; size],
      state: Arc::clone(&self.state),
    })
  }

  fn num_bindings(&self, engine: &SimEngine) -> usize {
    engine.bindings.len()
  }

  fn binding_name(&self, engine: &SimEngine, index: usize) -> Result<String, DeviceError> {
    engine
      .bindings
      .get(index)
      .map(|b| b.name.clone())
      .ok_or(DeviceError::InvalidBinding(index))
  }

  fn binding_dims(&self, engine: &SimEngine, index: usize) -> Result<Box<[usize]>, DeviceError> {
    engine
      .bindings
      .get(index)
      .map(|b| b.dims.clone().into_boxed_slice())
      .ok_or(DeviceError::InvalidBinding(index))
  }

  fn binding_type(&self, engine: &SimEngine, index: usize) -> Result<TensorType, DeviceError> {
    engine
      .bindings
      .get(index)
      .map(|b| b.dtype)
      .ok_or(DeviceError::InvalidBinding(index))
  }

  fn execute(
    &self,
    context: &mut SimContext,
    _batch_size: usize,
    bindings: &mut [SimBuffer],
  ) -> Result<(), DeviceError> {
    if self.state.fail_execute.load(Ordering::SeqCst) {
      return Err(DeviceError::Execute("注入的执行故障".to_string()));
    }
    if bindings.len() != context.bindings.len() {
      return Err(DeviceError::Execute(format!(
        "绑定数量不匹配: 期望 {}, 实际 {}",
        context.bindings.len(),
        bindings.len()
      )));
    }

    let canned = self.state.canned.lock().unwrap_or_else(|e| e.into_inner());
    for (index, meta) in context.bindings.iter().enumerate() {
      if meta.kind != BindingKind::Output {
        continue;
      }
      let buffer = &mut bindings[index];
      match canned.get(&index) {
        Some(bytes) => {
          let n = bytes.len().min(buffer.data.len());
          buffer.data[..n].copy_from_slice(&bytes[..n]);
        }
        // 无预置内容时输出清零
        None => buffer.data.fill(0),
      }
    }

    self.state.executions.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}
