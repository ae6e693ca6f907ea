// 该文件是 Guanshan（关山月）项目的一部分。
// src/device.rs - 设备运行时抽象
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;

/// 设备侧错误
#[derive(Error, Debug)]
pub enum DeviceError {
  #[error("引擎反序列化失败: {0}")]
  Deserialize(String),
  #[error("设备内存不足: 申请 {0} 字节")]
  OutOfMemory(usize),
  #[error("主机到设备拷贝失败: {0}")]
  CopyToDevice(String),
  #[error("设备到主机拷贝失败: {0}")]
  CopyToHost(String),
  #[error("推理执行失败: {0}")]
  Execute(String),
  #[error("无效的绑定索引: {0}")]
  InvalidBinding(usize),
}

/// 运行时上报的张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
  Float32,
  Float16,
  Int8,
  Int32,
}

/// 绑定方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
  Input,
  Output,
}

/// 设备驻留的原始内存区
pub trait DeviceBuffer {
  fn size(&self) -> usize;
  fn copy_from_host(&mut self, data: &[u8]) -> Result<(), DeviceError>;
  fn copy_to_host(&self, out: &mut [u8]) -> Result<(), DeviceError>;
}

/// 编译模型运行时的抽象。
///
/// 引擎反序列化、设备内存分配与前向执行都是外部能力，
/// 由具体硬件的实现提供；管线各组件只依赖这一接口。
/// 执行是同步阻塞的，绑定缓冲区按引擎定义的索引顺序传入。
pub trait DeviceRuntime {
  type Engine: std::fmt::Debug;
  type Context: std::fmt::Debug;
  type Buffer: DeviceBuffer + std::fmt::Debug;

  fn deserialize_engine(&self, blob: &[u8]) -> Result<Self::Engine, DeviceError>;
  fn create_context(&self, engine: &Self::Engine) -> Result<Self::Context, DeviceError>;
  fn allocate(&self, size: usize) -> Result<Self::Buffer, DeviceError>;

  fn num_bindings(&self, engine: &Self::Engine) -> usize;
  fn binding_name(&self, engine: &Self::Engine, index: usize) -> Result<String, DeviceError>;
  fn binding_dims(
    &self,
    engine: &Self::Engine,
    index: usize,
  ) -> Result<Box<[usize]>, DeviceError>;
  fn binding_type(&self, engine: &Self::Engine, index: usize) -> Result<TensorType, DeviceError>;

  fn execute(
    &self,
    context: &mut Self::Context,
    batch_size: usize,
    bindings: &mut [Self::Buffer],
  ) -> Result<(), DeviceError>;
}

pub mod sim;
pub use self::sim::SimRuntime;
