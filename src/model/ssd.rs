// 该文件是 Guanshan（关山月）项目的一部分。
// src/model/ssd.rs - SSD 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl,
  config::{ConfigError, DetectorConfig},
  device::{DeviceBuffer, DeviceError, DeviceRuntime},
  engine::{BindingTable, EngineError, LoadedEngine, load_engine},
  frame::PlanarFrame,
  memory::{BufferPool, MemoryError},
  model::{DetectItem, DetectResult, DetectionTable, Model, PixelRect},
};

#[derive(Error, Debug)]
pub enum SsdError {
  #[error("引擎文件读取失败: {0}")]
  EngineRead(std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("配置无效: {0}")]
  Config(#[from] ConfigError),
  #[error("引擎错误: {0}")]
  Engine(#[from] EngineError),
  #[error("缓冲区错误: {0}")]
  Memory(#[from] MemoryError),
  #[error("张量尺寸不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("主机与设备间拷贝失败: {0}")]
  Transfer(DeviceError),
  #[error("推理执行失败: {0}")]
  Execution(DeviceError),
}

impl From<std::io::Error> for SsdError {
  fn from(err: std::io::Error) -> Self {
    SsdError::EngineRead(err)
  }
}

const SSD_SCHEME: &str = "ssd";

pub struct SsdBuilder {
  engine_path: String,
  config: DetectorConfig,
}

impl FromUrl for SsdBuilder {
  type Error = SsdError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != SSD_SCHEME {
      return Err(SsdError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        SSD_SCHEME
      )));
    }

    Ok(SsdBuilder {
      engine_path: url.path().to_string(),
      config: DetectorConfig::default(),
    })
  }
}

impl SsdBuilder {
  pub fn config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build<R: DeviceRuntime>(self, runtime: R) -> Result<Ssd<R>, SsdError> {
    info!("加载引擎文件: {}", self.engine_path);
    let blob = std::fs::read(&self.engine_path)?;
    debug!(
      "引擎文件大小: {:.2} MB",
      blob.len() as f64 / (1024.0 * 1024.0)
    );
    Ssd::from_blob(runtime, &blob, self.config)
  }
}

/// 单飞检测管线：加载期确定的绑定表与设备缓冲池在请求间复用，
/// 同一时刻只允许一个在途请求，由 &mut self 约束。
#[derive(Debug)]
pub struct Ssd<R: DeviceRuntime> {
  runtime: R,
  engine: R::Engine,
  context: R::Context,
  table: BindingTable,
  pool: BufferPool<R::Buffer>,
  input_index: usize,
  output_index: usize,
  input_size: usize,
  output_size: usize,
  config: DetectorConfig,
}

impl<R: DeviceRuntime> Ssd<R> {
  pub fn from_blob(runtime: R, blob: &[u8], config: DetectorConfig) -> Result<Self, SsdError> {
    config.validate()?;

    let LoadedEngine {
      engine,
      context,
      table,
    } = load_engine(&runtime, blob)?;

    let input_index = table.index_of(&config.input_binding)?;
    let output_index = table.index_of(&config.output_binding)?;

    // 启动期先校验绑定尺寸，再申请设备内存
    let input_size = config.input_sample_size();
    let output_size = config.output_sample_size();
    check_binding_size(&table, input_index, input_size)?;
    check_binding_size(&table, output_index, output_size)?;
    debug!(
      "输入绑定 {} ({} 字节), 输出绑定 {} ({} 字节)",
      input_index, input_size, output_index, output_size
    );

    let pool = BufferPool::allocate(&runtime, &table, config.max_batch_size)?;
    info!("设备缓冲区就绪, 共 {} 个绑定", pool.len());

    Ok(Ssd {
      runtime,
      engine,
      context,
      table,
      pool,
      input_index,
      output_index,
      input_size,
      output_size,
      config,
    })
  }

  pub fn engine(&self) -> &R::Engine {
    &self.engine
  }

  pub fn binding_table(&self) -> &BindingTable {
    &self.table
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }
}

fn check_binding_size(
  table: &BindingTable,
  index: usize,
  expected: usize,
) -> Result<(), SsdError> {
  let declared = table
    .get(index)
    .map(|desc| desc.per_sample_size)
    .ok_or(MemoryError::OutOfRange(index))?;
  if declared != expected {
    return Err(SsdError::ShapeMismatch {
      expected,
      actual: declared,
    });
  }
  Ok(())
}

impl<R: DeviceRuntime> Model for Ssd<R> {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = SsdError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("预处理输入图像 {}x{}", input.width(), input.height());
    let frame = PlanarFrame::from_image(input, self.config.input_width, self.config.input_height);
    let bytes = frame.to_bytes();

    // 任何设备传输前的前置校验
    if bytes.len() != self.input_size {
      return Err(SsdError::ShapeMismatch {
        expected: self.input_size,
        actual: bytes.len(),
      });
    }

    debug!("拷贝输入张量到设备, {} 字节", bytes.len());
    self
      .pool
      .get_mut(self.input_index)?
      .copy_from_host(&bytes)
      .map_err(SsdError::Transfer)?;

    // 单张图像推理，批大小固定为 1
    debug!("执行前向推理");
    self
      .runtime
      .execute(&mut self.context, 1, self.pool.as_mut_slice())
      .map_err(SsdError::Execution)?;

    debug!("拷贝输出张量回主机, {} 字节", self.output_size);
    let mut out = vec![0u8; self.output_size];
    self
      .pool
      .get(self.output_index)?
      .copy_to_host(&mut out)
      .map_err(SsdError::Transfer)?;

    let table = DetectionTable::from_bytes(&out, self.config.max_objects, self.config.object_fields);
    let result = postprocess(
      &table,
      input.width(),
      input.height(),
      self.config.score_threshold,
    );
    debug!("检测到 {} 个物体", result.items.len());
    Ok(result)
  }
}

/// 将检测表过滤并换算为像素空间边界框。
/// 每行独立按 `置信度 > 阈值` 过滤，保持原有行序，不排序。
pub fn postprocess(
  table: &DetectionTable,
  width: u32,
  height: u32,
  threshold: f32,
) -> DetectResult {
  let mut items = Vec::new();
  for row in table.rows() {
    if row.score <= threshold {
      continue;
    }
    items.push(DetectItem {
      label: row.label as u32,
      score: row.score,
      rect: PixelRect::from_normalized(&row.bbox, width, height),
    });
  }
  DetectResult {
    items: items.into_boxed_slice(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::{
    BindingKind, SimRuntime, TensorType,
    sim::{SimBinding, write_engine_blob},
  };
  use std::sync::atomic::Ordering;

  const TEST_W: u32 = 8;
  const TEST_H: u32 = 8;
  const TEST_OBJECTS: usize = 4;

  fn test_blob() -> Vec<u8> {
    write_engine_blob(
      &[
        SimBinding {
          name: "data".to_string(),
          kind: BindingKind::Input,
          dtype: TensorType::Float32,
          dims: vec![3, TEST_H as usize, TEST_W as usize],
        },
        SimBinding {
          name: "detection_out".to_string(),
          kind: BindingKind::Output,
          dtype: TensorType::Float32,
          dims: vec![TEST_OBJECTS, 7],
        },
      ],
      b"weights",
    )
  }

  fn test_config() -> DetectorConfig {
    DetectorConfig {
      input_width: TEST_W,
      input_height: TEST_H,
      max_objects: TEST_OBJECTS,
      ..DetectorConfig::default()
    }
  }

  fn row(score: f32, bbox: [f32; 4]) -> Vec<f32> {
    vec![0.0, 1.0, score, bbox[0], bbox[1], bbox[2], bbox[3]]
  }

  fn rows_to_bytes(rows: &[Vec<f32>]) -> Vec<u8> {
    rows
      .iter()
      .flatten()
      .flat_map(|v| v.to_ne_bytes())
      .collect()
  }

  fn table_of(scores: &[f32]) -> DetectionTable {
    let rows: Vec<Vec<f32>> = scores
      .iter()
      .map(|&s| row(s, [0.1, 0.1, 0.2, 0.2]))
      .collect();
    DetectionTable::from_bytes(&rows_to_bytes(&rows), rows.len(), 7)
  }

  #[test]
  fn threshold_filter_is_strict_and_stable() {
    let table = table_of(&[0.1, 0.3, 0.35, 0.9]);
    let result = postprocess(&table, 100, 100, 0.3);

    let scores: Vec<f32> = result.items.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.35, 0.9]);
  }

  #[test]
  fn postprocess_clips_to_image_bounds() {
    let rows = vec![row(0.9, [-0.025, 0.25, 1.125, 1.5])];
    let table = DetectionTable::from_bytes(&rows_to_bytes(&rows), 1, 7);
    let result = postprocess(&table, 400, 300, 0.3);

    assert_eq!(result.items.len(), 1);
    assert_eq!(
      result.items[0].rect,
      PixelRect {
        x1: 0,
        y1: 75,
        x2: 400,
        y2: 300
      }
    );
  }

  #[test]
  fn infer_returns_filtered_detections() {
    let runtime = SimRuntime::new();
    let state = runtime.state();
    let canned = rows_to_bytes(&[
      row(0.9, [0.0, 0.0, 0.5, 0.5]),
      row(0.1, [0.0, 0.0, 1.0, 1.0]),
      row(0.6, [0.25, 0.25, 0.75, 0.75]),
      row(0.0, [0.0, 0.0, 0.0, 0.0]),
    ]);
    state.set_canned_output(1, canned);

    let mut model = Ssd::from_blob(runtime, &test_blob(), test_config()).unwrap();
    let image = RgbImage::new(100, 100);
    let result = model.infer(&image).unwrap();

    let scores: Vec<f32> = result.items.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.9, 0.6]);
    assert_eq!(
      result.items[0].rect,
      PixelRect {
        x1: 0,
        y1: 0,
        x2: 50,
        y2: 50
      }
    );
  }

  #[test]
  fn zeroed_output_yields_no_detections() {
    let runtime = SimRuntime::new();
    let mut model = Ssd::from_blob(runtime, &test_blob(), test_config()).unwrap();
    let image = RgbImage::new(32, 32);
    let result = model.infer(&image).unwrap();
    assert!(result.items.is_empty());
  }

  #[test]
  fn shape_mismatch_before_any_device_transfer() {
    let runtime = SimRuntime::new();
    let state = runtime.state();

    // 配置的输入尺寸与引擎声明不一致
    let config = DetectorConfig {
      input_width: 16,
      input_height: 16,
      max_objects: TEST_OBJECTS,
      ..DetectorConfig::default()
    };
    let err = Ssd::from_blob(runtime, &test_blob(), config).unwrap_err();

    assert!(matches!(err, SsdError::ShapeMismatch { .. }));
    assert_eq!(state.h2d_copies.load(Ordering::SeqCst), 0);
    assert_eq!(state.executions.load(Ordering::SeqCst), 0);
    // 尺寸校验先于缓冲区分配
    assert_eq!(state.live_buffers.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn missing_binding_is_reported() {
    let runtime = SimRuntime::new();
    let config = DetectorConfig {
      output_binding: "keep_count".to_string(),
      input_width: TEST_W,
      input_height: TEST_H,
      max_objects: TEST_OBJECTS,
      ..DetectorConfig::default()
    };
    let err = Ssd::from_blob(runtime, &test_blob(), config).unwrap_err();
    assert!(matches!(
      err,
      SsdError::Engine(EngineError::BindingNotFound(_))
    ));
  }

  #[test]
  fn input_transfer_failure_aborts_before_execute() {
    let runtime = SimRuntime::new();
    let state = runtime.state();
    let mut model = Ssd::from_blob(runtime, &test_blob(), test_config()).unwrap();

    state.fail_h2d.store(true, Ordering::SeqCst);
    let err = model.infer(&RgbImage::new(32, 32)).unwrap_err();

    assert!(matches!(err, SsdError::Transfer(DeviceError::CopyToDevice(_))));
    assert_eq!(state.executions.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn execution_failure_skips_output_copy() {
    let runtime = SimRuntime::new();
    let state = runtime.state();
    let mut model = Ssd::from_blob(runtime, &test_blob(), test_config()).unwrap();

    state.fail_execute.store(true, Ordering::SeqCst);
    let err = model.infer(&RgbImage::new(32, 32)).unwrap_err();

    assert!(matches!(err, SsdError::Execution(DeviceError::Execute(_))));
    assert_eq!(state.d2h_copies.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn output_transfer_failure_yields_no_result() {
    let runtime = SimRuntime::new();
    let state = runtime.state();
    state.set_canned_output(1, rows_to_bytes(&[row(0.9, [0.0, 0.0, 1.0, 1.0])]));
    let mut model = Ssd::from_blob(runtime, &test_blob(), test_config()).unwrap();

    state.fail_d2h.store(true, Ordering::SeqCst);
    let err = model.infer(&RgbImage::new(32, 32)).unwrap_err();

    // 输出拷贝失败后不产生任何检测结果
    assert!(matches!(err, SsdError::Transfer(DeviceError::CopyToHost(_))));
    assert_eq!(state.executions.load(Ordering::SeqCst), 1);

    // 故障清除后同一管线可以继续服务
    state.fail_d2h.store(false, Ordering::SeqCst);
    let result = model.infer(&RgbImage::new(32, 32)).unwrap();
    assert_eq!(result.items.len(), 1);
  }

  #[test]
  fn builder_rejects_wrong_scheme() {
    let url = Url::parse("file:///tmp/engine.bin").unwrap();
    assert!(matches!(
      SsdBuilder::from_url(&url),
      Err(SsdError::ModelPathError(_))
    ));
  }
}
