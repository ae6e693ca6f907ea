// 该文件是 Guanshan（关山月）项目的一部分。
// src/config.rs - 检测管线配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;

const DEFAULT_INPUT_BINDING: &str = "data";
const DEFAULT_OUTPUT_BINDING: &str = "detection_out";
const DEFAULT_INPUT_W: u32 = 300;
const DEFAULT_INPUT_H: u32 = 300;
const DEFAULT_INPUT_C: u32 = 3;
const DEFAULT_MAX_OBJECTS: usize = 200;
const DEFAULT_OBJECT_FIELDS: usize = 7;
const DEFAULT_SCORE_THRESH: f32 = 0.3;
const DEFAULT_MAX_BATCH: usize = 1;

/// 检测管线配置，由外围程序提供
#[derive(Debug, Clone)]
pub struct DetectorConfig {
  /// 输入绑定名称
  pub input_binding: String,
  /// 输出绑定名称
  pub output_binding: String,
  /// 模型输入宽度
  pub input_width: u32,
  /// 模型输入高度
  pub input_height: u32,
  /// 模型输入通道数
  pub input_channels: u32,
  /// 检测表最大行数
  pub max_objects: usize,
  /// 检测表每行字段数
  pub object_fields: usize,
  /// 置信度阈值
  pub score_threshold: f32,
  /// 设备缓冲区按此批大小预留
  pub max_batch_size: usize,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    DetectorConfig {
      input_binding: DEFAULT_INPUT_BINDING.to_string(),
      output_binding: DEFAULT_OUTPUT_BINDING.to_string(),
      input_width: DEFAULT_INPUT_W,
      input_height: DEFAULT_INPUT_H,
      input_channels: DEFAULT_INPUT_C,
      max_objects: DEFAULT_MAX_OBJECTS,
      object_fields: DEFAULT_OBJECT_FIELDS,
      score_threshold: DEFAULT_SCORE_THRESH,
      max_batch_size: DEFAULT_MAX_BATCH,
    }
  }
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("批大小必须不小于 1")]
  BatchSize,
  #[error("输入尺寸必须非零")]
  InputShape,
  #[error("仅支持 3 通道输入, 实际 {0}")]
  Channels(u32),
  #[error("检测行字段数至少为 7, 实际 {0}")]
  ObjectFields(usize),
  #[error("最大目标数必须非零")]
  MaxObjects,
}

impl DetectorConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_batch_size < 1 {
      return Err(ConfigError::BatchSize);
    }
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::InputShape);
    }
    if self.input_channels != 3 {
      return Err(ConfigError::Channels(self.input_channels));
    }
    if self.object_fields < 7 {
      return Err(ConfigError::ObjectFields(self.object_fields));
    }
    if self.max_objects == 0 {
      return Err(ConfigError::MaxObjects);
    }
    Ok(())
  }

  /// 输入绑定单样本字节数
  pub fn input_sample_size(&self) -> usize {
    (self.input_width * self.input_height * self.input_channels) as usize
      * std::mem::size_of::<f32>()
  }

  /// 输出绑定单样本字节数
  pub fn output_sample_size(&self) -> usize {
    self.max_objects * self.object_fields * std::mem::size_of::<f32>()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    let config = DetectorConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.input_binding, "data");
    assert_eq!(config.output_binding, "detection_out");
    assert_eq!(config.input_sample_size(), 300 * 300 * 3 * 4);
    assert_eq!(config.output_sample_size(), 200 * 7 * 4);
  }

  #[test]
  fn zero_batch_rejected() {
    let config = DetectorConfig {
      max_batch_size: 0,
      ..DetectorConfig::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::BatchSize)));
  }

  #[test]
  fn narrow_rows_rejected() {
    let config = DetectorConfig {
      object_fields: 6,
      ..DetectorConfig::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::ObjectFields(6))));
  }
}
