// 该文件是 Guanshan（关山月）项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;
use url::Url;

/// Guanshan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 序列化引擎文件路径 (ssd:// 方案)
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入图像 (image:// 方案)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出图像 (image:// 方案)
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.3", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 设备缓冲区预留的最大批大小
  #[arg(long, default_value = "1", value_name = "BATCH")]
  pub max_batch_size: usize,
}
