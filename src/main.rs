// 该文件是 Guanshan（关山月）项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use guanshan::{
  FromUrl,
  config::DetectorConfig,
  device::SimRuntime,
  input::ImageFileInput,
  model::{Model, SsdBuilder},
  output::{Render, SaveImageFileOutput},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("置信度阈值: {}", args.confidence);

  let config = DetectorConfig {
    score_threshold: args.confidence,
    max_batch_size: args.max_batch_size,
    ..DetectorConfig::default()
  };

  let input = ImageFileInput::from_url(&args.input)?;
  // 仿真运行时；接入真实硬件时替换为对应的 DeviceRuntime 实现
  let mut model = SsdBuilder::from_url(&args.model)?
    .config(config)
    .build(SimRuntime::new())?;
  let output = SaveImageFileOutput::from_url(&args.output)?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  for frame in input {
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    info!("检测到 {} 个物体", result.items.len());
    output.render_result(&frame, &result)?;
  }

  Ok(())
}
