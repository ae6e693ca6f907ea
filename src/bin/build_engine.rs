// 该文件是 Guanshan（关山月）项目的一部分。
// src/bin/build_engine.rs - 离线引擎编译程序
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

/// Guanshan 离线引擎编译参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 网络拓扑描述文件 (JSON)
  #[arg(long, value_name = "NETWORK")]
  pub network: String,

  /// 权重文件路径
  #[arg(long, value_name = "WEIGHTS")]
  pub weights: String,

  /// 序列化引擎输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: String,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("网络描述: {}", args.network);
  info!("权重文件: {}", args.weights);
  info!("输出路径: {}", args.output);

  let description = std::fs::read_to_string(&args.network)
    .with_context(|| format!("无法读取网络描述: {}", args.network))?;
  let weights =
    std::fs::read(&args.weights).with_context(|| format!("无法读取权重文件: {}", args.weights))?;

  let blob = guanshan::compile::compile_network(&description, &weights)?;
  std::fs::write(&args.output, &blob)
    .with_context(|| format!("无法写入引擎文件: {}", args.output))?;

  info!("引擎序列化完成, {} 字节", blob.len());
  Ok(())
}
