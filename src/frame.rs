// 该文件是 Guanshan（关山月）项目的一部分。
// src/frame.rs - 平面 f32 帧定义
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

use image::{
  RgbImage,
  imageops::{self, FilterType},
};

const RGB_CHANNELS: usize = 3;

// SSD Caffe 权重按 BGR 通道训练，拆分时逆序排列
const BGR_PLANE_ORDER: [usize; RGB_CHANNELS] = [2, 1, 0];

/// 平面排布的 f32 帧：每个通道的整幅平面连续存放，
/// 平面内按行主序，像素值保持 0-255 范围。
#[derive(Debug, Clone)]
pub struct PlanarFrame {
  data: Box<[f32]>,
  width: usize,
  height: usize,
}

impl PlanarFrame {
  /// 将图像缩放（而非裁剪）到目标尺寸并逐通道拆分。
  /// 缩放使用双线性插值，各通道独立处理。
  pub fn from_image(image: &RgbImage, width: u32, height: u32) -> Self {
    let resized = if image.dimensions() == (width, height) {
      image.clone()
    } else {
      imageops::resize(image, width, height, FilterType::Triangle)
    };

    let (w, h) = (width as usize, height as usize);
    let plane = w * h;
    let mut data = vec![0f32; plane * RGB_CHANNELS];

    for (slot, &channel) in BGR_PLANE_ORDER.iter().enumerate() {
      let offset = slot * plane;
      for y in 0..h {
        for x in 0..w {
          let pixel = resized.get_pixel(x as u32, y as u32);
          data[offset + y * w + x] = pixel[channel] as f32;
        }
      }
    }

    PlanarFrame {
      data: data.into_boxed_slice(),
      width: w,
      height: h,
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_planes(&self) -> &[f32] {
    &self.data
  }

  /// 单样本字节数
  pub fn byte_len(&self) -> usize {
    self.data.len() * std::mem::size_of::<f32>()
  }

  /// 按设备期望的字节布局导出
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(self.byte_len());
    for value in self.data.iter() {
      bytes.extend_from_slice(&value.to_ne_bytes());
    }
    bytes
  }
}
