// 该文件是 Guanshan（关山月）项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::model::{DetectItem, DetectResult, PixelRect};

// 绘制常量
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const THICKNESS_DIVISOR: u32 = 250;

pub struct Draw {
  box_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Draw {
      box_color: BOX_COLOR,
    }
  }
}

impl Draw {
  /// 线宽随图像宽度缩放，最小为 1
  fn thickness(width: u32) -> u32 {
    (width / THICKNESS_DIVISOR).max(1)
  }

  // 从外向内逐圈描边
  fn draw_rect(&self, image: &mut RgbImage, rect: &PixelRect) {
    let thickness = Self::thickness(image.width());
    for t in 0..thickness as i32 {
      let x1 = rect.x1 + t;
      let y1 = rect.y1 + t;
      let x2 = rect.x2 - t;
      let y2 = rect.y2 - t;
      if x2 <= x1 || y2 <= y1 {
        break;
      }
      let ring = Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32);
      draw_hollow_rect_mut(image, ring, Rgb(self.box_color));
    }
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for DetectItem { rect, .. } in result.items.iter() {
      self.draw_rect(image, rect);
    }
  }

  /// 在原图副本上绘制检测框
  pub fn draw_detections(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut canvas = image.clone();
    self.draw_detections_on_image(&mut canvas, result);
    canvas
  }
}
