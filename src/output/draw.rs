// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_line_segment_mut},
  rect::Rect,
};

use crate::{
  contour::mask_polygons,
  model::{DetectItem, DetectResult, WithLabel},
  splash::splash_detections,
};

const OUTLINE_THICKNESS: u32 = 2;

/// 彩色溅射，可选地叠加包围盒与轮廓
#[derive(Debug, Clone, Copy)]
pub struct Draw {
  outline: bool,
  thickness: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      outline: false,
      thickness: OUTLINE_THICKNESS,
    }
  }
}

impl Draw {
  pub fn with_outline(mut self, outline: bool) -> Self {
    self.outline = outline;
    self
  }

  pub fn thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  pub fn draw_detection<T: WithLabel>(&self, frame: &RgbImage, result: &DetectResult<T>) -> RgbImage {
    let mut image = splash_detections(frame, result);
    if self.outline {
      for item in result.items.iter() {
        self.draw_outline(&mut image, item);
      }
    }
    image
  }

  fn draw_outline<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let color = Rgb(item.kind.color());
    let [y1, x1, y2, x2] = item.bbox;

    // 边框向内加粗
    for t in 0..self.thickness as i32 {
      let (w, h) = (x2 - x1 - 2 * t, y2 - y1 - 2 * t);
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    for polygon in mask_polygons(&item.mask) {
      let points: Vec<(f32, f32)> = polygon
        .chunks_exact(2)
        .map(|xy| (xy[0] as f32, xy[1] as f32))
        .collect();
      for pair in points.windows(2) {
        draw_line_segment_mut(image, pair[0], pair[1], color);
      }
    }
  }
}
