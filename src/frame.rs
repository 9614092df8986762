// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/frame.rs - 模型输入帧（NHWC）
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

use image::{RgbImage, imageops};
use tracing::debug;

use crate::config::CowConfig;

const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 缩放并补边到正方形的模型输入
#[derive(Debug, Clone)]
pub struct MoldedFrame {
  data: Box<[u8]>,
  size: u32,
  /// 原图在输入中的区域 [y1, x1, y2, x2]，y2/x2 不包含
  window: [u32; 4],
  scale: f64,
  /// 原图尺寸 (高, 宽)
  original: (u32, u32),
}

impl MoldedFrame {
  pub fn from_image(image: &RgbImage, config: &CowConfig) -> Self {
    resize_image(image, config.image_min_dim, config.image_max_dim)
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn window(&self) -> [u32; 4] {
    self.window
  }

  pub fn scale(&self) -> f64 {
    self.scale
  }

  pub fn original_shape(&self) -> (u32, u32) {
    self.original
  }
}

impl AsNhwcFrame for MoldedFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

/// 正方形模式缩放：短边至少 `min_dim`，长边不超过 `max_dim`，再居中补零到 `max_dim²`
pub fn resize_image(image: &RgbImage, min_dim: u32, max_dim: u32) -> MoldedFrame {
  let (w, h) = image.dimensions();
  let original = (h, w);
  let mut canvas = RgbImage::new(max_dim, max_dim);

  if w == 0 || h == 0 {
    return MoldedFrame {
      data: canvas.into_raw().into_boxed_slice(),
      size: max_dim,
      window: [0; 4],
      scale: 1.0,
      original,
    };
  }

  let mut scale = (min_dim as f64 / h.min(w) as f64).max(1.0);
  let image_max = h.max(w) as f64;
  if (image_max * scale).round() > max_dim as f64 {
    scale = max_dim as f64 / image_max;
  }

  let new_h = ((h as f64 * scale).round() as u32).min(max_dim);
  let new_w = ((w as f64 * scale).round() as u32).min(max_dim);
  let top = (max_dim - new_h) / 2;
  let left = (max_dim - new_w) / 2;
  debug!(
    "缩放输入: {}x{} -> {}x{}, scale {:.4}, padding top {} left {}",
    w, h, new_w, new_h, scale, top, left
  );

  if (new_w, new_h) == (w, h) {
    imageops::replace(&mut canvas, image, left as i64, top as i64);
  } else {
    let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
    imageops::replace(&mut canvas, &resized, left as i64, top as i64);
  }

  MoldedFrame {
    data: canvas.into_raw().into_boxed_slice(),
    size: max_dim,
    window: [top, left, top + new_h, left + new_w],
    scale,
    original,
  }
}
