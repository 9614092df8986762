// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/model/unmold.rs - 模型输出还原
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

//! 把模型在正方形输入上的检测结果还原到原图坐标。
//!
//! 检测表每行为 `(y1, x1, y2, x2, class_id, score)`，坐标相对输入归一化；
//! 掩码表形状为 `[N, mask_h, mask_w, num_classes]`。

use image::{ImageBuffer, Luma, imageops};
use tracing::{debug, warn};

use crate::{
  config::CowConfig,
  frame::MoldedFrame,
  mask::Bitmap,
  model::{CowLabel, DetectItem, DetectResult, WithLabel},
};

pub const DETECTION_ROW: usize = 6;
pub const MASK_THRESHOLD: f32 = 0.5;

pub type MaskProbability = ImageBuffer<Luma<f32>, Vec<f32>>;

pub fn unmold_detections(
  detections: &[f32],
  masks: &[f32],
  frame: &MoldedFrame,
  config: &CowConfig,
) -> DetectResult<CowLabel> {
  let (height, width) = frame.original_shape();
  let [mask_h, mask_w] = config.mask_shape;
  let num_classes = config.num_classes as usize;
  let mask_len = mask_h as usize * mask_w as usize * num_classes;

  let window = normalized_window(frame.window(), frame.size());
  let (wh, ww) = (window[2] - window[0], window[3] - window[1]);
  let scale = [
    (height as f64 - 1.0).max(0.0),
    (width as f64 - 1.0).max(0.0),
  ];

  let mut items = Vec::new();
  for (i, row) in detections
    .chunks_exact(DETECTION_ROW)
    .take(config.detection_max_instances)
    .enumerate()
  {
    let class_id = row[4].round() as i64;
    if class_id <= 0 {
      // 之后全是补零的行
      break;
    }
    let score = row[5];
    if score < config.detection_min_confidence {
      continue;
    }
    let Some(kind) = CowLabel::from_label_id(class_id as u32) else {
      warn!("检测 {}: 未知类别 {}", i, class_id);
      continue;
    };

    let shifted = [
      (row[0] as f64 - window[0]) / wh,
      (row[1] as f64 - window[1]) / ww,
      (row[2] as f64 - window[0]) / wh,
      (row[3] as f64 - window[1]) / ww,
    ];
    let bbox = [
      ((shifted[0] * scale[0]).round() as i32).clamp(0, height as i32),
      ((shifted[1] * scale[1]).round() as i32).clamp(0, width as i32),
      ((shifted[2] * scale[0] + 1.0).round() as i32).clamp(0, height as i32),
      ((shifted[3] * scale[1] + 1.0).round() as i32).clamp(0, width as i32),
    ];
    if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
      debug!("检测 {}: 面积为零，丢弃 {:?}", i, bbox);
      continue;
    }

    let Some(probabilities) = masks.get(i * mask_len..(i + 1) * mask_len) else {
      warn!("掩码输出长度不足，停止于第 {} 个检测", i);
      break;
    };
    let channel = class_id as usize;
    let small = MaskProbability::from_fn(mask_w, mask_h, |x, y| {
      let idx = (y as usize * mask_w as usize + x as usize) * num_classes + channel;
      Luma([probabilities.get(idx).copied().unwrap_or(0.0)])
    });

    items.push(DetectItem {
      kind,
      score,
      bbox,
      mask: unmold_mask(&small, bbox, width, height),
    });
  }

  debug!("还原后检测数量: {}", items.len());
  DetectResult {
    width,
    height,
    items: items.into_boxed_slice(),
  }
}

/// 把小尺寸概率掩码缩放到包围盒大小，阈值化后贴回原图尺寸
pub fn unmold_mask(mask: &MaskProbability, bbox: [i32; 4], width: u32, height: u32) -> Bitmap {
  let mut full = Bitmap::new(width, height);
  let [y1, x1, y2, x2] = bbox;
  if y2 <= y1 || x2 <= x1 {
    return full;
  }
  let (box_h, box_w) = ((y2 - y1) as u32, (x2 - x1) as u32);
  let resized = imageops::resize(mask, box_w, box_h, imageops::FilterType::Triangle);
  for y in 0..box_h {
    for x in 0..box_w {
      if resized.get_pixel(x, y)[0] >= MASK_THRESHOLD {
        full.set(x1 as u32 + x, y1 as u32 + y, true);
      }
    }
  }
  full
}

fn normalized_window(window: [u32; 4], size: u32) -> [f64; 4] {
  let denom = (size as f64 - 1.0).max(1.0);
  [
    window[0] as f64 / denom,
    window[1] as f64 / denom,
    (window[2] as f64 - 1.0) / denom,
    (window[3] as f64 - 1.0) / denom,
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::resize_image;
  use image::RgbImage;

  fn test_config() -> CowConfig {
    CowConfig {
      image_min_dim: 64,
      image_max_dim: 128,
      mask_shape: [4, 4],
      ..CowConfig::for_inference()
    }
  }

  fn masks_for(rows: usize, config: &CowConfig, value: f32) -> Vec<f32> {
    let [h, w] = config.mask_shape;
    vec![value; rows * (h * w) as usize * config.num_classes as usize]
  }

  #[test]
  fn window_box_maps_back_to_whole_image() {
    let config = test_config();
    let frame = resize_image(&RgbImage::new(100, 50), 64, 128);
    let detections: [f32; 12] = [
      32.0 / 127.0, 0.0, 95.0 / 127.0, 1.0, 2.0, 0.95,
      0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
    ];
    let result = unmold_detections(&detections, &masks_for(2, &config, 0.9), &frame, &config);
    assert_eq!(result.len(), 1);
    let item = &result.items[0];
    assert_eq!(item.kind, CowLabel::Estrus);
    assert_eq!(item.bbox, [0, 0, 50, 100]);
    assert_eq!(item.mask.count(), 50 * 100);
    assert_eq!((result.width, result.height), (100, 50));
  }

  #[test]
  fn low_scores_padding_and_empty_boxes_are_dropped() {
    let config = test_config();
    let frame = resize_image(&RgbImage::new(100, 50), 64, 128);
    let detections: [f32; 30] = [
      0.3, 0.1, 0.6, 0.5, 1.0, 0.4, // 置信度不足
      0.6, 0.5, 0.3, 0.1, 1.0, 0.9, // 退化框
      0.3, 0.1, 0.6, 0.5, 1.0, 0.8, // 保留
      0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // 补零
      0.3, 0.1, 0.6, 0.5, 2.0, 0.9, // 补零之后不再读取
    ];
    let result = unmold_detections(&detections, &masks_for(5, &config, 0.9), &frame, &config);
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].kind, CowLabel::Anestrus);
    assert!((result.items[0].score - 0.8).abs() < 1e-6);
  }

  #[test]
  fn mask_below_threshold_stays_empty() {
    let mask = MaskProbability::from_pixel(4, 4, Luma([0.2]));
    let full = unmold_mask(&mask, [2, 2, 6, 8], 10, 10);
    assert!(full.is_blank());

    let mask = MaskProbability::from_pixel(4, 4, Luma([0.8]));
    let full = unmold_mask(&mask, [2, 2, 6, 8], 10, 10);
    assert_eq!(full.count(), 4 * 6);
    assert_eq!(full.bbox(), [2, 2, 6, 8]);
  }
}
