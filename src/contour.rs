// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/contour.rs - 掩码轮廓提取
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

//! # 轮廓提取
//!
//! 将预测得到的二值掩码转换为 COCO 风格的多边形记录。
//!
//! 每个实例的掩码先在四周补一圈 0，再用 marching squares 在 0.5 等值线上追踪轮廓，
//! 顶点从 `(row, col)` 翻转为 `(x, y)` 并减去补边偏移，最后展平为
//! `[x0, y0, x1, y1, ...]`。一个实例的所有轮廓（不相连的区域、孔洞）都会保留。

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  mask::Bitmap,
  model::{CowLabel, WithLabel},
};

/// 掩码追踪使用的等值线
pub const CONTOUR_LEVEL: f64 = 0.5;

/// `(row, col)` 坐标
pub type Vertex = [f64; 2];

#[derive(Error, Debug)]
pub enum ContourError {
  #[error("实例数量不一致: boxes {boxes}, masks {masks}, class_ids {class_ids}")]
  InstanceCountMismatch {
    boxes: usize,
    masks: usize,
    class_ids: usize,
  },
  #[error("置信度数量 {scores} 与实例数量 {instances} 不一致")]
  ScoreCountMismatch { scores: usize, instances: usize },
  #[error("未知的类别编号: {0}")]
  UnknownClassId(u32),
}

/// 单个实例的轮廓输出记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectContour {
  pub image_id: String,
  /// COCO 多边形列表，每个多边形为展平的 `[x0, y0, x1, y1, ...]`
  pub segmentation: Vec<Vec<f64>>,
  pub category_id: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub conf: Option<f32>,
}

/// 将检测结果转换为轮廓记录。
///
/// `class_names` 以类别编号为下标；名称不是 `estrus`/`anestrus` 的实例会被跳过。
pub fn get_contours<M: AsRef<Bitmap>>(
  image_id: &str,
  boxes: &[[i32; 4]],
  masks: &[M],
  class_ids: &[u32],
  class_names: &[&str],
  scores: Option<&[f32]>,
) -> Result<Vec<ObjectContour>, ContourError> {
  let instances = boxes.len();
  if instances == 0 {
    info!("没有可输出的实例");
    return Ok(Vec::new());
  }
  if masks.len() != instances || class_ids.len() != instances {
    return Err(ContourError::InstanceCountMismatch {
      boxes: instances,
      masks: masks.len(),
      class_ids: class_ids.len(),
    });
  }
  if let Some(scores) = scores
    && scores.len() != instances
  {
    return Err(ContourError::ScoreCountMismatch {
      scores: scores.len(),
      instances,
    });
  }

  let mut object_contour = Vec::with_capacity(instances);
  for (i, (mask, &class_id)) in masks.iter().zip(class_ids).enumerate() {
    let label = class_names
      .get(class_id as usize)
      .ok_or(ContourError::UnknownClassId(class_id))?;
    let Some(category) = CowLabel::from_label_str(label) else {
      warn!("实例 {} 的类别 '{}' 不在输出类别表中，跳过", i, label);
      continue;
    };

    let segmentation = mask_polygons(mask.as_ref());
    debug!(
      "实例 {}: 类别 {}, 轮廓数量 {}",
      i,
      category.to_label_str(),
      segmentation.len()
    );

    object_contour.push(ObjectContour {
      image_id: image_id.to_string(),
      segmentation,
      category_id: category.to_label_id(),
      conf: scores.map(|s| round_score(s[i])),
    });
  }

  Ok(object_contour)
}

fn round_score(score: f32) -> f32 {
  (score * 1000.0).round() / 1000.0
}

/// 追踪单个掩码的全部轮廓，返回展平后的 `(x, y)` 坐标序列
pub fn mask_polygons(mask: &Bitmap) -> Vec<Vec<f64>> {
  let rows = mask.height() as usize + 2;
  let cols = mask.width() as usize + 2;
  let mut padded = vec![0.0; rows * cols];
  for y in 0..mask.height() {
    for x in 0..mask.width() {
      if mask.get(x, y) {
        padded[(y as usize + 1) * cols + (x as usize + 1)] = 1.0;
      }
    }
  }

  find_contours(&padded, rows, cols, CONTOUR_LEVEL)
    .into_iter()
    .map(|verts| {
      verts
        .into_iter()
        .flat_map(|[row, col]| [col - 1.0, row - 1.0])
        .collect()
    })
    .collect()
}

/// 在 `rows × cols` 的标量场上追踪 `level` 等值线（marching squares）。
///
/// 鞍点按低值连通处理；闭合轮廓的首尾顶点相同。
pub fn find_contours(field: &[f64], rows: usize, cols: usize, level: f64) -> Vec<Vec<Vertex>> {
  let segments = contour_segments(field, rows, cols, level);
  assemble_contours(&segments)
}

fn fraction(from: f64, to: f64, level: f64) -> f64 {
  if to == from {
    0.0
  } else {
    (level - from) / (to - from)
  }
}

fn contour_segments(field: &[f64], rows: usize, cols: usize, level: f64) -> Vec<(Vertex, Vertex)> {
  let mut segments = Vec::new();
  if rows < 2 || cols < 2 || field.len() < rows * cols {
    return segments;
  }
  let at = |r: usize, c: usize| field[r * cols + c];

  for r0 in 0..rows - 1 {
    for c0 in 0..cols - 1 {
      let ul = at(r0, c0);
      let ur = at(r0, c0 + 1);
      let ll = at(r0 + 1, c0);
      let lr = at(r0 + 1, c0 + 1);

      let mut square_case = 0u8;
      if ul > level {
        square_case |= 1;
      }
      if ur > level {
        square_case |= 2;
      }
      if ll > level {
        square_case |= 4;
      }
      if lr > level {
        square_case |= 8;
      }
      if square_case == 0 || square_case == 15 {
        continue;
      }

      let (r, c) = (r0 as f64, c0 as f64);
      let top = [r, c + fraction(ul, ur, level)];
      let bottom = [r + 1.0, c + fraction(ll, lr, level)];
      let left = [r + fraction(ul, ll, level), c];
      let right = [r + fraction(ur, lr, level), c + 1.0];

      match square_case {
        1 => segments.push((top, left)),
        2 => segments.push((right, top)),
        3 => segments.push((right, left)),
        4 => segments.push((left, bottom)),
        5 => segments.push((top, bottom)),
        6 => {
          segments.push((right, top));
          segments.push((left, bottom));
        }
        7 => segments.push((right, bottom)),
        8 => segments.push((bottom, right)),
        9 => {
          segments.push((top, left));
          segments.push((bottom, right));
        }
        10 => segments.push((bottom, top)),
        11 => segments.push((bottom, left)),
        12 => segments.push((left, right)),
        13 => segments.push((top, right)),
        14 => segments.push((left, top)),
        _ => {}
      }
    }
  }
  segments
}

fn vertex_key(v: &Vertex) -> (u64, u64) {
  (v[0].to_bits(), v[1].to_bits())
}

/// 把有向线段首尾相接拼成折线，按创建顺序输出
fn assemble_contours(segments: &[(Vertex, Vertex)]) -> Vec<Vec<Vertex>> {
  let mut contours: Vec<Option<VecDeque<Vertex>>> = Vec::new();
  let mut starts: HashMap<(u64, u64), usize> = HashMap::new();
  let mut ends: HashMap<(u64, u64), usize> = HashMap::new();

  for (from, to) in segments {
    if from == to {
      continue;
    }

    let tail = starts.remove(&vertex_key(to));
    let head = ends.remove(&vertex_key(from));

    match (tail, head) {
      (Some(t), Some(h)) if t == h => {
        if let Some(contour) = contours[h].as_mut() {
          contour.push_back(*to);
        }
      }
      (Some(t), Some(h)) => {
        // 合并到编号较小的轮廓
        let (keep, absorbed) = (t.min(h), t.max(h));
        let absorbed_points = contours[absorbed].take().unwrap_or_default();
        if let Some(contour) = contours[keep].as_mut() {
          if keep == h {
            contour.extend(absorbed_points);
          } else {
            for p in absorbed_points.into_iter().rev() {
              contour.push_front(p);
            }
          }
          if let (Some(first), Some(last)) = (contour.front(), contour.back()) {
            starts.insert(vertex_key(first), keep);
            ends.insert(vertex_key(last), keep);
          }
        }
      }
      (None, None) => {
        contours.push(Some(VecDeque::from([*from, *to])));
        let index = contours.len() - 1;
        starts.insert(vertex_key(from), index);
        ends.insert(vertex_key(to), index);
      }
      (Some(t), None) => {
        if let Some(contour) = contours[t].as_mut() {
          contour.push_front(*from);
        }
        starts.insert(vertex_key(from), t);
      }
      (None, Some(h)) => {
        if let Some(contour) = contours[h].as_mut() {
          contour.push_back(*to);
        }
        ends.insert(vertex_key(to), h);
      }
    }
  }

  contours
    .into_iter()
    .flatten()
    .map(Vec::from)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  const CLASS_NAMES: [&str; 3] = ["BG", "anestrus", "estrus"];

  fn points(polygon: &[f64]) -> Vec<(f64, f64)> {
    polygon.chunks(2).map(|p| (p[0], p[1])).collect()
  }

  #[test]
  fn single_pixel_traces_a_closed_diamond() {
    let mask = Bitmap::from_fn(1, 1, |_, _| true);
    let polygons = mask_polygons(&mask);
    assert_eq!(polygons.len(), 1);
    let pts = points(&polygons[0]);
    assert_eq!(pts.len(), 5);
    assert_eq!(pts.first(), pts.last());
    for expected in [(-0.5, 0.0), (0.0, -0.5), (0.5, 0.0), (0.0, 0.5)] {
      assert!(pts.contains(&expected), "missing vertex {:?}", expected);
    }
  }

  #[test]
  fn block_contour_hugs_the_block() {
    let mask = Bitmap::from_fn(10, 8, |x, y| (2..6).contains(&x) && (3..5).contains(&y));
    let polygons = mask_polygons(&mask);
    assert_eq!(polygons.len(), 1);
    let pts = points(&polygons[0]);
    let min_x = pts.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = pts.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = pts.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    assert_eq!((min_x, max_x), (1.5, 5.5));
    assert_eq!((min_y, max_y), (2.5, 4.5));
  }

  #[test]
  fn disjoint_components_are_all_kept() {
    let mask = Bitmap::from_fn(12, 6, |x, y| (1..3).contains(&y) && (x < 3 || x > 8));
    assert_eq!(mask_polygons(&mask).len(), 2);
  }

  #[test]
  fn hole_gets_its_own_ring() {
    let mask = Bitmap::from_fn(7, 7, |x, y| {
      (1..6).contains(&x) && (1..6).contains(&y) && !(x == 3 && y == 3)
    });
    assert_eq!(mask_polygons(&mask).len(), 2);
  }

  #[test]
  fn categories_follow_label_names() {
    let masks = vec![
      Bitmap::from_fn(4, 4, |x, y| x < 2 && y < 2),
      Bitmap::from_fn(4, 4, |x, y| x >= 2 && y >= 2),
    ];
    let boxes = [[0, 0, 2, 2], [2, 2, 4, 4]];
    let records = get_contours(
      "cow-1",
      &boxes,
      &masks,
      &[2, 1],
      &CLASS_NAMES,
      Some(&[0.98765, 0.61234]),
    )
    .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].category_id, 2);
    assert_eq!(records[1].category_id, 1);
    assert_eq!(records[0].image_id, "cow-1");
    assert_eq!(records[0].conf, Some(0.988));
    assert_eq!(records[1].conf, Some(0.612));
  }

  #[test]
  fn unknown_label_is_skipped_and_scores_are_optional() {
    let masks = vec![Bitmap::from_fn(3, 3, |_, _| true); 2];
    let boxes = [[0, 0, 3, 3]; 2];
    let records =
      get_contours("", &boxes, &masks, &[1, 3], &["BG", "anestrus", "estrus", "calf"], None)
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].conf, None);
  }

  #[test]
  fn no_instances_yield_no_records() {
    let masks: [Bitmap; 0] = [];
    let records = get_contours("x", &[], &masks, &[], &CLASS_NAMES, None).unwrap();
    assert!(records.is_empty());
  }

  #[test]
  fn mismatched_counts_are_rejected() {
    let masks = vec![Bitmap::new(2, 2)];
    let err = get_contours("x", &[[0; 4], [0; 4]], &masks, &[1, 2], &CLASS_NAMES, None);
    assert!(matches!(
      err,
      Err(ContourError::InstanceCountMismatch { boxes: 2, masks: 1, .. })
    ));
    let err = get_contours("x", &[[0; 4]], &masks, &[7], &CLASS_NAMES, None);
    assert!(matches!(err, Err(ContourError::UnknownClassId(7))));
  }

  #[test]
  fn record_serializes_without_missing_conf() {
    let record = ObjectContour {
      image_id: "a".into(),
      segmentation: vec![vec![0.5, 1.0, 1.5, 1.0]],
      category_id: 1,
      conf: None,
    };
    let json = serde_json::to_string(&record).unwrap();
    assert_eq!(
      json,
      r#"{"image_id":"a","segmentation":[[0.5,1.0,1.5,1.0]],"category_id":1}"#
    );
  }
}
