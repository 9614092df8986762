// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/mask.rs - 实例掩码与多边形栅格化
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

use image::{GrayImage, Luma};

const EDGE_EPSILON: f64 = 1e-9;

/// 单个实例的二值掩码（行优先存储）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
  width: u32,
  height: u32,
  data: Box<[bool]>,
}

impl Bitmap {
  pub fn new(width: u32, height: u32) -> Self {
    let data = vec![false; width as usize * height as usize].into_boxed_slice();
    Self {
      width,
      height,
      data,
    }
  }

  pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
    let mut bitmap = Self::new(width, height);
    for y in 0..height {
      for x in 0..width {
        if f(x, y) {
          bitmap.set(x, y, true);
        }
      }
    }
    bitmap
  }

  /// 从灰度图构造，像素值不小于阈值视为前景
  pub fn from_luma(image: &GrayImage, threshold: u8) -> Self {
    Self::from_fn(image.width(), image.height(), |x, y| {
      image.get_pixel(x, y)[0] >= threshold
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  fn index(&self, x: u32, y: u32) -> usize {
    y as usize * self.width as usize + x as usize
  }

  /// 越界读取返回 false
  pub fn get(&self, x: u32, y: u32) -> bool {
    if x >= self.width || y >= self.height {
      return false;
    }
    self.data[self.index(x, y)]
  }

  pub fn set(&mut self, x: u32, y: u32, value: bool) {
    if x < self.width && y < self.height {
      let idx = self.index(x, y);
      self.data[idx] = value;
    }
  }

  /// 前景像素个数
  pub fn count(&self) -> usize {
    self.data.iter().filter(|v| **v).count()
  }

  pub fn is_blank(&self) -> bool {
    !self.data.iter().any(|v| *v)
  }

  pub fn union_with(&mut self, other: &Bitmap) {
    for y in 0..self.height.min(other.height) {
      for x in 0..self.width.min(other.width) {
        if other.get(x, y) {
          self.set(x, y, true);
        }
      }
    }
  }

  /// 包围盒 `[y1, x1, y2, x2]`，y2/x2 不包含；空掩码返回全零
  pub fn bbox(&self) -> [i32; 4] {
    let mut rows = (u32::MAX, 0u32);
    let mut cols = (u32::MAX, 0u32);
    let mut found = false;
    for y in 0..self.height {
      for x in 0..self.width {
        if self.data[self.index(x, y)] {
          found = true;
          rows = (rows.0.min(y), rows.1.max(y));
          cols = (cols.0.min(x), cols.1.max(x));
        }
      }
    }
    if !found {
      return [0; 4];
    }
    [
      rows.0 as i32,
      cols.0 as i32,
      rows.1 as i32 + 1,
      cols.1 as i32 + 1,
    ]
  }

  /// 转为 0/255 灰度图，便于保存为 PNG
  pub fn to_luma(&self) -> GrayImage {
    GrayImage::from_fn(self.width, self.height, |x, y| {
      if self.get(x, y) { Luma([255]) } else { Luma([0]) }
    })
  }
}

impl AsRef<Bitmap> for Bitmap {
  fn as_ref(&self) -> &Bitmap {
    self
  }
}

/// 一张图像的全部实例掩码，相当于 height × width × N 的布尔数组
#[derive(Debug, Clone)]
pub struct InstanceMasks {
  pub height: u32,
  pub width: u32,
  pub masks: Vec<Bitmap>,
  pub class_ids: Vec<i32>,
}

impl InstanceMasks {
  pub fn len(&self) -> usize {
    self.masks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.masks.is_empty()
  }

  /// 把所有实例合并为一层
  pub fn collapse(&self) -> Bitmap {
    collapse(self.width, self.height, self.masks.iter())
  }

  pub fn bboxes(&self) -> Vec<[i32; 4]> {
    extract_bboxes(&self.masks)
  }
}

pub fn collapse<'a>(width: u32, height: u32, masks: impl Iterator<Item = &'a Bitmap>) -> Bitmap {
  let mut merged = Bitmap::new(width, height);
  for mask in masks {
    merged.union_with(mask);
  }
  merged
}

pub fn extract_bboxes(masks: &[Bitmap]) -> Vec<[i32; 4]> {
  masks.iter().map(Bitmap::bbox).collect()
}

/// 将展平的多边形 `[x0, y0, x1, y1, ...]` 栅格化。
///
/// 像素中心 `(c, r)` 落在多边形内部（奇偶规则）或边上即置位，超出图像的部分被裁剪。
pub fn rasterize_polygon(polygon: &[f64], width: u32, height: u32) -> Bitmap {
  let mut bitmap = Bitmap::new(width, height);
  let xs: Vec<f64> = polygon.iter().step_by(2).copied().collect();
  let ys: Vec<f64> = polygon.iter().skip(1).step_by(2).copied().collect();
  let n = xs.len().min(ys.len());
  if n == 0 || width == 0 || height == 0 {
    return bitmap;
  }
  let (xs, ys) = (&xs[..n], &ys[..n]);

  let min_r = ys.iter().copied().fold(f64::INFINITY, f64::min).max(0.0) as i64;
  let max_r = (ys.iter().copied().fold(f64::NEG_INFINITY, f64::max).ceil() as i64)
    .min(height as i64 - 1);
  let min_c = xs.iter().copied().fold(f64::INFINITY, f64::min).max(0.0) as i64;
  let max_c = (xs.iter().copied().fold(f64::NEG_INFINITY, f64::max).ceil() as i64)
    .min(width as i64 - 1);

  for r in min_r..=max_r {
    for c in min_c..=max_c {
      if point_in_polygon(xs, ys, c as f64, r as f64) {
        bitmap.set(c as u32, r as u32, true);
      }
    }
  }
  bitmap
}

fn point_in_polygon(xs: &[f64], ys: &[f64], x: f64, y: f64) -> bool {
  let n = xs.len();
  let mut inside = false;
  let mut j = n - 1;
  for i in 0..n {
    let (xi, yi, xj, yj) = (xs[i], ys[i], xs[j], ys[j]);
    if on_segment(xi, yi, xj, yj, x, y) {
      return true;
    }
    if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
      inside = !inside;
    }
    j = i;
  }
  inside
}

fn on_segment(x1: f64, y1: f64, x2: f64, y2: f64, x: f64, y: f64) -> bool {
  let cross = (x2 - x1) * (y - y1) - (y2 - y1) * (x - x1);
  if cross.abs() > EDGE_EPSILON {
    return false;
  }
  x >= x1.min(x2) - EDGE_EPSILON
    && x <= x1.max(x2) + EDGE_EPSILON
    && y >= y1.min(y2) - EDGE_EPSILON
    && y <= y1.max(y2) + EDGE_EPSILON
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rectangle_includes_its_border() {
    let poly = [10.0, 10.0, 30.0, 10.0, 30.0, 20.0, 10.0, 20.0];
    let mask = rasterize_polygon(&poly, 50, 40);
    assert_eq!(mask.count(), 21 * 11);
    assert!(mask.get(10, 10));
    assert!(mask.get(30, 20));
    assert!(!mask.get(31, 20));
    assert!(!mask.get(9, 15));
    assert_eq!(mask.bbox(), [10, 10, 21, 31]);
  }

  #[test]
  fn triangle_is_filled_below_the_diagonal() {
    let poly = [0.0, 0.0, 8.0, 0.0, 0.0, 8.0];
    let mask = rasterize_polygon(&poly, 10, 10);
    assert!(mask.get(1, 1));
    assert!(mask.get(4, 4));
    assert!(!mask.get(6, 6));
    assert!(!mask.get(9, 9));
  }

  #[test]
  fn polygon_outside_image_is_clipped() {
    let poly = [-5.0, -5.0, 4.0, -5.0, 4.0, 4.0, -5.0, 4.0];
    let mask = rasterize_polygon(&poly, 8, 8);
    assert_eq!(mask.count(), 25);
    assert_eq!(mask.bbox(), [0, 0, 5, 5]);

    let far = [100.0, 100.0, 120.0, 100.0, 120.0, 120.0];
    assert!(rasterize_polygon(&far, 8, 8).is_blank());
  }

  #[test]
  fn empty_polygon_gives_blank_mask() {
    assert!(rasterize_polygon(&[], 4, 4).is_blank());
  }

  #[test]
  fn collapse_and_bboxes() {
    let a = Bitmap::from_fn(6, 6, |x, y| x < 2 && y < 2);
    let b = Bitmap::from_fn(6, 6, |x, y| x >= 4 && y >= 3);
    let masks = InstanceMasks {
      height: 6,
      width: 6,
      masks: vec![a, b, Bitmap::new(6, 6)],
      class_ids: vec![1, 2, 1],
    };
    assert_eq!(masks.collapse().count(), 4 + 6);
    assert_eq!(masks.bboxes(), vec![[0, 0, 2, 2], [3, 4, 6, 6], [0, 0, 0, 0]]);
  }

  #[test]
  fn luma_conversion_keeps_foreground() {
    let mask = Bitmap::from_fn(3, 2, |x, y| x == y);
    let luma = mask.to_luma();
    assert_eq!(luma.get_pixel(1, 1)[0], 255);
    assert_eq!(luma.get_pixel(2, 1)[0], 0);
    assert_eq!(Bitmap::from_luma(&luma, 128), mask);
  }
}
