// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/splash.rs - 彩色溅射效果
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

use chrono::Local;
use image::{Rgb, RgbImage};

use crate::{mask::Bitmap, model::DetectResult};

const LUMA_WEIGHTS: [f64; 3] = [0.2125, 0.7154, 0.0721];

pub fn grayscale(pixel: &Rgb<u8>) -> Rgb<u8> {
  let [r, g, b] = pixel.0;
  let gray = LUMA_WEIGHTS[0] * r as f64 + LUMA_WEIGHTS[1] * g as f64 + LUMA_WEIGHTS[2] * b as f64;
  let value = gray.clamp(0.0, 255.0) as u8;
  Rgb([value, value, value])
}

/// 掩码覆盖的像素保留原色，其余变为灰度
pub fn color_splash(image: &RgbImage, mask: &Bitmap) -> RgbImage {
  RgbImage::from_fn(image.width(), image.height(), |x, y| {
    let pixel = image.get_pixel(x, y);
    if mask.get(x, y) { *pixel } else { grayscale(pixel) }
  })
}

/// 合并全部实例后做彩色溅射；没有实例时整幅图为灰度
pub fn splash_detections<T>(image: &RgbImage, result: &DetectResult<T>) -> RgbImage {
  color_splash(image, &result.collapsed_mask())
}

/// `splash_<时间戳>.<扩展名>`
pub fn splash_file_name(extension: &str) -> String {
  format!("splash_{}.{}", Local::now().format("%Y%m%dT%H%M%S"), extension)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{CowLabel, DetectItem};

  #[test]
  fn masked_pixels_keep_color() {
    let image = RgbImage::from_pixel(4, 4, Rgb([200, 0, 0]));
    let mask = Bitmap::from_fn(4, 4, |x, _| x < 2);
    let splash = color_splash(&image, &mask);
    assert_eq!(splash.get_pixel(0, 0), &Rgb([200, 0, 0]));
    assert_eq!(splash.get_pixel(3, 3), &Rgb([42, 42, 42]));
  }

  #[test]
  fn no_detections_gives_gray_frame() {
    let image = RgbImage::from_pixel(3, 2, Rgb([0, 100, 0]));
    let result: DetectResult<CowLabel> = DetectResult::empty(3, 2);
    let splash = splash_detections(&image, &result);
    assert!(splash.pixels().all(|p| p == &Rgb([71, 71, 71])));
  }

  #[test]
  fn union_of_instances_is_kept() {
    let image = RgbImage::from_pixel(4, 1, Rgb([0, 0, 200]));
    let item = |x: u32| DetectItem {
      kind: CowLabel::Estrus,
      score: 0.9,
      bbox: [0, x as i32, 1, x as i32 + 1],
      mask: Bitmap::from_fn(4, 1, move |px, _| px == x),
    };
    let result = DetectResult {
      width: 4,
      height: 1,
      items: vec![item(0), item(2)].into_boxed_slice(),
    };
    let splash = splash_detections(&image, &result);
    assert_eq!(splash.get_pixel(0, 0), &Rgb([0, 0, 200]));
    assert_eq!(splash.get_pixel(1, 0), &Rgb([14, 14, 14]));
    assert_eq!(splash.get_pixel(2, 0), &Rgb([0, 0, 200]));
  }

  #[test]
  fn file_name_has_timestamp() {
    let name = splash_file_name("png");
    assert!(name.starts_with("splash_"));
    assert!(name.ends_with(".png"));
    // splash_YYYYMMDDTHHMMSS.png
    assert_eq!(name.len(), "splash_".len() + 15 + ".png".len());
    assert_eq!(&name[15..16], "T");
  }
}
