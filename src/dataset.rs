// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/dataset.rs - 牛只标注数据集
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

//! 读取 `<dataset>/<subset>/<subset>_answer.json` 形式的多边形标注，
//! 并按需把多边形栅格化为实例掩码。

use std::{
  collections::HashMap,
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  mask::{self, InstanceMasks},
  model::{CowLabel, WithLabel},
};

#[derive(Error, Debug)]
pub enum DatasetError {
  #[error("未知的数据子集: {0}（仅支持 train 或 val）")]
  InvalidSubset(String),
  #[error("读取 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("标注文件解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("图像加载错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("图像索引越界: {0}")]
  UnknownImage(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subset {
  Train,
  Val,
}

impl Subset {
  pub const ALL: [Subset; 2] = [Subset::Train, Subset::Val];

  pub fn as_str(&self) -> &'static str {
    match self {
      Subset::Train => "train",
      Subset::Val => "val",
    }
  }

  /// 标注文件路径 `<dataset>/<subset>/<subset>_answer.json`
  pub fn annotation_path(&self, dataset_dir: &Path) -> PathBuf {
    dataset_dir
      .join(self.as_str())
      .join(format!("{}_answer.json", self.as_str()))
  }
}

impl FromStr for Subset {
  type Err = DatasetError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "train" => Ok(Subset::Train),
      "val" => Ok(Subset::Val),
      other => Err(DatasetError::InvalidSubset(other.to_string())),
    }
  }
}

impl fmt::Display for Subset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 标注中的图像编号，可以是整数也可以是字符串
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageId {
  Number(i64),
  Text(String),
}

impl fmt::Display for ImageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ImageId::Number(n) => write!(f, "{}", n),
      ImageId::Text(s) => f.write_str(s),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationImage {
  pub id: ImageId,
  pub file_name: String,
  pub height: u32,
  pub width: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Annotation {
  pub image_id: ImageId,
  /// 展平的多边形 `[x0, y0, x1, y1, ...]`
  pub segmentation: Vec<f64>,
  pub category_id: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationFile {
  pub images: Vec<AnnotationImage>,
  #[serde(default)]
  pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassInfo {
  pub source: String,
  pub id: u32,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
  pub id: ImageId,
  pub source: String,
  pub path: PathBuf,
  pub width: u32,
  pub height: u32,
  pub polygons: Vec<Vec<f64>>,
  pub category_ids: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct CowDataset {
  class_info: Vec<ClassInfo>,
  image_info: Vec<ImageInfo>,
  class_names: Vec<String>,
}

impl Default for CowDataset {
  fn default() -> Self {
    Self::new()
  }
}

impl CowDataset {
  /// 新数据集只含背景类
  pub fn new() -> Self {
    Self {
      class_info: vec![ClassInfo {
        source: String::new(),
        id: 0,
        name: "BG".to_string(),
      }],
      image_info: Vec::new(),
      class_names: Vec::new(),
    }
  }

  /// 同一来源下重复的类别编号只登记一次
  pub fn add_class(&mut self, source: &str, id: u32, name: &str) {
    if self
      .class_info
      .iter()
      .any(|info| info.source == source && info.id == id)
    {
      return;
    }
    self.class_info.push(ClassInfo {
      source: source.to_string(),
      id,
      name: name.to_string(),
    });
  }

  pub fn add_image(&mut self, info: ImageInfo) {
    self.image_info.push(info);
  }

  pub fn load_cow(&mut self, dataset_dir: &Path, subset: Subset) -> Result<(), DatasetError> {
    for label in CowLabel::ALL {
      self.add_class(CowLabel::SOURCE, label.to_label_id(), &label.to_label_str());
    }

    let path = subset.annotation_path(dataset_dir);
    info!("加载标注文件: {}", path.display());
    let content = std::fs::read_to_string(&path).map_err(|source| DatasetError::Io {
      path: path.clone(),
      source,
    })?;
    let file: AnnotationFile = serde_json::from_str(&content)?;

    let mut per_image: HashMap<&ImageId, Vec<&Annotation>> = HashMap::new();
    for annotation in &file.annotations {
      per_image
        .entry(&annotation.image_id)
        .or_default()
        .push(annotation);
    }

    let subset_dir = dataset_dir.join(subset.as_str());
    for image in &file.images {
      let annotations = per_image.get(&image.id).map(Vec::as_slice).unwrap_or(&[]);
      let polygons = annotations
        .iter()
        .map(|a| clamp_polygon(&a.segmentation, image.width, image.height))
        .collect();
      let category_ids = annotations.iter().map(|a| a.category_id).collect();
      debug!("图像 {}: {} 个实例", image.id, annotations.len());

      self.add_image(ImageInfo {
        id: image.id.clone(),
        source: CowLabel::SOURCE.to_string(),
        path: subset_dir.join(&image.file_name),
        width: image.width,
        height: image.height,
        polygons,
        category_ids,
      });
    }

    info!(
      "子集 {}: {} 张图像, {} 个标注",
      subset,
      file.images.len(),
      file.annotations.len()
    );
    Ok(())
  }

  pub fn prepare(&mut self) {
    self.class_names = self
      .class_info
      .iter()
      .map(|info| clean_name(&info.name))
      .collect();
    info!(
      "数据集就绪: {} 个类别, {} 张图像",
      self.num_classes(),
      self.num_images()
    );
  }

  pub fn class_names(&self) -> &[String] {
    &self.class_names
  }

  pub fn class_info(&self) -> &[ClassInfo] {
    &self.class_info
  }

  pub fn num_classes(&self) -> usize {
    self.class_info.len()
  }

  pub fn num_images(&self) -> usize {
    self.image_info.len()
  }

  pub fn image_ids(&self) -> std::ops::Range<usize> {
    0..self.image_info.len()
  }

  pub fn image_info(&self, index: usize) -> Option<&ImageInfo> {
    self.image_info.get(index)
  }

  /// 每个标注实例一张掩码，类别编号顺序与标注一致
  pub fn load_mask(&self, index: usize) -> Result<InstanceMasks, DatasetError> {
    let info = self
      .image_info
      .get(index)
      .ok_or(DatasetError::UnknownImage(index))?;
    let masks = info
      .polygons
      .iter()
      .map(|polygon| mask::rasterize_polygon(polygon, info.width, info.height))
      .collect();
    Ok(InstanceMasks {
      height: info.height,
      width: info.width,
      masks,
      class_ids: info.category_ids.clone(),
    })
  }

  /// 只有牛只来源的图像返回文件路径
  pub fn image_reference(&self, index: usize) -> Option<&Path> {
    self
      .image_info
      .get(index)
      .filter(|info| info.source == CowLabel::SOURCE)
      .map(|info| info.path.as_path())
  }

  /// 读取为 RGB 图像，去掉 alpha 通道、灰度图扩展为三通道
  pub fn load_image(&self, index: usize) -> Result<RgbImage, DatasetError> {
    let info = self
      .image_info
      .get(index)
      .ok_or(DatasetError::UnknownImage(index))?;
    Ok(image::open(&info.path)?.into_rgb8())
  }
}

/// x（偶数下标）不小于宽度、y（奇数下标）不小于高度的坐标减一
pub fn clamp_polygon(polygon: &[f64], width: u32, height: u32) -> Vec<f64> {
  polygon
    .iter()
    .enumerate()
    .map(|(i, &coord)| {
      let limit = if i % 2 == 0 { width as f64 } else { height as f64 };
      if coord >= limit { coord - 1.0 } else { coord }
    })
    .collect()
}

fn clean_name(name: &str) -> String {
  name.split(',').next().unwrap_or(name).trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn write_subset(dir: &Path, subset: &str, json: &str) {
    let subset_dir = dir.join(subset);
    fs::create_dir_all(&subset_dir).unwrap();
    fs::write(subset_dir.join(format!("{}_answer.json", subset)), json).unwrap();
  }

  const ANSWER: &str = r#"{
    "images": [
      {"id": 7, "file_name": "a.jpg", "height": 20, "width": 30},
      {"id": "b-1", "file_name": "b.jpg", "height": 10, "width": 10}
    ],
    "annotations": [
      {"image_id": 7, "segmentation": [0, 0, 30, 0, 30, 20, 0, 20], "category_id": 2},
      {"image_id": "b-1", "segmentation": [1, 1, 3, 1, 3, 3], "category_id": 1},
      {"image_id": 7, "segmentation": [2, 2, 4, 2, 4, 4, 2, 4], "category_id": 1}
    ]
  }"#;

  #[test]
  fn clamps_coordinates_on_the_far_edge() {
    let clamped = clamp_polygon(&[30.0, 19.0, 29.5, 20.0, 31.0, 25.0], 30, 20);
    assert_eq!(clamped, vec![29.0, 19.0, 29.5, 19.0, 30.0, 24.0]);
  }

  #[test]
  fn loads_images_in_file_order() {
    let dir = tempfile::tempdir().unwrap();
    write_subset(dir.path(), "train", ANSWER);

    let mut dataset = CowDataset::new();
    dataset.load_cow(dir.path(), Subset::Train).unwrap();
    dataset.prepare();

    assert_eq!(dataset.class_names(), &["BG", "anestrus", "estrus"]);
    assert_eq!(dataset.num_images(), 2);

    let first = dataset.image_info(0).unwrap();
    assert_eq!(first.id, ImageId::Number(7));
    assert_eq!(first.category_ids, vec![2, 1]);
    assert_eq!(first.polygons[0], vec![0.0, 0.0, 29.0, 0.0, 29.0, 19.0, 0.0, 19.0]);
    assert_eq!(
      dataset.image_reference(0),
      Some(dir.path().join("train").join("a.jpg").as_path())
    );

    let second = dataset.image_info(1).unwrap();
    assert_eq!(second.id, ImageId::Text("b-1".to_string()));
    assert_eq!(second.category_ids, vec![1]);
  }

  #[test]
  fn masks_cover_the_clamped_polygon() {
    let dir = tempfile::tempdir().unwrap();
    write_subset(dir.path(), "val", ANSWER);

    let mut dataset = CowDataset::new();
    dataset.load_cow(dir.path(), Subset::Val).unwrap();
    dataset.prepare();

    let masks = dataset.load_mask(0).unwrap();
    assert_eq!((masks.width, masks.height, masks.len()), (30, 20, 2));
    assert_eq!(masks.masks[0].count(), 30 * 20);
    assert_eq!(masks.masks[1].count(), 9);
    assert_eq!(masks.class_ids, vec![2, 1]);
    assert!(matches!(
      dataset.load_mask(5),
      Err(DatasetError::UnknownImage(5))
    ));
  }

  #[test]
  fn unknown_subset_is_rejected() {
    assert!(matches!(
      "test".parse::<Subset>(),
      Err(DatasetError::InvalidSubset(_))
    ));
    assert_eq!("val".parse::<Subset>().unwrap(), Subset::Val);
  }

  #[test]
  fn missing_annotation_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut dataset = CowDataset::new();
    let err = dataset.load_cow(dir.path(), Subset::Train).unwrap_err();
    assert!(matches!(err, DatasetError::Io { .. }));
  }

  #[test]
  fn classes_are_registered_once() {
    let mut dataset = CowDataset::new();
    dataset.add_class("cow", 1, "anestrus");
    dataset.add_class("cow", 1, "anestrus");
    dataset.prepare();
    assert_eq!(dataset.num_classes(), 2);
  }

  #[test]
  fn load_image_drops_alpha() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rgba.png");
    image::RgbaImage::from_pixel(4, 3, image::Rgba([10, 20, 30, 40]))
      .save(&path)
      .unwrap();

    let mut dataset = CowDataset::new();
    dataset.add_image(ImageInfo {
      id: ImageId::Number(1),
      source: CowLabel::SOURCE.to_string(),
      path,
      width: 4,
      height: 3,
      polygons: Vec::new(),
      category_ids: Vec::new(),
    });
    let image = dataset.load_image(0).unwrap();
    assert_eq!(image.dimensions(), (4, 3));
    assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30]);
  }
}
