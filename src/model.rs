// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/model.rs - 模型
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

use serde::{Deserialize, Serialize};

use crate::{
  contour::{ContourError, ObjectContour, get_contours},
  mask::{self, Bitmap},
};

/// 类别名称表，下标即类别编号，0 为背景
pub const CLASS_NAMES: [&str; 3] = ["BG", "anestrus", "estrus"];

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;

  /// 可视化颜色
  fn color(&self) -> [u8; 3] {
    const PALETTE: [[u8; 3]; 6] = [
      [255, 0, 0],
      [0, 255, 0],
      [0, 0, 255],
      [255, 255, 0],
      [0, 255, 255],
      [255, 0, 255],
    ];
    PALETTE[self.to_label_id() as usize % PALETTE.len()]
  }
}

/// 牛只状态类别，数据集与轮廓输出共用这一张表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CowLabel {
  /// 未发情
  Anestrus,
  /// 发情
  Estrus,
}

impl CowLabel {
  pub const SOURCE: &'static str = "cow";
  pub const ALL: [CowLabel; 2] = [CowLabel::Anestrus, CowLabel::Estrus];

  pub fn from_label_str(name: &str) -> Option<Self> {
    match name {
      "anestrus" => Some(CowLabel::Anestrus),
      "estrus" => Some(CowLabel::Estrus),
      _ => None,
    }
  }
}

impl WithLabel for CowLabel {
  fn to_label_str(&self) -> String {
    CLASS_NAMES[self.to_label_id() as usize].to_string()
  }

  fn to_label_id(&self) -> u32 {
    match self {
      CowLabel::Anestrus => 1,
      CowLabel::Estrus => 2,
    }
  }

  fn from_label_id(id: u32) -> Option<Self> {
    match id {
      1 => Some(CowLabel::Anestrus),
      2 => Some(CowLabel::Estrus),
      _ => None,
    }
  }

  fn color(&self) -> [u8; 3] {
    match self {
      CowLabel::Anestrus => [0, 128, 255],
      CowLabel::Estrus => [255, 64, 64],
    }
  }
}

#[derive(Debug, Clone)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [i32; 4], // [y1, x1, y2, x2]，像素坐标，y2/x2 不包含
  pub mask: Bitmap,
}

#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub width: u32,
  pub height: u32,
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn empty(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      items: Box::new([]),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 全部实例合并后的掩码
  pub fn collapsed_mask(&self) -> Bitmap {
    mask::collapse(
      self.width,
      self.height,
      self.items.iter().map(|item| &item.mask),
    )
  }
}

impl<T: WithLabel> DetectResult<T> {
  pub fn contours(&self, image_id: &str) -> Result<Vec<ObjectContour>, ContourError> {
    let boxes: Vec<[i32; 4]> = self.items.iter().map(|item| item.bbox).collect();
    let masks: Vec<&Bitmap> = self.items.iter().map(|item| &item.mask).collect();
    let class_ids: Vec<u32> = self.items.iter().map(|item| item.kind.to_label_id()).collect();
    let scores: Vec<f32> = self.items.iter().map(|item| item.score).collect();
    get_contours(
      image_id,
      &boxes,
      &masks,
      &class_ids,
      &CLASS_NAMES,
      Some(&scores),
    )
  }
}

pub mod unmold;

#[cfg(feature = "model_mask_rcnn")]
mod mask_rcnn;
#[cfg(feature = "model_mask_rcnn")]
pub use self::mask_rcnn::{MaskRcnn, MaskRcnnBuilder, MaskRcnnError};
