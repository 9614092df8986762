// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/train.rs - 训练准备
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

//! 训练本身由外部框架完成。这里把数据集转换为训练目录：
//! 训练计划 `train_plan.json`，以及每个子集的实例掩码 PNG 和索引文件。

use std::{
  fs,
  path::{Path, PathBuf},
};

use chrono::Local;
use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::CowConfig,
  dataset::{CowDataset, DatasetError, ImageId, Subset},
  weights::{ResolvedWeights, WeightsError, WeightsSource},
};

pub const TRAIN_PLAN_FILE: &str = "train_plan.json";

#[derive(Error, Debug)]
pub enum TrainError {
  #[error("数据集错误: {0}")]
  Dataset(#[from] DatasetError),
  #[error("权重错误: {0}")]
  Weights(#[from] WeightsError),
  #[error("写入 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("JSON 序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("掩码保存错误: {0}")]
  Image(#[from] image::ImageError),
}

/// 参与训练的层
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
pub enum Layers {
  /// 只训练 RPN、分类与掩码头
  #[serde(rename = "heads")]
  Heads,
  /// ResNet stage 3 及以上
  #[value(name = "3+")]
  #[serde(rename = "3+")]
  Stage3Up,
  #[value(name = "4+")]
  #[serde(rename = "4+")]
  Stage4Up,
  #[value(name = "5+")]
  #[serde(rename = "5+")]
  Stage5Up,
  #[serde(rename = "all")]
  All,
}

impl Layers {
  /// 可训练层名称的正则表达式
  pub fn regex(&self) -> &'static str {
    match self {
      Layers::Heads => r"(mrcnn\_.*)|(rpn\_.*)|(fpn\_.*)",
      Layers::Stage3Up => {
        r"(res3.*)|(bn3.*)|(res4.*)|(bn4.*)|(res5.*)|(bn5.*)|(mrcnn\_.*)|(rpn\_.*)|(fpn\_.*)"
      }
      Layers::Stage4Up => r"(res4.*)|(bn4.*)|(res5.*)|(bn5.*)|(mrcnn\_.*)|(rpn\_.*)|(fpn\_.*)",
      Layers::Stage5Up => r"(res5.*)|(bn5.*)|(mrcnn\_.*)|(rpn\_.*)|(fpn\_.*)",
      Layers::All => ".*",
    }
  }
}

#[derive(Debug, Clone)]
pub struct TrainOptions {
  pub dataset: PathBuf,
  pub weights: WeightsSource,
  pub logs: PathBuf,
  pub epochs: u32,
  pub learning_rate: f64,
  pub rpn_nms_threshold: f32,
  pub augmentation: bool,
  pub layers: Layers,
}

#[derive(Debug, Serialize)]
pub struct SubsetSummary {
  pub subset: Subset,
  pub images: usize,
  pub instances: usize,
  pub index: String,
}

#[derive(Debug, Serialize)]
pub struct TrainPlan {
  pub config: CowConfig,
  pub epochs: u32,
  pub learning_rate: f64,
  pub layers: Layers,
  pub layers_regex: &'static str,
  pub augmentation: bool,
  pub weights: ResolvedWeights,
  pub class_names: Vec<String>,
  pub subsets: Vec<SubsetSummary>,
}

#[derive(Debug, Serialize)]
struct InstanceEntry {
  category_id: i32,
  mask: String,
  bbox: [i32; 4],
}

#[derive(Debug, Serialize)]
struct ImageEntry {
  image_id: ImageId,
  path: PathBuf,
  width: u32,
  height: u32,
  instances: Vec<InstanceEntry>,
}

/// 生成训练目录 `<logs>/<name><时间戳>/`，返回其路径
pub fn prepare_training(options: &TrainOptions) -> Result<PathBuf, TrainError> {
  let config = CowConfig::for_training(options.rpn_nms_threshold);
  config.display();

  // 先解析权重，避免新建的空目录被当作最新训练目录
  let weights = options.weights.resolve(&options.logs, &config.name)?;

  let run_dir = options.logs.join(format!(
    "{}{}",
    config.name.to_lowercase(),
    Local::now().format("%Y%m%dT%H%M")
  ));
  create_dir(&run_dir)?;
  info!("训练目录: {}", run_dir.display());

  let mut class_names = Vec::new();
  let mut subsets = Vec::new();
  for subset in Subset::ALL {
    let mut dataset = CowDataset::new();
    dataset.load_cow(&options.dataset, subset)?;
    dataset.prepare();
    class_names = dataset.class_names().to_vec();
    subsets.push(export_subset(&dataset, subset, &run_dir)?);
  }

  let plan = TrainPlan {
    config,
    epochs: options.epochs,
    learning_rate: options.learning_rate,
    layers: options.layers,
    layers_regex: options.layers.regex(),
    augmentation: options.augmentation,
    weights,
    class_names,
    subsets,
  };
  write_json(&run_dir.join(TRAIN_PLAN_FILE), &plan)?;
  info!("训练计划已写入 {}", run_dir.join(TRAIN_PLAN_FILE).display());
  Ok(run_dir)
}

fn export_subset(
  dataset: &CowDataset,
  subset: Subset,
  run_dir: &Path,
) -> Result<SubsetSummary, TrainError> {
  let mask_dir = run_dir.join(subset.as_str());
  create_dir(&mask_dir)?;

  let mut entries = Vec::with_capacity(dataset.num_images());
  let mut instances = 0;
  for index in dataset.image_ids() {
    let Some(info) = dataset.image_info(index) else {
      continue;
    };
    let masks = dataset.load_mask(index)?;
    let bboxes = masks.bboxes();

    let mut records = Vec::with_capacity(masks.len());
    for (k, ((mask, class_id), bbox)) in masks
      .masks
      .iter()
      .zip(&masks.class_ids)
      .zip(bboxes)
      .enumerate()
    {
      let file_name = format!("{}/{}_{}.png", subset.as_str(), index, k);
      mask.to_luma().save(run_dir.join(&file_name))?;
      records.push(InstanceEntry {
        category_id: *class_id,
        mask: file_name,
        bbox,
      });
    }
    debug!("导出图像 {}: {} 个实例", info.id, records.len());
    instances += records.len();

    entries.push(ImageEntry {
      image_id: info.id.clone(),
      path: info.path.clone(),
      width: info.width,
      height: info.height,
      instances: records,
    });
  }

  let index = format!("{}_instances.json", subset.as_str());
  write_json(&run_dir.join(&index), &entries)?;
  info!("子集 {}: 导出 {} 个实例掩码", subset, instances);

  Ok(SubsetSummary {
    subset,
    images: entries.len(),
    instances,
    index,
  })
}

fn create_dir(path: &Path) -> Result<(), TrainError> {
  fs::create_dir_all(path).map_err(|source| TrainError::Io {
    path: path.to_path_buf(),
    source,
  })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TrainError> {
  let content = serde_json::to_string_pretty(value)?;
  fs::write(path, content).map_err(|source| TrainError::Io {
    path: path.to_path_buf(),
    source,
  })
}
