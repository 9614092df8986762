// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/weights.rs - 权重来源选择
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

use std::{
  convert::Infallible,
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub const COCO_WEIGHTS_FILE: &str = "mask_rcnn_coco.h5";
pub const IMAGENET_WEIGHTS_FILE: &str = "resnet50_weights_tf_dim_ordering_tf_kernels_notop.h5";

/// 与类别数相关的头部层，用 COCO 权重初始化时跳过
pub const COCO_EXCLUDED_LAYERS: [&str; 4] = [
  "mrcnn_class_logits",
  "mrcnn_bbox_fc",
  "mrcnn_bbox",
  "mrcnn_mask",
];

#[derive(Error, Debug)]
pub enum WeightsError {
  #[error("{logs} 下没有以 {prefix} 开头的训练目录")]
  NoRunDirectory { logs: PathBuf, prefix: String },
  #[error("{dir} 中没有以 {prefix} 开头的权重文件")]
  NoCheckpoint { dir: PathBuf, prefix: String },
  #[error("读取 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsSource {
  Coco,
  Last,
  Imagenet,
  Path(PathBuf),
}

impl FromStr for WeightsSource {
  type Err = Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s.to_lowercase().as_str() {
      "coco" => WeightsSource::Coco,
      "last" => WeightsSource::Last,
      "imagenet" => WeightsSource::Imagenet,
      _ => WeightsSource::Path(PathBuf::from(s)),
    })
  }
}

impl fmt::Display for WeightsSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WeightsSource::Coco => f.write_str("coco"),
      WeightsSource::Last => f.write_str("last"),
      WeightsSource::Imagenet => f.write_str("imagenet"),
      WeightsSource::Path(path) => write!(f, "{}", path.display()),
    }
  }
}

/// 解析后的权重文件以及加载时需要跳过的层
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedWeights {
  pub path: PathBuf,
  pub exclude: Vec<String>,
}

impl WeightsSource {
  pub fn resolve(&self, logs_dir: &Path, config_name: &str) -> Result<ResolvedWeights, WeightsError> {
    let resolved = match self {
      WeightsSource::Coco => ResolvedWeights {
        path: PathBuf::from(COCO_WEIGHTS_FILE),
        exclude: COCO_EXCLUDED_LAYERS.iter().map(|s| s.to_string()).collect(),
      },
      WeightsSource::Last => ResolvedWeights {
        path: find_last(logs_dir, config_name)?,
        exclude: Vec::new(),
      },
      WeightsSource::Imagenet => ResolvedWeights {
        path: PathBuf::from(IMAGENET_WEIGHTS_FILE),
        exclude: Vec::new(),
      },
      WeightsSource::Path(path) => ResolvedWeights {
        path: path.clone(),
        exclude: Vec::new(),
      },
    };
    info!("加载权重: {}", resolved.path.display());
    Ok(resolved)
  }
}

/// 最新的训练目录中最新的权重文件。
///
/// 目录名带时间戳，按名称排序即按时间排序。
pub fn find_last(logs_dir: &Path, config_name: &str) -> Result<PathBuf, WeightsError> {
  let prefix = config_name.to_lowercase();
  let run_dir = last_entry(logs_dir, |path, name| {
    path.is_dir() && name.starts_with(&prefix)
  })?
  .ok_or_else(|| WeightsError::NoRunDirectory {
    logs: logs_dir.to_path_buf(),
    prefix: prefix.clone(),
  })?;
  debug!("最新训练目录: {}", run_dir.display());

  let checkpoint_prefix = format!("mask_rcnn_{}", prefix);
  last_entry(&run_dir, |path, name| {
    path.is_file() && name.starts_with(&checkpoint_prefix)
  })?
  .ok_or(WeightsError::NoCheckpoint {
    dir: run_dir,
    prefix: checkpoint_prefix,
  })
}

fn last_entry(
  dir: &Path,
  filter: impl Fn(&Path, &str) -> bool,
) -> Result<Option<PathBuf>, WeightsError> {
  let io_error = |source| WeightsError::Io {
    path: dir.to_path_buf(),
    source,
  };
  let mut found = Vec::new();
  for entry in std::fs::read_dir(dir).map_err(io_error)? {
    let entry = entry.map_err(io_error)?;
    let path = entry.path();
    let name = entry.file_name().to_string_lossy().into_owned();
    if filter(&path, &name) {
      found.push((name, path));
    }
  }
  found.sort();
  Ok(found.pop().map(|(_, path)| path))
}
