// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/output/contour_record.rs - 轮廓记录输出
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
  cell::{Cell, RefCell},
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{error, info};

use crate::{
  contour::{ContourError, ObjectContour},
  model::{DetectResult, WithLabel},
  output::Render,
};

#[derive(Error, Debug)]
pub enum ContourRecordError {
  #[error("轮廓提取错误: {0}")]
  ContourError(#[from] ContourError),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("写入 {path} 失败: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 收集每帧的轮廓记录，结束时写成一个 JSON 数组
pub struct ContourRecordOutput {
  path: PathBuf,
  image_id: String,
  per_frame: bool,
  frame_counter: Cell<u64>,
  records: RefCell<Vec<ObjectContour>>,
  finished: Cell<bool>,
}

impl ContourRecordOutput {
  pub fn new(path: impl AsRef<Path>, image_id: impl Into<String>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      image_id: image_id.into(),
      per_frame: false,
      frame_counter: Cell::new(0),
      records: RefCell::new(Vec::new()),
      finished: Cell::new(false),
    }
  }

  /// 视频中每帧使用 `<image_id>_<帧号>` 作为编号
  pub fn per_frame(mut self, per_frame: bool) -> Self {
    self.per_frame = per_frame;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn next_image_id(&self) -> String {
    let index = self.frame_counter.get();
    self.frame_counter.set(index + 1);
    if self.per_frame {
      format!("{}_{:06}", self.image_id, index)
    } else {
      self.image_id.clone()
    }
  }

  pub fn flush(&self) -> Result<(), ContourRecordError> {
    let records = self.records.borrow();
    let content = serde_json::to_string_pretty(&*records)?;
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| ContourRecordError::IoError {
        path: parent.to_path_buf(),
        source,
      })?;
    }
    std::fs::write(&self.path, content).map_err(|source| ContourRecordError::IoError {
      path: self.path.clone(),
      source,
    })?;
    info!("写入 {} 条轮廓记录: {}", records.len(), self.path.display());
    Ok(())
  }
}

impl Drop for ContourRecordOutput {
  /// 任务中途出错时仍尽量写出已收集的记录
  fn drop(&mut self) {
    if self.finished.get() {
      return;
    }
    if let Err(e) = self.flush() {
      error!("保存轮廓记录失败: {}", e);
    }
  }
}

impl<F, T: WithLabel> Render<F, DetectResult<T>> for ContourRecordOutput {
  type Error = ContourRecordError;

  fn render_result(&self, _frame: &F, result: &DetectResult<T>) -> Result<(), Self::Error> {
    let image_id = self.next_image_id();
    let contours = result.contours(&image_id)?;
    self.records.borrow_mut().extend(contours);
    Ok(())
  }

  fn finish(&self) -> Result<(), Self::Error> {
    self.finished.set(true);
    self.flush()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    mask::Bitmap,
    model::{CowLabel, DetectItem},
  };

  fn result() -> DetectResult<CowLabel> {
    DetectResult {
      width: 8,
      height: 8,
      items: vec![DetectItem {
        kind: CowLabel::Anestrus,
        score: 0.73456,
        bbox: [1, 1, 4, 4],
        mask: Bitmap::from_fn(8, 8, |x, y| (1..4).contains(&x) && (1..4).contains(&y)),
      }]
      .into_boxed_slice(),
    }
  }

  #[test]
  fn writes_records_when_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contours.json");
    {
      let output = ContourRecordOutput::new(&path, "clip").per_frame(true);
      output.render_result(&(), &result()).unwrap();
      output.render_result(&(), &result()).unwrap();
    }

    let records: Vec<ObjectContour> =
      serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].image_id, "clip_000000");
    assert_eq!(records[1].image_id, "clip_000001");
    assert_eq!(records[0].category_id, 1);
    assert_eq!(records[0].conf, Some(0.735));
  }

  #[test]
  fn empty_result_writes_empty_array() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.json");
    let output = ContourRecordOutput::new(&path, "img");
    let empty: DetectResult<CowLabel> = DetectResult::empty(4, 4);
    output.render_result(&(), &empty).unwrap();
    output.flush().unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
  }

  #[test]
  fn finish_reports_unwritable_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contours.json");
    std::fs::create_dir(&path).unwrap();

    let output = ContourRecordOutput::new(&path, "img");
    output.render_result(&(), &result()).unwrap();
    let err = Render::<(), DetectResult<CowLabel>>::finish(&output).unwrap_err();
    assert!(matches!(err, ContourRecordError::IoError { .. }));
  }
}
