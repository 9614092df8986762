// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;
use tracing::error;

use crate::model::{DetectResult, WithLabel};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;

  /// 最后一帧之后调用，把缓冲的内容写出并报告错误
  fn finish(&self) -> Result<(), Self::Error> {
    Ok(())
  }
}

pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[cfg(feature = "contour_record")]
mod contour_record;
#[cfg(feature = "contour_record")]
pub use self::contour_record::{ContourRecordError, ContourRecordOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[cfg(feature = "contour_record")]
  #[error("轮廓记录输出错误: {0}")]
  ContourRecordError(#[from] ContourRecordError),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideoOutput(GStreamerVideoOutput),
  #[cfg(feature = "contour_record")]
  ContourRecordOutput(ContourRecordOutput),
}

impl<T: WithLabel> Render<RgbImage, DetectResult<T>> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult<T>) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "contour_record")]
      OutputWrapper::ContourRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }

  fn finish(&self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => {
        Render::<RgbImage, DetectResult<T>>::finish(output).map_err(OutputError::from)
      }
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => {
        Render::<RgbImage, DetectResult<T>>::finish(output).map_err(OutputError::from)
      }
      #[cfg(feature = "contour_record")]
      OutputWrapper::ContourRecordOutput(output) => {
        Render::<RgbImage, DetectResult<T>>::finish(output).map_err(OutputError::from)
      }
    }
  }
}

/// 同一帧依次交给多个输出，例如彩色溅射文件加轮廓记录
#[derive(Default)]
pub struct OutputGroup {
  outputs: Vec<OutputWrapper>,
}

impl OutputGroup {
  pub fn with(mut self, output: OutputWrapper) -> Self {
    self.outputs.push(output);
    self
  }

  pub fn push(&mut self, output: OutputWrapper) {
    self.outputs.push(output);
  }

  pub fn len(&self) -> usize {
    self.outputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outputs.is_empty()
  }
}

impl<T: WithLabel> Render<RgbImage, DetectResult<T>> for OutputGroup {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult<T>) -> Result<(), Self::Error> {
    for output in &self.outputs {
      output.render_result(frame, result)?;
    }
    Ok(())
  }

  /// 每个输出都会被结束，返回遇到的第一个错误
  fn finish(&self) -> Result<(), Self::Error> {
    let mut first_error = None;
    for output in &self.outputs {
      if let Err(e) = Render::<RgbImage, DetectResult<T>>::finish(output) {
        error!("结束输出失败: {}", e);
        first_error.get_or_insert(e);
      }
    }
    first_error.map_or(Ok(()), Err)
  }
}

#[cfg(all(test, feature = "save_image_file", feature = "contour_record"))]
mod tests {
  use super::*;
  use crate::{
    contour::ObjectContour,
    mask::Bitmap,
    model::{CowLabel, DetectItem},
    output::draw::Draw,
  };
  use image::Rgb;

  fn estrus_result() -> DetectResult<CowLabel> {
    DetectResult {
      width: 8,
      height: 8,
      items: vec![DetectItem {
        kind: CowLabel::Estrus,
        score: 0.88,
        bbox: [2, 2, 5, 5],
        mask: Bitmap::from_fn(8, 8, |x, y| (2..5).contains(&x) && (2..5).contains(&y)),
      }]
      .into_boxed_slice(),
    }
  }

  #[test]
  fn group_renders_every_output() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("splash.png");
    let contour_path = dir.path().join("contours.json");

    let frame = RgbImage::from_pixel(8, 8, Rgb([120, 40, 200]));
    let result = estrus_result();

    let group = OutputGroup::default()
      .with(OutputWrapper::SaveImageFileOutput(SaveImageFileOutput::new(
        &image_path,
        Draw::default(),
      )))
      .with(OutputWrapper::ContourRecordOutput(ContourRecordOutput::new(
        &contour_path,
        "cow-7",
      )));
    assert_eq!(group.len(), 2);
    group.render_result(&frame, &result).unwrap();
    Render::<RgbImage, DetectResult<CowLabel>>::finish(&group).unwrap();

    let splash = image::open(&image_path).unwrap().into_rgb8();
    assert_eq!(splash.get_pixel(3, 3), &Rgb([120, 40, 200]));
    let records: Vec<ObjectContour> =
      serde_json::from_str(&std::fs::read_to_string(&contour_path).unwrap()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].image_id, "cow-7");
    assert_eq!(records[0].category_id, 2);
  }

  #[test]
  fn group_finish_surfaces_record_failure() {
    let dir = tempfile::tempdir().unwrap();
    let contour_path = dir.path().join("contours.json");
    std::fs::create_dir(&contour_path).unwrap();

    let group = OutputGroup::default().with(OutputWrapper::ContourRecordOutput(
      ContourRecordOutput::new(&contour_path, "cow-7"),
    ));
    let frame = RgbImage::new(8, 8);
    group.render_result(&frame, &estrus_result()).unwrap();
    let err = Render::<RgbImage, DetectResult<CowLabel>>::finish(&group).unwrap_err();
    assert!(matches!(err, OutputError::ContourRecordError(_)));
  }
}
