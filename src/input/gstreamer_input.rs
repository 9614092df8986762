// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频输入
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

//! # GStreamer 视频输入
//!
//! 逐帧解码视频文件或网络视频流，输出 RGB 图像。
//! 帧尺寸与帧率从第一帧的 caps 中读取。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 用法
//!
//! ```no_run
//! use cow_estrus::input::GStreamerInputPipelineBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = GStreamerInputPipelineBuilder::file("barn.mp4").build()?;
//! println!("{}x{} @ {} fps", input.width(), input.height(), input.fps());
//! for frame in input {
//!     // 处理帧
//! }
//! # Ok(())
//! # }
//! ```

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// 无法从流中得到帧率时使用
pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("视频流为空，未能读取到第一帧")]
  EmptyStream,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GStreamerInputBuilderItem {
  FileSource(String),
  UriSource(String),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::UriSource(uri) => {
        format!("uridecodebin uri=\"{}\"", uri)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn file(path: impl AsRef<std::path::Path>) -> Self {
    Self {
      items: vec![GStreamerInputBuilderItem::FileSource(
        path.as_ref().display().to_string(),
      )],
    }
  }

  /// `http(s)://`、`rtsp://` 等由 uridecodebin 处理的地址
  pub fn uri(uri: &str) -> Self {
    Self {
      items: vec![GStreamerInputBuilderItem::UriSource(uri.to_string())],
    }
  }

  /// 视频参数可以是本地路径，也可以是网络地址
  pub fn from_location(location: &str) -> Self {
    match Url::parse(location) {
      Ok(url) if url.scheme().len() > 1 => Self::uri(location),
      _ => Self::file(location),
    }
  }

  pub fn pipeline_description(&self) -> String {
    let mut items = self.items.clone();
    items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });
    let basic = items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!("{} ! appsink name=sink sync=false max-buffers=4", basic)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.pipeline_description();
    info!("GStreamer 输入管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    let mut input = GStreamerInput {
      pipeline,
      appsink,
      width: 0,
      height: 0,
      fps: DEFAULT_FPS,
      pending: None,
    };

    // 读取第一帧以确定尺寸和帧率
    let sample = input.pull_sample().ok_or(GStreamerInputError::EmptyStream)?;
    let caps = sample
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
    input.width = video_info.width();
    input.height = video_info.height();
    let fps = video_info.fps();
    if fps.numer() > 0 && fps.denom() > 0 {
      input.fps = fps.numer() as f64 / fps.denom() as f64;
    } else {
      warn!("视频流没有帧率信息，使用默认 {} fps", DEFAULT_FPS);
    }
    info!(
      "视频输入: {}x{} @ {:.2} fps",
      input.width, input.height, input.fps
    );
    input.pending = Some(convert_sample(&sample)?);

    Ok(input)
  }
}

pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: f64,
  pending: Option<RgbImage>,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn fps(&self) -> f64 {
    self.fps
  }

  fn pull_sample(&self) -> Option<gst::Sample> {
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        // 流结束时同样返回错误
        debug!("Failed to pull sample: {}", e);
        e
      })
      .ok()
  }
}

impl Iterator for GStreamerInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(frame) = self.pending.take() {
      return Some(frame);
    }
    let sample = self.pull_sample()?;
    convert_sample(&sample)
      .map_err(|e| {
        error!("Failed to fetch sample: {}", e);
        e
      })
      .ok()
  }
}

/// 按行拷贝，跳过每行末尾的对齐填充
fn convert_sample(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row = width * 3;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected = if height == 0 { 0 } else { stride * (height - 1) + row };
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row * height);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for h in 0..height {
        pixels.extend_from_slice(&data[h * stride..h * stride + row]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for h in 0..height {
        for px in data[h * stride..h * stride + row].chunks_exact(3) {
          pixels.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row * height,
      actual: 0,
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_pipeline_description() {
    let builder = GStreamerInputPipelineBuilder::file("/data/barn 1.mp4");
    assert_eq!(
      builder.pipeline_description(),
      "filesrc location=\"/data/barn 1.mp4\" ! decodebin ! videoconvert ! \
       video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4"
    );
  }

  #[test]
  fn locations_with_scheme_use_uridecodebin() {
    let builder = GStreamerInputPipelineBuilder::from_location("rtsp://10.0.0.2/stream");
    assert!(
      builder
        .pipeline_description()
        .starts_with("uridecodebin uri=\"rtsp://10.0.0.2/stream\"")
    );
    let builder = GStreamerInputPipelineBuilder::from_location("videos/barn.mp4");
    assert!(builder.pipeline_description().starts_with("filesrc"));
  }
}
