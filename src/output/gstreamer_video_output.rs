// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出
//!
//! 把彩色溅射后的帧编码为 Motion-JPEG，封装为 AVI 文件。
//! `finish` 发送 EOS 并等待封装器写完文件尾；未调用时由 `Drop` 补做。

use std::{
  cell::Cell,
  path::{Path, PathBuf},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{DetectResult, WithLabel},
  output::{Render, draw::Draw},
};

const DEFAULT_FPS: f64 = 30.0;
const EOS_TIMEOUT_SECONDS: u64 = 5;

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("视频输出管道错误: {0}")]
  StreamError(String),
  #[error("等待 EOS 超时 ({0} 秒)")]
  EosTimeout(u64),
}

pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  path: PathBuf,
  width: u32,
  height: u32,
  fps: f64,
  draw: Draw,
  frame_count: Cell<u64>,
  finished: Cell<bool>,
}

/// Motion-JPEG 编码并封装为 AVI
pub fn pipeline_description(path: &Path) -> String {
  format!(
    "appsrc name=src ! videoconvert ! jpegenc ! avimux ! filesink location=\"{}\"",
    path.display()
  )
}

impl GStreamerVideoOutput {
  pub fn new(
    path: impl AsRef<Path>,
    width: u32,
    height: u32,
    fps: f64,
    draw: Draw,
  ) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    let path = path.as_ref().to_path_buf();
    if path.extension().is_none_or(|ext| ext != "avi") {
      warn!("输出文件 {} 不是 .avi，仍按 AVI 格式写入", path.display());
    }
    let fps = if fps > 0.0 { fps } else { DEFAULT_FPS };

    let description = pipeline_description(&path);
    info!("创建视频输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new((fps * 1000.0).round() as i32, 1000))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频输出就绪: {}x{} @ {:.2} fps -> {}",
      width,
      height,
      fps,
      path.display()
    );

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      path,
      width,
      height,
      fps,
      draw,
      frame_count: Cell::new(0),
      finished: Cell::new(false),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn push_frame(&self, image: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    if image.dimensions() != (self.width, self.height) {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch {
        expected: (self.width, self.height),
        actual: image.dimensions(),
      });
    }

    let frame_index = self.frame_count.get();
    let frame_ns = 1_000_000_000.0 / self.fps;

    let mut buffer = gst::Buffer::from_mut_slice(image.as_raw().clone());
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        (frame_index as f64 * frame_ns).round() as u64,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns.round() as u64));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count.set(frame_index + 1);
    debug!("写入第 {} 帧", frame_index + 1);

    Ok(())
  }

  /// 发送 EOS，等待文件写完后停止管道
  fn close(&self) -> Result<(), GStreamerVideoOutputError> {
    if self.finished.replace(true) {
      return Ok(());
    }

    let waited = self
      .appsrc
      .end_of_stream()
      .map_err(|e| GStreamerVideoOutputError::PipelineError(format!("发送 EOS 失败: {:?}", e)))
      .and_then(|_| self.wait_eos());

    self.pipeline.set_state(gst::State::Null)?;
    info!(
      "视频输出关闭，共写入 {} 帧: {}",
      self.frame_count.get(),
      self.path.display()
    );
    waited
  }

  fn wait_eos(&self) -> Result<(), GStreamerVideoOutputError> {
    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("管道没有消息总线".to_string()))?;
    let message = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match message.as_ref().map(|m| m.view()) {
      Some(gst::MessageView::Eos(..)) => {
        debug!("视频输出收到 EOS");
        Ok(())
      }
      Some(gst::MessageView::Error(err)) => {
        Err(GStreamerVideoOutputError::StreamError(err.error().to_string()))
      }
      _ => Err(GStreamerVideoOutputError::EosTimeout(EOS_TIMEOUT_SECONDS)),
    }
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      error!("关闭视频输出失败: {}", e);
    }
  }
}

impl<T: WithLabel> Render<RgbImage, DetectResult<T>> for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult<T>) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(frame, result);
    self.push_frame(&image)
  }

  fn finish(&self) -> Result<(), Self::Error> {
    self.close()
  }
}
