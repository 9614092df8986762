// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/input.rs - 视频/图像输入
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

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  DEFAULT_FPS, GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 帧来源：单张图像或视频流
pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl InputWrapper {
  #[cfg(feature = "read_image_file")]
  pub fn image(path: impl AsRef<std::path::Path>) -> Result<Self, InputError> {
    Ok(InputWrapper::ReadImageFile(ImageFileInput::open(path)?))
  }

  #[cfg(feature = "gstreamer_input")]
  pub fn video(location: &str) -> Result<Self, InputError> {
    let input = GStreamerInputPipelineBuilder::from_location(location).build()?;
    Ok(InputWrapper::GStreamerInput(input))
  }

  /// 视频流的帧率，单张图像返回 None
  pub fn fps(&self) -> Option<f64> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => Some(input.fps()),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(_) => None,
    }
  }

  /// 帧尺寸 (宽, 高)，单张图像在读取前未知
  pub fn dimensions(&self) -> Option<(u32, u32)> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => Some((input.width(), input.height())),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(_) => None,
    }
  }
}

impl Iterator for InputWrapper {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
    }
  }
}
