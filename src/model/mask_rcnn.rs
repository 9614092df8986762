// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/model/mask_rcnn.rs - Mask R-CNN 推理后端（RKNN）
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  config::CowConfig,
  frame::{AsNhwcFrame, MoldedFrame},
  model::{CowLabel, DetectResult, Model, unmold},
};

const MASK_RCNN_NUM_INPUTS: u32 = 1;
const MASK_RCNN_NUM_OUTPUTS: u32 = 2;
const MASK_RCNN_DETECTIONS_OUTPUT: usize = 0;
const MASK_RCNN_MASKS_OUTPUT: usize = 1;

#[derive(Error, Debug)]
pub enum MaskRcnnError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("获取第 {0} 个输出失败: {1}")]
  OutputError(usize, String),
}

impl MaskRcnnError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    MaskRcnnError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct MaskRcnnBuilder {
  model_path: PathBuf,
  flags: InitFlags,
  config: CowConfig,
}

impl MaskRcnnBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      flags: InitFlags::default(),
      config: CowConfig::for_inference(),
    }
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn config(mut self, config: CowConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> Result<MaskRcnn, MaskRcnnError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(MaskRcnnError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| MaskRcnnError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| MaskRcnnError::invalid("无法获取输出数量", e))?;

    if num_inputs != MASK_RCNN_NUM_INPUTS {
      let msg = format!(
        "预期模型输入数量为 {}, 实际为 {}",
        MASK_RCNN_NUM_INPUTS, num_inputs
      );
      error!("{}", msg);
      return Err(MaskRcnnError::invalid(&msg, rknpu::Error::InvalidModel));
    }
    if num_outputs != MASK_RCNN_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输出数量为 {}, 实际为 {}",
        MASK_RCNN_NUM_OUTPUTS, num_outputs
      );
      error!("{}", msg);
      return Err(MaskRcnnError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成");
    self.config.display();
    Ok(MaskRcnn {
      context,
      config: self.config,
    })
  }
}

/// 导出为 RKNN 的 Mask R-CNN 推理图：
/// 输入为 `IMAGE_MAX_DIM² × 3` 的 NHWC u8 图像，
/// 输出 0 为检测表，输出 1 为每个检测的各类别概率掩码
pub struct MaskRcnn {
  context: Context,
  config: CowConfig,
}

impl MaskRcnn {
  pub fn config(&self) -> &CowConfig {
    &self.config
  }
}

impl Model for MaskRcnn {
  type Input = RgbImage;
  type Output = DetectResult<CowLabel>;
  type Error = MaskRcnnError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let frame = MoldedFrame::from_image(input, &self.config);

    debug!("设置模型输入");
    self.context.set_input(
      0,
      frame.as_nhwc(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;

    let detections = match output.get_f32(MASK_RCNN_DETECTIONS_OUTPUT) {
      Ok(data) => data,
      Err(e) => {
        error!("获取第 {} 个输出失败: {}", MASK_RCNN_DETECTIONS_OUTPUT, e);
        return Err(MaskRcnnError::OutputError(
          MASK_RCNN_DETECTIONS_OUTPUT,
          e.to_string(),
        ));
      }
    };
    let masks = match output.get_f32(MASK_RCNN_MASKS_OUTPUT) {
      Ok(data) => data,
      Err(e) => {
        error!("获取第 {} 个输出失败: {}", MASK_RCNN_MASKS_OUTPUT, e);
        return Err(MaskRcnnError::OutputError(
          MASK_RCNN_MASKS_OUTPUT,
          e.to_string(),
        ));
      }
    };

    let result = unmold::unmold_detections(detections, masks, &frame, &self.config);
    debug!("检测到 {} 个实例", result.len());
    Ok(result)
  }
}
