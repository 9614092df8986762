// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/config.rs - 模型与训练配置
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
use tracing::info;

/// 牛只数据集的 Mask R-CNN 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CowConfig {
  /// 配置名称，同时作为日志目录和权重文件的前缀
  pub name: String,
  pub gpu_count: u32,
  /// 12GB 显存可容纳两张图像
  pub images_per_gpu: u32,
  /// 背景 + 未发情 + 发情
  pub num_classes: u32,
  pub steps_per_epoch: u32,
  pub validation_steps: u32,
  /// 低于该置信度的检测结果被丢弃
  pub detection_min_confidence: f32,
  pub detection_max_instances: usize,
  pub detection_nms_threshold: f32,
  pub rpn_nms_threshold: f32,
  pub learning_rate: f64,
  pub learning_momentum: f64,
  pub weight_decay: f64,
  pub image_min_dim: u32,
  pub image_max_dim: u32,
  /// 模型输出掩码尺寸 [高, 宽]
  pub mask_shape: [u32; 2],
  pub backbone: String,
}

impl Default for CowConfig {
  fn default() -> Self {
    Self {
      name: "cow".to_string(),
      gpu_count: 1,
      images_per_gpu: 2,
      num_classes: 1 + 1 + 1,
      steps_per_epoch: 64,
      validation_steps: 50,
      detection_min_confidence: 0.6,
      detection_max_instances: 100,
      detection_nms_threshold: 0.3,
      rpn_nms_threshold: 0.7,
      learning_rate: 0.001,
      learning_momentum: 0.9,
      weight_decay: 0.0001,
      image_min_dim: 800,
      image_max_dim: 1024,
      mask_shape: [28, 28],
      backbone: "resnet101".to_string(),
    }
  }
}

impl CowConfig {
  /// 训练配置，RPN NMS 阈值来自命令行
  pub fn for_training(rpn_nms_threshold: f32) -> Self {
    Self {
      rpn_nms_threshold,
      ..Self::default()
    }
  }

  /// 推理时一次只处理一张图像
  pub fn for_inference() -> Self {
    Self {
      gpu_count: 1,
      images_per_gpu: 1,
      ..Self::default()
    }
  }

  pub fn batch_size(&self) -> u32 {
    self.gpu_count * self.images_per_gpu
  }

  /// 打印全部配置项
  pub fn display(&self) {
    info!("配置项:");
    info!("  {:<28} {}", "NAME", self.name);
    info!("  {:<28} {}", "BACKBONE", self.backbone);
    info!("  {:<28} {}", "BATCH_SIZE", self.batch_size());
    info!("  {:<28} {}", "GPU_COUNT", self.gpu_count);
    info!("  {:<28} {}", "IMAGES_PER_GPU", self.images_per_gpu);
    info!("  {:<28} {}", "NUM_CLASSES", self.num_classes);
    info!("  {:<28} {}", "STEPS_PER_EPOCH", self.steps_per_epoch);
    info!("  {:<28} {}", "VALIDATION_STEPS", self.validation_steps);
    info!("  {:<28} {}", "DETECTION_MIN_CONFIDENCE", self.detection_min_confidence);
    info!("  {:<28} {}", "DETECTION_MAX_INSTANCES", self.detection_max_instances);
    info!("  {:<28} {}", "DETECTION_NMS_THRESHOLD", self.detection_nms_threshold);
    info!("  {:<28} {}", "RPN_NMS_THRESHOLD", self.rpn_nms_threshold);
    info!("  {:<28} {}", "LEARNING_RATE", self.learning_rate);
    info!("  {:<28} {}", "LEARNING_MOMENTUM", self.learning_momentum);
    info!("  {:<28} {}", "WEIGHT_DECAY", self.weight_decay);
    info!("  {:<28} {}", "IMAGE_MIN_DIM", self.image_min_dim);
    info!("  {:<28} {}", "IMAGE_MAX_DIM", self.image_max_dim);
    info!("  {:<28} {:?}", "MASK_SHAPE", self.mask_shape);
  }
}
