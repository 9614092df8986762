// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use cow_estrus::{train::Layers, weights::WeightsSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Command {
  /// 准备训练目录
  Train,
  /// 对图像或视频做彩色溅射
  Splash,
}

/// 训练 Mask R-CNN 识别牛只发情状态
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 'train' 或 'splash'
  #[arg(value_enum, value_name = "COMMAND")]
  pub command: Command,

  /// 数据集根目录，包含 train/ 与 val/
  #[arg(long, value_name = "/path/to/cow/dataset/")]
  pub dataset: Option<PathBuf>,

  /// 权重文件路径，或 'coco'、'last'、'imagenet'
  #[arg(long, value_name = "/path/to/weights")]
  pub weights: WeightsSource,

  /// 训练轮数
  #[arg(long, default_value_t = 30)]
  pub epochs: u32,

  /// 学习率
  #[arg(long, alias = "learning_rate", default_value_t = 0.001)]
  pub learning_rate: f64,

  /// RPN 非极大值抑制阈值
  #[arg(long, alias = "rpn_nms_threshold", default_value_t = 0.7)]
  pub rpn_nms_threshold: f32,

  /// 启用数据增强
  #[arg(long)]
  pub augmentation: bool,

  /// 参与训练的层: heads, all, 3+, 4+, 5+
  #[arg(long, value_enum, default_value_t = Layers::Heads)]
  pub layers: Layers,

  /// 日志与权重目录
  #[arg(long, value_name = "/path/to/logs/", default_value = "logs")]
  pub logs: PathBuf,

  /// 要做彩色溅射的图像
  #[arg(long, value_name = "path to image")]
  pub image: Option<PathBuf>,

  /// 要做彩色溅射的视频，路径或网络地址
  #[arg(long, value_name = "path or URL to video")]
  pub video: Option<String>,

  /// 把检测到的轮廓写入 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub contours: Option<PathBuf>,

  /// 在溅射结果上绘制包围盒与轮廓
  #[arg(long)]
  pub outline: bool,

  /// 视频最多处理的帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<usize>,
}

impl Args {
  /// 命令所需的参数是否齐全
  pub fn validate(&self) -> anyhow::Result<()> {
    match self.command {
      Command::Train => {
        anyhow::ensure!(
          self.dataset.is_some(),
          "Argument --dataset is required for training"
        );
      }
      Command::Splash => {
        anyhow::ensure!(
          self.image.is_some() || self.video.is_some(),
          "Provide --image or --video to apply color splash"
        );
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_and_underscore_aliases() {
    let args = Args::try_parse_from([
      "cow-estrus",
      "train",
      "--dataset",
      "data",
      "--weights",
      "coco",
      "--learning_rate",
      "0.01",
      "--rpn_nms_threshold",
      "0.8",
      "--layers",
      "3+",
    ])
    .unwrap();
    assert_eq!(args.command, Command::Train);
    assert_eq!(args.weights, WeightsSource::Coco);
    assert_eq!(args.epochs, 30);
    assert_eq!(args.learning_rate, 0.01);
    assert_eq!(args.rpn_nms_threshold, 0.8);
    assert_eq!(args.layers, Layers::Stage3Up);
    assert_eq!(args.logs, PathBuf::from("logs"));
    assert!(!args.augmentation);
    assert!(args.validate().is_ok());
  }

  #[test]
  fn train_requires_dataset() {
    let args = Args::try_parse_from(["cow-estrus", "train", "--weights", "last"]).unwrap();
    assert!(args.validate().is_err());
  }

  #[test]
  fn splash_requires_image_or_video() {
    let args = Args::try_parse_from(["cow-estrus", "splash", "--weights", "model.rknn"]).unwrap();
    assert!(args.validate().is_err());

    let args = Args::try_parse_from([
      "cow-estrus",
      "splash",
      "--weights",
      "model.rknn",
      "--video",
      "barn.mp4",
      "--max-frames",
      "10",
    ])
    .unwrap();
    assert!(args.validate().is_ok());
    assert_eq!(args.max_frames, Some(10));
  }

  #[test]
  fn unknown_command_is_rejected() {
    assert!(Args::try_parse_from(["cow-estrus", "detect", "--weights", "coco"]).is_err());
  }
}
