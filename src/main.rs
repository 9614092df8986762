// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cow_estrus::{
  config::CowConfig,
  input::InputWrapper,
  model::MaskRcnnBuilder,
  output::{
    ContourRecordOutput, GStreamerVideoOutput, OutputGroup, OutputWrapper, SaveImageFileOutput,
    draw::Draw,
  },
  splash::splash_file_name,
  task::{ContinuousTask, OneShotTask, Task},
  train::{TrainOptions, prepare_training},
};

use crate::args::{Args, Command};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  args.validate()?;

  info!("Weights: {}", args.weights);
  info!("Epochs: {}", args.epochs);
  info!(
    "Dataset: {}",
    args
      .dataset
      .as_deref()
      .map(|p| p.display().to_string())
      .unwrap_or_default()
  );
  info!("Logs: {}", args.logs.display());
  info!("Augmentation: {}", args.augmentation);
  info!("Layers: {:?}", args.layers);

  match args.command {
    Command::Train => train(&args),
    Command::Splash => splash(&args),
  }
}

fn train(args: &Args) -> Result<()> {
  let Some(dataset) = args.dataset.clone() else {
    anyhow::bail!("Argument --dataset is required for training");
  };
  let options = TrainOptions {
    dataset,
    weights: args.weights.clone(),
    logs: args.logs.clone(),
    epochs: args.epochs,
    learning_rate: args.learning_rate,
    rpn_nms_threshold: args.rpn_nms_threshold,
    augmentation: args.augmentation,
    layers: args.layers,
  };
  let run_dir = prepare_training(&options)?;
  info!("训练目录已生成: {}", run_dir.display());
  Ok(())
}

fn splash(args: &Args) -> Result<()> {
  let config = CowConfig::for_inference();
  let weights = args.weights.resolve(&args.logs, &config.name)?;
  let model = MaskRcnnBuilder::new(&weights.path).config(config).build()?;
  let draw = Draw::default().with_outline(args.outline);

  if let Some(image) = &args.image {
    info!("Running on {}", image.display());
    let input = InputWrapper::image(image)?;
    let file_name = PathBuf::from(splash_file_name("png"));
    let mut outputs =
      OutputGroup::default().with(OutputWrapper::SaveImageFileOutput(SaveImageFileOutput::new(
        &file_name, draw,
      )));
    if let Some(path) = &args.contours {
      outputs.push(OutputWrapper::ContourRecordOutput(ContourRecordOutput::new(
        path,
        image_id_of(image),
      )));
    }
    OneShotTask.run_task(input, model, outputs)?;
    info!("Saved to {}", file_name.display());
  } else if let Some(video) = &args.video {
    info!("Running on {}", video);
    let input = InputWrapper::video(video)?;
    let (width, height) = input
      .dimensions()
      .ok_or_else(|| anyhow::anyhow!("无法获取视频尺寸"))?;
    let fps = input.fps().unwrap_or(cow_estrus::input::DEFAULT_FPS);

    let file_name = PathBuf::from(splash_file_name("avi"));
    let mut outputs = OutputGroup::default().with(OutputWrapper::GStreamerVideoOutput(
      GStreamerVideoOutput::new(&file_name, width, height, fps, draw)?,
    ));
    if let Some(path) = &args.contours {
      outputs.push(OutputWrapper::ContourRecordOutput(
        ContourRecordOutput::new(path, image_id_of(Path::new(video))).per_frame(true),
      ));
    }
    ContinuousTask::default()
      .with_frame_number(args.max_frames)
      .handle_interrupt(true)
      .run_task(input, model, outputs)?;
    info!("Saved to {}", file_name.display());
  }

  Ok(())
}

/// 轮廓记录使用输入文件名（不含扩展名）作为图像编号
fn image_id_of(path: &Path) -> String {
  path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default()
}
