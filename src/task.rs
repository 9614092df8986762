// 该文件是 Cow Estrus （牛只发情检测） 项目的一部分。
// src/task.rs - 推理任务循环
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 单张图像：取第一帧推理并渲染
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    output.finish()?;
    info!("渲染完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 视频：逐帧推理并立即写出，直到输入结束、达到帧数上限或收到 Ctrl-C
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  handle_interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 安装 Ctrl-C 处理器；每个进程只能安装一次
  pub fn handle_interrupt(mut self, handle: bool) -> Self {
    self.handle_interrupt = handle;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupted = Arc::new(AtomicBool::new(false));

    if self.handle_interrupt {
      let flag = interrupted.clone();
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        flag.store(true, Ordering::SeqCst);
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })?;
    }

    let mut frame_index = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_index += 1;
      info!("frame: {}", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if interrupted.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    output.finish()?;
    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::{Cell, RefCell};
  use thiserror::Error;

  #[derive(Error, Debug)]
  #[error("fake failure")]
  struct FakeError;

  struct Doubler;

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = FakeError;

    fn infer(&self, input: &u32) -> Result<u32, FakeError> {
      if *input == 0 { Err(FakeError) } else { Ok(input * 2) }
    }
  }

  #[derive(Default)]
  struct Collect {
    seen: RefCell<Vec<(u32, u32)>>,
    finished: Cell<usize>,
    fail_finish: bool,
  }

  impl Render<u32, u32> for &Collect {
    type Error = FakeError;

    fn render_result(&self, frame: &u32, result: &u32) -> Result<(), FakeError> {
      self.seen.borrow_mut().push((*frame, *result));
      Ok(())
    }

    fn finish(&self) -> Result<(), FakeError> {
      self.finished.set(self.finished.get() + 1);
      if self.fail_finish { Err(FakeError) } else { Ok(()) }
    }
  }

  #[test]
  fn one_shot_uses_first_frame() {
    let sink = Collect::default();
    OneShotTask.run_task(vec![3, 4].into_iter(), Doubler, &sink).unwrap();
    assert_eq!(*sink.seen.borrow(), vec![(3, 6)]);
    assert_eq!(sink.finished.get(), 1);
  }

  #[test]
  fn finish_failure_fails_the_task() {
    let sink = Collect {
      fail_finish: true,
      ..Default::default()
    };
    assert!(OneShotTask.run_task(vec![3].into_iter(), Doubler, &sink).is_err());

    let sink = Collect {
      fail_finish: true,
      ..Default::default()
    };
    let err = ContinuousTask::default()
      .run_task(1..4, Doubler, &sink)
      .unwrap_err();
    assert_eq!(err.to_string(), "fake failure");
    assert_eq!(sink.seen.borrow().len(), 3);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let sink = Collect::default();
    assert!(OneShotTask.run_task(Vec::<u32>::new().into_iter(), Doubler, &sink).is_err());
  }

  #[test]
  fn continuous_stops_at_frame_limit() {
    let sink = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_task(1..10, Doubler, &sink)
      .unwrap();
    assert_eq!(*sink.seen.borrow(), vec![(1, 2), (2, 4)]);
    assert_eq!(sink.finished.get(), 1);
  }

  #[test]
  fn continuous_propagates_model_errors() {
    let sink = Collect::default();
    let err = ContinuousTask::default()
      .run_task(vec![1, 0, 2].into_iter(), Doubler, &sink)
      .unwrap_err();
    assert_eq!(err.to_string(), "fake failure");
    assert_eq!(sink.seen.borrow().len(), 1);
  }

  #[cfg(all(feature = "read_image_file", feature = "contour_record"))]
  #[test]
  fn unwritable_contour_file_fails_the_task() {
    use crate::{
      input::ImageFileInput,
      model::{CowLabel, DetectResult},
      output::{ContourRecordOutput, OutputGroup, OutputWrapper},
    };
    use image::RgbImage;

    struct Nothing;

    impl Model for Nothing {
      type Input = RgbImage;
      type Output = DetectResult<CowLabel>;
      type Error = FakeError;

      fn infer(&self, input: &RgbImage) -> Result<Self::Output, FakeError> {
        Ok(DetectResult::empty(input.width(), input.height()))
      }
    }

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("contours.json");
    std::fs::create_dir(&target).unwrap();

    let outputs = OutputGroup::default().with(OutputWrapper::ContourRecordOutput(
      ContourRecordOutput::new(&target, "img"),
    ));
    let input = ImageFileInput::from_image(RgbImage::new(4, 4));
    assert!(OneShotTask.run_task(input, Nothing, outputs).is_err());
  }
}
