// 该文件是 Gengfu （更夫） 项目的一部分。
// src/pipeline.rs - 单线程采集处理循环
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

use std::sync::mpsc::Receiver;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::detector::{DedupStrategy, Detection};
use crate::detector::postprocess::{PostProcessor, letterbox};
use crate::input::Frame;
use crate::model::Model;
use crate::motion::{BackgroundSubtractor, MotionDetector};
use crate::output::{ClipRecorder, ClipSink, FramePublisher, NO_DETECTION_TAG, Visualizer, encode_frame};
use crate::rate::RateController;

/// 处理循环选项
pub struct PipelineOptions {
  /// 检测去重策略
  pub dedup: DedupStrategy,
  /// 跳帧 tick 是否重发上一帧（维持读者侧的刷新节奏）
  pub republish_last: bool,
  /// 最大总帧数，0 表示无限制
  pub max_frames: u64,
}

/// 上一次成功发布的帧，供跳帧 tick 重发
struct LastPublished {
  class_tag: i8,
  width: u32,
  height: u32,
  payload: Vec<u8>,
}

/// 单线程处理管线：运动门控推理，检测标注后发布，片段按留存策略录制。
/// 所有阶段在一个循环内顺序执行，没有跨帧的并发。
pub struct Pipeline<M: Model, B: BackgroundSubtractor, S: ClipSink> {
  model: M,
  postprocessor: PostProcessor,
  motion: MotionDetector<B>,
  rate: RateController,
  publisher: FramePublisher,
  recorder: ClipRecorder<S>,
  visualizer: Visualizer,
  options: PipelineOptions,
  last_published: Option<LastPublished>,
}

impl<M: Model, B: BackgroundSubtractor, S: ClipSink> Pipeline<M, B, S> {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    model: M,
    postprocessor: PostProcessor,
    motion: MotionDetector<B>,
    rate: RateController,
    publisher: FramePublisher,
    recorder: ClipRecorder<S>,
    options: PipelineOptions,
  ) -> Self {
    Self {
      model,
      postprocessor,
      motion,
      rate,
      publisher,
      recorder,
      visualizer: Visualizer::new(),
      options,
      last_published: None,
    }
  }

  /// 运行处理循环直到输入耗尽、到达帧数上限或收到停止信号
  pub fn run<I>(&mut self, input: I, stop: &Receiver<()>) -> Result<()>
  where
    I: Iterator<Item = Result<Frame>>,
  {
    let mut tick_error = None;

    for frame in input {
      if stop.try_recv().is_ok() {
        info!("收到停止信号，退出处理循环");
        break;
      }

      let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
          // 采集失败视为源已失效，收尾后退出
          warn!("采集帧失败: {}", e);
          break;
        }
      };

      if !self.rate.should_process() {
        // 跳帧 tick：可选地重发上一帧，让读者侧保持刷新
        if self.options.republish_last {
          if let Some(last) = self.last_published.as_ref() {
            if let Err(e) =
              self
                .publisher
                .publish_encoded(last.class_tag, last.width, last.height, &last.payload)
            {
              warn!("重发上一帧失败: {}", e);
            }
          }
        }
      } else if let Err(e) = self.tick(&frame) {
        // 录制失败也要走收尾路径，打开的片段按留存规则关闭
        tick_error = Some(e);
        break;
      }

      if self.options.max_frames > 0 && self.rate.total_frames() >= self.options.max_frames {
        info!("已达到最大帧数限制: {}", self.options.max_frames);
        break;
      }
    }

    let finish = self.recorder.finish().context("收尾片段失败");
    info!(
      "处理循环结束: 总帧数 {}, 处理帧数 {}",
      self.rate.total_frames(),
      self.rate.processed_frames()
    );
    match (tick_error, finish) {
      (Some(e), Err(finish_err)) => {
        warn!("收尾片段失败: {}", finish_err);
        Err(e)
      }
      (Some(e), Ok(())) => Err(e),
      (None, finish) => finish,
    }
  }

  /// 处理一个活帧
  fn tick(&mut self, frame: &Frame) -> Result<()> {
    let motion_active = self.motion.detected_long(&frame.image);

    // 推理只在运动激活时运行，静止场景不耗费算力
    let detections = if motion_active {
      self.detect(&frame.image)
    } else {
      Vec::new()
    };

    let mut annotated = frame.image.clone();
    self.visualizer.draw_detections(&mut annotated, &detections);

    let class_tag = detections
      .last()
      .map(|detection| detection.class.class_tag())
      .unwrap_or(NO_DETECTION_TAG);

    // 发布失败不致命，下一个 tick 会覆盖
    match encode_frame(&annotated) {
      Ok(payload) => {
        let (width, height) = annotated.dimensions();
        match self
          .publisher
          .publish_encoded(class_tag, width, height, &payload)
        {
          Ok(()) => {
            self.last_published = Some(LastPublished {
              class_tag,
              width,
              height,
              payload,
            });
          }
          Err(e) => warn!("发布帧失败: {}", e),
        }
      }
      Err(e) => warn!("编码帧失败: {}", e),
    }

    self
      .recorder
      .update(motion_active, !detections.is_empty(), &annotated)
      .context("写入片段失败")?;

    Ok(())
  }

  /// letterbox -> 推理 -> 后处理，任何一步失败都降级为空集合
  fn detect(&self, image: &image::RgbImage) -> Vec<Detection> {
    let lb = letterbox(image, self.model.input_size());

    let output = match self.model.infer(&lb.canvas) {
      Ok(output) => output,
      Err(e) => {
        warn!("推理失败: {}", e);
        return Vec::new();
      }
    };

    match self.postprocessor.dedup(&output, lb.scale, self.options.dedup) {
      Ok(detections) => detections,
      Err(e) => {
        warn!("后处理失败: {}", e);
        Vec::new()
      }
    }
  }
}
