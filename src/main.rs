// 该文件是 Gengfu （更夫） 项目的一部分。
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

use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use gengfu::detector::postprocess::PostProcessor;
use gengfu::input::create_input_source;
use gengfu::model::StubModel;
use gengfu::motion::{MotionDetector, MotionGate, RunningAverageSubtractor};
use gengfu::output::{ClipRecorder, DirectoryClipSink, FramePublisher};
use gengfu::pipeline::{Pipeline, PipelineOptions};
use gengfu::rate::RateController;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  info!("Gengfu 边缘视频哨兵");
  info!("输入来源: {}", args.input);
  info!("发布路径: {}", args.publish_path);
  info!("片段目录: {}", args.clip_dir);

  let mut input = create_input_source(&args.input, args.camera_fps)?;
  let fps = input.fps().unwrap_or(args.camera_fps);
  // 门控与录制按跳帧后的有效 tick 率计时
  let tick_fps = fps / (args.skip_frames + 1) as f64;
  info!(
    "输入源已打开: {}x{} @ {:.1} fps, 有效处理率 {:.2} fps",
    input.width(),
    input.height(),
    fps,
    tick_fps
  );

  let model = StubModel::new(args.model_input);
  let postprocessor = PostProcessor::new(
    args.model_input,
    args.nms_threshold,
    args.iou_grouping_threshold,
  );
  let gate = MotionGate::new(args.detection_duration, args.deactivation_duration, tick_fps);
  let motion = MotionDetector::new(
    RunningAverageSubtractor::new(args.motion_threshold),
    gate,
    args.min_motion_area,
    args.fast_motion_presence,
  );
  let rate = RateController::new(args.skip_frames, fps);
  let publisher = FramePublisher::new(&args.publish_path);
  let recorder =
    ClipRecorder::<DirectoryClipSink>::new(&args.clip_dir, tick_fps, input.width(), input.height());

  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    let _ = tx.send(());
  })
  .context("无法设置 Ctrl-C 处理器")?;

  let mut pipeline = Pipeline::new(
    model,
    postprocessor,
    motion,
    rate,
    publisher,
    recorder,
    PipelineOptions {
      dedup: args.dedup,
      republish_last: args.republish_last,
      max_frames: args.max_frames,
    },
  );

  pipeline.run(&mut input, &rx)
}
