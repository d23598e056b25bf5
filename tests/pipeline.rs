// 该文件是 Gengfu （更夫） 项目的一部分。
// tests/pipeline.rs - 处理管线集成测试
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

use std::fs;
use std::path::Path;
use std::sync::mpsc;

use image::{GrayImage, RgbImage};

use gengfu::detector::DedupStrategy;
use gengfu::detector::postprocess::PostProcessor;
use gengfu::input::Frame;
use gengfu::model::{Model, OutputLayout, RawOutput, StubModel};
use gengfu::motion::{BackgroundSubtractor, MotionDetector, MotionGate};
use gengfu::output::{
  ClipRecorder, ClipSink, DirectoryClipSink, FramePublisher, NO_DETECTION_TAG, RecordError,
};
use gengfu::pipeline::{Pipeline, PipelineOptions};
use gengfu::rate::RateController;

const W: u32 = 64;
const H: u32 = 48;

/// 固定输出一个人形锚点的脚本化模型
struct ScriptedModel;

impl Model for ScriptedModel {
  type Error = std::convert::Infallible;

  fn input_size(&self) -> u32 {
    W
  }

  fn infer(&self, _canvas: &RgbImage) -> Result<RawOutput, Self::Error> {
    // 归一化中心框 (0.5, 0.5, 0.5, 0.5)，类别 0（人）
    Ok(RawOutput {
      data: vec![0.5, 0.5, 0.5, 0.5, 0.9],
      anchors: 1,
      channels: 5,
      layout: OutputLayout::ClassScores,
    })
  }
}

/// 永远报告满幅前景的背景减除器
struct AlwaysForeground;

impl BackgroundSubtractor for AlwaysForeground {
  fn apply(&mut self, frame: &RgbImage) -> GrayImage {
    let (width, height) = frame.dimensions();
    GrayImage::from_pixel(width, height, image::Luma([255]))
  }
}

fn frames(count: usize) -> impl Iterator<Item = anyhow::Result<Frame>> {
  (0..count as u64).map(|index| {
    Ok(Frame {
      image: RgbImage::new(W, H),
      index,
      timestamp_ms: index * 100,
    })
  })
}

fn pipeline<M: Model>(
  model: M,
  publish_path: &Path,
  clip_root: &Path,
) -> Pipeline<M, AlwaysForeground, DirectoryClipSink> {
  // fps 1.0、时长 1 秒：一个运动样本即激活
  let gate = MotionGate::new(1.0, None, 1.0);
  let motion = MotionDetector::new(AlwaysForeground, gate, 100, false);
  Pipeline::new(
    model,
    PostProcessor::new(W, 0.4, 0.5),
    motion,
    RateController::new(0, 10.0),
    FramePublisher::new(publish_path),
    ClipRecorder::new(clip_root, 1.0, W, H),
    PipelineOptions {
      dedup: DedupStrategy::Nms,
      republish_last: false,
      max_frames: 0,
    },
  )
}

/// root 下提交的片段目录（含 clip.json）
fn committed_clips(root: &Path) -> Vec<std::path::PathBuf> {
  let mut clips = Vec::new();
  let mut stack = vec![root.to_path_buf()];
  while let Some(dir) = stack.pop() {
    if dir.join("clip.json").exists() {
      clips.push(dir);
      continue;
    }
    if let Ok(entries) = fs::read_dir(&dir) {
      for entry in entries.flatten() {
        if entry.path().is_dir() {
          stack.push(entry.path());
        }
      }
    }
  }
  clips
}

#[test]
fn detections_publish_class_tag_and_commit_clip() {
  let dir = tempfile::tempdir().unwrap();
  let publish_path = dir.path().join("video_frame");
  let clip_root = dir.path().join("clips");

  let mut pipeline = pipeline(ScriptedModel, &publish_path, &clip_root);
  let (_tx, rx) = mpsc::channel();
  pipeline.run(frames(3), &rx).unwrap();

  // 发布文件头: [类别标签][宽][高]，人 = 0
  let data = fs::read(&publish_path).unwrap();
  assert_eq!(data[0] as i8, 0);
  assert_eq!(u32::from_le_bytes(data[1..5].try_into().unwrap()), W);
  assert_eq!(u32::from_le_bytes(data[5..9].try_into().unwrap()), H);
  assert!(data.len() > 9, "负载必须包含 JPEG 数据");

  // 含检测的片段在输入耗尽时提交
  let clips = committed_clips(&clip_root);
  assert_eq!(clips.len(), 1);
  let manifest: serde_json::Value =
    serde_json::from_str(&fs::read_to_string(clips[0].join("clip.json")).unwrap()).unwrap();
  assert_eq!(manifest["frames"], 3);
}

#[test]
fn motion_without_detection_publishes_heartbeat_and_discards_clip() {
  let dir = tempfile::tempdir().unwrap();
  let publish_path = dir.path().join("video_frame");
  let clip_root = dir.path().join("clips");

  // 空模型: 有运动但永远没有检测
  let mut pipeline = pipeline(StubModel::new(W), &publish_path, &clip_root);
  let (_tx, rx) = mpsc::channel();
  pipeline.run(frames(3), &rx).unwrap();

  let data = fs::read(&publish_path).unwrap();
  assert_eq!(data[0] as i8, NO_DETECTION_TAG);

  // 纯运动片段被丢弃，不得留下任何文件
  assert!(committed_clips(&clip_root).is_empty());
  let mut stack = vec![clip_root];
  while let Some(entry) = stack.pop() {
    if let Ok(entries) = fs::read_dir(&entry) {
      for entry in entries.flatten() {
        let path = entry.path();
        assert!(path.is_dir(), "不应残留文件: {}", path.display());
        stack.push(path);
      }
    }
  }
}

#[test]
fn skip_frames_limits_expensive_path() {
  let dir = tempfile::tempdir().unwrap();
  let publish_path = dir.path().join("video_frame");
  let clip_root = dir.path().join("clips");

  let gate = MotionGate::new(1.0, None, 1.0);
  let motion = MotionDetector::new(AlwaysForeground, gate, 100, false);
  let mut pipeline = Pipeline::new(
    ScriptedModel,
    PostProcessor::new(W, 0.4, 0.5),
    motion,
    // 每 3 帧处理 1 帧
    RateController::new(2, 10.0),
    FramePublisher::new(&publish_path),
    ClipRecorder::<DirectoryClipSink>::new(&clip_root, 1.0, W, H),
    PipelineOptions {
      dedup: DedupStrategy::Nms,
      republish_last: false,
      max_frames: 0,
    },
  );

  let (_tx, rx) = mpsc::channel();
  pipeline.run(frames(9), &rx).unwrap();

  // 9 帧中只有 3 帧走处理路径，片段清单应只记了 3 帧
  let clips = committed_clips(&clip_root);
  assert_eq!(clips.len(), 1);
  let manifest: serde_json::Value =
    serde_json::from_str(&fs::read_to_string(clips[0].join("clip.json")).unwrap()).unwrap();
  assert_eq!(manifest["frames"], 3);
}

#[test]
fn max_frames_stops_the_loop() {
  let dir = tempfile::tempdir().unwrap();
  let publish_path = dir.path().join("video_frame");
  let clip_root = dir.path().join("clips");

  let gate = MotionGate::new(1.0, None, 1.0);
  let motion = MotionDetector::new(AlwaysForeground, gate, 100, false);
  let mut pipeline = Pipeline::new(
    ScriptedModel,
    PostProcessor::new(W, 0.4, 0.5),
    motion,
    RateController::new(0, 10.0),
    FramePublisher::new(&publish_path),
    ClipRecorder::<DirectoryClipSink>::new(&clip_root, 1.0, W, H),
    PipelineOptions {
      dedup: DedupStrategy::Nms,
      republish_last: false,
      max_frames: 2,
    },
  );

  let (_tx, rx) = mpsc::channel();
  // 输入远多于上限，循环应在 2 帧后退出
  pipeline.run(frames(100), &rx).unwrap();

  let clips = committed_clips(&clip_root);
  assert_eq!(clips.len(), 1);
  let manifest: serde_json::Value =
    serde_json::from_str(&fs::read_to_string(clips[0].join("clip.json")).unwrap()).unwrap();
  assert_eq!(manifest["frames"], 2);
}

/// 第二次写帧即失败的片段写入器，记录收尾方式
struct BrokenDiskSink;

static BROKEN_WRITES: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
static BROKEN_FINALIZED: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
static BROKEN_DISCARDED: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

impl ClipSink for BrokenDiskSink {
  fn open(_path: &Path, _fps: f64, _width: u32, _height: u32) -> Result<Self, RecordError> {
    Ok(BrokenDiskSink)
  }

  fn write_frame(&mut self, _image: &RgbImage) -> Result<(), RecordError> {
    use std::sync::atomic::Ordering;
    if BROKEN_WRITES.fetch_add(1, Ordering::SeqCst) == 0 {
      Ok(())
    } else {
      Err(RecordError::Io(std::io::Error::other("磁盘已满")))
    }
  }

  fn finalize(self) -> Result<(), RecordError> {
    BROKEN_FINALIZED.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    Ok(())
  }

  fn discard(self) -> Result<(), RecordError> {
    BROKEN_DISCARDED.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    Ok(())
  }
}

#[test]
fn record_error_still_closes_open_clip() {
  use std::sync::atomic::Ordering;

  let dir = tempfile::tempdir().unwrap();
  let publish_path = dir.path().join("video_frame");
  let clip_root = dir.path().join("clips");

  let gate = MotionGate::new(1.0, None, 1.0);
  let motion = MotionDetector::new(AlwaysForeground, gate, 100, false);
  let mut pipeline = Pipeline::new(
    ScriptedModel,
    PostProcessor::new(W, 0.4, 0.5),
    motion,
    RateController::new(0, 10.0),
    FramePublisher::new(&publish_path),
    ClipRecorder::<BrokenDiskSink>::new(&clip_root, 1.0, W, H),
    PipelineOptions {
      dedup: DedupStrategy::Nms,
      republish_last: false,
      max_frames: 0,
    },
  );

  let (_tx, rx) = mpsc::channel();
  // 第二个 tick 的片段写入失败，循环报错退出
  assert!(pipeline.run(frames(5), &rx).is_err());

  // 错误退出路径上打开的片段仍按留存规则关闭：
  // 首帧带检测，片段应被提交而不是悬空
  assert_eq!(BROKEN_FINALIZED.load(Ordering::SeqCst), 1);
  assert_eq!(BROKEN_DISCARDED.load(Ordering::SeqCst), 0);
}

#[test]
fn publish_failure_is_not_fatal() {
  let dir = tempfile::tempdir().unwrap();
  // 目标目录不存在，每次发布都失败
  let publish_path = dir.path().join("missing").join("video_frame");
  let clip_root = dir.path().join("clips");

  let mut pipeline = pipeline(ScriptedModel, &publish_path, &clip_root);
  let (_tx, rx) = mpsc::channel();
  pipeline.run(frames(3), &rx).unwrap();

  // 发布失败只记日志，处理与录制照常进行
  assert!(!publish_path.exists());
  let clips = committed_clips(&clip_root);
  assert_eq!(clips.len(), 1);
  let manifest: serde_json::Value =
    serde_json::from_str(&fs::read_to_string(clips[0].join("clip.json")).unwrap()).unwrap();
  assert_eq!(manifest["frames"], 3);
}

#[test]
fn acquisition_error_finalizes_open_clip() {
  let dir = tempfile::tempdir().unwrap();
  let publish_path = dir.path().join("video_frame");
  let clip_root = dir.path().join("clips");

  let mut pipeline = pipeline(ScriptedModel, &publish_path, &clip_root);

  let input = frames(2).chain(std::iter::once(Err(anyhow::anyhow!("设备离线"))));
  let (_tx, rx) = mpsc::channel();
  pipeline.run(input, &rx).unwrap();

  // 采集失败时循环收尾，已打开的片段按留存规则提交
  let clips = committed_clips(&clip_root);
  assert_eq!(clips.len(), 1);
}
