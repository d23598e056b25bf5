// 该文件是 Gengfu （更夫） 项目的一部分。
// src/output/record.rs - 片段录制与留存策略
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
use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 片段写入能力接口，容器编码由实现负责。
/// finalize 提交片段，discard 丢弃且不留任何文件。
pub trait ClipSink: Sized {
  fn open(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self, RecordError>;
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), RecordError>;
  fn finalize(self) -> Result<(), RecordError>;
  fn discard(self) -> Result<(), RecordError>;
}

/// 目录片段写入器：每个片段是一个目录，
/// 内含按序号命名的 JPEG 帧与 clip.json 清单
pub struct DirectoryClipSink {
  directory: PathBuf,
  fps: f64,
  width: u32,
  height: u32,
  frame_count: u64,
}

impl ClipSink for DirectoryClipSink {
  fn open(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self, RecordError> {
    fs::create_dir_all(path)?;
    Ok(Self {
      directory: path.to_path_buf(),
      fps,
      width,
      height,
      frame_count: 0,
    })
  }

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), RecordError> {
    let path = self.directory.join(format!("{:06}.jpg", self.frame_count));
    image.save(&path)?;
    self.frame_count += 1;
    Ok(())
  }

  fn finalize(self) -> Result<(), RecordError> {
    let manifest = serde_json::json!({
      "fps": self.fps,
      "width": self.width,
      "height": self.height,
      "frames": self.frame_count,
    });
    fs::write(self.directory.join("clip.json"), manifest.to_string())?;
    Ok(())
  }

  fn discard(self) -> Result<(), RecordError> {
    fs::remove_dir_all(&self.directory)?;
    Ok(())
  }
}

struct OpenClip<S: ClipSink> {
  sink: S,
  path: PathBuf,
  has_qualifying_frame: bool,
}

/// 片段录制器。
/// 运动或检测开启片段（运动先行，留住检测前的上下文），
/// 片段内出现过检测才提交，纯运动噪声的片段自动清除。
/// 同一时刻最多只有一个打开的片段。
pub struct ClipRecorder<S: ClipSink> {
  root: PathBuf,
  fps: f64,
  width: u32,
  height: u32,
  open: Option<OpenClip<S>>,
}

impl<S: ClipSink> ClipRecorder<S> {
  pub fn new(root: impl Into<PathBuf>, fps: f64, width: u32, height: u32) -> Self {
    Self {
      root: root.into(),
      fps,
      width,
      height,
      open: None,
    }
  }

  pub fn is_recording(&self) -> bool {
    self.open.is_some()
  }

  /// 时间戳分片的片段路径：<root>/<年>/<月>/<日>/<时-分-秒.毫秒>
  fn clip_path(&self) -> PathBuf {
    let now = Utc::now();
    self
      .root
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
      .join(now.format("%H-%M-%S%.3f").to_string())
  }

  /// 每个处理 tick 调用一次
  pub fn update(
    &mut self,
    motion_active: bool,
    has_detection: bool,
    frame: &RgbImage,
  ) -> Result<(), RecordError> {
    if motion_active || has_detection {
      if self.open.is_none() {
        let path = self.clip_path();
        if let Some(parent) = path.parent() {
          fs::create_dir_all(parent)?;
        }
        info!("开始录制片段: {}", path.display());
        let sink = S::open(&path, self.fps, self.width, self.height)?;
        self.open = Some(OpenClip {
          sink,
          path,
          has_qualifying_frame: false,
        });
      }

      if let Some(clip) = self.open.as_mut() {
        if frame.dimensions() == (self.width, self.height) {
          clip.sink.write_frame(frame)?;
        } else {
          let resized = imageops::resize(
            frame,
            self.width,
            self.height,
            imageops::FilterType::Triangle,
          );
          clip.sink.write_frame(&resized)?;
        }
        if has_detection {
          clip.has_qualifying_frame = true;
        }
      }
    } else if let Some(clip) = self.open.take() {
      Self::close(clip)?;
    }

    Ok(())
  }

  /// 采集循环退出时收尾：打开的片段按同样的留存规则提交或删除
  pub fn finish(&mut self) -> Result<(), RecordError> {
    if let Some(clip) = self.open.take() {
      Self::close(clip)?;
    }
    Ok(())
  }

  fn close(clip: OpenClip<S>) -> Result<(), RecordError> {
    if clip.has_qualifying_frame {
      info!("片段包含有效检测，提交: {}", clip.path.display());
      clip.sink.finalize()
    } else {
      info!("片段内无检测，删除: {}", clip.path.display());
      clip.sink.discard()
    }
  }
}
