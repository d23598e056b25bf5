// 该文件是 Gengfu （更夫） 项目的一部分。
// src/input/image_sequence.rs - 图片序列输入源
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

use anyhow::{Context, Result, bail};

use super::{Frame, InputSource, InputSourceType};

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// 图片序列输入源：按文件名排序读取目录下的图片，
/// 时间戳按给定帧率合成。用于无摄像头环境的调试与回放。
pub struct ImageSequenceSource {
  files: Vec<PathBuf>,
  cursor: usize,
  frame_index: u64,
  width: u32,
  height: u32,
  fps: f64,
}

impl ImageSequenceSource {
  pub fn new(directory: impl AsRef<Path>, fps: f64) -> Result<Self> {
    let directory = directory.as_ref();
    let mut files: Vec<PathBuf> = fs::read_dir(directory)
      .with_context(|| format!("无法读取目录: {}", directory.display()))?
      .flatten()
      .map(|entry| entry.path())
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| EXTENSIONS.contains(&ext.to_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect();
    files.sort();

    if files.is_empty() {
      bail!("目录中没有图片文件: {}", directory.display());
    }

    // 以首张图片的尺寸作为源尺寸
    let first = image::open(&files[0])
      .with_context(|| format!("无法读取图片: {}", files[0].display()))?;

    Ok(Self {
      files,
      cursor: 0,
      frame_index: 0,
      width: first.width(),
      height: first.height(),
      fps,
    })
  }
}

impl Iterator for ImageSequenceSource {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.get(self.cursor)?;
    self.cursor += 1;

    let image = match image::open(path) {
      Ok(image) => image.to_rgb8(),
      Err(e) => return Some(Err(anyhow::anyhow!("无法读取图片 {}: {}", path.display(), e))),
    };

    let timestamp_ms = (self.frame_index as f64 * 1000.0 / self.fps) as u64;
    let frame = Frame {
      image,
      index: self.frame_index,
      timestamp_ms,
    };
    self.frame_index += 1;
    Some(Ok(frame))
  }
}

impl InputSource for ImageSequenceSource {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::ImageSequence
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(self.fps)
  }
}
