// 该文件是 Gengfu （更夫） 项目的一部分。
// src/motion.rs - 运动检测与迟滞状态机
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

use std::collections::HashMap;

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{Connectivity, connected_components};
use tracing::debug;

/// tick 计数器的归位上限，防止长时间运行后无界增长
const TICK_ROLLOVER: u64 = 1_000_000_000;

/// 背景减除器：输出与输入同尺寸的单通道前景掩码（非零为前景）。
/// 跨帧有状态，核心只把它当作不透明累积器。
pub trait BackgroundSubtractor {
  fn apply(&mut self, frame: &RgbImage) -> GrayImage;
}

/// 滑动平均背景减除器。
/// 背景按指数滑动平均累积，掩码为灰度差超过灵敏度阈值的像素。
pub struct RunningAverageSubtractor {
  background: Option<Vec<f32>>,
  /// 背景学习率
  learning_rate: f32,
  /// 差分灵敏度阈值
  threshold: f32,
}

impl RunningAverageSubtractor {
  pub fn new(threshold: f32) -> Self {
    Self {
      background: None,
      learning_rate: 0.05,
      threshold,
    }
  }
}

impl BackgroundSubtractor for RunningAverageSubtractor {
  fn apply(&mut self, frame: &RgbImage) -> GrayImage {
    let gray = imageops::grayscale(frame);
    let (width, height) = gray.dimensions();
    let pixels = (width * height) as usize;

    // 首帧或尺寸变化时重建背景，本帧视为无前景
    let Some(background) = self
      .background
      .as_mut()
      .filter(|background| background.len() == pixels)
    else {
      self.background = Some(gray.pixels().map(|p| p.0[0] as f32).collect());
      return GrayImage::new(width, height);
    };

    let mut mask = GrayImage::new(width, height);
    for ((background, p), out) in background
      .iter_mut()
      .zip(gray.pixels())
      .zip(mask.pixels_mut())
    {
      let value = p.0[0] as f32;
      if (value - *background).abs() >= self.threshold {
        *out = Luma([255]);
      }
      *background += self.learning_rate * (value - *background);
    }

    mask
  }
}

/// 运动迟滞状态机。
/// 原始样本需连续保持配置的 tick 数才翻转状态，
/// 任意一次反向样本都会清零等待计时（不跨中断累积）。
#[derive(Debug)]
pub struct MotionGate {
  active: bool,
  pending_since: Option<u64>,
  tick: u64,
  detection_frames: u64,
  deactivation_frames: u64,
}

impl MotionGate {
  /// 时长按秒配置，内部换算为 tick 数；
  /// 退出时长缺省与激活时长一致
  pub fn new(detection_duration_sec: f64, deactivation_duration_sec: Option<f64>, fps: f64) -> Self {
    let detection_frames = (detection_duration_sec * fps).round().max(1.0) as u64;
    let deactivation_frames = deactivation_duration_sec
      .map(|duration| (duration * fps).round().max(1.0) as u64)
      .unwrap_or(detection_frames);

    Self {
      active: false,
      pending_since: None,
      tick: 0,
      detection_frames,
      deactivation_frames,
    }
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  /// 送入一个原始运动样本，返回（可能已翻转的）状态
  pub fn observe(&mut self, sample: bool) -> bool {
    self.tick += 1;

    // Inactive 时等待“有运动”持续，Active 时等待“无运动”持续
    let target = if self.active { !sample } else { sample };
    if target {
      let since = *self.pending_since.get_or_insert(self.tick);
      let needed = if self.active {
        self.deactivation_frames
      } else {
        self.detection_frames
      };
      if self.tick - since + 1 >= needed {
        self.active = !self.active;
        self.pending_since = None;
        debug!("运动状态翻转: active = {}", self.active);
      }
    } else {
      self.pending_since = None;
    }

    if self.tick >= TICK_ROLLOVER {
      // 计数器归位，不改变当前状态与等待进度
      let base = self.pending_since.unwrap_or(self.tick);
      self.tick -= base;
      if let Some(since) = self.pending_since.as_mut() {
        *since -= base;
      }
    }

    self.active
  }
}

/// 运动检测器：背景减除 + 形态学去噪 + 面积判定，再过迟滞门
pub struct MotionDetector<B: BackgroundSubtractor> {
  subtractor: B,
  gate: MotionGate,
  /// 前景区域判定面积（平方像素）
  min_area: u32,
  /// 使用降采样像素计数快速路径
  fast_presence: bool,
}

impl<B: BackgroundSubtractor> MotionDetector<B> {
  pub fn new(subtractor: B, gate: MotionGate, min_area: u32, fast_presence: bool) -> Self {
    Self {
      subtractor,
      gate,
      min_area,
      fast_presence,
    }
  }

  pub fn is_active(&self) -> bool {
    self.gate.is_active()
  }

  /// 运动是否已持续超过配置时长（迟滞判定后的状态）
  pub fn detected_long(&mut self, frame: &RgbImage) -> bool {
    let sample = self.present(frame);
    self.gate.observe(sample)
  }

  /// 当前 tick 的原始前景存在信号
  fn present(&mut self, frame: &RgbImage) -> bool {
    let mask = self.subtractor.apply(frame);
    if self.fast_presence {
      Self::present_by_pixel_count(&mask, self.min_area)
    } else {
      Self::present_by_region_area(&mask, self.min_area)
    }
  }

  /// 开+闭运算去噪后，任一连通前景区域面积达到阈值即认为有运动
  fn present_by_region_area(mask: &GrayImage, min_area: u32) -> bool {
    let cleaned = close(&open(mask, Norm::LInf, 2), Norm::LInf, 2);
    let labels = connected_components(&cleaned, Connectivity::Eight, Luma([0u8]));

    let mut areas: HashMap<u32, u32> = HashMap::new();
    for label in labels.pixels() {
      let id = label.0[0];
      if id == 0 {
        continue;
      }
      let area = areas.entry(id).or_insert(0);
      *area += 1;
      if *area >= min_area {
        return true;
      }
    }
    false
  }

  /// 快速路径：掩码降采样后按比例缩放阈值做前景像素计数
  fn present_by_pixel_count(mask: &GrayImage, min_area: u32) -> bool {
    const FACTOR: u32 = 4;
    let (width, height) = mask.dimensions();
    let small = imageops::resize(
      mask,
      (width / FACTOR).max(1),
      (height / FACTOR).max(1),
      imageops::FilterType::Nearest,
    );
    let scaled_min = (min_area / (FACTOR * FACTOR)).max(1);

    let mut count = 0;
    for p in small.pixels() {
      if p.0[0] > 0 {
        count += 1;
        if count >= scaled_min {
          return true;
        }
      }
    }
    false
  }
}
