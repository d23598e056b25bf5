// 该文件是 Gengfu （更夫） 项目的一部分。
// src/rate.rs - 帧率控制器
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

use std::time::Instant;

/// 帧率控制器：按模数丢帧约束 CPU 开销，
/// 并用滑动一秒窗口估计实际处理帧率
#[derive(Debug)]
pub struct RateController {
  skip_frames: u64,
  camera_fps: f64,
  total_frames: u64,
  processed_frames: u64,
  last_fps: Option<f64>,
  window_start: Instant,
  window_processed: u64,
}

impl RateController {
  pub fn new(skip_frames: u64, camera_fps: f64) -> Self {
    Self {
      skip_frames,
      camera_fps,
      total_frames: 0,
      processed_frames: 0,
      last_fps: None,
      window_start: Instant::now(),
      window_processed: 0,
    }
  }

  /// 每个到来帧调用一次，返回该帧是否走昂贵路径。
  /// 每 skip_frames + 1 帧处理一帧，其余整帧丢弃
  /// （不做运动判定、不推理、不发布）。
  pub fn should_process(&mut self) -> bool {
    self.total_frames += 1;
    let live = self.total_frames % (self.skip_frames + 1) == 0;
    if live {
      self.processed_frames += 1;
      self.window_processed += 1;
    }

    let elapsed = self.window_start.elapsed().as_secs_f64();
    if elapsed >= 1.0 {
      self.last_fps = Some(self.window_processed as f64 / elapsed);
      self.window_processed = 0;
      self.window_start = Instant::now();
    }

    live
  }

  /// 最近一次测得的瞬时处理帧率；
  /// 首个窗口完成前退化为 camera_fps / (skip_frames + 1)
  pub fn current(&self) -> f64 {
    self
      .last_fps
      .unwrap_or(self.camera_fps / (self.skip_frames + 1) as f64)
  }

  pub fn total_frames(&self) -> u64 {
    self.total_frames
  }

  pub fn processed_frames(&self) -> u64 {
    self.processed_frames
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn one_in_four_frames_is_live_with_skip_three() {
    let mut rate = RateController::new(3, 30.0);

    let mut live_count = 0;
    for tick in 1..=40 {
      let live = rate.should_process();
      if live {
        live_count += 1;
      }
      // 总帧数无条件递增
      assert_eq!(rate.total_frames(), tick);
    }

    assert_eq!(live_count, 10);
    assert_eq!(rate.processed_frames(), 10);
  }

  #[test]
  fn zero_skip_processes_every_frame() {
    let mut rate = RateController::new(0, 30.0);
    for _ in 0..5 {
      assert!(rate.should_process());
    }
    assert_eq!(rate.processed_frames(), 5);
  }

  #[test]
  fn fps_falls_back_before_first_window() {
    let rate = RateController::new(3, 30.0);
    assert!((rate.current() - 7.5).abs() < 1e-9);
  }
}
