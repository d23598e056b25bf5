// 该文件是 Gengfu （更夫） 项目的一部分。
// src/output/visualizer.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detector::{Detection, ObjectClass};

/// 可视化工具：按类别配色在发布帧上绘制检测框
pub struct Visualizer {
  /// 边框线宽（像素）
  thickness: u32,
}

impl Default for Visualizer {
  fn default() -> Self {
    Self::new()
  }
}

impl Visualizer {
  pub fn new() -> Self {
    Self { thickness: 2 }
  }

  fn class_color(class: ObjectClass) -> Rgb<u8> {
    match class {
      ObjectClass::Person => Rgb([0, 255, 0]),
      ObjectClass::Car => Rgb([0, 128, 255]),
    }
  }

  /// 在图像上绘制检测框，向内收缩描边实现加粗
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      let color = Self::class_color(detection.class);
      for inset in 0..self.thickness as i32 {
        let x = detection.bbox.x0 as i32 + inset;
        let y = detection.bbox.y0 as i32 + inset;
        let width = (detection.bbox.width as i32 - 2 * inset).max(1) as u32;
        let height = (detection.bbox.height as i32 - 2 * inset).max(1) as u32;
        draw_hollow_rect_mut(image, Rect::at(x, y).of_size(width, height), color);
      }
    }
  }
}
