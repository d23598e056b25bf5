// 该文件是 Gengfu （更夫） 项目的一部分。
// src/detector/mod.rs - 检测结果类型定义
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

pub mod postprocess;

pub use postprocess::{Letterbox, PostProcessor, PostprocessError, letterbox};

/// 检测目标类别（COCO 类别子集，编号即 YOLO 类别编号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
  /// 行人
  Person,
  /// 汽车
  Car,
}

impl ObjectClass {
  /// 从 YOLO/COCO 类别编号转换；允许集之外的类别返回 None
  pub fn from_yolo_id(id: usize) -> Option<Self> {
    match id {
      0 => Some(ObjectClass::Person),
      2 => Some(ObjectClass::Car),
      _ => None,
    }
  }

  /// 共享内存帧协议中的类别标签
  pub fn class_tag(&self) -> i8 {
    match self {
      ObjectClass::Person => 0,
      ObjectClass::Car => 2,
    }
  }

  /// 类别名称
  pub fn label(&self) -> &'static str {
    match self {
      ObjectClass::Person => "person",
      ObjectClass::Car => "car",
    }
  }
}

/// 边界框，原始图像像素坐标（左上角 + 宽高，宽高非负）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x0: f32,
  pub y0: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  /// 面积
  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  /// 中心点坐标
  pub fn center(&self) -> (f32, f32) {
    (self.x0 + self.width / 2.0, self.y0 + self.height / 2.0)
  }

  /// 交并比；退化框（并集面积为 0）定义为 0
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x_left = self.x0.max(other.x0);
    let y_top = self.y0.max(other.y0);
    let x_right = (self.x0 + self.width).min(other.x0 + other.width);
    let y_bottom = (self.y0 + self.height).min(other.y0 + other.height);

    if x_right < x_left || y_bottom < y_top {
      return 0.0;
    }

    let intersection = (x_right - x_left) * (y_bottom - y_top);
    let union = self.area() + other.area() - intersection;

    if union <= 0.0 { 0.0 } else { intersection / union }
  }
}

/// 单个检测结果，产出后不再修改
#[derive(Debug, Clone)]
pub struct Detection {
  /// 边界框
  pub bbox: BoundingBox,
  /// 目标类别
  pub class: ObjectClass,
  /// 置信度 (0.0 - 1.0)
  pub confidence: f32,
}

/// 重复框抑制策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DedupStrategy {
  /// 非极大值抑制：保留重叠框中置信度最高者
  Nms,
  /// 分组平均：组内中心取均值，尺寸取最高置信度成员
  Averaging,
  /// 分组取最大框：组内取面积最大者，面积相同时比较置信度
  LargestBox,
}
