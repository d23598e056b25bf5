// 该文件是 Gengfu （更夫） 项目的一部分。
// src/model.rs - 推理适配器接口
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

use image::RgbImage;

/// 原始输出张量的锚点布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  /// [cx, cy, w, h, 类别分数...]
  ClassScores,
  /// [cx, cy, w, h, 目标置信度, 类别分数...]
  ObjectnessClassScores,
}

/// 推理适配器产出的原始张量（N 锚点 x 通道，逐行排布）
#[derive(Debug, Clone)]
pub struct RawOutput {
  pub data: Vec<f32>,
  pub anchors: usize,
  pub channels: usize,
  pub layout: OutputLayout,
}

impl RawOutput {
  /// 第 index 个锚点的通道切片
  pub fn anchor(&self, index: usize) -> &[f32] {
    &self.data[index * self.channels..(index + 1) * self.channels]
  }
}

/// 推理适配器：输入 letterbox 方形画布，输出原始张量。
/// 模型执行由适配器负责，缩放系数记账由调用方负责。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型导出分辨率（方形边长）
  fn input_size(&self) -> u32;

  /// 对画布运行一次推理
  fn infer(&self, canvas: &RgbImage) -> Result<RawOutput, Self::Error>;
}

/// 空模型：不依赖加速硬件，永远返回零锚点输出。
/// 用于在没有推理后端的环境下跑通运动、发布与录制路径。
pub struct StubModel {
  input_size: u32,
}

impl StubModel {
  pub fn new(input_size: u32) -> Self {
    Self { input_size }
  }
}

impl Model for StubModel {
  type Error = std::convert::Infallible;

  fn input_size(&self) -> u32 {
    self.input_size
  }

  fn infer(&self, _canvas: &RgbImage) -> Result<RawOutput, Self::Error> {
    Ok(RawOutput {
      data: Vec::new(),
      anchors: 0,
      channels: 84,
      layout: OutputLayout::ClassScores,
    })
  }
}
