// 该文件是 Gengfu （更夫） 项目的一部分。
// src/detector/postprocess.rs - 检测后处理（解码、阈值、去重）
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

use image::{RgbImage, imageops};
use thiserror::Error;

use crate::detector::{BoundingBox, DedupStrategy, Detection, ObjectClass};
use crate::model::{OutputLayout, RawOutput};

/// 原始遍历路径的置信度阈值
const RAW_SCORE_THRESHOLD: f32 = 0.34;
/// 去重路径的置信度阈值
const DEDUP_SCORE_THRESHOLD: f32 = 0.3;
/// NMS 默认 IoU 阈值
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
/// 分组去重默认 IoU 阈值
pub const DEFAULT_GROUPING_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum PostprocessError {
  /// 输出形状与声明布局不符时拒绝解码，
  /// 猜测锚点布局会产出貌似合理但错误的框
  #[error("模型输出形状异常: {0}")]
  MalformedOutput(String),
}

/// letterbox 结果：方形画布与还原比例
pub struct Letterbox {
  /// 模型输入画布（方形）
  pub canvas: RgbImage,
  /// 还原比例 = max(宽, 高) / 模型输入边长
  pub scale: f32,
}

/// 把原图按左上角对齐填充成方形画布，再缩放到模型输入尺寸。
/// 检测框需乘以 input_size * scale 才能回到原图像素坐标。
pub fn letterbox(image: &RgbImage, input_size: u32) -> Letterbox {
  let (width, height) = image.dimensions();
  let length = width.max(height).max(1);

  let mut square = RgbImage::new(length, length);
  imageops::replace(&mut square, image, 0, 0);

  let canvas = imageops::resize(
    &square,
    input_size,
    input_size,
    imageops::FilterType::Triangle,
  );

  Letterbox {
    canvas,
    scale: length as f32 / input_size as f32,
  }
}

/// 检测后处理器：原始张量 -> 去重后的检测集合。
/// 每次调用产出全新的集合，不保留跨帧状态。
pub struct PostProcessor {
  /// 模型导出分辨率（方形边长，如 640）
  input_size: u32,
  /// NMS IoU 阈值
  nms_threshold: f32,
  /// 分组去重 IoU 阈值
  grouping_threshold: f32,
}

impl PostProcessor {
  pub fn new(input_size: u32, nms_threshold: f32, grouping_threshold: f32) -> Self {
    Self {
      input_size,
      nms_threshold,
      grouping_threshold,
    }
  }

  /// 枚举所有通过阈值的检测（不去重）
  pub fn decode_all(
    &self,
    output: &RawOutput,
    scale: f32,
  ) -> Result<Vec<Detection>, PostprocessError> {
    self.decode(output, scale, RAW_SCORE_THRESHOLD)
  }

  /// 按选定策略产出去重后的检测集合
  pub fn dedup(
    &self,
    output: &RawOutput,
    scale: f32,
    strategy: DedupStrategy,
  ) -> Result<Vec<Detection>, PostprocessError> {
    let detections = self.decode(output, scale, DEDUP_SCORE_THRESHOLD)?;
    Ok(match strategy {
      DedupStrategy::Nms => self.dedup_nms(detections),
      DedupStrategy::Averaging => self.dedup_averaging(detections),
      DedupStrategy::LargestBox => self.dedup_largest_box(detections),
    })
  }

  fn check_shape(output: &RawOutput) -> Result<(), PostprocessError> {
    let min_channels = match output.layout {
      OutputLayout::ClassScores => 5,
      OutputLayout::ObjectnessClassScores => 6,
    };
    if output.channels < min_channels {
      return Err(PostprocessError::MalformedOutput(format!(
        "通道数 {} 小于布局要求的 {}",
        output.channels, min_channels
      )));
    }
    if output.data.len() != output.anchors * output.channels {
      return Err(PostprocessError::MalformedOutput(format!(
        "数据长度 {} 与 {} 锚点 x {} 通道不符",
        output.data.len(),
        output.anchors,
        output.channels
      )));
    }
    Ok(())
  }

  /// 逐锚点解码：取类别分数最大者，过滤允许集与阈值，
  /// 把归一化中心框换算为原图像素坐标的左上角框
  fn decode(
    &self,
    output: &RawOutput,
    scale: f32,
    threshold: f32,
  ) -> Result<Vec<Detection>, PostprocessError> {
    Self::check_shape(output)?;

    let to_px = self.input_size as f32 * scale;
    let mut detections = Vec::new();

    for index in 0..output.anchors {
      let anchor = output.anchor(index);
      let (objectness, scores) = match output.layout {
        OutputLayout::ClassScores => (1.0, &anchor[4..]),
        OutputLayout::ObjectnessClassScores => (anchor[4], &anchor[5..]),
      };

      let mut best_id = 0;
      let mut best_score = f32::MIN;
      for (class_id, &score) in scores.iter().enumerate() {
        if score > best_score {
          best_score = score;
          best_id = class_id;
        }
      }

      let confidence = best_score * objectness;
      if confidence < threshold {
        continue;
      }
      let Some(class) = ObjectClass::from_yolo_id(best_id) else {
        continue;
      };

      let width = anchor[2] * to_px;
      let height = anchor[3] * to_px;
      let x0 = anchor[0] * to_px - width / 2.0;
      let y0 = anchor[1] * to_px - height / 2.0;

      detections.push(Detection {
        bbox: BoundingBox {
          x0,
          y0,
          width,
          height,
        },
        class,
        confidence,
      });
    }

    Ok(detections)
  }

  /// 非极大值抑制：按置信度降序贪心保留，
  /// 同类且 IoU 达到阈值的后续框被抑制
  fn dedup_nms(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = Vec::new();
    while !detections.is_empty() {
      let best = detections.remove(0);
      detections.retain(|det| det.class != best.class || best.bbox.iou(&det.bbox) < self.nms_threshold);
      kept.push(best);
    }

    kept
  }

  /// 访问标记法分组：每组以首个未处理框为种子，
  /// 只把与种子 IoU 超过阈值的未处理同类框并入该组。
  /// 刻意不做传递闭包，两个框只有与同一种子直接比较过才会同组。
  fn sweep_groups(&self, detections: &[Detection]) -> Vec<Vec<usize>> {
    let mut processed = vec![false; detections.len()];
    let mut groups = Vec::new();

    for i in 0..detections.len() {
      if processed[i] {
        continue;
      }
      processed[i] = true;
      let mut group = vec![i];

      for j in 0..detections.len() {
        if processed[j] || detections[j].class != detections[i].class {
          continue;
        }
        if detections[i].bbox.iou(&detections[j].bbox) > self.grouping_threshold {
          processed[j] = true;
          group.push(j);
        }
      }

      groups.push(group);
    }

    groups
  }

  /// 分组平均：中心取组内均值，宽高取最高置信度成员，置信度取组内最大
  fn dedup_averaging(&self, detections: Vec<Detection>) -> Vec<Detection> {
    let groups = self.sweep_groups(&detections);
    let mut merged = Vec::with_capacity(groups.len());

    for group in groups {
      if group.len() == 1 {
        merged.push(detections[group[0]].clone());
        continue;
      }

      let count = group.len() as f32;
      let cx = group.iter().map(|&i| detections[i].bbox.center().0).sum::<f32>() / count;
      let cy = group.iter().map(|&i| detections[i].bbox.center().1).sum::<f32>() / count;

      // 组内至少包含种子自身
      let Some(best) = group
        .iter()
        .map(|&i| &detections[i])
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
      else {
        continue;
      };

      merged.push(Detection {
        bbox: BoundingBox {
          x0: cx - best.bbox.width / 2.0,
          y0: cy - best.bbox.height / 2.0,
          width: best.bbox.width,
          height: best.bbox.height,
        },
        class: best.class,
        confidence: best.confidence,
      });
    }

    merged
  }

  /// 分组取最大框：面积最大者胜出，面积相同时比较置信度
  fn dedup_largest_box(&self, detections: Vec<Detection>) -> Vec<Detection> {
    let groups = self.sweep_groups(&detections);
    let mut merged = Vec::with_capacity(groups.len());

    for group in groups {
      let Some(best) = group
        .iter()
        .map(|&i| &detections[i])
        .max_by(|a, b| {
          a.bbox
            .area()
            .total_cmp(&b.bbox.area())
            .then(a.confidence.total_cmp(&b.confidence))
        })
      else {
        continue;
      };
      merged.push(best.clone());
    }

    merged
  }
}
