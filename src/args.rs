// 该文件是 Gengfu （更夫） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;

use gengfu::detector::DedupStrategy;

/// Gengfu 边缘视频哨兵参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源（V4L2 设备路径或图片序列目录）
  /// 支持: /dev/video0、v4l2:///dev/video0、图片目录
  #[arg(long, value_name = "SOURCE")]
  pub input: String,

  /// 帧发布目标路径（建议放在 tmpfs 上）
  #[arg(long, default_value = "/dev/shm/video_frame", value_name = "FILE")]
  pub publish_path: String,

  /// 片段录制根目录
  #[arg(long, default_value = "./clips", value_name = "DIR")]
  pub clip_dir: String,

  /// 运动区域判定面积（平方像素）
  #[arg(long, default_value = "500", value_name = "AREA")]
  pub min_motion_area: u32,

  /// 背景差分灵敏度阈值
  #[arg(long, default_value = "25", value_name = "THRESHOLD")]
  pub motion_threshold: f32,

  /// 运动激活所需持续时长（秒）
  #[arg(long, default_value = "1", value_name = "SECONDS")]
  pub detection_duration: f64,

  /// 运动退出所需持续时长（秒），缺省与激活时长一致
  #[arg(long, value_name = "SECONDS")]
  pub deactivation_duration: Option<f64>,

  /// 每处理一帧丢弃的帧数
  #[arg(long, default_value = "10", value_name = "COUNT")]
  pub skip_frames: u64,

  /// 摄像头标称帧率（驱动未上报时的兜底值）
  #[arg(long, default_value = "30", value_name = "FPS")]
  pub camera_fps: f64,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.4", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 分组去重 IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub iou_grouping_threshold: f32,

  /// 检测去重策略
  #[arg(long, value_enum, default_value_t = DedupStrategy::Nms)]
  pub dedup: DedupStrategy,

  /// 跳帧时重发上一帧，维持读者侧刷新节奏
  #[arg(long)]
  pub republish_last: bool,

  /// 运动判定使用降采样像素计数快速路径
  #[arg(long)]
  pub fast_motion_presence: bool,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,

  /// 模型输入分辨率（方形边长）
  #[arg(long, default_value = "640", value_name = "SIZE")]
  pub model_input: u32,
}
