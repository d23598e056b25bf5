// 该文件是 Gengfu （更夫） 项目的一部分。
// src/output/publish.rs - 共享内存帧发布
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
use std::path::PathBuf;

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tracing::debug;

/// 无检测时的心跳类别标签
pub const NO_DETECTION_TAG: i8 = -1;
/// 头部长度: [class_id: i8][width: u32][height: u32]，小端序
pub const HEADER_LEN: usize = 9;

const JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum PublishError {
  #[error("图像编码失败: {0}")]
  Encode(#[from] image::ImageError),
  #[error("共享内存写入失败: {0}")]
  Io(#[from] std::io::Error),
}

/// 把一帧编码为 JPEG 负载
pub fn encode_frame(image: &RgbImage) -> Result<Vec<u8>, PublishError> {
  let mut payload = Vec::new();
  JpegEncoder::new_with_quality(&mut payload, JPEG_QUALITY).encode_image(image)?;
  Ok(payload)
}

/// 帧发布器：单写者，临时文件 + 原子重命名。
/// 读者要么看到旧的完整帧，要么看到新的完整帧，不会读到半截。
pub struct FramePublisher {
  target: PathBuf,
  temp: PathBuf,
}

impl FramePublisher {
  pub fn new(target: impl Into<PathBuf>) -> Self {
    let target = target.into();
    // 临时文件必须与目标同目录，rename 才是原子替换
    let temp = {
      let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
      name.push(".tmp");
      target.with_file_name(name)
    };

    Self { target, temp }
  }

  /// 编码并发布一帧；class_tag 为 -1 表示本帧无检测（心跳帧）
  pub fn publish(&self, class_tag: i8, image: &RgbImage) -> Result<(), PublishError> {
    let payload = encode_frame(image)?;
    self.publish_encoded(class_tag, image.width(), image.height(), &payload)
  }

  /// 发布已编码的负载（跳帧 tick 重发上一帧时使用）
  pub fn publish_encoded(
    &self,
    class_tag: i8,
    width: u32,
    height: u32,
    payload: &[u8],
  ) -> Result<(), PublishError> {
    let mut data = Vec::with_capacity(HEADER_LEN + payload.len());
    data.push(class_tag as u8);
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(payload);

    fs::write(&self.temp, &data)?;
    fs::rename(&self.temp, &self.target)?;
    debug!("发布帧: 标签 {}, {} 字节", class_tag, data.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_layout_is_little_endian() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("video_frame");
    let publisher = FramePublisher::new(&target);

    publisher
      .publish_encoded(2, 640, 480, &[0xAB, 0xCD])
      .unwrap();

    let data = fs::read(&target).unwrap();
    assert_eq!(data.len(), HEADER_LEN + 2);
    assert_eq!(data[0] as i8, 2);
    assert_eq!(u32::from_le_bytes(data[1..5].try_into().unwrap()), 640);
    assert_eq!(u32::from_le_bytes(data[5..9].try_into().unwrap()), 480);
    assert_eq!(&data[9..], &[0xAB, 0xCD]);
  }

  #[test]
  fn heartbeat_tag_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("video_frame");
    let publisher = FramePublisher::new(&target);

    publisher
      .publish(NO_DETECTION_TAG, &RgbImage::new(32, 32))
      .unwrap();

    let data = fs::read(&target).unwrap();
    assert_eq!(data[0] as i8, NO_DETECTION_TAG);
    assert!(data.len() > HEADER_LEN);
  }

  #[test]
  fn publish_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("video_frame");
    let publisher = FramePublisher::new(&target);

    publisher.publish_encoded(0, 8, 8, &[1, 2, 3]).unwrap();
    publisher.publish_encoded(2, 8, 8, &[4, 5, 6, 7]).unwrap();

    assert!(target.exists());
    assert!(!dir.path().join("video_frame.tmp").exists());
  }

  #[test]
  fn readers_never_observe_torn_frames() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("video_frame");
    let publisher = FramePublisher::new(&target);

    // 负载长度约定为 width * height，读者据此校验完整性
    publisher
      .publish_encoded(0, 16, 1, &vec![0u8; 16])
      .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
      let stop = stop.clone();
      let target = target.clone();
      std::thread::spawn(move || {
        let mut reads = 0u64;
        while !stop.load(Ordering::Relaxed) {
          let data = fs::read(&target).expect("读者必须总能读到完整文件");
          assert!(data.len() >= HEADER_LEN);
          let width = u32::from_le_bytes(data[1..5].try_into().unwrap());
          let height = u32::from_le_bytes(data[5..9].try_into().unwrap());
          assert_eq!(
            data.len() - HEADER_LEN,
            (width * height) as usize,
            "负载长度必须与头部声明一致"
          );
          reads += 1;
        }
        reads
      })
    };

    for i in 0..200u32 {
      let width = 1 + (i % 64);
      let height = 1 + (i % 8);
      publisher
        .publish_encoded(
          (i % 3) as i8 - 1,
          width,
          height,
          &vec![0u8; (width * height) as usize],
        )
        .unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    let reads = reader.join().unwrap();
    assert!(reads > 0);
  }
}
