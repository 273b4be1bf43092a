// 该文件是 Liuying （流影） 项目的一部分。
// src/normalize.rs - 结果归一化
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

use crate::{
  config::Mode,
  model::{RawResult, Speed},
};

/// 像素坐标框 `(x1, y1)` 左上，`(x2, y2)` 右下
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  pub fn from_xyxy(xyxy: [f32; 4]) -> Self {
    Self {
      x1: xyxy[0],
      y1: xyxy[1],
      x2: xyxy[2],
      y2: xyxy[3],
    }
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }
}

/// 与模式无关的单个检测
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDetection {
  pub bbox: BBox,
  pub class_label: String,
  pub confidence: f32,
  /// 仅跟踪模式下、且模型给出身份时存在
  pub track_id: Option<i64>,
}

/// 各阶段耗时（毫秒）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
  pub preprocess_ms: f64,
  pub inference_ms: f64,
  pub postprocess_ms: f64,
}

impl From<Speed> for Timing {
  fn from(speed: Speed) -> Self {
    Self {
      preprocess_ms: speed.preprocess,
      inference_ms: speed.inference,
      postprocess_ms: speed.postprocess,
    }
  }
}

/// 一个已处理帧的记录，同时交给指标聚合与输出复用
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
  /// 从 1 开始递增的处理序号
  pub frame_index: u64,
  pub detections: Vec<NormalizedDetection>,
  pub timing: Option<Timing>,
}

impl FrameRecord {
  pub fn from_raw(frame_index: u64, raw: &RawResult, mode: Mode) -> Self {
    let (detections, timing) = normalize(raw, mode);
    Self {
      frame_index,
      detections,
      timing,
    }
  }

  pub fn tracked(&self) -> impl Iterator<Item = (i64, &NormalizedDetection)> {
    self
      .detections
      .iter()
      .filter_map(|d| d.track_id.map(|id| (id, d)))
  }
}

/// 把检测或跟踪结果转换为统一的检测列表
///
/// 纯函数：不重新过滤置信度，坐标与置信度原样读取。
pub fn normalize(raw: &RawResult, mode: Mode) -> (Vec<NormalizedDetection>, Option<Timing>) {
  let detections = raw
    .boxes
    .iter()
    .map(|b| NormalizedDetection {
      bbox: BBox::from_xyxy(b.xyxy),
      class_label: raw.names.resolve(b.cls),
      confidence: b.conf,
      track_id: if mode.is_tracking() { b.id } else { None },
    })
    .collect();

  (detections, raw.speed.map(Timing::from))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ClassNames, RawBox};

  fn raw() -> RawResult {
    RawResult {
      boxes: vec![
        RawBox {
          xyxy: [10.0, 20.0, 30.0, 60.0],
          conf: 0.8,
          cls: 0,
          id: Some(4),
        },
        RawBox {
          xyxy: [1.0, 1.0, 2.0, 2.0],
          conf: 0.3,
          cls: 9,
          id: None,
        },
      ],
      names: ClassNames::List(vec!["person".into()]),
      speed: Some(Speed {
        preprocess: 1.5,
        inference: 12.0,
        postprocess: 0.5,
      }),
    }
  }

  #[test]
  fn tracking_keeps_ids_without_coercion() {
    let (dets, timing) = normalize(&raw(), Mode::Tracking);
    assert_eq!(dets[0].track_id, Some(4));
    assert_eq!(dets[1].track_id, None);
    assert_eq!(dets[1].class_label, "9");
    assert_eq!(timing.unwrap().inference_ms, 12.0);
  }

  #[test]
  fn detection_mode_drops_ids() {
    let (dets, _) = normalize(&raw(), Mode::Detection);
    assert!(dets.iter().all(|d| d.track_id.is_none()));
    assert_eq!(dets[0].bbox.width(), 20.0);
    assert_eq!(dets[0].bbox.height(), 40.0);
  }

  #[test]
  fn normalization_is_pure() {
    let input = raw();
    assert_eq!(
      normalize(&input, Mode::Tracking),
      normalize(&input, Mode::Tracking)
    );
  }

  #[test]
  fn missing_speed_means_no_timing() {
    let input = RawResult {
      speed: None,
      ..raw()
    };
    let record = FrameRecord::from_raw(3, &input, Mode::Tracking);
    assert_eq!(record.frame_index, 3);
    assert!(record.timing.is_none());
    assert_eq!(record.tracked().count(), 1);
  }
}
