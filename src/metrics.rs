// 该文件是 Liuying （流影） 项目的一部分。
// src/metrics.rs - 指标聚合
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

use std::collections::BTreeMap;

use crate::{normalize::FrameRecord, telemetry::Metric};

mod system;

pub use self::system::{KeyStats, ResourceProbe, SystemProbe, SystemSample, SystemSampler, summarize};

/// 运行期间只增不减的统计量
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
  frames_processed: u64,
  total_detections: u64,
  per_class: BTreeMap<String, u64>,
  confidence_sum: f64,
  confidence_count: u64,
  confidence_min: Option<f64>,
  confidence_max: Option<f64>,
  preprocess_ms: RunningMean,
  inference_ms: RunningMean,
  postprocess_ms: RunningMean,
}

/// 累计和与计数，每帧更新为常数时间
#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
  sum: f64,
  count: u64,
}

impl RunningMean {
  fn push(&mut self, value: f64) {
    self.sum += value;
    self.count += 1;
  }

  fn mean(&self) -> Option<f64> {
    (self.count > 0).then(|| self.sum / self.count as f64)
  }
}

impl RunningStats {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn frames_processed(&self) -> u64 {
    self.frames_processed
  }

  pub fn total_detections(&self) -> u64 {
    self.total_detections
  }

  /// 到目前为止推理耗时的算术平均
  pub fn running_inference_mean(&self) -> Option<f64> {
    self.inference_ms.mean()
  }

  /// 累加一帧，返回该帧的逐帧指标（`step` 为帧序号）
  pub fn update(&mut self, record: &FrameRecord) -> Vec<Metric> {
    let step = record.frame_index;
    let count = record.detections.len() as u64;

    self.frames_processed += 1;
    self.total_detections += count;

    let mut frame_conf_sum = 0.0;
    for det in record.detections.iter() {
      *self.per_class.entry(det.class_label.clone()).or_default() += 1;
      let conf = det.confidence as f64;
      frame_conf_sum += conf;
      self.confidence_sum += conf;
      self.confidence_count += 1;
      self.confidence_min = Some(self.confidence_min.map_or(conf, |m| m.min(conf)));
      self.confidence_max = Some(self.confidence_max.map_or(conf, |m| m.max(conf)));
    }

    let mut metrics = Vec::with_capacity(8);
    if let Some(timing) = record.timing {
      self.preprocess_ms.push(timing.preprocess_ms);
      self.inference_ms.push(timing.inference_ms);
      self.postprocess_ms.push(timing.postprocess_ms);

      metrics.push(Metric::at("inference_ms", timing.inference_ms, step));
      metrics.push(Metric::at("inference_preprocess_ms", timing.preprocess_ms, step));
      metrics.push(Metric::at("inference_postprocess_ms", timing.postprocess_ms, step));
      if timing.inference_ms > 0.0 {
        metrics.push(Metric::at("inference_fps", 1000.0 / timing.inference_ms, step));
      }
    }

    metrics.push(Metric::at("detections_per_frame", count as f64, step));
    metrics.push(Metric::at(
      "cumulative_detections",
      self.total_detections as f64,
      step,
    ));
    if count > 0 {
      metrics.push(Metric::at(
        "confidence_mean_frame",
        frame_conf_sum / count as f64,
        step,
      ));
    }
    if let Some(avg) = self.running_inference_mean() {
      metrics.push(Metric::at("inference_forward_ms_running_avg", avg, step));
    }

    metrics
  }

  pub fn summary(&self) -> Summary {
    let detections_per_frame = if self.frames_processed > 0 {
      self.total_detections as f64 / self.frames_processed as f64
    } else {
      0.0
    };
    let confidence_mean = if self.confidence_count > 0 {
      self.confidence_sum / self.confidence_count as f64
    } else {
      0.0
    };
    let inference_ms = self.inference_ms.mean().unwrap_or(0.0);

    Summary {
      frames_processed: self.frames_processed,
      total_detections: self.total_detections,
      detections_per_frame,
      preprocess_ms: self.preprocess_ms.mean().unwrap_or(0.0),
      inference_ms,
      postprocess_ms: self.postprocess_ms.mean().unwrap_or(0.0),
      inference_fps: if inference_ms > 0.0 {
        1000.0 / inference_ms
      } else {
        0.0
      },
      confidence_mean,
      confidence_max: self.confidence_max.unwrap_or(0.0),
      confidence_min: self.confidence_min.unwrap_or(0.0),
      per_class: self.per_class.clone(),
    }
  }
}

/// 排空时的汇总，没有帧或没有检测时相应字段为 0
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
  pub frames_processed: u64,
  pub total_detections: u64,
  pub detections_per_frame: f64,
  pub preprocess_ms: f64,
  pub inference_ms: f64,
  pub postprocess_ms: f64,
  pub inference_fps: f64,
  pub confidence_mean: f64,
  pub confidence_max: f64,
  pub confidence_min: f64,
  pub per_class: BTreeMap<String, u64>,
}

impl Summary {
  pub fn to_metrics(&self) -> Vec<Metric> {
    let mut metrics = vec![
      Metric::summary("frames_processed", self.frames_processed as f64),
      Metric::summary("total_detections", self.total_detections as f64),
      Metric::summary("detections_per_frame", self.detections_per_frame),
      Metric::summary("inference_preprocess_ms", self.preprocess_ms),
      Metric::summary("inference_forward_ms", self.inference_ms),
      Metric::summary("inference_postprocess_ms", self.postprocess_ms),
      Metric::summary("inference_fps", self.inference_fps),
      Metric::summary("confidence_mean", self.confidence_mean),
      Metric::summary("confidence_max", self.confidence_max),
      Metric::summary("confidence_min", self.confidence_min),
    ];
    metrics.extend(
      self
        .per_class
        .iter()
        .map(|(label, n)| Metric::summary(format!("detections/{}", label), *n as f64)),
    );
    metrics
  }
}
