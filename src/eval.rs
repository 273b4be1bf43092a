// 该文件是 Liuying （流影） 项目的一部分。
// src/eval.rs - 轨迹评估
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
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{output::OutputReport, telemetry::Metric};

mod assignment;
pub mod mot;

pub use self::mot::{MotAccumulator, MotRow, MotScorer};

/// 指标名到数值
pub type EvaluationSummary = BTreeMap<String, f64>;

#[derive(Error, Debug)]
pub enum EvalError {
  #[error("无法读取 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("{path} 第 {line} 行格式错误: {reason}")]
  Parse {
    path: String,
    line: usize,
    reason: String,
  },
  #[error("真值文件没有有效记录: {0}")]
  EmptyGroundTruth(String),
  #[error("评分失败: {0}")]
  Scorer(String),
}

/// 对两个 MOT 轨迹文件评分
pub trait Scorer {
  fn score(
    &self,
    ground_truth: &Path,
    predictions: &Path,
    iou_threshold: f64,
  ) -> Result<EvaluationSummary, EvalError>;
}

impl<S: Scorer + ?Sized> Scorer for Box<S> {
  fn score(
    &self,
    ground_truth: &Path,
    predictions: &Path,
    iou_threshold: f64,
  ) -> Result<EvaluationSummary, EvalError> {
    (**self).score(ground_truth, predictions, iou_threshold)
  }
}

/// 排空后的评估阶段
///
/// 只有配置了真值文件、真值文件存在且本次运行写出了非空轨迹时才评分。
/// 任何失败都只产生警告，返回 `None`。
pub fn evaluate<S: Scorer + ?Sized>(
  scorer: &S,
  ground_truth: Option<&Path>,
  output: &OutputReport,
  iou_threshold: f64,
) -> Option<EvaluationSummary> {
  let Some(ground_truth) = ground_truth else {
    debug!("未配置真值文件，跳过评估");
    return None;
  };
  if !ground_truth.is_file() {
    warn!("真值文件不存在，跳过评估: {}", ground_truth.display());
    return None;
  }
  let predictions = match output.trajectory_path.as_deref() {
    Some(path) if output.has_trajectory() => path,
    _ => {
      info!("本次运行没有轨迹输出，跳过评估");
      return None;
    }
  };

  info!(
    "评估轨迹: {} 对比 {}",
    predictions.display(),
    ground_truth.display()
  );
  match scorer.score(ground_truth, predictions, iou_threshold) {
    Ok(summary) => {
      for (name, value) in summary.iter() {
        info!("  {}: {:.4}", name, value);
      }
      Some(summary)
    }
    Err(e) => {
      warn!("轨迹评估失败: {}", e);
      None
    }
  }
}

/// `mot/<name>` 汇总指标，非有限值被丢弃
pub fn summary_metrics(summary: &EvaluationSummary) -> Vec<Metric> {
  summary
    .iter()
    .filter(|(_, v)| v.is_finite())
    .map(|(k, v)| Metric::summary(format!("mot/{}", k), *v))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  struct Fixed(Result<f64, ()>);

  impl Scorer for Fixed {
    fn score(&self, _: &Path, _: &Path, _: f64) -> Result<EvaluationSummary, EvalError> {
      match self.0 {
        Ok(v) => Ok(EvaluationSummary::from([("mota".to_string(), v)])),
        Err(()) => Err(EvalError::Scorer("boom".to_string())),
      }
    }
  }

  fn existing_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("liuying-eval-{}-{}", name, std::process::id()));
    std::fs::write(&path, "1,1,1,1,1,1,1,-1,-1,-1\n").unwrap();
    path
  }

  fn report(path: &Path, lines: u64) -> OutputReport {
    OutputReport {
      trajectory_path: Some(path.to_path_buf()),
      trajectory_lines: lines,
      ..Default::default()
    }
  }

  #[test]
  fn skips_without_ground_truth_or_trajectory() {
    let gt = existing_file("gt-skip");
    assert!(evaluate(&Fixed(Ok(1.0)), None, &report(&gt, 3), 0.5).is_none());
    assert!(evaluate(&Fixed(Ok(1.0)), Some(&gt), &report(&gt, 0), 0.5).is_none());
    assert!(
      evaluate(
        &Fixed(Ok(1.0)),
        Some(Path::new("/no/such/gt.txt")),
        &report(&gt, 3),
        0.5
      )
      .is_none()
    );
    let _ = std::fs::remove_file(&gt);
  }

  #[test]
  fn scorer_failure_is_not_fatal() {
    let gt = existing_file("gt-fail");
    assert!(evaluate(&Fixed(Err(())), Some(&gt), &report(&gt, 3), 0.5).is_none());
    let summary = evaluate(&Fixed(Ok(0.75)), Some(&gt), &report(&gt, 3), 0.5).unwrap();
    let metrics = summary_metrics(&summary);
    assert_eq!(metrics, vec![Metric::summary("mot/mota", 0.75)]);
    let _ = std::fs::remove_file(&gt);
  }
}
