// 该文件是 Liuying （流影） 项目的一部分。
// src/eval/mot.rs - CLEAR-MOT 与身份指标
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

//! MOT15-2D 轨迹文件评分
//!
//! 关联距离为 `1 - IoU`，IoU 低于阈值的配对无效。上一帧的对应关系在仍然有效时优先保留，
//! 其余在有效配对中求最小代价指派，先保证匹配数量最多，再使总距离最小。
//! 身份指标（IDF1 等）的全局身份分配同样求最优指派，使共同出现的帧数之和最大。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::debug;

use crate::eval::{EvalError, EvaluationSummary, Scorer, assignment::min_cost_assignment};

/// 轨迹文件中的一行，坐标已转换为从 0 开始
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotRow {
  pub frame: u64,
  pub id: i64,
  /// `[x, y, w, h]`
  pub bbox: [f64; 4],
  pub confidence: f64,
}

/// 解析 MOT 文本；`min_confidence` 用于过滤真值中被忽略的行
pub fn parse_rows(
  text: &str,
  source: &str,
  min_confidence: Option<f64>,
) -> Result<Vec<MotRow>, EvalError> {
  let mut rows = Vec::new();
  for (idx, line) in text.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let parse_error = |reason: String| EvalError::Parse {
      path: source.to_string(),
      line: idx + 1,
      reason,
    };

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 7 {
      return Err(parse_error(format!("至少需要 7 个字段，实际 {}", fields.len())));
    }
    let number = |i: usize| {
      fields[i]
        .parse::<f64>()
        .map_err(|e| parse_error(format!("字段 {} '{}': {}", i + 1, fields[i], e)))
    };

    let frame = number(0)?;
    let id = number(1)?;
    let row = MotRow {
      frame: frame as u64,
      id: id as i64,
      bbox: [number(2)? - 1.0, number(3)? - 1.0, number(4)?, number(5)?],
      confidence: number(6)?,
    };

    if min_confidence.is_some_and(|min| row.confidence < min) {
      continue;
    }
    rows.push(row);
  }
  Ok(rows)
}

fn load_rows(path: &Path, min_confidence: Option<f64>) -> Result<Vec<MotRow>, EvalError> {
  let text = std::fs::read_to_string(path).map_err(|source| EvalError::Io {
    path: path.display().to_string(),
    source,
  })?;
  parse_rows(&text, &path.display().to_string(), min_confidence)
}

/// 两个 `[x, y, w, h]` 框的交并比
pub fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
  let ix = (a[0] + a[2]).min(b[0] + b[2]) - a[0].max(b[0]);
  let iy = (a[1] + a[3]).min(b[1] + b[3]) - a[1].max(b[1]);
  if ix <= 0.0 || iy <= 0.0 {
    return 0.0;
  }
  let inter = ix * iy;
  let union = a[2] * a[3] + b[2] * b[3] - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

#[derive(Debug, Default, Clone)]
struct ObjectHistory {
  /// 出现的每一帧是否被跟踪到
  tracked: Vec<bool>,
}

impl ObjectHistory {
  fn ratio(&self) -> f64 {
    if self.tracked.is_empty() {
      return 0.0;
    }
    self.tracked.iter().filter(|t| **t).count() as f64 / self.tracked.len() as f64
  }

  /// 第一次到最后一次被跟踪之间，从跟踪到丢失的次数
  fn fragmentations(&self) -> u64 {
    let Some(first) = self.tracked.iter().position(|t| *t) else {
      return 0;
    };
    let last = self.tracked.iter().rposition(|t| *t).unwrap_or(first);
    self.tracked[first..=last]
      .windows(2)
      .filter(|w| w[0] && !w[1])
      .count() as u64
  }
}

/// 逐帧累积匹配事件
#[derive(Debug, Clone)]
pub struct MotAccumulator {
  iou_threshold: f64,
  last_match: HashMap<i64, i64>,
  objects: BTreeMap<i64, ObjectHistory>,
  /// 每对 (真值, 预测) 在阈值内共同出现的帧数
  overlaps: HashMap<(i64, i64), u64>,
  gt_counts: HashMap<i64, u64>,
  hyp_counts: HashMap<i64, u64>,
  num_matches: u64,
  num_switches: u64,
  num_misses: u64,
  num_false_positives: u64,
  total_distance: f64,
}

impl MotAccumulator {
  pub fn new(iou_threshold: f64) -> Self {
    Self {
      iou_threshold,
      last_match: HashMap::new(),
      objects: BTreeMap::new(),
      overlaps: HashMap::new(),
      gt_counts: HashMap::new(),
      hyp_counts: HashMap::new(),
      num_matches: 0,
      num_switches: 0,
      num_misses: 0,
      num_false_positives: 0,
      total_distance: 0.0,
    }
  }

  /// 累积一帧：`objects` 为真值，`hypotheses` 为预测，元素为 `(id, [x, y, w, h])`
  pub fn update(&mut self, objects: &[(i64, [f64; 4])], hypotheses: &[(i64, [f64; 4])]) {
    let max_distance = 1.0 - self.iou_threshold;
    let mut distances = vec![vec![None; hypotheses.len()]; objects.len()];
    for (i, (oid, obox)) in objects.iter().enumerate() {
      for (j, (hid, hbox)) in hypotheses.iter().enumerate() {
        let d = 1.0 - iou(obox, hbox);
        if d <= max_distance {
          distances[i][j] = Some(d);
          *self.overlaps.entry((*oid, *hid)).or_default() += 1;
        }
      }
    }

    let mut matched_objects = vec![false; objects.len()];
    let mut matched_hypotheses = vec![false; hypotheses.len()];
    let mut matches: Vec<(usize, usize, f64)> = Vec::new();

    // 保留上一帧仍然有效的对应关系
    for (i, (oid, _)) in objects.iter().enumerate() {
      let Some(prev) = self.last_match.get(oid) else {
        continue;
      };
      let found = hypotheses
        .iter()
        .enumerate()
        .find(|(j, (hid, _))| hid == prev && !matched_hypotheses[*j] && distances[i][*j].is_some());
      if let Some((j, _)) = found
        && let Some(d) = distances[i][j]
      {
        matched_objects[i] = true;
        matched_hypotheses[j] = true;
        matches.push((i, j, d));
      }
    }

    // 其余做最小代价指派；无效配对的代价大于任意一组有效配对的总距离
    let free_objects: Vec<usize> = (0..objects.len()).filter(|i| !matched_objects[*i]).collect();
    let free_hypotheses: Vec<usize> = (0..hypotheses.len())
      .filter(|j| !matched_hypotheses[*j])
      .collect();
    let invalid = free_objects.len().min(free_hypotheses.len()) as f64 + 1.0;
    let costs: Vec<Vec<f64>> = free_objects
      .iter()
      .map(|&i| {
        free_hypotheses
          .iter()
          .map(|&j| distances[i][j].unwrap_or(invalid))
          .collect()
      })
      .collect();
    for (row, col) in min_cost_assignment(&costs).into_iter().enumerate() {
      let Some(col) = col else {
        continue;
      };
      let (i, j) = (free_objects[row], free_hypotheses[col]);
      if let Some(d) = distances[i][j] {
        matched_objects[i] = true;
        matched_hypotheses[j] = true;
        matches.push((i, j, d));
      }
    }

    for (i, j, d) in matches {
      let oid = objects[i].0;
      let hid = hypotheses[j].0;
      if self.last_match.get(&oid).is_some_and(|prev| *prev != hid) {
        self.num_switches += 1;
      }
      self.last_match.insert(oid, hid);
      self.num_matches += 1;
      self.total_distance += d;
    }

    for (i, (oid, _)) in objects.iter().enumerate() {
      self.objects.entry(*oid).or_default().tracked.push(matched_objects[i]);
      *self.gt_counts.entry(*oid).or_default() += 1;
      if !matched_objects[i] {
        self.num_misses += 1;
      }
    }
    for (j, (hid, _)) in hypotheses.iter().enumerate() {
      *self.hyp_counts.entry(*hid).or_default() += 1;
      if !matched_hypotheses[j] {
        self.num_false_positives += 1;
      }
    }
  }

  /// 全局一对一身份分配，使共同出现帧数之和最大，返回 IDTP
  fn identity_true_positives(&self) -> u64 {
    let object_ids: Vec<i64> = self
      .overlaps
      .keys()
      .map(|(oid, _)| *oid)
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();
    let hypothesis_ids: Vec<i64> = self
      .overlaps
      .keys()
      .map(|(_, hid)| *hid)
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();
    let overlap = |oid: i64, hid: i64| self.overlaps.get(&(oid, hid)).copied().unwrap_or(0);

    let costs: Vec<Vec<f64>> = object_ids
      .iter()
      .map(|&oid| {
        hypothesis_ids
          .iter()
          .map(|&hid| -(overlap(oid, hid) as f64))
          .collect()
      })
      .collect();
    min_cost_assignment(&costs)
      .into_iter()
      .zip(object_ids.iter())
      .filter_map(|(col, &oid)| col.map(|col| overlap(oid, hypothesis_ids[col])))
      .sum()
  }

  pub fn summary(&self) -> EvaluationSummary {
    let num_objects: u64 = self.gt_counts.values().sum();
    let num_predictions: u64 = self.hyp_counts.values().sum();
    let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };

    let (mut mostly_tracked, mut partially_tracked, mut mostly_lost) = (0u64, 0u64, 0u64);
    let mut fragmentations = 0;
    for history in self.objects.values() {
      let r = history.ratio();
      if r >= 0.8 {
        mostly_tracked += 1;
      } else if r < 0.2 {
        mostly_lost += 1;
      } else {
        partially_tracked += 1;
      }
      fragmentations += history.fragmentations();
    }

    let idtp = self.identity_true_positives() as f64;
    let idfn = num_objects as f64 - idtp;
    let idfp = num_predictions as f64 - idtp;

    let mota = if num_objects > 0 {
      1.0
        - (self.num_misses + self.num_false_positives + self.num_switches) as f64
          / num_objects as f64
    } else {
      0.0
    };

    EvaluationSummary::from([
      ("mota".to_string(), mota),
      (
        "motp".to_string(),
        ratio(self.total_distance, self.num_matches as f64),
      ),
      (
        "precision".to_string(),
        ratio(self.num_matches as f64, num_predictions as f64),
      ),
      (
        "recall".to_string(),
        ratio(self.num_matches as f64, num_objects as f64),
      ),
      ("idf1".to_string(), ratio(2.0 * idtp, 2.0 * idtp + idfp + idfn)),
      ("idp".to_string(), ratio(idtp, idtp + idfp)),
      ("idr".to_string(), ratio(idtp, idtp + idfn)),
      (
        "num_false_positives".to_string(),
        self.num_false_positives as f64,
      ),
      ("num_misses".to_string(), self.num_misses as f64),
      ("num_switches".to_string(), self.num_switches as f64),
      ("num_fragmentations".to_string(), fragmentations as f64),
      ("num_unique_objects".to_string(), self.objects.len() as f64),
      ("mostly_tracked".to_string(), mostly_tracked as f64),
      ("partially_tracked".to_string(), partially_tracked as f64),
      ("mostly_lost".to_string(), mostly_lost as f64),
      ("num_objects".to_string(), num_objects as f64),
      ("num_predictions".to_string(), num_predictions as f64),
    ])
  }
}

fn group_by_frame(rows: &[MotRow]) -> BTreeMap<u64, Vec<(i64, [f64; 4])>> {
  let mut frames: BTreeMap<u64, Vec<(i64, [f64; 4])>> = BTreeMap::new();
  for row in rows {
    frames.entry(row.frame).or_default().push((row.id, row.bbox));
  }
  frames
}

/// 对两组已解析的行评分
pub fn score_rows(
  ground_truth: &[MotRow],
  predictions: &[MotRow],
  iou_threshold: f64,
) -> EvaluationSummary {
  let gt = group_by_frame(ground_truth);
  let pred = group_by_frame(predictions);
  let frames: BTreeSet<u64> = gt.keys().chain(pred.keys()).copied().collect();

  let mut acc = MotAccumulator::new(iou_threshold);
  let empty = Vec::new();
  for frame in frames {
    acc.update(
      gt.get(&frame).unwrap_or(&empty),
      pred.get(&frame).unwrap_or(&empty),
    );
  }
  acc.summary()
}

/// 内置的 MOT15-2D 评分器，真值中置信度低于 1 的行被忽略
#[derive(Debug, Clone, Copy, Default)]
pub struct MotScorer;

impl Scorer for MotScorer {
  fn score(
    &self,
    ground_truth: &Path,
    predictions: &Path,
    iou_threshold: f64,
  ) -> Result<EvaluationSummary, EvalError> {
    let gt = load_rows(ground_truth, Some(1.0))?;
    if gt.is_empty() {
      return Err(EvalError::EmptyGroundTruth(
        ground_truth.display().to_string(),
      ));
    }
    let pred = load_rows(predictions, None)?;
    debug!("真值 {} 行, 预测 {} 行", gt.len(), pred.len());
    Ok(score_rows(&gt, &pred, iou_threshold))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(frame: u64, id: i64, x: f64) -> MotRow {
    MotRow {
      frame,
      id,
      bbox: [x, 0.0, 10.0, 10.0],
      confidence: 1.0,
    }
  }

  #[test]
  fn parses_and_filters_ground_truth() {
    let text = "1,1,11.00,21.00,30.00,40.00,1,-1,-1,-1\n\n1,2,1,1,5,5,0,-1,-1,-1\n";
    let rows = parse_rows(text, "gt", Some(1.0)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].bbox, [10.0, 20.0, 30.0, 40.0]);

    assert_eq!(parse_rows(text, "pred", None).unwrap().len(), 2);
    assert!(matches!(
      parse_rows("1,2,3", "bad", None),
      Err(EvalError::Parse { line: 1, .. })
    ));
  }

  #[test]
  fn iou_of_boxes() {
    assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[0.0, 0.0, 10.0, 10.0]), 1.0);
    assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 0.0, 10.0, 10.0]), 0.0);
    assert!((iou(&[0.0, 0.0, 10.0, 10.0], &[5.0, 0.0, 10.0, 10.0]) - 1.0 / 3.0).abs() < 1e-9);
  }

  #[test]
  fn perfect_tracking() {
    let gt: Vec<MotRow> = (1..=5).map(|f| row(f, 1, 0.0)).collect();
    let pred: Vec<MotRow> = (1..=5).map(|f| row(f, 9, 0.0)).collect();
    let summary = score_rows(&gt, &pred, 0.5);
    assert_eq!(summary["mota"], 1.0);
    assert_eq!(summary["idf1"], 1.0);
    assert_eq!(summary["motp"], 0.0);
    assert_eq!(summary["mostly_tracked"], 1.0);
    assert_eq!(summary["num_switches"], 0.0);
  }

  #[test]
  fn identity_switch_and_low_overlap() {
    let gt: Vec<MotRow> = (1..=4).map(|f| row(f, 1, 0.0)).collect();
    let pred = vec![
      row(1, 5, 0.0),
      row(2, 5, 0.0),
      row(3, 6, 0.0),
      // IoU 1/3，低于阈值：一次漏检加一次误检
      row(4, 6, 5.0),
    ];
    let summary = score_rows(&gt, &pred, 0.5);
    assert_eq!(summary["num_switches"], 1.0);
    assert_eq!(summary["num_misses"], 1.0);
    assert_eq!(summary["num_false_positives"], 1.0);
    assert_eq!(summary["mota"], 1.0 - 3.0 / 4.0);
    assert_eq!(summary["idf1"], 0.5);
  }

  #[test]
  fn fragmentation_counts_interruptions() {
    let gt: Vec<MotRow> = (1..=5).map(|f| row(f, 1, 0.0)).collect();
    let pred = vec![row(1, 1, 0.0), row(3, 1, 0.0), row(5, 1, 0.0)];
    let summary = score_rows(&gt, &pred, 0.5);
    assert_eq!(summary["num_fragmentations"], 2.0);
    assert_eq!(summary["partially_tracked"], 1.0);
    assert_eq!(summary["recall"], 0.6);
    assert_eq!(summary["precision"], 1.0);
  }

  #[test]
  fn previous_match_is_kept() {
    let mut acc = MotAccumulator::new(0.5);
    acc.update(&[(1, [0.0, 0.0, 10.0, 10.0])], &[(7, [0.0, 0.0, 10.0, 10.0])]);
    // 8 与真值完全重合，7 略有偏移但仍有效：保留 7
    acc.update(
      &[(1, [0.0, 0.0, 10.0, 10.0])],
      &[(8, [0.0, 0.0, 10.0, 10.0]), (7, [1.0, 0.0, 10.0, 10.0])],
    );
    let summary = acc.summary();
    assert_eq!(summary["num_switches"], 0.0);
    assert_eq!(summary["num_false_positives"], 1.0);
  }

  #[test]
  fn crossing_pairs_use_optimal_assignment() {
    // A 与 X 完全重合，但取 A-X 会让 B 与 Y 都无法匹配；最优解为 A-Y 与 B-X
    let gt = vec![row(1, 1, 0.0), row(1, 2, 2.0)];
    let pred = vec![row(1, 10, 0.0), row(1, 11, -2.0)];
    let summary = score_rows(&gt, &pred, 0.5);
    assert_eq!(summary["num_misses"], 0.0);
    assert_eq!(summary["num_false_positives"], 0.0);
    assert_eq!(summary["mota"], 1.0);
    assert!((summary["motp"] - 1.0 / 3.0).abs() < 1e-9);
  }

  #[test]
  fn identity_assignment_maximizes_shared_frames() {
    // (1,10) 共 3 帧，(1,11) 与 (2,10) 各 2 帧；一对一最优为 1-11 加 2-10，共 4 帧
    let mut gt: Vec<MotRow> = (1..=5).map(|f| row(f, 1, 0.0)).collect();
    gt.extend((4..=5).map(|f| row(f, 2, 100.0)));
    let mut pred: Vec<MotRow> = (1..=3).map(|f| row(f, 10, 0.0)).collect();
    pred.extend((4..=5).map(|f| row(f, 11, 0.0)));
    pred.extend((4..=5).map(|f| row(f, 10, 100.0)));

    let summary = score_rows(&gt, &pred, 0.5);
    assert_eq!(summary["num_objects"], 7.0);
    assert_eq!(summary["num_predictions"], 7.0);
    assert!((summary["idf1"] - 8.0 / 14.0).abs() < 1e-9);
  }
}
