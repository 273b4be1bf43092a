// 该文件是 Liuying （流影） 项目的一部分。
// src/model/replay.rs - 结果回放模型
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

//! 回放外部推理服务预先导出的逐帧结果。
//!
//! 文件为 JSON Lines，每行一帧：
//!
//! ```text
//! {"names": ["person", "car"]}
//! {"frame": 0, "boxes": [{"xyxy": [10, 20, 50, 80], "conf": 0.91, "cls": 0, "id": 3}],
//!  "speed": {"preprocess": 1.2, "inference": 8.4, "postprocess": 0.9}}
//! ```
//!
//! 没有 `frame` 字段的行只提供默认类别名称。`frame` 为来源中的帧序号（从 0 开始）。

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::InferOptions,
  frame::Frame,
  model::{ClassNames, Model, ModelError, RawResult},
  url_path,
};

#[derive(Deserialize)]
struct ReplayLine {
  #[serde(default)]
  frame: Option<u64>,
  #[serde(flatten)]
  result: RawResult,
}

pub struct ReplayModel {
  name: String,
  names: ClassNames,
  results: HashMap<u64, RawResult>,
  persist_warned: bool,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    let mut model = Self::open(url_path(url))?;
    model.name = url.as_str().to_string();
    Ok(model)
  }
}

impl ReplayModel {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let path = path.as_ref();
    let model = Self::from_reader(BufReader::new(File::open(path)?), path.display().to_string())?;
    info!(
      "回放结果已加载: {} ({} 帧)",
      path.display(),
      model.results.len()
    );
    Ok(model)
  }

  pub fn from_reader<R: BufRead>(reader: R, name: impl Into<String>) -> Result<Self, ModelError> {
    let mut names = ClassNames::default();
    let mut results = HashMap::new();

    for (idx, line) in reader.lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      let parsed: ReplayLine = serde_json::from_str(&line).map_err(|source| ModelError::Parse {
        line: idx + 1,
        source,
      })?;

      match parsed.frame {
        Some(frame) => {
          if results.insert(frame, parsed.result).is_some() {
            warn!("第 {} 行重复的帧 {}，使用后出现的结果", idx + 1, frame);
          }
        }
        None => names = parsed.result.names,
      }
    }

    Ok(Self {
      name: name.into(),
      names,
      results,
      persist_warned: false,
    })
  }

  fn lookup(&self, index: u64) -> Option<RawResult> {
    self.results.get(&index).map(|result| {
      let mut result = result.clone();
      if names_empty(&result.names) {
        result.names = self.names.clone();
      }
      result
    })
  }
}

fn names_empty(names: &ClassNames) -> bool {
  match names {
    ClassNames::List(list) => list.is_empty(),
    ClassNames::Map(map) => map.is_empty(),
  }
}

impl Model for ReplayModel {
  fn name(&self) -> &str {
    &self.name
  }

  fn predict(&mut self, frame: &Frame, _options: &InferOptions) -> Result<RawResult, ModelError> {
    Ok(match self.lookup(frame.index) {
      Some(result) => result.without_track_ids(),
      None => {
        debug!("帧 {} 没有回放结果，视为无检测", frame.index);
        RawResult {
          names: self.names.clone(),
          ..Default::default()
        }
      }
    })
  }

  fn track(
    &mut self,
    frame: &Frame,
    _options: &InferOptions,
    persist: bool,
  ) -> Result<Vec<RawResult>, ModelError> {
    if !persist && !self.persist_warned {
      warn!("回放模型的轨迹身份来自文件，persist=false 不会重置身份");
      self.persist_warned = true;
    }
    Ok(self.lookup(frame.index).into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  const REPLAY: &str = r#"{"names": ["person", "car"]}
{"frame": 0, "boxes": [{"xyxy": [10, 20, 50, 80], "conf": 0.9, "cls": 1, "id": 3}], "speed": {"preprocess": 1.0, "inference": 8.0, "postprocess": 1.0}}

{"frame": 2, "boxes": [], "names": {"0": "bike"}}
"#;

  fn frame(index: u64) -> Frame {
    Frame::new(RgbImage::new(4, 4), index)
  }

  #[test]
  fn predict_strips_ids_and_fills_names() {
    let mut model = ReplayModel::from_reader(REPLAY.as_bytes(), "replay").unwrap();
    let options = InferOptions::default();

    let result = model.predict(&frame(0), &options).unwrap();
    assert_eq!(result.boxes.len(), 1);
    assert_eq!(result.boxes[0].id, None);
    assert_eq!(result.names.resolve(1), "car");

    let missing = model.predict(&frame(1), &options).unwrap();
    assert!(missing.boxes.is_empty());
    assert!(missing.speed.is_none());
  }

  #[test]
  fn track_keeps_ids_and_skips_unknown_frames() {
    let mut model = ReplayModel::from_reader(REPLAY.as_bytes(), "replay").unwrap();
    let options = InferOptions::default();

    let results = model.track(&frame(0), &options, true).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].boxes[0].id, Some(3));

    assert!(model.track(&frame(1), &options, true).unwrap().is_empty());
    let own_names = model.track(&frame(2), &options, true).unwrap();
    assert_eq!(own_names[0].names.resolve(0), "bike");
  }

  #[test]
  fn bad_line_reports_line_number() {
    let err = ReplayModel::from_reader("{\"frame\": 0}\nnot json\n".as_bytes(), "x")
      .err()
      .unwrap();
    assert!(matches!(err, ModelError::Parse { line: 2, .. }));
  }
}
