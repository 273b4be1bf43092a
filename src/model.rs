// 该文件是 Liuying （流影） 项目的一部分。
// src/model.rs - 模型
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::InferOptions, frame::Frame};

mod replay;
pub use self::replay::ReplayModel;

/// 检测/跟踪模型
///
/// 模型由外部实例化后交给流水线，流水线不负责加载或训练。
pub trait Model {
  /// 模型标识
  fn name(&self) -> &str;

  /// 单帧检测
  fn predict(&mut self, frame: &Frame, options: &InferOptions) -> Result<RawResult, ModelError>;

  /// 单帧跟踪；`persist` 为真时跨调用保留轨迹身份。
  /// 返回空列表表示该帧没有结果。
  fn track(
    &mut self,
    frame: &Frame,
    options: &InferOptions,
    persist: bool,
  ) -> Result<Vec<RawResult>, ModelError>;
}

impl<M: Model + ?Sized> Model for &mut M {
  fn name(&self) -> &str {
    (**self).name()
  }

  fn predict(&mut self, frame: &Frame, options: &InferOptions) -> Result<RawResult, ModelError> {
    (**self).predict(frame, options)
  }

  fn track(
    &mut self,
    frame: &Frame,
    options: &InferOptions,
    persist: bool,
  ) -> Result<Vec<RawResult>, ModelError> {
    (**self).track(frame, options, persist)
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("结果解析错误 (第 {line} 行): {source}")]
  Parse {
    line: usize,
    source: serde_json::Error,
  },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 类别序号到名称的映射，可以是数组或字典
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassNames {
  List(Vec<String>),
  /// 键为序号的字符串形式
  Map(BTreeMap<String, String>),
}

impl Default for ClassNames {
  fn default() -> Self {
    ClassNames::List(Vec::new())
  }
}

impl ClassNames {
  /// 超出映射范围的序号解析为序号本身的字符串
  pub fn resolve(&self, class_id: i64) -> String {
    let name = match self {
      ClassNames::List(names) => usize::try_from(class_id)
        .ok()
        .and_then(|idx| names.get(idx)),
      ClassNames::Map(names) => names.get(&class_id.to_string()),
    };
    name.cloned().unwrap_or_else(|| class_id.to_string())
  }
}

/// 单次调用的耗时（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Speed {
  #[serde(default)]
  pub preprocess: f64,
  #[serde(default)]
  pub inference: f64,
  #[serde(default)]
  pub postprocess: f64,
}

/// 模型输出的一个框
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBox {
  /// 像素坐标 `[x1, y1, x2, y2]`
  pub xyxy: [f32; 4],
  pub conf: f32,
  pub cls: i64,
  /// 跟踪模式下的轨迹序号
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
}

/// 模型原始输出，流水线只读
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawResult {
  #[serde(default)]
  pub boxes: Vec<RawBox>,
  #[serde(default)]
  pub names: ClassNames,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub speed: Option<Speed>,
}

impl RawResult {
  /// 是否携带轨迹身份
  pub fn has_track_ids(&self) -> bool {
    self.boxes.iter().any(|b| b.id.is_some())
  }

  /// 去掉轨迹身份，得到纯检测结果
  pub fn without_track_ids(mut self) -> Self {
    for b in self.boxes.iter_mut() {
      b.id = None;
    }
    self
  }
}
