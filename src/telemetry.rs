// 该文件是 Liuying （流影） 项目的一部分。
// src/telemetry.rs - 运行记录
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

//! 运行记录（遥测）
//!
//! 流水线把参数、指标、产物写入一个只写的 [`TelemetrySink`]。
//! 运行的生命周期由 [`RunContext`] 显式持有：开始失败是致命错误，
//! 之后的记录失败只输出警告，不会中断推理。

use std::fmt;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::FromUrl;

mod jsonl;
mod log;
mod memory;

pub use self::jsonl::JsonlSink;
pub use self::log::LogSink;
pub use self::memory::{MemoryLog, MemorySink};

/// 一个数值指标，逐帧指标带 `step`，汇总指标不带
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
  pub name: String,
  pub value: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub step: Option<u64>,
}

impl Metric {
  pub fn at(name: impl Into<String>, value: f64, step: u64) -> Self {
    Self {
      name: name.into(),
      value,
      step: Some(step),
    }
  }

  pub fn summary(name: impl Into<String>, value: f64) -> Self {
    Self {
      name: name.into(),
      value,
      step: None,
    }
  }
}

/// 运行参数的值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
  Text(String),
  Number(f64),
}

impl From<&str> for ParamValue {
  fn from(value: &str) -> Self {
    ParamValue::Text(value.to_string())
  }
}

impl From<String> for ParamValue {
  fn from(value: String) -> Self {
    ParamValue::Text(value)
  }
}

impl From<f64> for ParamValue {
  fn from(value: f64) -> Self {
    ParamValue::Number(value)
  }
}

impl From<u64> for ParamValue {
  fn from(value: u64) -> Self {
    ParamValue::Number(value as f64)
  }
}

impl From<bool> for ParamValue {
  fn from(value: bool) -> Self {
    ParamValue::Text(value.to_string())
  }
}

impl fmt::Display for ParamValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ParamValue::Text(text) => write!(f, "{}", text),
      ParamValue::Number(number) => write!(f, "{}", number),
    }
  }
}

/// 运行结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
  Finished,
  Failed,
  Killed,
}

impl RunStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Finished => "finished",
      RunStatus::Failed => "failed",
      RunStatus::Killed => "killed",
    }
  }
}

#[derive(Error, Debug)]
pub enum TelemetryError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("运行尚未开始")]
  NotStarted,
  #[error("运行已经开始: {0}")]
  AlreadyStarted(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("产物不存在: {0}")]
  MissingArtifact(String),
  #[error("记录后端拒绝: {0}")]
  Rejected(String),
}

/// 只写的运行记录后端
pub trait TelemetrySink {
  fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<(), TelemetryError>;

  fn log_params(&mut self, params: &[(String, ParamValue)]) -> Result<(), TelemetryError>;

  fn log_metrics(&mut self, metrics: &[Metric]) -> Result<(), TelemetryError>;

  /// 上传文件产物到 `artifact_dir` 目录下
  fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TelemetryError>;

  fn register_model(&mut self, name: &str, weights: &Path) -> Result<(), TelemetryError>;

  fn end_run(&mut self, status: RunStatus) -> Result<(), TelemetryError>;
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for &mut S {
  fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<(), TelemetryError> {
    (**self).start_run(experiment, run_name)
  }

  fn log_params(&mut self, params: &[(String, ParamValue)]) -> Result<(), TelemetryError> {
    (**self).log_params(params)
  }

  fn log_metrics(&mut self, metrics: &[Metric]) -> Result<(), TelemetryError> {
    (**self).log_metrics(metrics)
  }

  fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TelemetryError> {
    (**self).log_artifact(path, artifact_dir)
  }

  fn register_model(&mut self, name: &str, weights: &Path) -> Result<(), TelemetryError> {
    (**self).register_model(name, weights)
  }

  fn end_run(&mut self, status: RunStatus) -> Result<(), TelemetryError> {
    (**self).end_run(status)
  }
}

/// 按 URL 方案分派的记录后端
pub enum SinkWrapper {
  Jsonl(JsonlSink),
  Log(LogSink),
}

impl FromUrl for SinkWrapper {
  type Error = TelemetryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      JsonlSink::SCHEME => Ok(SinkWrapper::Jsonl(JsonlSink::from_url(url)?)),
      LogSink::SCHEME => Ok(SinkWrapper::Log(LogSink::from_url(url)?)),
      other => Err(TelemetryError::SchemeMismatch(other.to_string())),
    }
  }
}

impl SinkWrapper {
  /// URL 按方案分派，裸路径视为本地 JSONL 存储目录
  pub fn open(reference: &str) -> Result<Self, TelemetryError> {
    if reference.contains("://") {
      let url = Url::parse(reference)
        .map_err(|e| TelemetryError::SchemeMismatch(format!("{}: {}", reference, e)))?;
      Self::from_url(&url)
    } else {
      Ok(SinkWrapper::Jsonl(JsonlSink::new(reference)))
    }
  }

  fn inner(&mut self) -> &mut dyn TelemetrySink {
    match self {
      SinkWrapper::Jsonl(sink) => sink,
      SinkWrapper::Log(sink) => sink,
    }
  }
}

impl TelemetrySink for SinkWrapper {
  fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<(), TelemetryError> {
    self.inner().start_run(experiment, run_name)
  }

  fn log_params(&mut self, params: &[(String, ParamValue)]) -> Result<(), TelemetryError> {
    self.inner().log_params(params)
  }

  fn log_metrics(&mut self, metrics: &[Metric]) -> Result<(), TelemetryError> {
    self.inner().log_metrics(metrics)
  }

  fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TelemetryError> {
    self.inner().log_artifact(path, artifact_dir)
  }

  fn register_model(&mut self, name: &str, weights: &Path) -> Result<(), TelemetryError> {
    self.inner().register_model(name, weights)
  }

  fn end_run(&mut self, status: RunStatus) -> Result<(), TelemetryError> {
    self.inner().end_run(status)
  }
}

/// 一次运行的记录上下文
///
/// 代替全局的“当前运行”状态：所有记录都通过它显式传递。
/// 未调用 [`RunContext::finish`] 就被丢弃时，运行以 `Failed` 结束。
pub struct RunContext<S: TelemetrySink> {
  sink: Option<S>,
  run_name: String,
}

impl<S: TelemetrySink> RunContext<S> {
  pub fn start(mut sink: S, experiment: &str, run_name: &str) -> Result<Self, TelemetryError> {
    sink.start_run(experiment, run_name)?;
    debug!("运行已开始: {}/{}", experiment, run_name);
    Ok(Self {
      sink: Some(sink),
      run_name: run_name.to_string(),
    })
  }

  fn with_sink(&mut self, what: &str, op: impl FnOnce(&mut S) -> Result<(), TelemetryError>) {
    if let Some(sink) = self.sink.as_mut()
      && let Err(e) = op(sink)
    {
      warn!("记录{}失败: {}", what, e);
    }
  }

  pub fn log_params(&mut self, params: &[(String, ParamValue)]) {
    self.with_sink("参数", |sink| sink.log_params(params));
  }

  pub fn log_param(&mut self, name: &str, value: impl Into<ParamValue>) {
    let params = [(name.to_string(), value.into())];
    self.with_sink("参数", |sink| sink.log_params(&params));
  }

  pub fn log_metrics(&mut self, metrics: &[Metric]) {
    if metrics.is_empty() {
      return;
    }
    self.with_sink("指标", |sink| sink.log_metrics(metrics));
  }

  pub fn log_artifact(&mut self, path: &Path, artifact_dir: &str) {
    self.with_sink("产物", |sink| sink.log_artifact(path, artifact_dir));
  }

  /// 注册模型，失败只产生警告
  pub fn register_model(&mut self, name: &str, weights: &Path) {
    self.with_sink("模型注册", |sink| sink.register_model(name, weights));
  }

  /// 结束运行并交还后端
  pub fn finish(mut self, status: RunStatus) -> Option<S> {
    let mut sink = self.sink.take()?;
    if let Err(e) = sink.end_run(status) {
      warn!("结束运行失败: {}", e);
    }
    Some(sink)
  }
}

impl<S: TelemetrySink> Drop for RunContext<S> {
  fn drop(&mut self) {
    if let Some(sink) = self.sink.as_mut() {
      warn!("运行 {} 未正常结束，标记为失败", self.run_name);
      let _ = sink.end_run(RunStatus::Failed);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn param_value_display() {
    assert_eq!(ParamValue::from(0.5).to_string(), "0.5");
    assert_eq!(ParamValue::from(true).to_string(), "true");
    assert_eq!(ParamValue::from(300u64), ParamValue::Number(300.0));
  }

  #[test]
  fn param_value_serializes_untagged() {
    let json = serde_json::to_string(&[ParamValue::from("cpu"), ParamValue::from(2u64)]).unwrap();
    assert_eq!(json, r#"["cpu",2.0]"#);
  }

  #[test]
  fn dropped_context_ends_run_as_failed() {
    let sink = MemorySink::default();
    {
      let mut run = RunContext::start(sink.clone(), "exp", "run").unwrap();
      run.log_param("device", "cpu");
    }
    let log = sink.snapshot();
    assert_eq!(log.status, Some(RunStatus::Failed));
    assert_eq!(log.param("device"), Some(&ParamValue::from("cpu")));
  }

  #[test]
  fn logging_failures_do_not_abort() {
    let sink = MemorySink::rejecting_logs();
    let mut run = RunContext::start(sink.clone(), "exp", "run").unwrap();
    run.log_metrics(&[Metric::summary("frames_processed", 1.0)]);
    run.register_model("yolo", Path::new("/nope.pt"));
    run.finish(RunStatus::Finished);
    let log = sink.snapshot();
    assert!(log.metrics.is_empty());
    assert_eq!(log.status, Some(RunStatus::Finished));
  }

  #[test]
  fn unknown_sink_scheme_is_rejected() {
    assert!(matches!(
      SinkWrapper::open("ftp://host/runs"),
      Err(TelemetryError::SchemeMismatch(_))
    ));
  }
}
