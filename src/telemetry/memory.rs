// 该文件是 Liuying （流影） 项目的一部分。
// src/telemetry/memory.rs - 内存记录后端
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

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::telemetry::{Metric, ParamValue, RunStatus, TelemetryError, TelemetrySink};

/// 内存中保存的全部记录
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
  pub experiment: Option<String>,
  pub run_name: Option<String>,
  pub params: Vec<(String, ParamValue)>,
  pub metrics: Vec<Metric>,
  pub artifacts: Vec<(PathBuf, String)>,
  pub registered: Vec<(String, PathBuf)>,
  pub status: Option<RunStatus>,
}

impl MemoryLog {
  pub fn param(&self, name: &str) -> Option<&ParamValue> {
    self
      .params
      .iter()
      .rev()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v)
  }

  /// 不带 step 的汇总指标
  pub fn summary(&self, name: &str) -> Option<f64> {
    self
      .metrics
      .iter()
      .rev()
      .find(|m| m.name == name && m.step.is_none())
      .map(|m| m.value)
  }

  /// 某个逐帧指标的 `(step, value)` 序列
  pub fn series(&self, name: &str) -> Vec<(u64, f64)> {
    self
      .metrics
      .iter()
      .filter(|m| m.name == name)
      .filter_map(|m| m.step.map(|step| (step, m.value)))
      .collect()
  }

  pub fn artifact_dirs(&self) -> Vec<&str> {
    self.artifacts.iter().map(|(_, dir)| dir.as_str()).collect()
  }
}

/// 把记录保存在内存中，克隆体共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
  log: Arc<Mutex<MemoryLog>>,
  reject_start: bool,
  reject_logs: bool,
}

impl MemorySink {
  /// 开始运行即失败
  pub fn rejecting_start() -> Self {
    Self {
      reject_start: true,
      ..Default::default()
    }
  }

  /// 运行能开始，但参数/指标/产物/注册全部失败
  pub fn rejecting_logs() -> Self {
    Self {
      reject_logs: true,
      ..Default::default()
    }
  }

  pub fn snapshot(&self) -> MemoryLog {
    self.lock().clone()
  }

  fn lock(&self) -> MutexGuard<'_, MemoryLog> {
    self.log.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn check(&self) -> Result<MutexGuard<'_, MemoryLog>, TelemetryError> {
    if self.reject_logs {
      return Err(TelemetryError::Rejected("memory sink".to_string()));
    }
    let log = self.lock();
    if log.run_name.is_none() {
      return Err(TelemetryError::NotStarted);
    }
    Ok(log)
  }
}

impl TelemetrySink for MemorySink {
  fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<(), TelemetryError> {
    if self.reject_start {
      return Err(TelemetryError::Rejected("memory sink".to_string()));
    }
    let mut log = self.lock();
    if let Some(existing) = &log.run_name {
      return Err(TelemetryError::AlreadyStarted(existing.clone()));
    }
    log.experiment = Some(experiment.to_string());
    log.run_name = Some(run_name.to_string());
    Ok(())
  }

  fn log_params(&mut self, params: &[(String, ParamValue)]) -> Result<(), TelemetryError> {
    self.check()?.params.extend_from_slice(params);
    Ok(())
  }

  fn log_metrics(&mut self, metrics: &[Metric]) -> Result<(), TelemetryError> {
    self.check()?.metrics.extend_from_slice(metrics);
    Ok(())
  }

  fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TelemetryError> {
    let mut log = self.check()?;
    if !path.exists() {
      return Err(TelemetryError::MissingArtifact(path.display().to_string()));
    }
    log
      .artifacts
      .push((path.to_path_buf(), artifact_dir.to_string()));
    Ok(())
  }

  fn register_model(&mut self, name: &str, weights: &Path) -> Result<(), TelemetryError> {
    self
      .check()?
      .registered
      .push((name.to_string(), weights.to_path_buf()));
    Ok(())
  }

  fn end_run(&mut self, status: RunStatus) -> Result<(), TelemetryError> {
    let mut log = self.lock();
    if log.run_name.is_none() {
      return Err(TelemetryError::NotStarted);
    }
    log.status = Some(status);
    Ok(())
  }
}
