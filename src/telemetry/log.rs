// 该文件是 Liuying （流影） 项目的一部分。
// src/telemetry/log.rs - 日志记录后端
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

use std::path::Path;

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  telemetry::{Metric, ParamValue, RunStatus, TelemetryError, TelemetrySink},
};

/// 只把记录输出到日志，`log://` 或 `log://?steps=false`（不输出逐帧指标）
#[derive(Debug, Clone)]
pub struct LogSink {
  run: Option<String>,
  steps: bool,
}

impl Default for LogSink {
  fn default() -> Self {
    Self {
      run: None,
      steps: true,
    }
  }
}

impl FromUrlWithScheme for LogSink {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogSink {
  type Error = TelemetryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TelemetryError::SchemeMismatch(url.scheme().to_string()));
    }
    let steps = url
      .query_pairs()
      .find(|(k, _)| k == "steps")
      .map(|(_, v)| v != "false")
      .unwrap_or(true);
    Ok(Self { run: None, steps })
  }
}

impl LogSink {
  fn run(&self) -> Result<&str, TelemetryError> {
    self.run.as_deref().ok_or(TelemetryError::NotStarted)
  }
}

impl TelemetrySink for LogSink {
  fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<(), TelemetryError> {
    info!("[{}] 运行开始 (实验: {})", run_name, experiment);
    self.run = Some(run_name.to_string());
    Ok(())
  }

  fn log_params(&mut self, params: &[(String, ParamValue)]) -> Result<(), TelemetryError> {
    let run = self.run()?;
    for (name, value) in params {
      info!("[{}] 参数 {} = {}", run, name, value);
    }
    Ok(())
  }

  fn log_metrics(&mut self, metrics: &[Metric]) -> Result<(), TelemetryError> {
    let run = self.run()?;
    for metric in metrics {
      match metric.step {
        Some(step) if self.steps => debug!("[{}] {}@{} = {:.4}", run, metric.name, step, metric.value),
        Some(_) => {}
        None => info!("[{}] {} = {:.4}", run, metric.name, metric.value),
      }
    }
    Ok(())
  }

  fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TelemetryError> {
    let run = self.run()?;
    if !path.exists() {
      return Err(TelemetryError::MissingArtifact(path.display().to_string()));
    }
    info!("[{}] 产物 {}/ <- {}", run, artifact_dir, path.display());
    Ok(())
  }

  fn register_model(&mut self, name: &str, weights: &Path) -> Result<(), TelemetryError> {
    let run = self.run()?;
    info!("[{}] 注册模型 {} ({})", run, name, weights.display());
    Ok(())
  }

  fn end_run(&mut self, status: RunStatus) -> Result<(), TelemetryError> {
    let run = self.run.take().ok_or(TelemetryError::NotStarted)?;
    info!("[{}] 运行结束: {}", run, status.as_str());
    Ok(())
  }
}
