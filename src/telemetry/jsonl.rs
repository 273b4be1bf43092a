// 该文件是 Liuying （流影） 项目的一部分。
// src/telemetry/jsonl.rs - 本地 JSON Lines 记录后端
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

//! 本地 JSON Lines 存储
//!
//! 目录结构：
//!
//! ```text
//! <root>/
//!   registered_models.jsonl
//!   <experiment>/<run_name>/
//!     events.jsonl
//!     artifacts/<dir>/<file>
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  telemetry::{Metric, ParamValue, RunStatus, TelemetryError, TelemetrySink},
  url_path,
};

const REGISTRY_FILE: &str = "registered_models.jsonl";

struct OpenRun {
  name: String,
  dir: PathBuf,
  events: BufWriter<File>,
}

pub struct JsonlSink {
  root: PathBuf,
  run: Option<OpenRun>,
}

impl FromUrlWithScheme for JsonlSink {
  const SCHEME: &'static str = "file";
}

impl FromUrl for JsonlSink {
  type Error = TelemetryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TelemetryError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::new(url_path(url)))
  }
}

impl JsonlSink {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      run: None,
    }
  }

  /// 当前运行的目录
  pub fn run_dir(&self) -> Option<&Path> {
    self.run.as_ref().map(|r| r.dir.as_path())
  }

  fn emit(&mut self, mut record: Value) -> Result<(), TelemetryError> {
    let run = self.run.as_mut().ok_or(TelemetryError::NotStarted)?;
    record["ts"] = json!(chrono::Utc::now().to_rfc3339());
    serde_json::to_writer(&mut run.events, &record)?;
    run.events.write_all(b"\n")?;
    Ok(())
  }

  fn next_version(&self, name: &str) -> Result<u64, TelemetryError> {
    let path = self.root.join(REGISTRY_FILE);
    if !path.exists() {
      return Ok(1);
    }
    let mut latest = 0;
    for line in BufReader::new(File::open(path)?).lines() {
      let record: Value = serde_json::from_str(&line?)?;
      if record["name"] == name {
        latest = latest.max(record["version"].as_u64().unwrap_or(0));
      }
    }
    Ok(latest + 1)
  }
}

impl TelemetrySink for JsonlSink {
  fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<(), TelemetryError> {
    if let Some(run) = &self.run {
      return Err(TelemetryError::AlreadyStarted(run.name.clone()));
    }

    let dir = self.root.join(experiment).join(run_name);
    std::fs::create_dir_all(&dir)?;
    let events = OpenOptions::new()
      .create(true)
      .append(true)
      .open(dir.join("events.jsonl"))?;
    info!("运行记录目录: {}", dir.display());

    self.run = Some(OpenRun {
      name: run_name.to_string(),
      dir,
      events: BufWriter::new(events),
    });
    self.emit(json!({
      "event": "start",
      "experiment": experiment,
      "run_name": run_name,
    }))
  }

  fn log_params(&mut self, params: &[(String, ParamValue)]) -> Result<(), TelemetryError> {
    let params: serde_json::Map<String, Value> = params
      .iter()
      .map(|(k, v)| Ok((k.clone(), serde_json::to_value(v)?)))
      .collect::<Result<_, serde_json::Error>>()?;
    self.emit(json!({ "event": "params", "params": params }))
  }

  fn log_metrics(&mut self, metrics: &[Metric]) -> Result<(), TelemetryError> {
    for metric in metrics {
      let mut record = serde_json::to_value(metric)?;
      record["event"] = json!("metric");
      self.emit(record)?;
    }
    Ok(())
  }

  fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TelemetryError> {
    let run = self.run.as_ref().ok_or(TelemetryError::NotStarted)?;
    let file_name = path
      .file_name()
      .filter(|_| path.is_file())
      .ok_or_else(|| TelemetryError::MissingArtifact(path.display().to_string()))?;

    let target_dir = run.dir.join("artifacts").join(artifact_dir);
    std::fs::create_dir_all(&target_dir)?;
    let target = target_dir.join(file_name);
    std::fs::copy(path, &target)?;

    self.emit(json!({
      "event": "artifact",
      "dir": artifact_dir,
      "source": path.display().to_string(),
      "stored": target.display().to_string(),
    }))
  }

  fn register_model(&mut self, name: &str, weights: &Path) -> Result<(), TelemetryError> {
    let run_name = self
      .run
      .as_ref()
      .map(|r| r.name.clone())
      .ok_or(TelemetryError::NotStarted)?;
    let version = self.next_version(name)?;

    let mut registry = OpenOptions::new()
      .create(true)
      .append(true)
      .open(self.root.join(REGISTRY_FILE))?;
    let record = json!({
      "name": name,
      "version": version,
      "source": weights.display().to_string(),
      "run_name": run_name,
    });
    writeln!(registry, "{}", record)?;
    info!("模型已注册: {} v{}", name, version);

    self.emit(json!({ "event": "register_model", "name": name, "version": version }))
  }

  fn end_run(&mut self, status: RunStatus) -> Result<(), TelemetryError> {
    self.emit(json!({ "event": "end", "status": status }))?;
    if let Some(mut run) = self.run.take() {
      run.events.flush()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("liuying-jsonl-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
  }

  fn events(dir: &Path) -> Vec<Value> {
    std::fs::read_to_string(dir.join("events.jsonl"))
      .unwrap()
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect()
  }

  #[test]
  fn writes_run_events() {
    let root = scratch("events");
    let mut sink = JsonlSink::new(&root);
    sink.start_run("exp", "run-1").unwrap();
    sink
      .log_params(&[("conf".to_string(), ParamValue::from(0.5))])
      .unwrap();
    sink
      .log_metrics(&[
        Metric::at("inference_ms", 12.5, 1),
        Metric::summary("frames_processed", 1.0),
      ])
      .unwrap();
    let dir = sink.run_dir().unwrap().to_path_buf();
    sink.end_run(RunStatus::Finished).unwrap();

    let events = events(&dir);
    assert_eq!(events.len(), 5);
    assert_eq!(events[1]["params"]["conf"], json!(0.5));
    assert_eq!(events[2]["step"], json!(1));
    assert!(events[3].get("step").is_none());
    assert_eq!(events[4]["status"], json!("finished"));
    let _ = std::fs::remove_dir_all(&root);
  }

  #[test]
  fn copies_artifacts_and_versions_models() {
    let root = scratch("artifacts");
    std::fs::create_dir_all(&root).unwrap();
    let weights = root.join("model.pt");
    std::fs::write(&weights, b"weights").unwrap();

    let mut sink = JsonlSink::new(&root);
    sink.start_run("exp", "run-1").unwrap();
    sink.log_artifact(&weights, "weights").unwrap();
    sink.register_model("det", &weights).unwrap();
    sink.register_model("det", &weights).unwrap();
    let dir = sink.run_dir().unwrap().to_path_buf();
    sink.end_run(RunStatus::Finished).unwrap();

    assert!(dir.join("artifacts/weights/model.pt").is_file());
    let registry = std::fs::read_to_string(root.join(REGISTRY_FILE)).unwrap();
    assert!(registry.lines().last().unwrap().contains("\"version\":2"));

    assert!(matches!(
      JsonlSink::new(&root).log_artifact(&weights, "x"),
      Err(TelemetryError::NotStarted)
    ));
    let _ = std::fs::remove_dir_all(&root);
  }
}
