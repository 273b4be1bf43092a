// 该文件是 Liuying （流影） 项目的一部分。
// src/task.rs - 任务定义
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

//! 流式推理任务
//!
//! 状态：`Init → Streaming → Draining → (Evaluating) → Done`。
//! 单线程逐帧推进：一帧被读取、归一化、统计并写出后才请求下一帧。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::Receiver;

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::{
  config::{ConfigError, MOT_IOU_THRESHOLD, Mode, PipelineConfig},
  eval::{self, EvaluationSummary, MotScorer, Scorer},
  input::OpenSource,
  metrics::{KeyStats, ResourceProbe, RunningStats, Summary, SystemProbe, SystemSampler, summarize},
  model::Model,
  normalize::FrameRecord,
  output::{Draw, DefaultWriterFactory, OpenFrameWriter, OutputError, OutputMux, OutputReport, OutputTargets},
  source::{Degradation, FrameSource, SourceError, SourceSettings},
  telemetry::{RunContext, RunStatus, TelemetryError, TelemetrySink},
};

/// 每隔多少帧输出一次进度
const PROGRESS_EVERY_N_FRAMES: u64 = 50;

pub trait Task<O, M, S>: Sized {
  type Output;
  type Error;
  fn run_task(self, opener: O, model: M, sink: S) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
  Init,
  Streaming,
  Draining,
  Evaluating,
  Done,
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("运行记录错误: {0}")]
  Telemetry(#[from] TelemetryError),
  #[error("帧来源错误: {0}")]
  Source(#[from] SourceError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
}

impl TaskError {
  /// 出错的阶段
  pub fn stage(&self) -> &'static str {
    match self {
      TaskError::Config(_) => "config",
      TaskError::Telemetry(_) => "telemetry",
      TaskError::Source(_) => "source",
      TaskError::Output(_) => "output",
    }
  }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunReport {
  pub run_name: String,
  pub status: RunStatus,
  /// 依次经过的运行状态
  pub states: Vec<RunState>,
  /// 实际生效的模式
  pub mode: Mode,
  pub degradation: Option<Degradation>,
  pub summary: Summary,
  pub system: BTreeMap<String, KeyStats>,
  pub output: OutputReport,
  pub evaluation: Option<EvaluationSummary>,
}

pub struct StreamTask {
  config: PipelineConfig,
  experiment: String,
  run_name: Option<String>,
  writer: Box<dyn OpenFrameWriter>,
  scorer: Box<dyn Scorer>,
  probe: Option<Box<dyn ResourceProbe>>,
  draw: Option<Draw>,
  stop: Option<Receiver<()>>,
  states: Vec<RunState>,
}

impl StreamTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      experiment: crate::config::DEFAULT_EXPERIMENT.to_string(),
      run_name: None,
      writer: Box::new(DefaultWriterFactory::default()),
      scorer: Box::new(MotScorer),
      probe: None,
      draw: None,
      stop: None,
      states: vec![RunState::Init],
    }
  }

  pub fn with_experiment(mut self, experiment: impl Into<String>) -> Self {
    self.experiment = experiment.into();
    self
  }

  pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
    self.run_name = Some(run_name.into());
    self
  }

  pub fn with_writer(mut self, writer: impl OpenFrameWriter + 'static) -> Self {
    self.writer = Box::new(writer);
    self
  }

  pub fn with_scorer(mut self, scorer: impl Scorer + 'static) -> Self {
    self.scorer = Box::new(scorer);
    self
  }

  /// 替换系统资源探针，未设置时使用 [`SystemProbe`]
  pub fn with_probe(mut self, probe: impl ResourceProbe + 'static) -> Self {
    self.probe = Some(Box::new(probe));
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = Some(draw);
    self
  }

  /// 收到信号后在当前帧处理完毕时停止，运行以 `Killed` 结束
  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }

  fn enter(&mut self, state: RunState) {
    debug!("运行状态: {:?} -> {:?}", self.states.last(), state);
    self.states.push(state);
  }

  fn stop_requested(&self) -> bool {
    self.stop.as_ref().is_some_and(|rx| rx.try_recv().is_ok())
  }

  fn default_run_name(&self) -> String {
    let stem = Path::new(&self.config.model)
      .file_stem()
      .and_then(|s| s.to_str())
      .filter(|s| !s.is_empty())
      .unwrap_or("run");
    format!("{}_{}", stem, chrono::Local::now().format("%Y%m%d_%H%M%S"))
  }
}

impl<O, M, S> Task<O, M, S> for StreamTask
where
  O: OpenSource,
  M: Model,
  S: TelemetrySink,
{
  type Output = RunReport;
  type Error = TaskError;

  fn run_task(mut self, opener: O, model: M, sink: S) -> Result<RunReport, TaskError> {
    self.config.validate()?;
    let run_name = self
      .run_name
      .clone()
      .unwrap_or_else(|| self.default_run_name());

    info!("开始任务: {} (实验: {})", run_name, self.experiment);
    let mut run = RunContext::start(sink, &self.experiment, &run_name)?;
    run.log_params(&self.config.params());

    let source = {
      let _span = info_span!("load_model", model = %model.name()).entered();
      FrameSource::open(
        &opener,
        &self.config.source,
        model,
        self.config.mode,
        SourceSettings::from(&self.config),
      )
    };
    let mut source = match source {
      Ok(source) => source,
      Err(e) => {
        error!("无法打开帧来源: {}", e);
        run.finish(RunStatus::Failed);
        return Err(e.into());
      }
    };
    let mode = source.mode();
    let degradation = source.degradation().cloned();
    if let Some(degradation) = degradation.as_ref() {
      run.log_param(degradation.param_name(), degradation.message());
    }

    let mut mux = OutputMux::new(
      std::mem::replace(&mut self.writer, Box::new(DefaultWriterFactory::default())),
      self.draw.take().unwrap_or_default(),
      OutputTargets {
        video_path: self.config.output_video.clone(),
        trajectory_path: self.config.trajectory_path.clone(),
        fps: self.config.fps,
        mode,
      },
    );
    let mut sampler = self.config.system_metrics_every.map(|every| {
      let probe = self.probe.take().unwrap_or_else(|| {
        Box::new(SystemProbe::new(self.config.infer.accelerator_index())) as Box<dyn ResourceProbe>
      });
      SystemSampler::new(probe, every)
    });
    let mut stats = RunningStats::new();
    let mut killed = false;

    self.enter(RunState::Streaming);
    let streamed: Result<(), TaskError> = {
      let _span = info_span!("inference_loop").entered();
      let mut frame_index = 0u64;
      let mut result = Ok(());

      loop {
        let Some(item) = source.next() else {
          break;
        };
        let (frame, raw) = match item {
          Ok(pair) => pair,
          Err(e) => {
            error!("读取第 {} 帧后出错: {}", frame_index, e);
            result = Err(e.into());
            break;
          }
        };

        frame_index += 1;
        let record = FrameRecord::from_raw(frame_index, &raw, mode);
        for det in record.detections.iter() {
          debug!(
            "帧 {}: {} {:.3} {:?}",
            frame_index, det.class_label, det.confidence, det.track_id
          );
        }

        if let Err(e) = mux.write(&frame, &record) {
          error!("写入第 {} 帧失败: {}", frame_index, e);
          result = Err(e.into());
          break;
        }

        let metrics = stats.update(&record);
        run.log_metrics(&metrics);
        if let Some(sampler) = sampler.as_mut() {
          let metrics = sampler.on_frame(frame_index);
          run.log_metrics(&metrics);
        }

        if frame_index % PROGRESS_EVERY_N_FRAMES == 0 {
          info!(
            "已处理 {} 帧 (来源第 {} 帧), 累计检测 {}",
            frame_index,
            source.frames_read(),
            stats.total_detections()
          );
        }

        if self.stop_requested() {
          warn!("中断信号接收，退出任务循环");
          killed = true;
          break;
        }
      }
      result
    };

    self.enter(RunState::Draining);
    let closed = {
      let _span = info_span!("write_output").entered();
      mux.finish()
    };
    if let Err(e) = streamed {
      run.finish(RunStatus::Failed);
      return Err(e);
    }
    let output = match closed {
      Ok(output) => output,
      Err(e) => {
        error!("关闭输出失败: {}", e);
        run.finish(RunStatus::Failed);
        return Err(e.into());
      }
    };

    let summary = stats.summary();
    run.log_metrics(&summary.to_metrics());
    let system = match sampler.as_ref() {
      Some(sampler) => {
        run.log_metrics(&sampler.summary_metrics());
        summarize(sampler.samples())
      }
      None => BTreeMap::new(),
    };
    info!(
      "处理完成: {} 帧, {} 个检测, 平均推理 {:.2} ms",
      summary.frames_processed, summary.total_detections, summary.inference_ms
    );

    if let Some(video) = output.video_path.as_deref() {
      run.log_artifact(video, "output");
      run.log_param("output_video_path", video.display().to_string());
    }
    if let Some(trajectory) = output.trajectory_path.as_deref() {
      run.log_artifact(trajectory, "mot");
    }
    if let Some(weights) = self.config.weights_path.as_deref().filter(|p| p.is_file()) {
      run.log_artifact(weights, "weights");
      run.log_param("weights_artifact", weights.display().to_string());
      if let Some(name) = self.config.register_model.as_deref() {
        run.register_model(name, weights);
      }
    } else if let Some(name) = self.config.register_model.as_deref() {
      warn!("没有本地权重文件，跳过模型注册: {}", name);
    }

    let evaluation = match self.config.gt_path.clone() {
      Some(gt_path) if mode.is_tracking() => {
        self.enter(RunState::Evaluating);
        let _span = info_span!("mot_evaluation").entered();
        let evaluation =
          eval::evaluate(self.scorer.as_ref(), Some(gt_path.as_path()), &output, MOT_IOU_THRESHOLD);
        if let Some(evaluation) = evaluation.as_ref() {
          run.log_metrics(&eval::summary_metrics(evaluation));
          run.log_param("mot_gt_path", gt_path.display().to_string());
        }
        evaluation
      }
      _ => None,
    };

    let status = if killed {
      RunStatus::Killed
    } else {
      RunStatus::Finished
    };
    run.finish(status);
    self.enter(RunState::Done);
    info!("任务结束: {} ({})", run_name, status.as_str());

    Ok(RunReport {
      run_name,
      status,
      states: std::mem::take(&mut self.states),
      mode,
      degradation,
      summary,
      system,
      output,
      evaluation,
    })
  }
}
