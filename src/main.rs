// 该文件是 Liuying （流影） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::mpsc::channel;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use liuying::{
  FromUrl,
  input::UrlSourceOpener,
  model::ReplayModel,
  output::Draw,
  task::{StreamTask, Task},
  telemetry::SinkWrapper,
};

fn open_model(reference: &str) -> Result<ReplayModel> {
  let model = match Url::parse(reference) {
    Ok(url) if reference.contains("://") => ReplayModel::from_url(&url)?,
    _ => ReplayModel::open(reference)?,
  };
  Ok(model)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = args.to_config();

  info!("模型: {}", args.model);
  info!("视频来源: {}", args.source);
  info!("模式: {}", config.mode.as_str());
  info!("运行记录: {}", args.tracking_uri);

  let model = open_model(&args.model)?;
  let sink = SinkWrapper::open(&args.tracking_uri)?;

  let (tx, rx) = channel();
  ctrlc::set_handler(move || {
    if tx.send(()).is_err() {
      warn!("任务已结束，忽略中断信号");
    }
  })?;

  let draw = match args.font.as_deref() {
    Some(font) => Draw::from_font_file(font)?,
    None => Draw::default(),
  };

  let mut task = StreamTask::new(config)
    .with_experiment(&args.experiment)
    .with_draw(draw)
    .with_stop_signal(rx);
  if let Some(run_name) = args.run_name.as_deref() {
    task = task.with_run_name(run_name);
  }

  match task.run_task(UrlSourceOpener, model, sink) {
    Ok(report) => {
      info!(
        "运行 {} 结束 ({}): {} 帧, {} 个检测",
        report.run_name,
        report.status.as_str(),
        report.summary.frames_processed,
        report.summary.total_detections
      );
      if let Some(video) = report.output.video_path.as_deref() {
        info!("标注视频: {}", video.display());
      }
      if let Some(evaluation) = report.evaluation.as_ref() {
        for key in ["mota", "motp", "idf1"] {
          if let Some(value) = evaluation.get(key) {
            info!("{}: {:.4}", key, value);
          }
        }
      }
      Ok(())
    }
    Err(e) => {
      error!("运行在 {} 阶段失败: {}", e.stage(), e);
      Err(e.into())
    }
  }
}
