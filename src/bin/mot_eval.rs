// 该文件是 Liuying （流影） 项目的一部分。
// src/bin/mot_eval.rs - 离线轨迹评估
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

use liuying::{
  config::MOT_IOU_THRESHOLD,
  eval::{MotScorer, Scorer},
};

/// 对已有的 MOT 轨迹文件评分，结果以 JSON 输出到标准输出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 真值文件
  #[arg(long, value_name = "FILE")]
  pub gt: PathBuf,
  /// 预测轨迹文件
  #[arg(long, value_name = "FILE")]
  pub pred: PathBuf,
  /// IoU 关联阈值
  #[arg(long, default_value_t = MOT_IOU_THRESHOLD)]
  pub iou: f64,
}

/// 日志写到标准错误，级别由 `RUST_LOG` 控制
fn subscriber() -> impl tracing::Subscriber + Send + Sync + 'static {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(EnvFilter::from_default_env())
    .finish()
}

fn main() -> Result<()> {
  subscriber().init();

  let args = Args::parse();
  info!("真值: {}", args.gt.display());
  info!("预测: {}", args.pred.display());

  let summary = MotScorer.score(&args.gt, &args.pred, args.iou)?;
  println!("{}", serde_json::to_string_pretty(&summary)?);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn log_level_defaults_to_errors_without_rust_log() {
    if std::env::var_os("RUST_LOG").is_some() {
      return;
    }
    tracing::subscriber::with_default(subscriber(), || {
      assert!(tracing::enabled!(tracing::Level::ERROR));
      assert!(!tracing::enabled!(tracing::Level::INFO));
    });
  }
}
