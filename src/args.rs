// 该文件是 Liuying （流影） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;

use liuying::config::{
  DEFAULT_EXPERIMENT, DEFAULT_OUTPUT_VIDEO, DEFAULT_TRAJECTORY, InferOptions, Mode, PipelineConfig,
  SYSTEM_METRICS_EVERY_N_FRAMES,
};

/// Liuying 流式检测/跟踪运行
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型结果：`replay:///path/results.jsonl` 或 JSONL 文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: String,

  /// 视频来源
  /// 支持格式:
  /// - 视频: *.mp4, *.avi, *.mkv 等，video:///path 或 rtsp:// / http(s):// 地址
  /// - 图片目录: 目录路径或 folder:///path/to/frames
  #[arg(long, value_name = "SOURCE")]
  pub source: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub conf: f32,

  /// 推理分辨率
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub imgsz: u32,

  /// 计算设备，如 cpu、0、cuda:1
  #[arg(long, default_value = "cpu")]
  pub device: String,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "300", value_name = "COUNT")]
  pub max_frames: u64,

  /// 每 N 帧处理 1 帧
  #[arg(long, default_value = "2", value_name = "N")]
  pub skip_frames: u64,

  /// 输出视频帧率
  #[arg(long, default_value = "30", value_name = "FPS")]
  pub fps: f64,

  /// 启用跟踪模式
  #[arg(long)]
  pub tracking: bool,

  /// 标注视频输出路径
  #[arg(long, default_value = DEFAULT_OUTPUT_VIDEO, value_name = "FILE")]
  pub output_video: PathBuf,

  /// MOT 轨迹输出路径（仅跟踪模式）
  #[arg(long, default_value = DEFAULT_TRAJECTORY, value_name = "FILE")]
  pub trajectory: PathBuf,

  /// MOT 真值文件
  #[arg(long, env = "MOT_GT_PATH", value_name = "FILE")]
  pub gt_path: Option<PathBuf>,

  /// 系统指标采样间隔（帧）
  #[arg(long, default_value_t = SYSTEM_METRICS_EVERY_N_FRAMES, value_name = "N")]
  pub system_metrics_every: u64,

  /// 不采集系统指标
  #[arg(long)]
  pub no_system_metrics: bool,

  /// 本地权重文件，存在时作为产物记录
  #[arg(long, value_name = "FILE")]
  pub weights: Option<PathBuf>,

  /// 以此名称注册模型
  #[arg(long, value_name = "NAME")]
  pub register_model: Option<String>,

  /// 实验名称
  #[arg(long, default_value = DEFAULT_EXPERIMENT)]
  pub experiment: String,

  /// 运行名称，默认为 `<模型名>_<时间>`
  #[arg(long)]
  pub run_name: Option<String>,

  /// 运行记录位置：目录路径、file:///dir 或 log://
  #[arg(long, env = "LIUYING_TRACKING_URI", default_value = "runs")]
  pub tracking_uri: String,

  /// 标注字体文件，未指定时在系统字体中查找
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

impl Args {
  pub fn to_config(&self) -> PipelineConfig {
    PipelineConfig {
      model: self.model.clone(),
      source: self.source.clone(),
      infer: InferOptions {
        conf: self.conf,
        imgsz: self.imgsz,
        device: self.device.clone(),
      },
      max_frames: (self.max_frames > 0).then_some(self.max_frames),
      skip_frames: self.skip_frames,
      fps: self.fps,
      mode: if self.tracking {
        Mode::Tracking
      } else {
        Mode::Detection
      },
      output_video: self.output_video.clone(),
      trajectory_path: self.trajectory.clone(),
      gt_path: self.gt_path.clone(),
      system_metrics_every: (!self.no_system_metrics).then_some(self.system_metrics_every),
      weights_path: self.weights.clone(),
      register_model: self.register_model.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_max_frames_means_unlimited() {
    let args = Args::parse_from([
      "liuying",
      "--model",
      "r.jsonl",
      "--source",
      "v.mp4",
      "--max-frames",
      "0",
      "--tracking",
      "--no-system-metrics",
    ]);
    let config = args.to_config();
    assert_eq!(config.max_frames, None);
    assert_eq!(config.mode, Mode::Tracking);
    assert_eq!(config.system_metrics_every, None);
    assert_eq!(config.skip_frames, 2);
    assert!(config.validate().is_ok());
  }
}
