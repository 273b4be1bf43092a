// 该文件是 Liuying （流影） 项目的一部分。
// src/config.rs - 运行配置
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

use thiserror::Error;

use crate::telemetry::ParamValue;

/// 每处理多少帧采样一次系统资源
pub const SYSTEM_METRICS_EVERY_N_FRAMES: u64 = 10;
/// 轨迹评估时的 IoU 关联阈值
pub const MOT_IOU_THRESHOLD: f64 = 0.5;

pub const DEFAULT_EXPERIMENT: &str = "yolo-video-inference";
pub const DEFAULT_OUTPUT_VIDEO: &str = "experiments/yolo_output.mp4";
pub const DEFAULT_TRAJECTORY: &str = "experiments/mot_predictions.txt";

/// 推理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// 逐帧检测，没有跨帧身份
  Detection,
  /// 跟踪，结果携带持续的 track id
  Tracking,
}

impl Mode {
  pub fn is_tracking(&self) -> bool {
    matches!(self, Mode::Tracking)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Mode::Detection => "detection",
      Mode::Tracking => "tracking",
    }
  }
}

/// 传给模型的推理参数
#[derive(Debug, Clone, PartialEq)]
pub struct InferOptions {
  /// 置信度阈值，阈值过滤只在模型内部发生
  pub conf: f32,
  /// 推理分辨率
  pub imgsz: u32,
  /// 计算设备，如 `cpu`、`0`、`cuda:1`
  pub device: String,
}

impl Default for InferOptions {
  fn default() -> Self {
    Self {
      conf: 0.5,
      imgsz: 640,
      device: "cpu".to_string(),
    }
  }
}

impl InferOptions {
  /// 设备字符串对应的加速卡序号，`cpu` 返回 `None`
  pub fn accelerator_index(&self) -> Option<u32> {
    let device = self.device.trim();
    let index = device.strip_prefix("cuda:").unwrap_or(device);
    index.parse::<u32>().ok()
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("skip_frames 必须大于 0")]
  ZeroStride,
  #[error("置信度阈值 {0} 不在 [0, 1] 范围内")]
  ConfidenceOutOfRange(f32),
  #[error("输出帧率 {0} 无效")]
  InvalidFps(f64),
  #[error("推理分辨率必须大于 0")]
  ZeroImageSize,
  #[error("系统指标采样间隔必须大于 0")]
  ZeroSamplingStride,
}

/// 一次运行的完整配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// 模型标识（记录到运行参数中）
  pub model: String,
  /// 视频来源
  pub source: String,
  pub infer: InferOptions,
  /// 帧预算，`None` 表示不限制
  pub max_frames: Option<u64>,
  /// 每 `skip_frames` 帧处理 1 帧
  pub skip_frames: u64,
  /// 输出视频帧率
  pub fps: f64,
  pub mode: Mode,
  pub output_video: PathBuf,
  pub trajectory_path: PathBuf,
  /// 真值文件，未配置时跳过评估
  pub gt_path: Option<PathBuf>,
  /// 系统指标采样间隔，`None` 表示不采样
  pub system_metrics_every: Option<u64>,
  /// 本地权重文件，存在时作为产物上传
  pub weights_path: Option<PathBuf>,
  /// 注册模型时使用的名称
  pub register_model: Option<String>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      model: String::new(),
      source: String::new(),
      infer: InferOptions::default(),
      max_frames: Some(300),
      skip_frames: 2,
      fps: 30.0,
      mode: Mode::Detection,
      output_video: PathBuf::from(DEFAULT_OUTPUT_VIDEO),
      trajectory_path: PathBuf::from(DEFAULT_TRAJECTORY),
      gt_path: None,
      system_metrics_every: Some(SYSTEM_METRICS_EVERY_N_FRAMES),
      weights_path: None,
      register_model: None,
    }
  }
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.skip_frames == 0 {
      return Err(ConfigError::ZeroStride);
    }
    if !(0.0..=1.0).contains(&self.infer.conf) {
      return Err(ConfigError::ConfidenceOutOfRange(self.infer.conf));
    }
    if !(self.fps.is_finite() && self.fps > 0.0) {
      return Err(ConfigError::InvalidFps(self.fps));
    }
    if self.infer.imgsz == 0 {
      return Err(ConfigError::ZeroImageSize);
    }
    if self.system_metrics_every == Some(0) {
      return Err(ConfigError::ZeroSamplingStride);
    }
    Ok(())
  }

  /// 运行开始时记录一次的参数
  pub fn params(&self) -> Vec<(String, ParamValue)> {
    let max_frames = match self.max_frames {
      Some(n) => ParamValue::from(n),
      None => ParamValue::from("unlimited"),
    };
    vec![
      ("model".to_string(), ParamValue::from(self.model.as_str())),
      ("source".to_string(), ParamValue::from(truncate(&self.source, 200))),
      ("conf".to_string(), ParamValue::from(self.infer.conf as f64)),
      ("imgsz".to_string(), ParamValue::from(self.infer.imgsz as u64)),
      ("max_frames".to_string(), max_frames),
      ("skip_frames".to_string(), ParamValue::from(self.skip_frames)),
      ("fps".to_string(), ParamValue::from(self.fps)),
      ("device".to_string(), ParamValue::from(self.infer.device.as_str())),
      ("use_tracking".to_string(), ParamValue::from(self.mode.is_tracking())),
    ]
  }
}

fn truncate(text: &str, limit: usize) -> &str {
  match text.char_indices().nth(limit) {
    Some((idx, _)) => &text[..idx],
    None => text,
  }
}
