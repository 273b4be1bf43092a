// 该文件是 Liuying （流影） 项目的一部分。
// src/input/video_file.rs - 视频输入源
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

//! 视频文件输入模块
//!
//! 未启用 `gstreamer_input` 特性时的解码后端。
//! 通过 ffprobe 读取视频尺寸与帧率，再由 ffmpeg 把视频解码为 RGB24 原始帧，
//! 经管道逐帧读取。需要系统安装 ffmpeg 命令行工具。
//!
//! ffprobe 报告的是编码尺寸，所以解码时必须关闭 ffmpeg 的自动旋转，
//! 否则带旋转元数据的视频会输出 H×W 的帧而被按 W×H 切分。
//!
//! # URL 格式
//!
//! - `video:///path/to/input.mp4` - 本地视频文件
//! - `https://...`、`rtsp://...` - 直接交给 ffmpeg 拉流

use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_path};

#[derive(Error, Debug)]
pub enum VideoFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("视频文件不存在: {0}")]
  NotFound(String),
  #[error("无法执行 {program} (请确保已安装): {source}")]
  Spawn {
    program: &'static str,
    source: std::io::Error,
  },
  #[error("ffprobe 失败: {0}")]
  Probe(String),
  #[error("找不到视频流: {0}")]
  NoVideoStream(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("解码数据异常: {0}")]
  Decoder(String),
}

#[derive(Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
  width: Option<u32>,
  height: Option<u32>,
  avg_frame_rate: Option<String>,
}

/// 视频流的基本信息
#[derive(Debug, Clone, Copy, PartialEq)]
struct StreamInfo {
  width: u32,
  height: u32,
  fps: Option<f64>,
}

/// 视频输入源
pub struct VideoFileInput {
  location: String,
  child: Child,
  stdout: BufReader<ChildStdout>,
  info: StreamInfo,
  frame_bytes: usize,
  next_index: u64,
  finished: bool,
}

impl FromUrlWithScheme for VideoFileInput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for VideoFileInput {
  type Error = VideoFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(VideoFileInputError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Self::open_local(&url_path(url))
  }
}

impl VideoFileInput {
  /// 打开本地视频文件
  pub fn open_local(path: &str) -> Result<Self, VideoFileInputError> {
    if !Path::new(path).is_file() {
      return Err(VideoFileInputError::NotFound(path.to_string()));
    }
    Self::open(path)
  }

  /// 打开任意 ffmpeg 能识别的位置（本地文件或网络流）
  pub fn open(location: &str) -> Result<Self, VideoFileInputError> {
    let info = probe(location)?;
    info!(
      "视频来源已打开: {} ({}x{}, {:?} fps)",
      location, info.width, info.height, info.fps
    );

    let mut child = Command::new("ffmpeg")
      .args(decode_args(location))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(|source| VideoFileInputError::Spawn {
        program: "ffmpeg",
        source,
      })?;

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| VideoFileInputError::Decoder("无法获取解码进程输出".to_string()))?;

    Ok(Self {
      location: location.to_string(),
      child,
      stdout: BufReader::new(stdout),
      info,
      frame_bytes: info.width as usize * info.height as usize * 3,
      next_index: 0,
      finished: false,
    })
  }

  /// 读取一帧原始 RGB 数据，流结束时返回 `None`
  fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoFileInputError> {
    let mut buffer = vec![0u8; self.frame_bytes];
    let mut filled = 0;
    while filled < buffer.len() {
      match self.stdout.read(&mut buffer[filled..]) {
        Ok(0) => break,
        Ok(n) => filled += n,
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(e.into()),
      }
    }

    if filled == 0 {
      return Ok(None);
    }
    if filled < buffer.len() {
      warn!(
        "丢弃不完整的尾帧: {} / {} 字节 ({})",
        filled,
        buffer.len(),
        self.location
      );
      return Ok(None);
    }

    RgbImage::from_raw(self.info.width, self.info.height, buffer)
      .map(Some)
      .ok_or_else(|| VideoFileInputError::Decoder("无法创建 RGB 图像".to_string()))
  }

  fn finish(&mut self) {
    if self.finished {
      return;
    }
    self.finished = true;
    match self.child.try_wait() {
      Ok(Some(status)) if !status.success() => {
        warn!("解码进程退出状态异常: {} ({})", status, self.location);
      }
      Ok(Some(_)) => {}
      _ => {
        let _ = self.child.kill();
        let _ = self.child.wait();
      }
    }
    debug!("视频来源已关闭: {} ({} 帧)", self.location, self.next_index);
  }
}

impl Iterator for VideoFileInput {
  type Item = Result<Frame, VideoFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.read_frame() {
      Ok(Some(image)) => {
        let frame = Frame::new(image, self.next_index);
        self.next_index += 1;
        Some(Ok(frame))
      }
      Ok(None) => {
        self.finish();
        None
      }
      Err(e) => {
        self.finish();
        Some(Err(e))
      }
    }
  }
}

impl VideoFileInput {
  pub fn width(&self) -> u32 {
    self.info.width
  }

  pub fn height(&self) -> u32 {
    self.info.height
  }

  pub fn fps(&self) -> Option<f64> {
    self.info.fps
  }
}

impl Drop for VideoFileInput {
  fn drop(&mut self) {
    self.finish();
  }
}

/// 解码参数；`-noautorotate` 必须位于 `-i` 之前
fn decode_args(location: &str) -> Vec<&str> {
  vec![
    "-nostdin",
    "-loglevel",
    "error",
    "-noautorotate",
    "-i",
    location,
    "-f",
    "rawvideo",
    "-pix_fmt",
    "rgb24",
    "-",
  ]
}

fn probe(location: &str) -> Result<StreamInfo, VideoFileInputError> {
  let output = Command::new("ffprobe")
    .arg("-v")
    .arg("error")
    .arg("-select_streams")
    .arg("v:0")
    .arg("-show_entries")
    .arg("stream=width,height,avg_frame_rate")
    .arg("-of")
    .arg("json")
    .arg(location)
    .output()
    .map_err(|source| VideoFileInputError::Spawn {
      program: "ffprobe",
      source,
    })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(VideoFileInputError::Probe(stderr.trim().to_string()));
  }

  parse_probe(&output.stdout, location)
}

fn parse_probe(stdout: &[u8], location: &str) -> Result<StreamInfo, VideoFileInputError> {
  let parsed: ProbeOutput = serde_json::from_slice(stdout)
    .map_err(|e| VideoFileInputError::Probe(format!("无法解析 ffprobe 输出: {}", e)))?;

  let stream = parsed
    .streams
    .into_iter()
    .next()
    .ok_or_else(|| VideoFileInputError::NoVideoStream(location.to_string()))?;

  match (stream.width, stream.height) {
    (Some(width), Some(height)) if width > 0 && height > 0 => Ok(StreamInfo {
      width,
      height,
      fps: stream.avg_frame_rate.as_deref().and_then(parse_rate),
    }),
    _ => Err(VideoFileInputError::NoVideoStream(location.to_string())),
  }
}

/// 解析 `30000/1001` 形式的帧率
fn parse_rate(rate: &str) -> Option<f64> {
  let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
  let num: f64 = num.trim().parse().ok()?;
  let den: f64 = den.trim().parse().ok()?;
  if den == 0.0 || num <= 0.0 {
    return None;
  }
  Some(num / den)
}
