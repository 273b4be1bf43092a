// 该文件是 Liuying （流影） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频输入
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

//! # GStreamer 视频输入模块
//!
//! 由 `uridecodebin` 解码本地文件或网络流，经 `videoconvert` 转为 RGB 后从
//! appsink 逐帧拉取。旋转元数据由 `videoflip video-direction=auto` 处理，
//! 每帧的尺寸都取自该帧自身的 caps，因此旋转后的视频不会被按错误的行宽读取。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```
//!
//! ## URL 格式
//!
//! - `video:///path/to/input.mp4` - 本地视频文件
//! - `https://...`、`rtsp://...` - 直接交给 uridecodebin 拉流

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_path};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GstVideoInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("视频文件不存在: {0}")]
  NotFound(String),
  #[error("无法转换为 URI: {0}")]
  InvalidLocation(String),
  #[error("GStreamer 错误: {0}")]
  GStreamer(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBool(#[from] gst::glib::BoolError),
  #[error("管道状态切换失败: {0}")]
  StateChange(#[from] gst::StateChangeError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换元素为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfo,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  Pipeline(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("来源中没有视频帧: {0}")]
  NoVideoStream(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

const DECODE_PIPELINE: &str = "uridecodebin name=src ! videoflip video-direction=auto ! \
  videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4";

/// 基于 GStreamer 的视频输入
pub struct GstVideoInput {
  location: String,
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: Option<f64>,
  pending: Option<RgbImage>,
  next_index: u64,
  finished: bool,
}

impl FromUrlWithScheme for GstVideoInput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for GstVideoInput {
  type Error = GstVideoInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GstVideoInputError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Self::open(&url_path(url))
  }
}

impl GstVideoInput {
  /// 打开本地路径或网络 URI
  ///
  /// 第一帧在打开时即被拉取，用于确定尺寸与帧率；打不开的来源在这里就会报错。
  pub fn open(location: &str) -> Result<Self, GstVideoInputError> {
    let uri = location_uri(location)?;
    gst::init()?;

    let pipeline = gst::parse::launch(DECODE_PIPELINE)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GstVideoInputError::Pipeline("无法创建解码管道".to_string()))?;
    pipeline
      .by_name("src")
      .ok_or_else(|| GstVideoInputError::Pipeline("找不到 uridecodebin".to_string()))?
      .set_property("uri", uri.as_str());
    let appsink = pipeline
      .by_name("sink")
      .ok_or(GstVideoInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GstVideoInputError::AppSinkConversionFailed)?;

    debug!("GStreamer 解码管道: {} (uri={})", DECODE_PIPELINE, uri);

    let mut input = Self {
      location: location.to_string(),
      pipeline,
      appsink,
      width: 0,
      height: 0,
      fps: None,
      pending: None,
      next_index: 0,
      finished: false,
    };
    input.pipeline.set_state(gst::State::Playing)?;

    let Some((image, fps)) = input.pull()? else {
      return Err(GstVideoInputError::NoVideoStream(location.to_string()));
    };
    input.width = image.width();
    input.height = image.height();
    input.fps = fps;
    input.pending = Some(image);

    info!(
      "视频来源已打开: {} ({}x{}, {:?} fps)",
      location, input.width, input.height, input.fps
    );
    Ok(input)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn fps(&self) -> Option<f64> {
    self.fps
  }

  /// 拉取下一帧，流结束时返回 `None`
  fn pull(&mut self) -> Result<Option<(RgbImage, Option<f64>)>, GstVideoInputError> {
    match self.appsink.pull_sample() {
      Ok(sample) => sample_to_image(&sample).map(Some),
      Err(_) if self.appsink.is_eos() => Ok(None),
      Err(_) => Err(self.bus_error()),
    }
  }

  /// 取出总线上的错误消息
  fn bus_error(&self) -> GstVideoInputError {
    let message = self
      .pipeline
      .bus()
      .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]))
      .and_then(|message| match message.view() {
        gst::MessageView::Error(err) => Some(format!("{} ({})", err.error(), self.location)),
        _ => None,
      });
    GstVideoInputError::Pipeline(message.unwrap_or_else(|| format!("拉取样本失败 ({})", self.location)))
  }

  fn frame(&mut self, image: RgbImage) -> Frame {
    let frame = Frame::new(image, self.next_index);
    self.next_index += 1;
    frame
  }

  fn finish(&mut self) {
    if self.finished {
      return;
    }
    self.finished = true;
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止解码管道失败: {}", e);
    }
    debug!("视频来源已关闭: {} ({} 帧)", self.location, self.next_index);
  }
}

impl Iterator for GstVideoInput {
  type Item = Result<Frame, GstVideoInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(image) = self.pending.take() {
      return Some(Ok(self.frame(image)));
    }
    if self.finished {
      return None;
    }

    match self.pull() {
      Ok(Some((image, _))) => Some(Ok(self.frame(image))),
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

impl Drop for GstVideoInput {
  fn drop(&mut self) {
    self.finish();
  }
}

/// 本地路径转为 `file://` URI，带方案的位置原样使用
fn location_uri(location: &str) -> Result<String, GstVideoInputError> {
  if location.contains("://") {
    return Ok(location.to_string());
  }
  let path = Path::new(location);
  if !path.is_file() {
    return Err(GstVideoInputError::NotFound(location.to_string()));
  }
  let absolute = std::fs::canonicalize(path)?;
  Url::from_file_path(&absolute)
    .map(String::from)
    .map_err(|_| GstVideoInputError::InvalidLocation(location.to_string()))
}

fn sample_to_image(sample: &gst::Sample) -> Result<(RgbImage, Option<f64>), GstVideoInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GstVideoInputError::Pipeline("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GstVideoInputError::Pipeline("样本中没有 caps".to_string()))?;
  let info = gst_video::VideoInfo::from_caps(caps).map_err(|_| GstVideoInputError::VideoInfo)?;
  if info.format() != gst_video::VideoFormat::Rgb {
    return Err(GstVideoInputError::UnsupportedFormat(info.format()));
  }

  let map = buffer
    .map_readable()
    .map_err(|e| GstVideoInputError::Pipeline(format!("无法映射缓冲区: {}", e)))?;
  let stride = info.stride()[0].max(0) as usize;
  let pixels = pack_rows(map.as_slice(), info.width(), info.height(), stride)?;
  let image = RgbImage::from_raw(info.width(), info.height(), pixels)
    .ok_or_else(|| GstVideoInputError::Pipeline("无法创建 RGB 图像".to_string()))?;

  Ok((image, frame_rate(info.fps())))
}

/// 去掉每行末尾的对齐填充
fn pack_rows(
  data: &[u8],
  width: u32,
  height: u32,
  stride: usize,
) -> Result<Vec<u8>, GstVideoInputError> {
  let row = width as usize * 3;
  let rows = height as usize;
  let expected = match rows {
    0 => 0,
    n => stride.max(row) * (n - 1) + row,
  };
  if stride < row || data.len() < expected {
    return Err(GstVideoInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut packed = Vec::with_capacity(row * rows);
  for y in 0..rows {
    let start = y * stride;
    packed.extend_from_slice(&data[start..start + row]);
  }
  Ok(packed)
}

/// 可变帧率的流报告 0/1
fn frame_rate(fps: gst::Fraction) -> Option<f64> {
  if fps.numer() <= 0 || fps.denom() <= 0 {
    return None;
  }
  Some(fps.numer() as f64 / fps.denom() as f64)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn row_padding_is_dropped() {
    // 2x2 RGB，每行按 4 字节对齐到 8 字节
    let data = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
    let packed = pack_rows(&data, 2, 2, 8).unwrap();
    assert_eq!(packed, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
  }

  #[test]
  fn short_buffer_is_rejected() {
    let err = pack_rows(&[0; 10], 2, 2, 6).unwrap_err();
    assert!(matches!(
      err,
      GstVideoInputError::BufferSizeMismatch {
        expected: 12,
        actual: 10
      }
    ));
  }

  #[test]
  fn variable_rate_is_unknown() {
    assert_eq!(frame_rate(gst::Fraction::new(0, 1)), None);
    let fps = frame_rate(gst::Fraction::new(30000, 1001)).unwrap();
    assert!((fps - 29.97).abs() < 0.01);
  }

  #[test]
  fn local_paths_become_file_uris() {
    let path = std::env::temp_dir().join(format!("liuying-gst-{}.mp4", std::process::id()));
    std::fs::write(&path, b"").unwrap();
    let uri = location_uri(path.to_str().unwrap()).unwrap();
    assert!(uri.starts_with("file://"));
    let _ = std::fs::remove_file(&path);

    assert_eq!(
      location_uri("rtsp://camera.local/stream").unwrap(),
      "rtsp://camera.local/stream"
    );
    assert!(matches!(
      location_uri("/definitely/not/here.mp4"),
      Err(GstVideoInputError::NotFound(_))
    ));
  }
}
