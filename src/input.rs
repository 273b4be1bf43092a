// 该文件是 Liuying （流影） 项目的一部分。
// src/input.rs - 视频/图像序列输入
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
mod image_dir;
#[cfg(not(feature = "gstreamer_input"))]
mod video_file;

#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GstVideoInput, GstVideoInputError};
pub use self::image_dir::{ImageDirInput, ImageDirInputError};
#[cfg(not(feature = "gstreamer_input"))]
pub use self::video_file::{VideoFileInput, VideoFileInputError};

/// 当前编译的视频解码后端
#[cfg(feature = "gstreamer_input")]
pub type VideoInput = GstVideoInput;
#[cfg(feature = "gstreamer_input")]
pub type VideoInputError = GstVideoInputError;
#[cfg(not(feature = "gstreamer_input"))]
pub type VideoInput = VideoFileInput;
#[cfg(not(feature = "gstreamer_input"))]
pub type VideoInputError = VideoFileInputError;

/// 按顺序产出帧的读取器
pub trait FrameReader: Iterator<Item = Result<Frame, InputError>> {
  /// 帧宽度
  fn width(&self) -> u32;

  /// 帧高度
  fn height(&self) -> u32;

  /// 来源帧率（如果可知）
  fn fps(&self) -> Option<f64>;
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("视频输入错误: {0}")]
  Video(#[from] VideoInputError),
  #[error("图像目录输入错误: {0}")]
  ImageDir(#[from] ImageDirInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("来源不存在: {0}")]
  NotFound(String),
  #[error("无法打开来源: {0}")]
  Unavailable(String),
}

/// 按 URL 方案分派的输入
pub enum InputWrapper {
  Video(VideoInput),
  ImageDir(ImageDirInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      VideoInput::SCHEME => Ok(InputWrapper::Video(VideoInput::from_url(url)?)),
      ImageDirInput::SCHEME => Ok(InputWrapper::ImageDir(ImageDirInput::from_url(url)?)),
      "http" | "https" | "rtsp" | "rtmp" => Ok(InputWrapper::Video(VideoInput::open(url.as_str())?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl InputWrapper {
  /// 从来源引用打开：URL 按方案分派，裸路径按目录/文件区分
  pub fn open(reference: &str) -> Result<Self, InputError> {
    if let Some(url) = parse_url(reference) {
      return Self::from_url(&url);
    }

    let path = Path::new(reference);
    if path.is_dir() {
      Ok(InputWrapper::ImageDir(ImageDirInput::open(reference)?))
    } else if path.is_file() {
      Ok(InputWrapper::Video(VideoInput::open(reference)?))
    } else {
      Err(InputError::NotFound(reference.to_string()))
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::Video(input) => input.next().map(|r| r.map_err(InputError::from)),
      InputWrapper::ImageDir(input) => input.next().map(|r| r.map_err(InputError::from)),
    }
  }
}

impl FrameReader for InputWrapper {
  fn width(&self) -> u32 {
    match self {
      InputWrapper::Video(input) => input.width(),
      InputWrapper::ImageDir(input) => input.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      InputWrapper::Video(input) => input.height(),
      InputWrapper::ImageDir(input) => input.height(),
    }
  }

  fn fps(&self) -> Option<f64> {
    match self {
      InputWrapper::Video(input) => input.fps(),
      InputWrapper::ImageDir(input) => input.fps(),
    }
  }
}

/// 打开帧来源
///
/// 检测模式走 `open_stream`，由模型一侧的流式读取消费；
/// 跟踪模式走 `open_capture`，逐帧读取后交给跟踪器。
/// `open_capture` 失败时调用方会降级为检测模式。
pub trait OpenSource {
  fn open_stream(&self, reference: &str) -> Result<Box<dyn FrameReader>, InputError>;

  fn open_capture(&self, reference: &str) -> Result<Box<dyn FrameReader>, InputError>;
}

/// 基于 URL/路径的默认来源，两种打开方式都会真正尝试打开
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlSourceOpener;

impl OpenSource for UrlSourceOpener {
  fn open_stream(&self, reference: &str) -> Result<Box<dyn FrameReader>, InputError> {
    Ok(Box::new(InputWrapper::open(reference)?))
  }

  fn open_capture(&self, reference: &str) -> Result<Box<dyn FrameReader>, InputError> {
    Ok(Box::new(InputWrapper::open(reference)?))
  }
}

/// 只把带 `://` 的引用当作 URL，避免 Windows 盘符被解析成方案
fn parse_url(reference: &str) -> Option<Url> {
  if reference.contains("://") {
    Url::parse(reference).ok()
  } else {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn remote_sources_are_attempted_for_capture() {
    // 不可达的远程来源必须由解码后端报告失败，而不是在打开前就被拒绝
    let err = UrlSourceOpener
      .open_capture("http://127.0.0.1:9/clip.mp4")
      .err()
      .unwrap();
    assert!(matches!(err, InputError::Video(_)));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let err = InputWrapper::open("ftp://example.com/a.mp4").err().unwrap();
    assert!(matches!(err, InputError::SchemeMismatch(s) if s == "ftp"));
  }

  #[test]
  fn missing_local_file_fails_to_open() {
    let err = UrlSourceOpener
      .open_capture("/definitely/not/here/video.mp4")
      .err()
      .unwrap();
    assert!(matches!(err, InputError::NotFound(_)));
  }

  #[test]
  fn image_directory_opens_for_capture() {
    let dir = std::env::temp_dir().join(format!("liuying-capture-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    image::RgbImage::new(4, 2).save(dir.join("000.png")).unwrap();

    let reader = UrlSourceOpener.open_capture(dir.to_str().unwrap()).unwrap();
    assert_eq!((reader.width(), reader.height()), (4, 2));
    assert_eq!(reader.count(), 1);
    let _ = std::fs::remove_dir_all(&dir);
  }
}
