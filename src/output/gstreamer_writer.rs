// 该文件是 Liuying （流影） 项目的一部分。
// src/output/gstreamer_writer.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 通过 appsrc 推入 RGB 帧，编码为 H.264 后封装为 MP4：
//!
//! ```text
//! appsrc ! videoconvert ! video/x-raw,format=I420 ! x264enc ! h264parse ! mp4mux ! filesink
//! ```
//!
//! I420 要求偶数尺寸，奇数宽高会在右侧/底部补一行黑边。
//! [`FrameWriter::finish`] 发送 EOS 并等待 mp4mux 写完文件尾，
//! 因此提前停止的运行也能得到可播放的文件。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::output::{FrameWriter, OpenFrameWriter, OutputError};

const ENCODE_PIPELINE: &str = "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! \
  x264enc speed-preset=fast ! h264parse ! mp4mux ! filesink name=sink";

/// 等待编码管道处理 EOS 的上限
const EOS_TIMEOUT_SECS: u64 = 30;

/// 使用 GStreamer 编码
#[derive(Debug, Default, Clone, Copy)]
pub struct GstWriterFactory;

impl OpenFrameWriter for GstWriterFactory {
  fn open_writer(
    &self,
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Box<dyn FrameWriter>, OutputError> {
    Ok(Box::new(GstVideoWriter::create(path, width, height, fps)?))
  }
}

pub struct GstVideoWriter {
  path: PathBuf,
  width: u32,
  height: u32,
  fps: f64,
  info: gst_video::VideoInfo,
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  frames: u64,
  finished: bool,
}

impl GstVideoWriter {
  pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self, OutputError> {
    if width == 0 || height == 0 {
      return Err(OutputError::FrameSize {
        expected: (width, height),
        actual: (width, height),
      });
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }

    gst::init()?;

    let pipeline = gst::parse::launch(ENCODE_PIPELINE)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| OutputError::Encoder("无法创建编码管道".to_string()))?;
    let location = path.to_string_lossy().into_owned();
    pipeline
      .by_name("sink")
      .ok_or_else(|| OutputError::Encoder("找不到 filesink".to_string()))?
      .set_property("location", location.as_str());
    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| OutputError::Encoder("找不到 appsrc".to_string()))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| OutputError::Encoder("无法转换元素为 appsrc".to_string()))?;

    let (coded_width, coded_height) = even_size(width, height);
    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, coded_width, coded_height)
      .fps(frame_rate(fps))
      .build()?;
    let caps = info.to_caps()?;
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频写入器已创建: {} ({}x{} @ {} fps)",
      path.display(),
      width,
      height,
      fps
    );
    debug!("GStreamer 编码管道: {}", ENCODE_PIPELINE);

    Ok(Self {
      path: path.to_path_buf(),
      width,
      height,
      fps,
      info,
      pipeline,
      appsrc,
      frames: 0,
      finished: false,
    })
  }

  fn stop(&self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止编码管道失败: {}", e);
    }
  }
}

impl FrameWriter for GstVideoWriter {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if self.finished {
      return Err(OutputError::Closed);
    }
    if image.dimensions() != (self.width, self.height) {
      return Err(OutputError::FrameSize {
        expected: (self.width, self.height),
        actual: image.dimensions(),
      });
    }

    let mut buffer = gst::Buffer::with_size(self.info.size())?;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| OutputError::Encoder("缓冲区不可写".to_string()))?;
      let (pts, duration) = timestamps(self.frames, self.fps);
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));

      let mut map = buffer_ref
        .map_writable()
        .map_err(|e| OutputError::Encoder(format!("无法映射缓冲区: {}", e)))?;
      let stride = self.info.stride()[0].max(0) as usize;
      pad_rows(image.as_raw(), self.width, stride, map.as_mut_slice());
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      OutputError::Encoder(format!("推送帧失败: {:?} ({})", e, self.path.display()))
    })?;
    self.frames += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    if let Err(e) = self.appsrc.end_of_stream() {
      self.stop();
      return Err(OutputError::Encoder(format!(
        "无法结束视频流: {:?} ({})",
        e,
        self.path.display()
      )));
    }

    let message = self.pipeline.bus().and_then(|bus| {
      bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      )
    });
    let outcome = match message {
      Some(message) => match message.view() {
        gst::MessageView::Error(err) => Err(OutputError::Encoder(format!(
          "{} ({})",
          err.error(),
          self.path.display()
        ))),
        _ => Ok(()),
      },
      None => Err(OutputError::Encoder(format!(
        "等待编码结束超时 ({})",
        self.path.display()
      ))),
    };
    self.stop();
    outcome?;

    info!("视频已保存到文件: {} ({} 帧)", self.path.display(), self.frames);
    Ok(())
  }

  fn frames_written(&self) -> u64 {
    self.frames
  }
}

impl Drop for GstVideoWriter {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      warn!("关闭视频写入器时出错: {}", e);
    }
  }
}

/// I420 需要偶数宽高
fn even_size(width: u32, height: u32) -> (u32, u32) {
  (width + width % 2, height + height % 2)
}

/// 帧率保留三位小数，如 29.97 -> 29970/1000
fn frame_rate(fps: f64) -> gst::Fraction {
  let millis = (fps.max(1.0) * 1000.0).round() as i32;
  gst::Fraction::new(millis, 1000)
}

/// 第 `index` 帧的显示时间戳与时长（纳秒）
fn timestamps(index: u64, fps: f64) -> (u64, u64) {
  let frame_ns = 1_000_000_000.0 / fps.max(1.0);
  ((index as f64 * frame_ns).round() as u64, frame_ns.round() as u64)
}

/// 把紧密排列的 RGB 行复制到带步长的缓冲区，多出的行列保持黑色
fn pad_rows(src: &[u8], width: u32, stride: usize, dst: &mut [u8]) {
  let row = width as usize * 3;
  dst.fill(0);
  if row == 0 {
    return;
  }
  for (y, line) in src.chunks_exact(row).enumerate() {
    let start = y * stride;
    if start + row > dst.len() {
      break;
    }
    dst[start..start + row].copy_from_slice(line);
  }
}
