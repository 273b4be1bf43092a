// 该文件是 Liuying （流影） 项目的一部分。
// src/output.rs - 输出复用
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{config::Mode, frame::Frame, normalize::FrameRecord};

pub mod draw;
#[cfg(not(feature = "gstreamer_output"))]
mod ffmpeg_writer;
#[cfg(feature = "gstreamer_output")]
mod gstreamer_writer;
mod trajectory;

pub use self::draw::Draw;
#[cfg(not(feature = "gstreamer_output"))]
pub use self::ffmpeg_writer::{FfmpegEncoder, FfmpegWriterFactory};
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_writer::{GstVideoWriter, GstWriterFactory};
pub use self::trajectory::{TrajectoryWriter, format_line};

/// 当前编译的视频编码后端
#[cfg(feature = "gstreamer_output")]
pub type DefaultWriterFactory = GstWriterFactory;
#[cfg(not(feature = "gstreamer_output"))]
pub type DefaultWriterFactory = FfmpegWriterFactory;

/// 按到达顺序写入帧的视频写入器
pub trait FrameWriter {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError>;

  /// 完成写入，重复调用无副作用
  fn finish(&mut self) -> Result<(), OutputError>;

  fn frames_written(&self) -> u64;
}

/// 创建视频写入器，尺寸取自第一帧
pub trait OpenFrameWriter {
  fn open_writer(
    &self,
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Box<dyn FrameWriter>, OutputError>;
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[cfg(not(feature = "gstreamer_output"))]
  #[error("无法执行 {program} (请确保已安装): {source}")]
  Spawn {
    program: &'static str,
    source: std::io::Error,
  },
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 错误: {0}")]
  GStreamer(#[from] gstreamer::glib::Error),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBool(#[from] gstreamer::glib::BoolError),
  #[cfg(feature = "gstreamer_output")]
  #[error("管道状态切换失败: {0}")]
  StateChange(#[from] gstreamer::StateChangeError),
  #[error("视频编码失败: {0}")]
  Encoder(String),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSize {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("字体加载失败: {0}")]
  Font(String),
  #[error("输出已关闭")]
  Closed,
}

/// 输出复用器的目标
#[derive(Debug, Clone)]
pub struct OutputTargets {
  pub video_path: PathBuf,
  pub trajectory_path: PathBuf,
  pub fps: f64,
  pub mode: Mode,
}

/// 输出关闭后的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputReport {
  /// 至少写入一帧时为输出视频路径
  pub video_path: Option<PathBuf>,
  pub frames_written: u64,
  /// 本次运行创建的轨迹文件
  pub trajectory_path: Option<PathBuf>,
  pub trajectory_lines: u64,
}

impl OutputReport {
  /// 本次运行写出了非空轨迹
  pub fn has_trajectory(&self) -> bool {
    self.trajectory_path.is_some() && self.trajectory_lines > 0
  }
}

/// 把每帧写入标注视频，跟踪模式下同时写入轨迹文件
///
/// 两个资源都在第一帧到达时才打开，在 [`OutputMux::finish`] 或丢弃时关闭。
pub struct OutputMux {
  factory: Box<dyn OpenFrameWriter>,
  draw: Draw,
  targets: OutputTargets,
  video: Option<Box<dyn FrameWriter>>,
  trajectory: Option<TrajectoryWriter>,
  finished: bool,
}

impl OutputMux {
  pub fn new(factory: Box<dyn OpenFrameWriter>, draw: Draw, targets: OutputTargets) -> Self {
    Self {
      factory,
      draw,
      targets,
      video: None,
      trajectory: None,
      finished: false,
    }
  }

  /// 写入一帧，帧本身不会被修改
  pub fn write(&mut self, frame: &Frame, record: &FrameRecord) -> Result<(), OutputError> {
    if self.finished {
      return Err(OutputError::Closed);
    }

    let mut annotated = frame.image.clone();
    self.draw.draw_detections(&mut annotated, &record.detections);

    if self.video.is_none() {
      let writer = self.factory.open_writer(
        &self.targets.video_path,
        frame.width(),
        frame.height(),
        self.targets.fps,
      )?;
      self.video = Some(writer);
    }
    if let Some(video) = self.video.as_mut() {
      video.write_frame(&annotated)?;
    }

    if self.targets.mode.is_tracking() {
      if self.trajectory.is_none() {
        self.trajectory = Some(TrajectoryWriter::create(&self.targets.trajectory_path)?);
      }
      if let Some(trajectory) = self.trajectory.as_mut() {
        let lines = trajectory.write_record(record)?;
        debug!("第 {} 帧写入 {} 条轨迹", record.frame_index, lines);
      }
    }

    Ok(())
  }

  /// 关闭全部资源；视频关闭失败时轨迹文件仍会被关闭
  pub fn finish(&mut self) -> Result<OutputReport, OutputError> {
    self.finished = true;
    let mut report = OutputReport::default();

    let video_result = match self.video.take() {
      Some(mut video) => {
        report.frames_written = video.frames_written();
        report.video_path = Some(self.targets.video_path.clone());
        video.finish()
      }
      None => Ok(()),
    };

    let trajectory_result = match self.trajectory.take() {
      Some(mut trajectory) => {
        report.trajectory_lines = trajectory.lines();
        report.trajectory_path = Some(trajectory.path().to_path_buf());
        trajectory.finish()
      }
      None => Ok(()),
    };

    video_result?;
    trajectory_result?;
    Ok(report)
  }
}

impl Drop for OutputMux {
  fn drop(&mut self) {
    if !self.finished
      && let Err(e) = self.finish()
    {
      warn!("关闭输出时出错: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::{BBox, NormalizedDetection};
  use image::RgbImage;
  use std::sync::{Arc, Mutex};

  #[derive(Default, Clone)]
  struct Recorded {
    opened: Arc<Mutex<Vec<(u32, u32, f64)>>>,
    frames: Arc<Mutex<u64>>,
  }

  struct CountingWriter(Recorded, u64);

  impl FrameWriter for CountingWriter {
    fn write_frame(&mut self, _: &RgbImage) -> Result<(), OutputError> {
      self.1 += 1;
      *self.0.frames.lock().unwrap() += 1;
      Ok(())
    }

    fn finish(&mut self) -> Result<(), OutputError> {
      Ok(())
    }

    fn frames_written(&self) -> u64 {
      self.1
    }
  }

  impl OpenFrameWriter for Recorded {
    fn open_writer(
      &self,
      _: &Path,
      width: u32,
      height: u32,
      fps: f64,
    ) -> Result<Box<dyn FrameWriter>, OutputError> {
      self.opened.lock().unwrap().push((width, height, fps));
      Ok(Box::new(CountingWriter(self.clone(), 0)))
    }
  }

  fn record(frame_index: u64, track_id: Option<i64>) -> FrameRecord {
    FrameRecord {
      frame_index,
      detections: vec![NormalizedDetection {
        bbox: BBox::from_xyxy([1.0, 1.0, 5.0, 5.0]),
        class_label: "person".to_string(),
        confidence: 0.9,
        track_id,
      }],
      timing: None,
    }
  }

  fn targets(name: &str, mode: Mode) -> OutputTargets {
    let dir = std::env::temp_dir().join(format!("liuying-mux-{}-{}", name, std::process::id()));
    OutputTargets {
      video_path: dir.join("out.mp4"),
      trajectory_path: dir.join("mot.txt"),
      fps: 30.0,
      mode,
    }
  }

  #[test]
  fn opens_writer_lazily_with_first_frame_size() {
    let recorded = Recorded::default();
    let mut mux = OutputMux::new(
      Box::new(recorded.clone()),
      Draw::without_labels(),
      targets("lazy", Mode::Detection),
    );
    assert!(recorded.opened.lock().unwrap().is_empty());

    let frame = Frame::new(RgbImage::new(10, 6), 0);
    mux.write(&frame, &record(1, None)).unwrap();
    mux.write(&frame, &record(2, None)).unwrap();
    let report = mux.finish().unwrap();

    assert_eq!(*recorded.opened.lock().unwrap(), vec![(10, 6, 30.0)]);
    assert_eq!(report.frames_written, 2);
    assert!(report.trajectory_path.is_none());
    assert!(frame.image.pixels().all(|p| p.0 == [0, 0, 0]));
  }

  #[test]
  fn tracking_mode_writes_trajectory() {
    let targets = targets("track", Mode::Tracking);
    let trajectory_path = targets.trajectory_path.clone();
    let mut mux = OutputMux::new(
      Box::new(Recorded::default()),
      Draw::without_labels(),
      targets,
    );
    let frame = Frame::new(RgbImage::new(10, 6), 0);
    mux.write(&frame, &record(1, Some(4))).unwrap();
    mux.write(&frame, &record(2, None)).unwrap();
    let report = mux.finish().unwrap();

    assert!(report.has_trajectory());
    assert_eq!(report.trajectory_lines, 1);
    let text = std::fs::read_to_string(&trajectory_path).unwrap();
    assert!(text.starts_with("1,4,2.00,2.00,4.00,4.00,0.9000"));
    let _ = std::fs::remove_file(&trajectory_path);
  }

  #[test]
  fn writing_after_finish_is_rejected() {
    let mut mux = OutputMux::new(
      Box::new(Recorded::default()),
      Draw::without_labels(),
      targets("closed", Mode::Detection),
    );
    let report = mux.finish().unwrap();
    assert_eq!(report, OutputReport::default());
    let frame = Frame::new(RgbImage::new(4, 4), 0);
    assert!(matches!(
      mux.write(&frame, &record(1, None)),
      Err(OutputError::Closed)
    ));
  }
}
