// 该文件是 Liuying （流影） 项目的一部分。
// src/source.rs - 帧来源
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

//! 帧来源
//!
//! 把视频读取、采样步长、帧预算和模型调用合成一个惰性的、有限的、
//! 不可重启的 `(帧, 原始结果)` 序列。
//!
//! - 检测模式：只有通过步长检查的帧计入预算。
//! - 跟踪模式：预算按读取的来源帧计数；模型没有给出结果的帧被静默跳过。
//!   来源无法逐帧打开时降级为检测模式。

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{InferOptions, Mode, PipelineConfig},
  frame::Frame,
  input::{FrameReader, InputError, OpenSource},
  model::{Model, ModelError, RawResult},
};

#[derive(Error, Debug)]
pub enum SourceError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
}

/// 采样与推理设置
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
  /// `None` 表示不限制
  pub max_frames: Option<u64>,
  pub skip_frames: u64,
  pub infer: InferOptions,
}

impl From<&PipelineConfig> for SourceSettings {
  fn from(config: &PipelineConfig) -> Self {
    Self {
      max_frames: config.max_frames,
      skip_frames: config.skip_frames.max(1),
      infer: config.infer.clone(),
    }
  }
}

/// 运行中发生的降级，与运行参数一起记录
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
  TrackingFallback { reason: String },
}

impl Degradation {
  pub fn param_name(&self) -> &'static str {
    match self {
      Degradation::TrackingFallback { .. } => "tracking_fallback",
    }
  }

  pub fn message(&self) -> &'static str {
    match self {
      Degradation::TrackingFallback { .. } => "tracking disabled, fell back to detection",
    }
  }
}

pub struct FrameSource<M: Model> {
  reader: Box<dyn FrameReader>,
  model: M,
  mode: Mode,
  settings: SourceSettings,
  /// 已读取的来源帧数（下一帧的来源序号）
  source_index: u64,
  /// 已产出的帧数
  yielded: u64,
  degradation: Option<Degradation>,
  finished: bool,
}

impl<M: Model> FrameSource<M> {
  /// 打开来源
  ///
  /// 跟踪模式打开失败时降级为检测模式；检测模式打开失败是致命错误。
  pub fn open<O: OpenSource + ?Sized>(
    opener: &O,
    reference: &str,
    model: M,
    mode: Mode,
    settings: SourceSettings,
  ) -> Result<Self, SourceError> {
    let (reader, mode, degradation) = match mode {
      Mode::Tracking => match opener.open_capture(reference) {
        Ok(reader) => (reader, Mode::Tracking, None),
        Err(e) => {
          warn!("跟踪模式无法打开来源 ({})，降级为检测模式", e);
          let reader = opener.open_stream(reference)?;
          (
            reader,
            Mode::Detection,
            Some(Degradation::TrackingFallback {
              reason: e.to_string(),
            }),
          )
        }
      },
      Mode::Detection => (opener.open_stream(reference)?, Mode::Detection, None),
    };

    info!(
      "帧来源已就绪: {} ({}x{}, 模式: {}, 步长: {}, 预算: {:?})",
      reference,
      reader.width(),
      reader.height(),
      mode.as_str(),
      settings.skip_frames,
      settings.max_frames
    );

    Ok(Self {
      reader,
      model,
      mode,
      settings,
      source_index: 0,
      yielded: 0,
      degradation,
      finished: false,
    })
  }

  /// 实际生效的模式
  pub fn mode(&self) -> Mode {
    self.mode
  }

  pub fn degradation(&self) -> Option<&Degradation> {
    self.degradation.as_ref()
  }

  pub fn frames_read(&self) -> u64 {
    self.source_index
  }

  fn budget_exhausted(&self) -> bool {
    let Some(max) = self.settings.max_frames else {
      return false;
    };
    match self.mode {
      Mode::Detection => self.yielded >= max,
      Mode::Tracking => self.source_index >= max,
    }
  }

  fn infer(&mut self, frame: &Frame) -> Result<Option<RawResult>, ModelError> {
    match self.mode {
      Mode::Detection => self.model.predict(frame, &self.settings.infer).map(Some),
      Mode::Tracking => Ok(
        self
          .model
          .track(frame, &self.settings.infer, true)?
          .into_iter()
          .next(),
      ),
    }
  }

  fn stop(&mut self) {
    if !self.finished {
      self.finished = true;
      debug!(
        "帧来源结束: 读取 {} 帧, 产出 {} 帧",
        self.source_index, self.yielded
      );
    }
  }
}

impl<M: Model> Iterator for FrameSource<M> {
  type Item = Result<(Frame, RawResult), SourceError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if self.finished {
        return None;
      }
      if self.budget_exhausted() {
        info!("达到帧预算 {:?}", self.settings.max_frames);
        self.stop();
        return None;
      }

      let frame = match self.reader.next() {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
          self.stop();
          return Some(Err(e.into()));
        }
        None => {
          self.stop();
          return None;
        }
      };

      let index = self.source_index;
      self.source_index += 1;
      if index % self.settings.skip_frames != 0 {
        continue;
      }

      match self.infer(&frame) {
        Ok(Some(raw)) => {
          self.yielded += 1;
          return Some(Ok((frame, raw)));
        }
        Ok(None) => continue,
        Err(e) => {
          self.stop();
          return Some(Err(e.into()));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::RawBox;
  use image::RgbImage;

  struct Frames {
    remaining: std::ops::Range<u64>,
  }

  impl Iterator for Frames {
    type Item = Result<Frame, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
      self
        .remaining
        .next()
        .map(|i| Ok(Frame::new(RgbImage::new(8, 6), i)))
    }
  }

  impl FrameReader for Frames {
    fn width(&self) -> u32 {
      8
    }

    fn height(&self) -> u32 {
      6
    }

    fn fps(&self) -> Option<f64> {
      Some(30.0)
    }
  }

  struct Opener {
    frames: u64,
    capturable: bool,
    streamable: bool,
  }

  impl OpenSource for Opener {
    fn open_stream(&self, reference: &str) -> Result<Box<dyn FrameReader>, InputError> {
      if !self.streamable {
        return Err(InputError::Unavailable(reference.to_string()));
      }
      Ok(Box::new(Frames {
        remaining: 0..self.frames,
      }))
    }

    fn open_capture(&self, reference: &str) -> Result<Box<dyn FrameReader>, InputError> {
      if !self.capturable {
        return Err(InputError::Unavailable(reference.to_string()));
      }
      self.open_stream(reference)
    }
  }

  /// 每帧一个框，跟踪模式下奇数来源帧没有结果
  #[derive(Default)]
  struct Scripted {
    calls: Vec<(u64, bool)>,
    track_gaps: bool,
  }

  impl Model for Scripted {
    fn name(&self) -> &str {
      "scripted"
    }

    fn predict(&mut self, frame: &Frame, _: &InferOptions) -> Result<RawResult, ModelError> {
      self.calls.push((frame.index, false));
      Ok(RawResult {
        boxes: vec![RawBox {
          xyxy: [0.0, 0.0, 4.0, 4.0],
          conf: 0.9,
          cls: 0,
          id: None,
        }],
        ..Default::default()
      })
    }

    fn track(
      &mut self,
      frame: &Frame,
      _: &InferOptions,
      persist: bool,
    ) -> Result<Vec<RawResult>, ModelError> {
      assert!(persist);
      self.calls.push((frame.index, true));
      if self.track_gaps && frame.index % 4 == 2 {
        return Ok(vec![]);
      }
      Ok(vec![RawResult::default()])
    }
  }

  fn settings(max_frames: Option<u64>, skip_frames: u64) -> SourceSettings {
    SourceSettings {
      max_frames,
      skip_frames,
      infer: InferOptions::default(),
    }
  }

  fn opener(frames: u64) -> Opener {
    Opener {
      frames,
      capturable: true,
      streamable: true,
    }
  }

  #[test]
  fn detection_budget_counts_stride_frames() {
    let mut model = Scripted::default();
    let source = FrameSource::open(
      &opener(100),
      "v",
      &mut model,
      Mode::Detection,
      settings(Some(5), 3),
    )
    .unwrap();
    let indices: Vec<u64> = source.map(|r| r.unwrap().0.index).collect();
    assert_eq!(indices, vec![0, 3, 6, 9, 12]);
    assert!(model.calls.iter().all(|(_, tracked)| !tracked));
  }

  #[test]
  fn tracking_budget_counts_source_frames() {
    let mut model = Scripted {
      track_gaps: true,
      ..Default::default()
    };
    let source = FrameSource::open(
      &opener(100),
      "v",
      &mut model,
      Mode::Tracking,
      settings(Some(10), 2),
    )
    .unwrap();
    let indices: Vec<u64> = source.map(|r| r.unwrap().0.index).collect();
    // 2、6 两帧模型没有结果
    assert_eq!(indices, vec![0, 4, 8]);
    assert_eq!(model.calls.len(), 5);
  }

  #[test]
  fn tracking_open_failure_falls_back_to_detection() {
    let mut model = Scripted::default();
    let source = FrameSource::open(
      &Opener {
        frames: 4,
        capturable: false,
        streamable: true,
      },
      "https://example.com/v",
      &mut model,
      Mode::Tracking,
      settings(None, 1),
    )
    .unwrap();
    assert_eq!(source.mode(), Mode::Detection);
    assert_eq!(source.degradation().unwrap().param_name(), "tracking_fallback");
    assert_eq!(source.count(), 4);
  }

  #[test]
  fn detection_open_failure_is_fatal() {
    let result = FrameSource::open(
      &Opener {
        frames: 4,
        capturable: false,
        streamable: false,
      },
      "v",
      Scripted::default(),
      Mode::Tracking,
      settings(None, 1),
    );
    assert!(matches!(result, Err(SourceError::Input(_))));
  }

  #[test]
  fn empty_source_is_an_empty_sequence() {
    let mut source = FrameSource::open(
      &opener(0),
      "v",
      Scripted::default(),
      Mode::Detection,
      settings(Some(300), 2),
    )
    .unwrap();
    assert!(source.next().is_none());
    assert!(source.next().is_none());
    assert_eq!(source.frames_read(), 0);
  }

  #[test]
  fn unlimited_budget_reads_whole_source() {
    let source = FrameSource::open(
      &opener(9),
      "v",
      Scripted::default(),
      Mode::Detection,
      settings(None, 2),
    )
    .unwrap();
    assert_eq!(source.count(), 5);
  }
}
