// 该文件是 Liuying （流影） 项目的一部分。
// src/output/trajectory.rs - 轨迹文件
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

//! MOT 轨迹文件，每行
//!
//! ```text
//! frame,id,x+1,y+1,w,h,conf,-1,-1,-1
//! ```
//!
//! 坐标从 1 开始，保留 2 位小数；置信度保留 4 位小数。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{
  normalize::{FrameRecord, NormalizedDetection},
  output::OutputError,
};

pub struct TrajectoryWriter {
  path: PathBuf,
  out: BufWriter<File>,
  lines: u64,
}

impl TrajectoryWriter {
  /// 创建（截断）轨迹文件
  pub fn create(path: &Path) -> Result<Self, OutputError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let out = BufWriter::new(File::create(path)?);
    debug!("轨迹文件已创建: {}", path.display());
    Ok(Self {
      path: path.to_path_buf(),
      out,
      lines: 0,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn lines(&self) -> u64 {
    self.lines
  }

  /// 写入一帧中所有带轨迹身份的检测，返回写入行数
  pub fn write_record(&mut self, record: &FrameRecord) -> Result<usize, OutputError> {
    let mut written = 0;
    for (track_id, det) in record.tracked() {
      writeln!(self.out, "{}", format_line(record.frame_index, track_id, det))?;
      written += 1;
    }
    self.lines += written as u64;
    Ok(written)
  }

  pub fn finish(&mut self) -> Result<(), OutputError> {
    self.out.flush()?;
    info!("轨迹已写入: {} ({} 行)", self.path.display(), self.lines);
    Ok(())
  }
}

pub fn format_line(frame_index: u64, track_id: i64, det: &NormalizedDetection) -> String {
  let bbox = det.bbox;
  format!(
    "{},{},{:.2},{:.2},{:.2},{:.2},{:.4},-1,-1,-1",
    frame_index,
    track_id,
    bbox.x1 as f64 + 1.0,
    bbox.y1 as f64 + 1.0,
    bbox.width() as f64,
    bbox.height() as f64,
    det.confidence as f64
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::BBox;

  fn det(track_id: Option<i64>) -> NormalizedDetection {
    NormalizedDetection {
      bbox: BBox::from_xyxy([10.0, 20.0, 40.5, 80.25]),
      class_label: "person".to_string(),
      confidence: 0.5,
      track_id,
    }
  }

  #[test]
  fn line_has_ten_fields() {
    let line = format_line(3, 7, &det(Some(7)));
    assert_eq!(line, "3,7,11.00,21.00,30.50,60.25,0.5000,-1,-1,-1");
    assert_eq!(line.split(',').count(), 10);
  }

  #[test]
  fn only_tracked_detections_are_written() {
    let path = std::env::temp_dir().join(format!("liuying-traj-{}.txt", std::process::id()));
    let mut writer = TrajectoryWriter::create(&path).unwrap();
    let record = FrameRecord {
      frame_index: 1,
      detections: vec![det(Some(1)), det(None), det(Some(2))],
      timing: None,
    };
    assert_eq!(writer.write_record(&record).unwrap(), 2);
    writer.finish().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let ids: Vec<&str> = text.lines().map(|l| l.split(',').nth(1).unwrap()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    let _ = std::fs::remove_file(&path);
  }
}
