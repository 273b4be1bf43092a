// 该文件是 Liuying （流影） 项目的一部分。
// src/output/ffmpeg_writer.rs - ffmpeg 命令行视频写入
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

//! 未启用 `gstreamer_output` 特性时的编码后端。
//!
//! 把 RGB24 原始帧经管道交给 ffmpeg 编码为 H.264 MP4。
//! 编码在关闭标准输入后由 ffmpeg 写完文件尾，因此提前停止时文件也是完整的。
//! 需要系统安装 ffmpeg 命令行工具。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;
use tracing::{error, info, warn};

use crate::output::{FrameWriter, OpenFrameWriter, OutputError};

/// 使用 ffmpeg 命令行编码
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegWriterFactory;

impl OpenFrameWriter for FfmpegWriterFactory {
  fn open_writer(
    &self,
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Box<dyn FrameWriter>, OutputError> {
    Ok(Box::new(FfmpegEncoder::create(path, width, height, fps)?))
  }
}

pub struct FfmpegEncoder {
  path: PathBuf,
  width: u32,
  height: u32,
  child: Child,
  stdin: Option<ChildStdin>,
  frames: u64,
  finished: bool,
}

impl FfmpegEncoder {
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

    let mut child = Command::new("ffmpeg")
      .arg("-y") // 覆盖已存在的文件
      .arg("-loglevel")
      .arg("error") // 减少日志输出
      .arg("-f")
      .arg("rawvideo")
      .arg("-pix_fmt")
      .arg("rgb24")
      .arg("-s")
      .arg(format!("{}x{}", width, height))
      .arg("-r")
      .arg(format!("{}", fps))
      .arg("-i")
      .arg("-")
      .arg("-an")
      .arg("-c:v")
      .arg("libx264") // 使用 H.264 编码
      .arg("-pix_fmt")
      .arg("yuv420p") // 兼容性格式
      .arg("-preset")
      .arg("fast") // 编码速度预设
      .arg("-crf")
      .arg("23") // 质量参数（0-51，越小质量越好）
      .arg("-vf")
      .arg("pad=ceil(iw/2)*2:ceil(ih/2)*2") // yuv420p 要求偶数尺寸
      .arg(path)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(|source| OutputError::Spawn {
        program: "ffmpeg",
        source,
      })?;

    let stdin = child.stdin.take();
    info!(
      "视频写入器已创建: {} ({}x{} @ {} fps)",
      path.display(),
      width,
      height,
      fps
    );

    Ok(Self {
      path: path.to_path_buf(),
      width,
      height,
      child,
      stdin,
      frames: 0,
      finished: false,
    })
  }
}

impl FrameWriter for FfmpegEncoder {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if image.dimensions() != (self.width, self.height) {
      return Err(OutputError::FrameSize {
        expected: (self.width, self.height),
        actual: image.dimensions(),
      });
    }
    let stdin = self.stdin.as_mut().ok_or(OutputError::Closed)?;
    if let Err(e) = stdin.write_all(image.as_raw()) {
      error!("写入编码器失败: {}", e);
      return Err(OutputError::Encoder(format!(
        "{}: {}",
        self.path.display(),
        e
      )));
    }
    self.frames += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;
    // 关闭管道，ffmpeg 随后写入文件尾并退出
    drop(self.stdin.take());

    let status = self.child.wait()?;
    if !status.success() {
      return Err(OutputError::Encoder(format!(
        "ffmpeg 退出状态 {} ({})",
        status,
        self.path.display()
      )));
    }
    info!("视频已保存到文件: {} ({} 帧)", self.path.display(), self.frames);
    Ok(())
  }

  fn frames_written(&self) -> u64 {
    self.frames
  }
}

impl Drop for FfmpegEncoder {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      warn!("关闭视频写入器时出错: {}", e);
    }
  }
}
