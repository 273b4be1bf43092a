// 该文件是 Liuying （流影） 项目的一部分。
// src/input/image_dir.rs - 图像序列目录输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_path};

#[derive(Error, Debug)]
pub enum ImageDirInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("不是目录: {0}")]
  NotADirectory(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("图像尺寸不一致: {path} 为 {actual:?}, 期望 {expected:?}")]
  SizeMismatch {
    path: String,
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// 按文件名排序的图像序列
pub struct ImageDirInput {
  files: Vec<PathBuf>,
  cursor: usize,
  width: u32,
  height: u32,
  fps: Option<f64>,
}

impl FromUrlWithScheme for ImageDirInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirInput {
  type Error = ImageDirInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageDirInputError::SchemaMismatch);
    }

    let mut input = Self::open(url_path(url))?;
    input.fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok());
    Ok(input)
  }
}

impl ImageDirInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, ImageDirInputError> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
      return Err(ImageDirInputError::NotADirectory(
        directory.display().to_string(),
      ));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if path.is_file() && is_image {
        files.push(path);
      }
    }
    files.sort();

    // 空目录是合法的空序列
    let (width, height) = match files.first() {
      Some(first) => image::image_dimensions(first)?,
      None => (0, 0),
    };

    info!(
      "图像目录已打开: {} ({} 张, {}x{})",
      directory.display(),
      files.len(),
      width,
      height
    );

    Ok(Self {
      files,
      cursor: 0,
      width,
      height,
      fps: None,
    })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  fn load(&self, path: &Path) -> Result<image::RgbImage, ImageDirInputError> {
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    if image.dimensions() != (self.width, self.height) {
      return Err(ImageDirInputError::SizeMismatch {
        path: path.display().to_string(),
        expected: (self.width, self.height),
        actual: image.dimensions(),
      });
    }
    Ok(image)
  }
}

impl Iterator for ImageDirInput {
  type Item = Result<Frame, ImageDirInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.get(self.cursor)?.clone();
    let index = self.cursor as u64;
    self.cursor += 1;
    Some(self.load(&path).map(|image| Frame::new(image, index)))
  }
}

impl ImageDirInput {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn fps(&self) -> Option<f64> {
    self.fps
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("liuying-imgdir-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[test]
  fn reads_images_in_name_order() {
    let dir = scratch_dir("order");
    for (name, shade) in [("b.png", 20u8), ("a.png", 10u8), ("c.png", 30u8)] {
      RgbImage::from_pixel(4, 3, Rgb([shade, 0, 0]))
        .save(dir.join(name))
        .unwrap();
    }
    std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

    let input = ImageDirInput::open(&dir).unwrap();
    assert_eq!(input.len(), 3);
    assert_eq!((input.width(), input.height()), (4, 3));

    let shades: Vec<u8> = input
      .map(|f| f.unwrap().image.get_pixel(0, 0)[0])
      .collect();
    assert_eq!(shades, vec![10, 20, 30]);
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn empty_directory_is_an_empty_sequence() {
    let dir = scratch_dir("empty");
    let mut input = ImageDirInput::open(&dir).unwrap();
    assert!(input.is_empty());
    assert!(input.next().is_none());
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn mixed_sizes_are_rejected() {
    let dir = scratch_dir("sizes");
    RgbImage::new(4, 4).save(dir.join("0.png")).unwrap();
    RgbImage::new(8, 4).save(dir.join("1.png")).unwrap();

    let results: Vec<_> = ImageDirInput::open(&dir).unwrap().collect();
    assert!(results[0].is_ok());
    assert!(matches!(
      results[1],
      Err(ImageDirInputError::SizeMismatch { .. })
    ));
    let _ = std::fs::remove_dir_all(&dir);
  }
}
