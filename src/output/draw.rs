// 该文件是 Liuying （流影） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use tracing::{debug, warn};

use crate::{normalize::NormalizedDetection, output::OutputError};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const PALETTE_SIZE: usize = 20;

/// 依次尝试的系统字体
const SYSTEM_FONTS: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    let font = SYSTEM_FONTS.iter().find_map(|path| load_font(Path::new(path)).ok());
    if font.is_none() {
      warn!("找不到可用字体，只绘制检测框");
    }
    Self::with_font(font)
  }
}

impl Draw {
  /// 使用指定字体文件
  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, OutputError> {
    Ok(Self::with_font(Some(load_font(path.as_ref())?)))
  }

  /// 只画框，不画标签
  pub fn without_labels() -> Self {
    Self::with_font(None)
  }

  fn with_font(font: Option<FontArc>) -> Self {
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      colors,
    }
  }

  /// 有轨迹身份时按身份着色，否则按类别着色
  pub fn color_for(&self, det: &NormalizedDetection) -> Rgb<u8> {
    let key = match det.track_id {
      Some(id) => id.unsigned_abs() as usize,
      None => det
        .class_label
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize)),
    };
    self.colors[key % self.colors.len()]
  }

  pub fn label_for(det: &NormalizedDetection) -> String {
    match det.track_id {
      Some(id) => format!("#{} {} {:.2}", id, det.class_label, det.confidence),
      None => format!("{} {:.2}", det.class_label, det.confidence),
    }
  }

  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[NormalizedDetection]) {
    for det in detections {
      self.draw_bbox_with_label(image, det);
    }
  }

  // bbox 为像素坐标
  fn draw_bbox_with_label(&self, image: &mut RgbImage, det: &NormalizedDetection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let color = self.color_for(det);

    let x_min = (det.bbox.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (det.bbox.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (det.bbox.x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (det.bbox.y2.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      debug!("跳过退化的检测框: {:?}", det.bbox);
      return;
    }

    // 绘制边框（加粗为2像素）
    for thickness in 0..2 {
      let x0 = (x_min + thickness).min(x_max);
      let y0 = (y_min + thickness).min(y_max);
      let x1 = (x_max - thickness).max(x_min);
      let y1 = (y_max - thickness).max(y_min);

      for x in x0..=x1 {
        image.put_pixel(x as u32, y0 as u32, color);
        image.put_pixel(x as u32, y1 as u32, color);
      }
      for y in y0..=y1 {
        image.put_pixel(x0 as u32, y as u32, color);
        image.put_pixel(x1 as u32, y as u32, color);
      }
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let label = Self::label_for(det);
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;

    // 标签背景放在边框上方
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = self.label_text_height as u32;

    if label_width > 0 {
      let rect = imageproc::rect::Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}

fn load_font(path: &Path) -> Result<FontArc, OutputError> {
  let data = std::fs::read(path)?;
  FontArc::try_from_vec(data)
    .map_err(|e| OutputError::Font(format!("{}: {}", path.display(), e)))
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::BBox;

  fn det(track_id: Option<i64>) -> NormalizedDetection {
    NormalizedDetection {
      bbox: BBox::from_xyxy([2.0, 2.0, 12.0, 10.0]),
      class_label: "person".to_string(),
      confidence: 0.876,
      track_id,
    }
  }

  #[test]
  fn labels_include_track_id() {
    assert_eq!(Draw::label_for(&det(Some(7))), "#7 person 0.88");
    assert_eq!(Draw::label_for(&det(None)), "person 0.88");
  }

  #[test]
  fn draws_border_and_leaves_inside_untouched() {
    let draw = Draw::without_labels();
    let mut image = RgbImage::new(16, 16);
    draw.draw_detections(&mut image, &[det(Some(3))]);

    let color = draw.color_for(&det(Some(3)));
    assert_eq!(*image.get_pixel(2, 2), color);
    assert_eq!(*image.get_pixel(12, 10), color);
    assert_eq!(*image.get_pixel(7, 6), Rgb([0, 0, 0]));
  }

  #[test]
  fn out_of_frame_boxes_are_clamped() {
    let draw = Draw::without_labels();
    let mut image = RgbImage::new(8, 8);
    let mut wide = det(None);
    wide.bbox = BBox::from_xyxy([-5.0, -5.0, 50.0, 50.0]);
    draw.draw_detections(&mut image, &[wide]);
    assert_ne!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
  }

  #[test]
  fn same_track_same_color() {
    let draw = Draw::without_labels();
    let mut other = det(Some(3));
    other.class_label = "car".to_string();
    assert_eq!(draw.color_for(&det(Some(3))), draw.color_for(&other));
  }
}
