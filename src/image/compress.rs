//! Image compression before upload

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, ImageFormat};

use crate::error::AppError;

const JPEG_QUALITY: u8 = 85;

/// Shrinks images that exceed a byte budget, resizing to a maximum width.
#[derive(Debug, Clone)]
pub struct Compressor {
    max_width: u32,
    max_size: u64,
    quality: u8,
}

impl Compressor {
    pub fn new(max_width: u32, max_size: u64) -> Self {
        Self {
            max_width,
            max_size,
            quality: JPEG_QUALITY,
        }
    }

    /// Returns the path of a smaller temporary copy, or `None` when the
    /// original should be used as-is. The caller owns the returned file.
    pub fn compress(&self, path: &Path) -> Result<Option<PathBuf>, AppError> {
        let original_size = std::fs::metadata(path)?.len();
        if original_size <= self.max_size {
            tracing::debug!(
                "Image within size limit ({} <= {} bytes), skipping compression",
                original_size,
                self.max_size
            );
            return Ok(None);
        }

        let img = image::open(path)?;
        let (width, height) = (img.width(), img.height());

        let img = if width > self.max_width {
            let new_height =
                ((self.max_width as f64) * (height as f64) / (width as f64)).round().max(1.0) as u32;
            tracing::info!(
                "Resizing image {}x{} -> {}x{}",
                width,
                height,
                self.max_width,
                new_height
            );
            img.resize_exact(self.max_width, new_height, FilterType::Lanczos3)
        } else {
            img
        };

        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("png"))
            .unwrap_or(false);

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let ext = if is_png { "png" } else { "jpg" };
        let out_path = std::env::temp_dir().join(format!(
            "compressed_{}_{}.{}",
            uuid::Uuid::new_v4().simple(),
            stem,
            ext
        ));

        let written = if is_png {
            img.save_with_format(&out_path, ImageFormat::Png)
                .map_err(AppError::from)
        } else {
            self.write_jpeg(&img, &out_path)
        };
        if let Err(e) = written {
            let _ = std::fs::remove_file(&out_path);
            return Err(e);
        }

        let new_size = std::fs::metadata(&out_path)?.len();
        if new_size >= original_size {
            tracing::debug!("Compressed image is not smaller, using original");
            let _ = std::fs::remove_file(&out_path);
            return Ok(None);
        }

        tracing::info!(
            "Image compressed: {} -> {} bytes ({:.1}%)",
            original_size,
            new_size,
            new_size as f64 / original_size as f64 * 100.0
        );

        Ok(Some(out_path))
    }

    fn write_jpeg(&self, img: &image::DynamicImage, out_path: &Path) -> Result<(), AppError> {
        let rgb = img.to_rgb8();
        let mut writer = BufWriter::new(File::create(out_path)?);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, self.quality);
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
        Ok(())
    }
}
