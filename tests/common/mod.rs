#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rsretrieval::dataset::DatasetManager;
use rsretrieval::embedding::{Embedder, Embedding, check_text};
use rsretrieval::{Result, SharedCollection};

pub const RED: [u8; 3] = [250, 10, 10];
pub const GREEN: [u8; 3] = [10, 250, 10];
pub const BLUE: [u8; 3] = [10, 10, 250];

/// 以平均颜色作为向量的测试模型
///
/// 文本中出现的颜色词决定文本向量，没有颜色词时为灰色。
pub struct ColorEmbedder;

impl Embedder for ColorEmbedder {
    fn name(&self) -> &str {
        "color"
    }

    fn dimension(&self) -> usize {
        3
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<Embedding> {
        let rgb = image.to_rgb8();
        let mut sum = [1f32; 3];
        for pixel in rgb.pixels() {
            sum.iter_mut().zip(pixel.0).for_each(|(s, c)| *s += c as f32);
        }
        Embedding::new(sum.to_vec())
    }

    fn embed_text(&self, text: &str) -> Result<Embedding> {
        let text = check_text(text)?;
        let mut v = vec![0.1f32; 3];
        for (i, word) in ["red", "green", "blue"].iter().enumerate() {
            if text.contains(word) {
                v[i] += 1.;
            }
        }
        Embedding::new(v)
    }
}

pub fn embedder() -> Arc<dyn Embedder> {
    Arc::new(ColorEmbedder)
}

pub fn encode(color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_pixel(16, 16, Rgb(color));
    let mut data = Cursor::new(vec![]);
    image.write_to(&mut data, format).unwrap();
    data.into_inner()
}

pub fn png(color: [u8; 3]) -> Vec<u8> {
    encode(color, ImageFormat::Png)
}

pub fn jpeg(color: [u8; 3]) -> Vec<u8> {
    encode(color, ImageFormat::Jpeg)
}

/// 在临时目录中创建数据集，布局与数据目录一致
pub fn dataset(dir: &Path, embedder: Option<Arc<dyn Embedder>>) -> DatasetManager {
    let collection = Arc::new(SharedCollection::open(
        "图片索引",
        dir.join("image.index"),
        dir.join("image_meta.json"),
    ));
    DatasetManager::new(dir.join("images"), embedder, collection)
}
