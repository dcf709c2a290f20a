#[cfg(feature = "clip")]
mod clip;

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageReader};

#[cfg(feature = "clip")]
pub use self::clip::ClipModel;
use crate::error::{Error, Result};

/// 单位长度的嵌入向量
///
/// 只能通过 [`Embedding::new`] 构造，构造时完成 L2 归一化，
/// 因此两个向量的内积即为余弦相似度。
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// 归一化并创建嵌入向量，零向量或包含非有限值的向量会返回错误
    pub fn new(mut data: Vec<f32>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::model("嵌入向量为空"));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(Error::model("嵌入向量包含非有限值"));
        }
        let norm = data.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(Error::model("嵌入向量的模长为 0"));
        }
        data.iter_mut().for_each(|v| *v /= norm);
        Ok(Self(data))
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// 与另一个同维向量的内积
    #[inline(always)]
    pub fn dot(&self, other: &[f32]) -> f32 {
        inner_product(&self.0, other)
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

#[inline(always)]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// 图文共享空间的嵌入模型
///
/// 实现必须是无状态的（除了加载好的权重），可以在多个请求间只读共享。
pub trait Embedder: Send + Sync {
    /// 模型名称，用于日志和状态接口
    fn name(&self) -> &str;

    /// 输出向量的维度
    fn dimension(&self) -> usize;

    /// 计算一张 RGB 图片的嵌入向量
    fn embed_image(&self, image: &DynamicImage) -> Result<Embedding>;

    /// 计算一段文本的嵌入向量，空文本返回 [`Error::InvalidInput`]
    fn embed_text(&self, text: &str) -> Result<Embedding>;
}

/// 检查查询文本，返回去掉首尾空白后的内容
pub fn check_text(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::invalid_input("查询文本不能为空"));
    }
    Ok(text)
}

/// 解码内存中的图片并转换为 RGB，格式根据内容判断而不是文件名
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| Error::invalid_input(format!("无法识别的图像格式: {e}")))?;
    let image = reader.decode().map_err(|e| Error::invalid_input(format!("无效的图像文件: {e}")))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// 从文件读取图片并转换为 RGB
pub fn open_image(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let bytes = std::fs::read(path.as_ref())?;
    decode_image(&bytes)
}

/// 从模型目录加载嵌入模型
///
/// 模型只应在进程启动时加载一次，然后以 `Arc` 的形式传给各个组件。
#[cfg(feature = "clip")]
pub fn load_embedder(model_dir: impl AsRef<Path>) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(ClipModel::open(model_dir)?))
}

#[cfg(not(feature = "clip"))]
pub fn load_embedder(model_dir: impl AsRef<Path>) -> Result<Arc<dyn Embedder>> {
    log::warn!("当前构建未启用 clip 特性，无法加载嵌入模型");
    Err(Error::ResourceMissing {
        what: "嵌入模型（需要启用 clip 特性）",
        path: model_dir.as_ref().to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn test_embedding_is_normalized() {
        let e = Embedding::new(vec![3., 4.]).unwrap();
        assert_eq!(e.as_slice(), &[0.6, 0.8]);
        assert!((e.dot(e.as_slice()) - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_rejects_zero_and_nan() {
        assert!(matches!(Embedding::new(vec![0.; 4]), Err(Error::Model(_))));
        assert!(matches!(Embedding::new(vec![1., f32::NAN]), Err(Error::Model(_))));
        assert!(matches!(Embedding::new(vec![]), Err(Error::Model(_))));
    }

    #[test]
    fn test_check_text() {
        assert_eq!(check_text("  farmland ").unwrap(), "farmland");
        assert!(matches!(check_text("   "), Err(Error::InvalidInput(_))));
        assert!(matches!(check_text(""), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_decode_image_ignores_name_and_converts_to_rgb() {
        let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut buf = Cursor::new(vec![]);
        DynamicImage::ImageRgb8(img).write_to(&mut buf, image::ImageFormat::Png).unwrap();

        let decoded = decode_image(buf.get_ref()).unwrap();
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(matches!(decode_image(b"definitely not an image"), Err(Error::InvalidInput(_))));
    }

    #[cfg(not(feature = "clip"))]
    #[test]
    fn test_load_embedder_without_clip_feature() {
        let err = load_embedder("/nonexistent").err().unwrap();
        assert!(matches!(err, Error::ResourceMissing { .. }));
    }
}
