use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use log::{debug, info};
use ndarray::{Array, Array2, Array4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};

use super::{Embedder, Embedding, check_text};
use crate::error::{Error, Result};

/// ViT-B/32 的输入分辨率
const INPUT_SIZE: u32 = 224;
/// CLIP 文本编码器的上下文长度
const CONTEXT_LENGTH: usize = 77;
const MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// 基于 ONNX Runtime 的 CLIP 模型
///
/// 模型目录中需要包含：
/// - `vision.onnx`：图像编码器，输入 `[1, 3, 224, 224]`
/// - `text.onnx`：文本编码器，输入 `[1, 77]` 的 token id
/// - `tokenizer.json`：与文本编码器配套的分词器
pub struct ClipModel {
    name: String,
    dimension: usize,
    // ort 的 Session::run 需要 &mut self
    vision: Mutex<Session>,
    text: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl ClipModel {
    pub fn open(model_dir: impl AsRef<Path>) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        let vision_path = require(model_dir.join("vision.onnx"), "CLIP 图像编码器")?;
        let text_path = require(model_dir.join("text.onnx"), "CLIP 文本编码器")?;
        let tokenizer_path = require(model_dir.join("tokenizer.json"), "CLIP 分词器")?;

        info!("加载 CLIP 模型: {}", model_dir.display());
        let vision = load_session(&vision_path)?;
        let text = load_session(&text_path)?;
        let tokenizer = load_tokenizer(&tokenizer_path)?;

        let name = model_dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "clip".to_string());

        let mut model = Self {
            name,
            dimension: 0,
            vision: Mutex::new(vision),
            text: Mutex::new(text),
            tokenizer,
        };
        // 用一次空白图片推理来确定输出维度
        let probe = DynamicImage::new_rgb8(INPUT_SIZE, INPUT_SIZE);
        model.dimension = model.run_vision(&probe)?.len();
        info!("CLIP 模型加载完成，向量维度 {}", model.dimension);
        Ok(model)
    }

    /// 按 open_clip 的方式预处理图片：短边缩放到 224，中心裁剪，按通道标准化
    fn preprocess(image: &DynamicImage) -> Array4<f32> {
        let (w, h) = image.dimensions();
        let scale = INPUT_SIZE as f32 / w.min(h).max(1) as f32;
        let new_w = ((w as f32 * scale).round() as u32).max(INPUT_SIZE);
        let new_h = ((h as f32 * scale).round() as u32).max(INPUT_SIZE);
        let resized = image.resize_exact(new_w, new_h, FilterType::CatmullRom).to_rgb8();

        let left = (new_w - INPUT_SIZE) / 2;
        let top = (new_h - INPUT_SIZE) / 2;
        let size = INPUT_SIZE as usize;
        let mut array = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                let pixel = resized.get_pixel(left + x as u32, top + y as u32);
                for c in 0..3 {
                    array[[0, c, y, x]] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
                }
            }
        }
        array
    }

    fn run_vision(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let pixel_values = Self::preprocess(image);
        let tensor = Tensor::from_array(pixel_values).map_err(Error::model)?;

        let mut session = self.vision.lock();
        let input_name = session.inputs.first().map(|i| i.name.clone()).unwrap_or_default();
        let output_name = first_output(&session)?;
        let outputs = session.run(ort::inputs![input_name => tensor]).map_err(Error::model)?;
        let output = outputs.get(&output_name).ok_or_else(|| Error::model("图像编码器没有输出"))?;
        let (_, data) = output.try_extract_tensor::<f32>().map_err(Error::model)?;
        Ok(data.to_vec())
    }

    fn run_text(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self.tokenizer.encode(text, true).map_err(Error::model)?;
        let ids = encoding.get_ids().iter().map(|&id| id as i64).collect::<Vec<_>>();
        let mask = encoding.get_attention_mask().iter().map(|&m| m as i64).collect::<Vec<_>>();
        let len = ids.len();

        let ids: Array2<i64> = Array::from_shape_vec((1, len), ids).map_err(Error::model)?;
        let mask: Array2<i64> = Array::from_shape_vec((1, len), mask).map_err(Error::model)?;
        let ids = Tensor::from_array(ids).map_err(Error::model)?;
        let mask = Tensor::from_array(mask).map_err(Error::model)?;

        let mut session = self.text.lock();
        let names = session.inputs.iter().map(|i| i.name.clone()).collect::<Vec<_>>();
        let output_name = first_output(&session)?;
        // open_clip 导出的模型只有 input_ids，HuggingFace 导出的还需要 attention_mask
        let outputs = match names.as_slice() {
            [ids_name, mask_name, ..] => session
                .run(ort::inputs![ids_name.clone() => ids, mask_name.clone() => mask])
                .map_err(Error::model)?,
            [ids_name] => {
                session.run(ort::inputs![ids_name.clone() => ids]).map_err(Error::model)?
            }
            [] => return Err(Error::model("文本编码器没有输入")),
        };
        let output = outputs.get(&output_name).ok_or_else(|| Error::model("文本编码器没有输出"))?;
        let (_, data) = output.try_extract_tensor::<f32>().map_err(Error::model)?;
        Ok(data.to_vec())
    }
}

impl Embedder for ClipModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<Embedding> {
        let embedding = Embedding::new(self.run_vision(image)?)?;
        debug!("图像向量维度: {}", embedding.dim());
        Ok(embedding)
    }

    fn embed_text(&self, text: &str) -> Result<Embedding> {
        let text = check_text(text)?;
        Embedding::new(self.run_text(text)?)
    }
}

fn first_output(session: &Session) -> Result<String> {
    session.outputs.first().map(|o| o.name.clone()).ok_or_else(|| Error::model("模型没有输出"))
}

fn require(path: PathBuf, what: &'static str) -> Result<PathBuf> {
    if path.exists() { Ok(path) } else { Err(Error::ResourceMissing { what, path }) }
}

fn load_session(path: &Path) -> Result<Session> {
    debug!("加载 ONNX 模型: {}", path.display());
    Session::builder()
        .map_err(Error::model)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(Error::model)?
        .with_intra_threads(num_threads())
        .map_err(Error::model)?
        .commit_from_file(path)
        .map_err(Error::model)
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path).map_err(Error::model)?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::Fixed(CONTEXT_LENGTH),
        direction: PaddingDirection::Right,
        pad_to_multiple_of: None,
        pad_id: 0,
        pad_type_id: 0,
        pad_token: "<|endoftext|>".to_string(),
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: CONTEXT_LENGTH,
            strategy: TruncationStrategy::LongestFirst,
            stride: 0,
            direction: TruncationDirection::Right,
        }))
        .map_err(Error::model)?;
    Ok(tokenizer)
}

fn num_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
