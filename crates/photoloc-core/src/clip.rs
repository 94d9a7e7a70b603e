//! CLIP landmark scorer via ONNX Runtime.
//!
//! Runs the CLIP ViT-B/32 image encoder and compares the image embedding
//! against label embeddings precomputed offline with the matching text
//! encoder. Scores are `softmax(100 · cos(image, label))` across labels,
//! the same distribution CLIP's `logits_per_image` produces.

use crate::matcher::{softmax, LabelScorer, ScoreError};
use crate::types::Embedding;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (OpenAI CLIP preprocessing) ---
const CLIP_INPUT_SIZE: u32 = 224;
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_1];
const CLIP_LOGIT_SCALE: f32 = 100.0;

pub const CLIP_VISION_MODEL: &str = "clip_vision.onnx";
pub const CLIP_TEXT_EMBEDDINGS: &str = "clip_text_embeddings.json";

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("model file not found: {0}; export the CLIP image encoder to ONNX and place it in the model dir")]
    ModelNotFound(String),
    #[error("cannot read label embeddings {path}: {reason}")]
    Embeddings { path: String, reason: String },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// CLIP image encoder plus precomputed label embeddings.
pub struct ClipScorer {
    session: Mutex<Session>,
    labels: HashMap<String, Embedding>,
}

impl ClipScorer {
    /// Load `clip_vision.onnx` and `clip_text_embeddings.json` from `model_dir`.
    pub fn load_dir(model_dir: &Path) -> Result<Self, ClipError> {
        Self::load(
            &model_dir.join(CLIP_VISION_MODEL),
            &model_dir.join(CLIP_TEXT_EMBEDDINGS),
        )
    }

    pub fn load(vision_path: &Path, embeddings_path: &Path) -> Result<Self, ClipError> {
        if !vision_path.exists() {
            return Err(ClipError::ModelNotFound(vision_path.display().to_string()));
        }

        let labels = load_label_embeddings(embeddings_path)?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(vision_path)?;

        tracing::info!(
            path = %vision_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            labels = labels.len(),
            "loaded CLIP image encoder"
        );

        Ok(Self {
            session: Mutex::new(session),
            labels,
        })
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<Embedding, ScoreError> {
        let input = preprocess(image);

        let mut session = self
            .session
            .lock()
            .map_err(|_| ScoreError::InferenceFailed("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ScoreError::InferenceFailed(format!("image embedding: {e}")))?;

        let mut embedding = Embedding { values: raw.to_vec() };
        embedding.normalize();
        Ok(embedding)
    }
}

impl LabelScorer for ClipScorer {
    fn score(&self, image: &DynamicImage, labels: &[String]) -> Result<Vec<f32>, ScoreError> {
        let image_embedding = self.embed_image(image)?;

        let logits = labels
            .iter()
            .map(|label| {
                let text = self
                    .labels
                    .get(label)
                    .ok_or_else(|| ScoreError::MissingLabel(label.clone()))?;
                if text.values.len() != image_embedding.values.len() {
                    return Err(ScoreError::InferenceFailed(format!(
                        "label {label:?} embedding has {} dims, image has {}",
                        text.values.len(),
                        image_embedding.values.len()
                    )));
                }
                Ok(CLIP_LOGIT_SCALE * image_embedding.similarity(text))
            })
            .collect::<Result<Vec<f32>, ScoreError>>()?;

        Ok(softmax(&logits))
    }
}

fn load_label_embeddings(path: &Path) -> Result<HashMap<String, Embedding>, ClipError> {
    let err = |reason: String| ClipError::Embeddings {
        path: path.display().to_string(),
        reason,
    };
    let src = std::fs::read(path).map_err(|e| err(e.to_string()))?;
    parse_label_embeddings(&src).map_err(err)
}

/// Parse `{"label": [f32, ...], ...}`; keys are case-folded, vectors L2-normalized.
fn parse_label_embeddings(src: &[u8]) -> Result<HashMap<String, Embedding>, String> {
    let raw: HashMap<String, Vec<f32>> = serde_json::from_slice(src).map_err(|e| e.to_string())?;
    raw.into_iter()
        .map(|(label, values)| {
            if values.is_empty() {
                return Err(format!("label {label:?} has an empty embedding"));
            }
            let mut embedding = Embedding { values };
            embedding.normalize();
            Ok((crate::landmarks::fold(&label), embedding))
        })
        .collect()
}

/// Centre-crop the largest square, resize it to 224×224, CLIP-normalize into NCHW.
///
/// Cropping first keeps the intermediate buffer bounded by the source size,
/// whatever the aspect ratio.
fn preprocess(image: &DynamicImage) -> Array4<f32> {
    let size = CLIP_INPUT_SIZE;
    let (w, h) = (image.width(), image.height());
    let side = w.min(h).max(1);
    let x0 = w.saturating_sub(side) / 2;
    let y0 = h.saturating_sub(side) / 2;
    let rgb = image
        .crop_imm(x0, y0, side, side)
        .resize_exact(size, size, FilterType::CatmullRom)
        .to_rgb8();

    let n = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel.0[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (v - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }
    tensor
}
