use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::Value,
};

/// Input edge length of SFace-style recognition models.
pub const FACE_SIZE: u32 = 112;

/// L2-normalised face embedding.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_raw(raw: Vec<f32>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let vector = if norm > 0.0 {
            raw.into_iter().map(|x| x / norm).collect()
        } else {
            Array1::from(raw)
        };
        Self { vector }
    }

    /// Cosine distance in [0, 2]; lower is closer.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        if self.vector.len() != other.vector.len() {
            return 2.0;
        }
        let sim = self.vector.dot(&other.vector).clamp(-1.0, 1.0);
        1.0 - sim
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn recognizer_session(path: &Path) -> Result<Session> {
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load recognition model {}", path.display()))
}

/// Centre square crop, the region a webcam face is most likely to occupy
/// when no detector is run.
pub fn center_square(img: &DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    let side = w.min(h);
    img.crop_imm((w - side) / 2, (h - side) / 2, side, side)
}

/// Encode a whole image as one face. Input is `[1, 3, 112, 112]` BGR in
/// `[0, 255]`.
pub fn encode(session: &mut Session, img: &DynamicImage) -> Result<Embedding> {
    let face = center_square(img)
        .resize_exact(FACE_SIZE, FACE_SIZE, FilterType::Triangle)
        .to_rgb8();

    let size = FACE_SIZE as usize;
    let input = Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        // channel 0 is blue
        face.get_pixel(x as u32, y as u32)[2 - c] as f32
    });
    let input_tensor = Value::from_array(input)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    let len = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if len == 0 || len > data.len() {
        anyhow::bail!("unexpected embedding shape {:?}", &shape[..]);
    }
    Ok(Embedding::from_raw(data[..len].to_vec()))
}
