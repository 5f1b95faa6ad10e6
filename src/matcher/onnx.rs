//! In-process matcher backed by an ONNX face-recognition model.
//!
//! No face detection is run: each image is centre-cropped and encoded as a
//! whole, so queries that demand detection are rejected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::{anyhow, Context};
use facegate_vision::model::{self, Embedding};
use facegate_vision::Session;
use image::DynamicImage;

use super::{Candidate, Distance, FaceMatcher, MatchOutcome, MatchQuery, MatcherError, Metric};
use crate::store::{IdentityStore, KnownIdentity};

/// Turns a face image into an embedding.
pub trait Encoder {
    fn encode(&mut self, img: &DynamicImage) -> anyhow::Result<Embedding>;
}

impl Encoder for Session {
    fn encode(&mut self, img: &DynamicImage) -> anyhow::Result<Embedding> {
        model::encode(self, img)
    }
}

fn encode_file<E: Encoder>(encoder: &mut E, path: &Path) -> anyhow::Result<Embedding> {
    let img = image::open(path).with_context(|| format!("reading {}", path.display()))?;
    encoder.encode(&img)
}

/// Reference embeddings keyed by path, invalidated on mtime change.
#[derive(Default)]
struct EmbeddingCache {
    entries: HashMap<PathBuf, (SystemTime, Embedding)>,
}

impl EmbeddingCache {
    fn get_or_encode<F>(&mut self, path: &Path, encode: F) -> anyhow::Result<Embedding>
    where
        F: FnOnce(&Path) -> anyhow::Result<Embedding>,
    {
        let mtime = std::fs::metadata(path)?.modified()?;
        if let Some((seen, emb)) = self.entries.get(path) {
            if *seen == mtime {
                return Ok(emb.clone());
            }
        }
        let emb = encode(path)?;
        self.entries.insert(path.to_path_buf(), (mtime, emb.clone()));
        Ok(emb)
    }

    /// Forget references that are no longer in the store.
    fn retain(&mut self, known: &[KnownIdentity]) {
        self.entries
            .retain(|path, _| known.iter().any(|k| &k.path == path));
    }
}

/// Closest reference to `probe` by cosine distance. References that cannot
/// be embedded are skipped.
fn nearest<F>(
    probe: &Embedding,
    references: Vec<KnownIdentity>,
    mut embed: F,
) -> Option<(f32, KnownIdentity)>
where
    F: FnMut(&Path) -> anyhow::Result<Embedding>,
{
    let mut best: Option<(f32, KnownIdentity)> = None;
    for known in references {
        let emb = match embed(&known.path) {
            Ok(emb) => emb,
            Err(e) => {
                log::warn!("skipping {}: {:#}", known.path.display(), e);
                continue;
            }
        };
        let d = probe.cosine_distance(&emb);
        log::debug!("{}: cosine distance {:.4}", known.label, d);
        if best.as_ref().map_or(true, |(bd, _)| d < *bd) {
            best = Some((d, known));
        }
    }
    best
}

struct Inner<E> {
    encoder: E,
    cache: EmbeddingCache,
}

pub struct OnnxMatcher<E = Session> {
    inner: Mutex<Inner<E>>,
}

impl OnnxMatcher<Session> {
    pub fn load(model_path: &Path) -> Result<Self, MatcherError> {
        Ok(Self::with_encoder(model::recognizer_session(model_path)?))
    }
}

impl<E: Encoder> OnnxMatcher<E> {
    pub fn with_encoder(encoder: E) -> Self {
        Self {
            inner: Mutex::new(Inner {
                encoder,
                cache: EmbeddingCache::default(),
            }),
        }
    }
}

impl<E: Encoder> FaceMatcher for OnnxMatcher<E> {
    fn find(&self, query: &MatchQuery<'_>) -> Result<MatchOutcome, MatcherError> {
        if query.enforce_detection {
            return Err(MatcherError::Unsupported(
                "the onnx backend does not detect faces; set enforce_detection = false".into(),
            ));
        }
        let references = IdentityStore::open(query.store)
            .list()
            .map_err(anyhow::Error::from)?;

        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("recognizer session poisoned"))?;
        let Inner { encoder, cache } = &mut *guard;
        cache.retain(&references);

        let probe = encode_file(encoder, query.image)?;
        let best = nearest(&probe, references, |path| {
            cache.get_or_encode(path, |p| encode_file(encoder, p))
        });

        Ok(MatchOutcome {
            top: best.map(|(value, known)| Candidate {
                label: known.label,
                identity: known.path,
                distance: Some(Distance {
                    metric: Metric::Cosine,
                    value: f64::from(value),
                }),
            }),
        })
    }
}
