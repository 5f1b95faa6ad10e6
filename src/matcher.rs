//! Face matcher seam. The controller only ever sees [`MatchOutcome`]; each
//! adapter is responsible for turning its backend's output into one.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{MatcherBackend, MatcherConfig};

pub mod command;
pub mod onnx;

pub use command::{parse_find_output, CommandMatcher};
pub use onnx::OnnxMatcher;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("failed to run matcher {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("matcher exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("unreadable matcher output: {0}")]
    Output(String),
    #[error("unsupported matcher option: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// One query against the known-identity store.
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub image: &'a Path,
    pub store: &'a Path,
    pub model: &'a str,
    pub detector: &'a str,
    /// When false, a query without a detectable face is still matched.
    pub enforce_detection: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Cosine,
    Euclidean,
    EuclideanL2,
    Other(String),
}

impl Metric {
    /// Infer the metric from a result column name such as
    /// `Facenet_cosine` or `distance`.
    pub fn from_column(name: &str) -> Option<Metric> {
        let lower = name.to_ascii_lowercase();
        if lower.contains("cosine") {
            Some(Metric::Cosine)
        } else if lower.contains("euclidean_l2") || lower.contains("l2") {
            Some(Metric::EuclideanL2)
        } else if lower.contains("euclidean") {
            Some(Metric::Euclidean)
        } else if lower.contains("distance") {
            Some(Metric::Other(name.to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::Euclidean => f.write_str("euclidean"),
            Metric::EuclideanL2 => f.write_str("euclidean_l2"),
            Metric::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Distance {
    pub metric: Metric,
    /// As reported by the backend; compared against the threshold unrounded.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub label: String,
    /// Reference image the label was derived from.
    pub identity: PathBuf,
    pub distance: Option<Distance>,
}

/// Top-ranked candidate of a search, if there was one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub top: Option<Candidate>,
}

impl MatchOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn candidate(label: &str, distance: Option<f64>) -> Self {
        Self {
            top: Some(Candidate {
                label: label.to_string(),
                identity: PathBuf::from(format!("{label}.jpg")),
                distance: distance.map(|value| Distance {
                    metric: Metric::Cosine,
                    value,
                }),
            }),
        }
    }

    pub fn matched(&self) -> bool {
        self.top.is_some()
    }
}

pub trait FaceMatcher {
    fn find(&self, query: &MatchQuery<'_>) -> Result<MatchOutcome, MatcherError>;
}

impl<F> FaceMatcher for F
where
    F: Fn(&MatchQuery<'_>) -> Result<MatchOutcome, MatcherError>,
{
    fn find(&self, query: &MatchQuery<'_>) -> Result<MatchOutcome, MatcherError> {
        self(query)
    }
}

/// The backend selected in the config file.
pub enum ConfiguredMatcher {
    Command(CommandMatcher),
    Onnx(OnnxMatcher),
}

impl ConfiguredMatcher {
    pub fn from_config(cfg: &MatcherConfig) -> Result<Self, MatcherError> {
        Ok(match cfg.backend {
            MatcherBackend::Command => Self::Command(CommandMatcher::new(&cfg.command)?),
            MatcherBackend::Onnx => Self::Onnx(OnnxMatcher::load(&cfg.recognizer_model)?),
        })
    }
}

impl FaceMatcher for ConfiguredMatcher {
    fn find(&self, query: &MatchQuery<'_>) -> Result<MatchOutcome, MatcherError> {
        match self {
            Self::Command(m) => m.find(query),
            Self::Onnx(m) => m.find(query),
        }
    }
}
