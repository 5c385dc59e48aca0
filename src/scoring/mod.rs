//! Scoring oracle seam and the swappable model snapshot.
//!
//! The oracle contract is a pure function over feature vectors: given a
//! batch, return the indices considered anomalous, deterministically for
//! a fixed trained model, and nothing at all when no model is loaded.
//!
//! A trained model is an immutable [`ModelSnapshot`]; [`ModelHandle`]
//! publishes snapshots atomically so a retrain never blocks or corrupts
//! in-flight reads — readers always see a complete snapshot or none.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::FeatureVector;

/// Default z-score above which a vector is flagged.
pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// The scoring oracle: feature vectors in, flagged indices out.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &[FeatureVector]) -> Vec<usize>;
}

/// Immutable trained-model parameters: per-feature mean and standard
/// deviation plus the outlier threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    means: [f64; 4],
    stds: [f64; 4],
    threshold: f64,
}

impl ModelSnapshot {
    /// Fit a snapshot from historical feature vectors. Returns `None`
    /// for an empty history.
    pub fn fit(history: &[FeatureVector], threshold: f64) -> Option<Self> {
        if history.is_empty() {
            return None;
        }

        let n = history.len() as f64;
        let mut means = [0.0; 4];
        let mut stds = [0.0; 4];

        for vector in history {
            for (sum, value) in means.iter_mut().zip(vector.as_array()) {
                *sum += value;
            }
        }
        for mean in &mut means {
            *mean /= n;
        }

        for vector in history {
            for ((var, value), mean) in stds.iter_mut().zip(vector.as_array()).zip(means) {
                *var += (value - mean).powi(2);
            }
        }
        for std in &mut stds {
            *std = (*std / n).sqrt();
        }

        Some(Self {
            means,
            stds,
            threshold,
        })
    }

    /// Largest per-feature |z-score|; constant features contribute 0.
    fn deviation(&self, vector: &FeatureVector) -> f64 {
        vector
            .as_array()
            .iter()
            .zip(self.means)
            .zip(self.stds)
            .map(|((&value, mean), std)| {
                if std > f64::EPSILON {
                    ((value - mean) / std).abs()
                } else {
                    0.0
                }
            })
            .fold(0.0, f64::max)
    }

    fn is_outlier(&self, vector: &FeatureVector) -> bool {
        self.deviation(vector) > self.threshold
    }
}

/// Shared handle to the current model snapshot.
///
/// The lock guards only the `Arc` pointer: `load` clones it and `swap`
/// replaces it, so scoring runs entirely on an owned snapshot.
pub struct ModelHandle {
    snapshot: RwLock<Option<Arc<ModelSnapshot>>>,
}

impl ModelHandle {
    /// Handle with no model loaded; scores nothing.
    pub fn empty() -> Self {
        Self {
            snapshot: RwLock::new(None),
        }
    }

    pub fn with_snapshot(snapshot: ModelSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(Arc::new(snapshot))),
        }
    }

    /// Handle loaded from a serialized snapshot file. A missing or
    /// unreadable file yields an empty handle, matching the oracle
    /// contract for "no trained model".
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<ModelSnapshot>(&bytes) {
                Ok(snapshot) => {
                    info!(path = %path.display(), "Loaded model snapshot");
                    Self::with_snapshot(snapshot)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable model snapshot, running without a model");
                    Self::empty()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No model snapshot found, running without a model");
                Self::empty()
            }
        }
    }

    /// Current snapshot, if one is loaded.
    pub fn load(&self) -> Option<Arc<ModelSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Publish a new snapshot; in-flight readers keep the one they hold.
    pub fn swap(&self, snapshot: ModelSnapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(snapshot));
    }
}

impl Scorer for ModelHandle {
    fn score(&self, features: &[FeatureVector]) -> Vec<usize> {
        let Some(model) = self.load() else {
            return Vec::new();
        };

        features
            .iter()
            .enumerate()
            .filter(|(_, vector)| model.is_outlier(vector))
            .map(|(index, _)| index)
            .collect()
    }
}
