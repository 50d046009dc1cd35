//! Platform Detector
//!
//! Scores a repository snapshot against a library of platform signatures
//! over five evidence channels (files, deps, folders, commits, content):
//!
//! ```text
//! score(sig) = Σ_channel w_channel · min(hits, sat_channel) / sat_channel
//! ```
//!
//! One canonical weight table applies by default; a signature may override
//! individual channel weights. A platform is detected iff its confidence is
//! at or above the threshold (0.30); when nothing crosses, the result is
//! exactly `unknown` with `confidence = max(scores)`. Multiple detections
//! yield an ordered list plus a hybrid-workflow hint from a fixed table of
//! known platform combinations.

pub mod hybrid;
pub mod score;
pub mod signature;
pub mod snapshot;

pub use hybrid::hybrid_hint;
pub use score::{ChannelEvidence, DetectionResult, Detector, PlatformMatch};
pub use signature::{
    builtin_signatures, ChannelSaturation, CompiledSignature, PlatformSignature, SignatureSet,
    WeightOverrides, Weights,
};
pub use snapshot::RepoSnapshot;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

/// Process-wide signature registry with atomic reload.
///
/// Readers grab the current `Arc<SignatureSet>`; a reload swaps the Arc, so
/// a scoring pass sees either the old or the new set, never a mix.
pub struct SignatureRegistry {
    inner: RwLock<Arc<SignatureSet>>,
}

impl SignatureRegistry {
    pub fn new(set: SignatureSet) -> Self {
        Self {
            inner: RwLock::new(Arc::new(set)),
        }
    }

    pub fn builtin() -> Result<Self> {
        Ok(Self::new(SignatureSet::compile(builtin_signatures())?))
    }

    /// Current signature set (cheap Arc clone).
    pub fn current(&self) -> Arc<SignatureSet> {
        Arc::clone(&self.inner.read())
    }

    /// Atomically replace the active set.
    pub fn reload(&self, set: SignatureSet) {
        *self.inner.write() = Arc::new(set);
    }
}
