//! Fragment and asset types
//!
//! A fragment is the unit the orchestrator plays: a reference to a media
//! asset, the offset inside that asset where its playable range begins, and
//! a volume. Everything else about fragments (trimming, ownership, captions)
//! belongs to external collaborators.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timing::Ticks;

/// Opaque reference to a media asset understood by the asset resolver
///
/// The engine never interprets the locator; it round-trips it to the
/// resolver and into diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetLocator(pub String);

impl std::fmt::Display for AssetLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A playable unit: asset + playable-range start + volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Stable fragment identity
    pub fragment_id: Uuid,

    /// Where the asset lives, as understood by the resolver
    pub asset: AssetLocator,

    /// Offset into the asset where this fragment's playable range starts
    pub playback_start_ticks: Ticks,

    /// Fragment volume (0.0 - 1.0), applied on top of progress scaling
    pub volume: f32,
}

impl Fragment {
    /// Create a fragment with a fresh id
    pub fn new(asset: AssetLocator, playback_start_ticks: Ticks, volume: f32) -> Self {
        Self {
            fragment_id: Uuid::new_v4(),
            asset,
            playback_start_ticks,
            volume,
        }
    }
}

/// A resolved, openable media asset
///
/// Produced by the external asset resolver. Track flags let the orchestrator
/// reject assets that cannot participate in synchronized playback before a
/// player is built for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetHandle {
    /// Stable asset identity
    pub asset_id: Uuid,

    /// Locator this handle was resolved from
    pub locator: AssetLocator,

    /// Total asset duration in ticks
    pub duration_ticks: Ticks,

    /// Whether the asset carries a video track
    pub has_video: bool,

    /// Whether the asset carries an audio track
    pub has_audio: bool,
}

impl AssetHandle {
    /// Whether this asset can be attached for synchronized playback
    ///
    /// Requires both a video and an audio track, matching what the loop
    /// engine renders and mixes.
    pub fn is_playable(&self) -> bool {
        self.has_video && self.has_audio
    }
}
