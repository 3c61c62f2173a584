//! Feature-activation state machine over the history columns.
//!
//! The tracker owns two columns: per-window vote tallies
//! (`features-votes`) and acceptance heights (`features-state`). It never
//! locks or commits; the ledger hands it a [`Staging`] overlay of the
//! already-locked store and commits whatever it stages together with the
//! block indices.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, info, warn};

use strata_core::codec::{self, VoteTally};
use strata_core::error::{FeatureError, StoreError, StrataError};
use strata_core::features::{describe_all, ActivationSettings, FeatureSettings, FeatureStatus};
use strata_core::index::{Column, IndexRead, Staging};
use strata_core::types::{FeatureId, Height};

/// Outcome of a window-boundary state update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    /// Features recorded as accepted at this boundary.
    pub newly_accepted: Vec<FeatureId>,
    /// Features that reached quorum but are not implemented by this build.
    pub unimplemented_accepted: Vec<FeatureId>,
    /// Activated features not implemented by this build.
    pub unimplemented_activated: Vec<FeatureId>,
}

/// Windowed voting, acceptance and activation of protocol features.
#[derive(Debug, Clone)]
pub struct FeatureActivationTracker {
    activation: ActivationSettings,
    features: FeatureSettings,
}

impl FeatureActivationTracker {
    pub fn new(activation: ActivationSettings, features: FeatureSettings) -> Self {
        Self {
            activation,
            features,
        }
    }

    pub fn activation_settings(&self) -> ActivationSettings {
        self.activation
    }

    pub fn feature_settings(&self) -> &FeatureSettings {
        &self.features
    }

    /// Opening height of the window containing `height`.
    pub fn window_opening(&self, height: Height) -> Height {
        self.activation.window_opening(height)
    }

    /// Tally stored for the window opening at `opening`.
    pub fn votes_at_opening<R: IndexRead + ?Sized>(
        &self,
        store: &R,
        opening: Height,
    ) -> Result<VoteTally, StoreError> {
        match store.get(Column::FeatureVotes, &codec::height_key(opening))? {
            Some(bytes) => codec::decode_votes(&bytes),
            None => Ok(VoteTally::new()),
        }
    }

    /// Tally of the window containing `height`.
    pub fn votes_within_window<R: IndexRead + ?Sized>(
        &self,
        store: &R,
        height: Height,
    ) -> Result<VoteTally, StoreError> {
        self.votes_at_opening(store, self.window_opening(height))
    }

    /// Add `delta` to each feature's tally in the window opening at `opening`.
    ///
    /// Counts that return to zero are dropped, as is a tally left empty, so a
    /// `+1` followed by a `-1` for the same set leaves no trace.
    pub fn record_votes<R: IndexRead + ?Sized>(
        &self,
        staging: &mut Staging<'_, R>,
        opening: Height,
        features: &BTreeSet<FeatureId>,
        delta: i64,
    ) -> Result<(), StoreError> {
        if features.is_empty() || delta == 0 {
            return Ok(());
        }
        let mut tally = self.votes_at_opening(&*staging, opening)?;
        for feature in features {
            let count = tally.entry(*feature).or_insert(0);
            *count += delta;
            if *count == 0 {
                tally.remove(feature);
            }
        }

        let key = codec::height_key(opening);
        if tally.is_empty() {
            staging.delete(Column::FeatureVotes, key);
        } else {
            staging.put(Column::FeatureVotes, key, codec::encode_votes(&tally)?);
        }
        Ok(())
    }

    /// Run the acceptance/activation step for the boundary `height`.
    ///
    /// Returns [`FeatureError::UnsupportedActivated`] when an activated
    /// feature is not implemented and fail-stop is configured; the caller
    /// must then drop the staged changes.
    pub fn update_state<R: IndexRead + ?Sized>(
        &self,
        staging: &mut Staging<'_, R>,
        height: Height,
    ) -> Result<StateUpdate, StrataError> {
        if !self.activation.is_window_boundary(height) {
            return Err(FeatureError::NotWindowBoundary(height).into());
        }

        let min_votes = i64::try_from(self.activation.min_votes()).unwrap_or(i64::MAX);
        let tally = self.votes_within_window(&*staging, height)?;
        let accepted: Vec<FeatureId> = tally
            .iter()
            .filter(|(_, count)| **count >= min_votes)
            .map(|(id, _)| *id)
            .collect();

        let mut update = StateUpdate {
            unimplemented_accepted: self.features.unimplemented(&accepted),
            ..StateUpdate::default()
        };
        if !update.unimplemented_accepted.is_empty() {
            warn!(
                height,
                features = %describe_all(&update.unimplemented_accepted),
                "accepted features are not implemented by this node; update before they activate"
            );
        }

        let state = self.accepted_features(&*staging)?;
        let activated: Vec<FeatureId> = state
            .iter()
            .filter(|(_, accepted_at)| **accepted_at + self.activation.window_size() <= height)
            .map(|(id, _)| *id)
            .collect();
        update.unimplemented_activated = self.features.unimplemented(&activated);
        if !update.unimplemented_activated.is_empty() {
            error!(
                height,
                features = %describe_all(&update.unimplemented_activated),
                shutdown = self.features.auto_shutdown_on_unsupported_feature,
                "activated features are not implemented by this node"
            );
            if self.features.auto_shutdown_on_unsupported_feature {
                return Err(FeatureError::UnsupportedActivated {
                    height,
                    features: update.unimplemented_activated,
                }
                .into());
            }
        }

        for feature in accepted {
            if state.contains_key(&feature) {
                continue;
            }
            staging.put(
                Column::FeatureState,
                codec::feature_key(feature),
                codec::height_key(height),
            );
            update.newly_accepted.push(feature);
        }
        if !update.newly_accepted.is_empty() {
            info!(
                height,
                activation_height = self.activation.activation_height(height),
                features = %describe_all(&update.newly_accepted),
                "features accepted"
            );
        }
        Ok(update)
    }

    /// Undo the state update of the boundary `height` being discarded.
    ///
    /// Removes features recorded at exactly `height` and returns them. A
    /// non-boundary height records nothing, so nothing is removed.
    pub fn discard_state<R: IndexRead + ?Sized>(
        &self,
        staging: &mut Staging<'_, R>,
        height: Height,
    ) -> Result<Vec<FeatureId>, StoreError> {
        if !self.activation.is_window_boundary(height) {
            return Ok(Vec::new());
        }
        let reverted: Vec<FeatureId> = self
            .accepted_features(&*staging)?
            .into_iter()
            .filter(|(_, accepted_at)| *accepted_at == height)
            .map(|(id, _)| id)
            .collect();
        for feature in &reverted {
            staging.delete(Column::FeatureState, codec::feature_key(*feature));
        }
        if !reverted.is_empty() {
            info!(height, features = %describe_all(&reverted), "feature acceptance reverted");
        }
        Ok(reverted)
    }

    /// Every accepted feature with its acceptance height.
    pub fn accepted_features<R: IndexRead + ?Sized>(
        &self,
        store: &R,
    ) -> Result<BTreeMap<FeatureId, Height>, StoreError> {
        store
            .scan(Column::FeatureState)?
            .into_iter()
            .map(|(k, v)| Ok((codec::decode_feature(&k)?, codec::decode_height(&v)?)))
            .collect()
    }

    pub fn acceptance_height<R: IndexRead + ?Sized>(
        &self,
        store: &R,
        feature: FeatureId,
    ) -> Result<Option<Height>, StoreError> {
        store
            .get(Column::FeatureState, &codec::feature_key(feature))?
            .map(|v| codec::decode_height(&v))
            .transpose()
    }

    pub fn feature_status<R: IndexRead + ?Sized>(
        &self,
        store: &R,
        feature: FeatureId,
        current: Height,
    ) -> Result<FeatureStatus, StoreError> {
        let accepted_at = self.acceptance_height(store, feature)?;
        Ok(self.activation.status(accepted_at, current))
    }
}
