use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aegis_types::{AttemptOutcome, GeoPoint, GuardianId, RankingConfig};

use crate::error::DirectoryError;

/// Score floors: reciprocals explode for very close or very fast
/// guardians, so distance and latency are floored before inversion.
const MIN_DISTANCE_METERS: f64 = 1.0;
const MIN_LATENCY_SECS: f64 = 1.0;

/// A registered volunteer responder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Guardian {
    pub id: GuardianId,
    pub position: GeoPoint,
    /// Quality rating in [0, 5], decayed on timeouts.
    pub rating: f64,
    /// Bounded moving average of acknowledgement latency.
    pub avg_response_secs: f64,
    pub available: bool,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Observations currently inside the latency window.
    latency_samples: u32,
}

impl Guardian {
    /// A fresh registrant: neutral mid-scale rating and a pessimistic
    /// latency guess until real outcomes arrive.
    pub fn new(id: GuardianId, position: GeoPoint) -> Self {
        let now = Utc::now();
        Self {
            id,
            position,
            rating: 2.5,
            avg_response_secs: 60.0,
            available: true,
            registered_at: now,
            last_seen: now,
            latency_samples: 0,
        }
    }
}

/// Directory of known guardians.
///
/// Guardians are created on registration and never deleted; a guardian
/// who leaves is marked unavailable so their rating history survives.
pub struct GuardianDirectory {
    cfg: RankingConfig,
    inner: RwLock<HashMap<GuardianId, Guardian>>,
}

impl GuardianDirectory {
    pub fn new(cfg: RankingConfig) -> Self {
        Self {
            cfg,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent upsert. Re-registering an existing guardian updates
    /// position and availability but preserves accumulated rating and
    /// latency history.
    pub fn register(&self, guardian: Guardian) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write().map_err(|_| DirectoryError::LockPoisoned)?;
        match inner.get_mut(&guardian.id) {
            Some(existing) => {
                existing.position = guardian.position;
                existing.available = guardian.available;
                existing.last_seen = Utc::now();
            }
            None => {
                tracing::debug!(guardian = %guardian.id, "guardian registered");
                inner.insert(guardian.id.clone(), guardian);
            }
        }
        Ok(())
    }

    /// Position update from a live guardian. Heartbeats for an id that
    /// was never registered are a data-integrity problem, not an
    /// implicit registration.
    pub fn heartbeat(&self, id: &GuardianId, position: GeoPoint) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write().map_err(|_| DirectoryError::LockPoisoned)?;
        let guardian = inner
            .get_mut(id)
            .ok_or_else(|| DirectoryError::UnknownGuardian(id.clone()))?;
        guardian.position = position;
        guardian.last_seen = Utc::now();
        Ok(())
    }

    pub fn set_available(&self, id: &GuardianId, available: bool) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write().map_err(|_| DirectoryError::LockPoisoned)?;
        let guardian = inner
            .get_mut(id)
            .ok_or_else(|| DirectoryError::UnknownGuardian(id.clone()))?;
        guardian.available = available;
        Ok(())
    }

    pub fn get(&self, id: &GuardianId) -> Result<Option<Guardian>, DirectoryError> {
        let inner = self.inner.read().map_err(|_| DirectoryError::LockPoisoned)?;
        Ok(inner.get(id).cloned())
    }

    /// Available guardians within `radius_meters` of `origin`, best
    /// candidates first, at most `limit` of them.
    ///
    /// Ordering is the composite score
    /// `w1 * (1/distance) + w2 * rating + w3 * (1/latency)`, with ties
    /// broken by lowest latency and then lexicographic id so selection
    /// is deterministic. An empty result is not an error; the caller
    /// decides what zero candidates means.
    pub fn nearest(
        &self,
        origin: GeoPoint,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<Guardian>, DirectoryError> {
        let inner = self.inner.read().map_err(|_| DirectoryError::LockPoisoned)?;

        let mut ranked: Vec<(f64, Guardian)> = inner
            .values()
            .filter(|g| g.available)
            .filter_map(|g| {
                let distance = origin.distance_meters(&g.position);
                (distance <= radius_meters).then(|| (self.score(g, distance), g.clone()))
            })
            .collect();

        ranked.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    a.avg_response_secs
                        .partial_cmp(&b.avg_response_secs)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        ranked.truncate(limit);
        Ok(ranked.into_iter().map(|(_, g)| g).collect())
    }

    /// Fold one dispatch outcome into the guardian's history. Ratings
    /// decay on timeout but the guardian is never auto-deregistered.
    pub fn record_outcome(
        &self,
        id: &GuardianId,
        outcome: AttemptOutcome,
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write().map_err(|_| DirectoryError::LockPoisoned)?;
        let guardian = inner
            .get_mut(id)
            .ok_or_else(|| DirectoryError::UnknownGuardian(id.clone()))?;

        match outcome {
            AttemptOutcome::Acked { latency_secs } => {
                let window = self.cfg.latency_window.max(1);
                let n = guardian.latency_samples.min(window - 1) + 1;
                guardian.avg_response_secs +=
                    (latency_secs - guardian.avg_response_secs) / n as f64;
                guardian.latency_samples = n;
                guardian.rating = (guardian.rating + self.cfg.rating_recovery).clamp(0.0, 5.0);
                guardian.last_seen = Utc::now();
            }
            AttemptOutcome::Declined => {
                // An explicit decline is an answer; it costs no rating.
                guardian.last_seen = Utc::now();
            }
            AttemptOutcome::TimedOut => {
                guardian.rating = (guardian.rating - self.cfg.rating_decay).clamp(0.0, 5.0);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize, DirectoryError> {
        let inner = self.inner.read().map_err(|_| DirectoryError::LockPoisoned)?;
        Ok(inner.len())
    }

    pub fn is_empty(&self) -> Result<bool, DirectoryError> {
        Ok(self.len()? == 0)
    }

    fn score(&self, guardian: &Guardian, distance_meters: f64) -> f64 {
        let distance = distance_meters.max(MIN_DISTANCE_METERS);
        let latency = guardian.avg_response_secs.max(MIN_LATENCY_SECS);
        self.cfg.distance_weight / distance
            + self.cfg.rating_weight * guardian.rating
            + self.cfg.latency_weight / latency
    }
}
