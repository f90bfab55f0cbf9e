/// Popularity score aggregation.
///
/// An advertisement's score is a running counter: every comment, like and save
/// lifecycle transition emits one `ScoreEvent`, the aggregator looks up the
/// weight for its kind and applies the delta through a `ScoreCounter`. The
/// counter is the store's open transaction, so the delta commits or rolls back
/// together with the mutation that caused it.
///
/// Applying an event twice applies its weight twice. Callers emit events only
/// from real create/delete transitions.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::errors::ClassifiedsError;

/// A domain occurrence that adjusts an advertisement's popularity score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreEvent {
    CommentAdded { advertisement_id: String },
    CommentRemoved { advertisement_id: String },
    LikeAdded { advertisement_id: String },
    SaveAdded { advertisement_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreEventKind {
    CommentAdded,
    CommentRemoved,
    LikeAdded,
    SaveAdded,
}

impl fmt::Display for ScoreEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreEventKind::CommentAdded => write!(f, "comment_added"),
            ScoreEventKind::CommentRemoved => write!(f, "comment_removed"),
            ScoreEventKind::LikeAdded => write!(f, "like_added"),
            ScoreEventKind::SaveAdded => write!(f, "save_added"),
        }
    }
}

impl ScoreEvent {
    pub fn kind(&self) -> ScoreEventKind {
        match self {
            ScoreEvent::CommentAdded { .. } => ScoreEventKind::CommentAdded,
            ScoreEvent::CommentRemoved { .. } => ScoreEventKind::CommentRemoved,
            ScoreEvent::LikeAdded { .. } => ScoreEventKind::LikeAdded,
            ScoreEvent::SaveAdded { .. } => ScoreEventKind::SaveAdded,
        }
    }

    pub fn advertisement_id(&self) -> &str {
        match self {
            ScoreEvent::CommentAdded { advertisement_id }
            | ScoreEvent::CommentRemoved { advertisement_id }
            | ScoreEvent::LikeAdded { advertisement_id }
            | ScoreEvent::SaveAdded { advertisement_id } => advertisement_id,
        }
    }
}

/// Per-kind integer weights. Comment removal is the negated comment weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub comment: i64,
    pub like: i64,
    pub save: i64,
}

impl ScoreWeights {
    pub fn from_config(config: &EngineConfig) -> Self {
        ScoreWeights {
            comment: config.comment_weight,
            like: config.like_weight,
            save: config.save_weight,
        }
    }

    pub fn delta(&self, kind: ScoreEventKind) -> i64 {
        match kind {
            ScoreEventKind::CommentAdded => self.comment,
            ScoreEventKind::CommentRemoved => -self.comment,
            ScoreEventKind::LikeAdded => self.like,
            ScoreEventKind::SaveAdded => self.save,
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights::from_config(&EngineConfig::default())
    }
}

/// Atomic increment of one advertisement's stored score.
///
/// Implementations must not lose updates under concurrent increments of the
/// same id, and must fail when the advertisement does not exist.
#[async_trait]
pub trait ScoreCounter: Send {
    async fn increment(
        &mut self,
        advertisement_id: &str,
        delta: i64,
    ) -> Result<(), ClassifiedsError>;
}

/// Applies score events with a fixed weight table.
#[derive(Debug, Clone, Default)]
pub struct ScoreAggregator {
    weights: ScoreWeights,
}

impl ScoreAggregator {
    pub fn new(config: &EngineConfig) -> Self {
        ScoreAggregator {
            weights: ScoreWeights::from_config(config),
        }
    }

    pub fn with_weights(weights: ScoreWeights) -> Self {
        ScoreAggregator { weights }
    }

    /// Apply one event and return the delta written.
    ///
    /// Failures are returned unchanged so the caller's transaction rolls back.
    pub async fn apply<C>(
        &self,
        counter: &mut C,
        event: &ScoreEvent,
    ) -> Result<i64, ClassifiedsError>
    where
        C: ScoreCounter + ?Sized,
    {
        let kind = event.kind();
        let delta = self.weights.delta(kind);

        counter
            .increment(event.advertisement_id(), delta)
            .await
            .map_err(|e| {
                tracing::warn!(
                    advertisement_id = %event.advertisement_id(),
                    event = %kind,
                    error = %e,
                    "Score update failed"
                );
                e
            })?;

        tracing::debug!(
            advertisement_id = %event.advertisement_id(),
            event = %kind,
            delta,
            "Score updated"
        );
        Ok(delta)
    }
}
