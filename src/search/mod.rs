pub mod fields;
pub mod request;
pub mod trigram;

// Re-export key types for convenience
pub use fields::{AdvertisementField, CategoryField};
pub use request::{SearchParams, SearchRequest};
pub use trigram::TrigramSet;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::errors::ClassifiedsError;

/// An entity the ranking engine can score.
pub trait Searchable {
    /// Field selector for this entity's text attributes.
    type Field: Copy + std::fmt::Debug;

    /// Plural noun used in result messages ("categories", "advertisements").
    const LABEL: &'static str;

    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    /// Text of a field; None when the attribute is unset.
    fn field_text(&self, field: Self::Field) -> Option<&str>;
}

/// A text attribute plus its non-negative contribution weight.
///
/// A weight of zero excludes the field from both scoring and the match gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchableField<F> {
    pub field: F,
    pub weight: f64,
}

impl<F> SearchableField<F> {
    pub fn new(field: F, weight: f64) -> Result<Self, ClassifiedsError> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(ClassifiedsError::invalid(
                "weight",
                format!("Field weight must be a non-negative number, got {}.", weight),
            ));
        }
        Ok(SearchableField { field, weight })
    }
}

/// An entity paired with its similarity score for one query evaluation.
#[derive(Debug, Clone)]
pub struct Candidate<E> {
    pub entity: E,
    pub score: f64,
}

/// One page of a ranked (or browsed) result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedPage<E> {
    pub items: Vec<E>,
    /// 1-indexed page number
    pub page: u32,
    pub page_size: usize,
    /// Number of entities across all pages
    pub total: usize,
    /// Normalized query; None when the corpus was returned unranked
    pub query: Option<String>,
}

impl<E> RankedPage<E> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Weighted trigram ranking over an in-memory corpus snapshot.
///
/// Holds no state besides its tunables, so one engine is shared by every caller.
#[derive(Debug, Clone)]
pub struct RankingEngine {
    match_threshold: f64,
    page_size: usize,
}

impl RankingEngine {
    pub fn new(config: &EngineConfig) -> Self {
        RankingEngine {
            match_threshold: config.match_threshold,
            page_size: config.page_size.max(1),
        }
    }

    /// Rank `corpus` against the query in `params` and return the requested page.
    ///
    /// Without a query the corpus is returned whole, in the order the caller
    /// loaded it. With a query, entities that match on no configured field are
    /// dropped and the rest are ordered by score desc, created_at desc, id asc.
    /// An empty match set is `NotFound`; a page past the end is an empty page.
    pub fn rank<E: Searchable>(
        &self,
        corpus: Vec<E>,
        params: &SearchParams,
        fields: &[SearchableField<E::Field>],
    ) -> Result<RankedPage<E>, ClassifiedsError> {
        let query = match params.query.as_deref() {
            Some(q) => q,
            None => {
                let total = corpus.len();
                return Ok(RankedPage {
                    items: corpus,
                    page: 1,
                    page_size: total,
                    total,
                    query: None,
                });
            }
        };

        let query_grams = TrigramSet::new(query);
        let mut candidates: Vec<Candidate<E>> = corpus
            .into_iter()
            .filter_map(|entity| {
                self.score(&entity, &query_grams, fields)
                    .map(|score| Candidate { entity, score })
            })
            .collect();

        if candidates.is_empty() {
            return Err(ClassifiedsError::not_found(format!(
                "No {} found matching the query '{}'.",
                E::LABEL,
                query
            )));
        }

        candidates.sort_by(compare_candidates);

        tracing::debug!(
            query = %query,
            matched = candidates.len(),
            top_score = candidates[0].score,
            "Ranked candidates"
        );

        let total = candidates.len();
        let items = self.paginate(candidates, params.page).into_iter().map(|c| c.entity).collect();

        Ok(RankedPage {
            items,
            page: params.page,
            page_size: self.page_size,
            total,
            query: Some(query.to_string()),
        })
    }

    /// Weighted similarity of one entity, or None if no field passes the match gate.
    pub fn score<E: Searchable>(
        &self,
        entity: &E,
        query: &TrigramSet,
        fields: &[SearchableField<E::Field>],
    ) -> Option<f64> {
        let mut total = 0.0;
        let mut matched = false;

        for f in fields.iter().filter(|f| f.weight > 0.0) {
            let similarity = entity
                .field_text(f.field)
                .map(|text| query.similarity(&TrigramSet::new(text)))
                .unwrap_or(0.0);
            // pg_trgm `%` operator: similarity >= threshold
            if similarity > 0.0 && similarity >= self.match_threshold {
                matched = true;
            }
            total += f.weight * similarity;
        }

        matched.then_some(total)
    }

    /// Slice out a 1-indexed page of `page_size` items.
    pub fn paginate<T>(&self, items: Vec<T>, page: u32) -> Vec<T> {
        let offset = (page.max(1) as usize - 1).saturating_mul(self.page_size);
        items.into_iter().skip(offset).take(self.page_size).collect()
    }

    /// Paginate an already ordered listing, keeping the page metadata.
    pub fn page_of<T>(&self, items: Vec<T>, page: u32) -> RankedPage<T> {
        let total = items.len();
        RankedPage {
            items: self.paginate(items, page),
            page,
            page_size: self.page_size,
            total,
            query: None,
        }
    }
}

fn compare_candidates<E: Searchable>(a: &Candidate<E>, b: &Candidate<E>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.entity.created_at().cmp(&a.entity.created_at()))
        .then_with(|| a.entity.id().cmp(b.entity.id()))
}
