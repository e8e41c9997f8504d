use std::collections::BTreeMap;

use serde::Serialize;

use crate::result::GradingResult;

/// Per essay type statistics, folded one result at a time.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub essay_type: String,
    #[serde(rename = "total_essays")]
    pub count: u64,
    #[serde(rename = "average_score")]
    pub mean_score: f64,
    #[serde(rename = "score_distribution")]
    pub score_histogram: BTreeMap<String, u64>,
    #[serde(rename = "average_confidence")]
    pub mean_confidence: f64,
    #[serde(rename = "flagged_essays")]
    pub flagged_count: u64,
}

impl AggregateStats {
    /// Running mean weighted by the count before this result.
    pub fn update(&mut self, score: i64, confidence: i64, flagged: bool) {
        let n = self.count as f64;
        self.mean_score = (self.mean_score * n + score as f64) / (n + 1.0);
        self.mean_confidence = (self.mean_confidence * n + confidence as f64) / (n + 1.0);
        self.count += 1;
        *self.score_histogram.entry(score.to_string()).or_insert(0) += 1;
        if flagged {
            self.flagged_count += 1;
        }
    }

    /// Score to 2 decimals, confidence to 1.
    pub fn rounded(&self) -> Self {
        Self {
            mean_score: round_to(self.mean_score, 2),
            mean_confidence: round_to(self.mean_confidence, 1),
            ..self.clone()
        }
    }
}

fn round_to(x: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (x * scale).round() / scale
}

#[derive(Debug, Default)]
pub struct Aggregator {
    by_type: BTreeMap<String, AggregateStats>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: &GradingResult) {
        self.by_type
            .entry(result.essay_type.clone())
            .or_insert_with(|| AggregateStats {
                essay_type: result.essay_type.clone(),
                ..AggregateStats::default()
            })
            .update(result.essay_score, result.ai_confidence, result.essay_flagged);
    }

    /// Rounded statistics per essay type.
    pub fn finish(self) -> BTreeMap<String, AggregateStats> {
        self.by_type
            .into_iter()
            .map(|(k, v)| (k, v.rounded()))
            .collect()
    }
}

/// Folds results in the order given.
pub fn aggregate_by_essay_type<'a>(results: impl IntoIterator<Item = &'a GradingResult>) -> BTreeMap<String, AggregateStats> {
    let mut agg = Aggregator::new();
    for r in results {
        agg.add(r);
    }
    agg.finish()
}
