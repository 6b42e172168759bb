use serde::Serialize;
use tracing::{debug, warn};

use crate::llm::Embedder;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyRecord {
    pub page_number: u32,
    pub character_features: String,
    pub objects: String,
    pub style: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub source_page_description: String,
    pub context_text: String,
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut left_norm = 0.0f64;
    let mut right_norm = 0.0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (*a as f64, *b as f64);
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    (dot / (left_norm.sqrt() * right_norm.sqrt())) as f32
}

#[derive(Debug, Default)]
pub struct ConsistencyMemory {
    records: Vec<ConsistencyRecord>,
}

impl ConsistencyMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: ConsistencyRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ConsistencyRecord] {
        &self.records
    }

    pub fn rank(&self, query: &[f32], k: usize) -> Vec<&ConsistencyRecord> {
        let mut scored: Vec<(f32, &ConsistencyRecord)> = self
            .records
            .iter()
            .map(|record| (cosine_similarity(query, &record.embedding), record))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(k).map(|(_, record)| record).collect()
    }

    fn first(&self, k: usize) -> Vec<&ConsistencyRecord> {
        self.records.iter().take(k).collect()
    }

    pub async fn retrieve_relevant_context(
        &self,
        embedder: Option<&dyn Embedder>,
        query: &str,
        k: usize,
    ) -> Vec<&ConsistencyRecord> {
        if self.records.is_empty() || k == 0 {
            return Vec::new();
        }
        let Some(embedder) = embedder else {
            return self.first(k);
        };
        match embedder.embed(query).await {
            Ok(embedding) => {
                let ranked = self.rank(&embedding, k);
                debug!(
                    "Retrieved {} of {} consistency records",
                    ranked.len(),
                    self.records.len()
                );
                ranked
            }
            Err(err) => {
                warn!("Query embedding failed, using unranked context: {}", err);
                self.first(k)
            }
        }
    }
}
