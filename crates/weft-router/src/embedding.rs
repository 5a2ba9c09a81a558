//! Embedding provider seam and the in-memory similarity index.

use indexmap::IndexMap;

/// Pure text → vector function. Caching is the provider's concern.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// A ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub name: String,
    pub score: f32,
}

/// Cosine-similarity index over handler description embeddings.
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    entries: IndexMap<String, Vec<f32>>,
    threshold: f32,
}

impl EmbeddingIndex {
    pub fn new(threshold: f32) -> Self {
        Self {
            entries: IndexMap::new(),
            threshold,
        }
    }

    pub fn register(&mut self, name: &str, vector: Vec<f32>) {
        self.entries.insert(name.to_string(), vector);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All candidates scoring at or above the threshold, best first.
    /// Ties keep registration order.
    pub fn rank(&self, query: &[f32]) -> Vec<Ranked> {
        let mut ranked: Vec<Ranked> = self
            .entries
            .iter()
            .map(|(name, vector)| Ranked {
                name: name.clone(),
                score: cosine(query, vector),
            })
            .filter(|r| r.score >= self.threshold)
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    pub fn search(&self, query: &[f32]) -> Option<Ranked> {
        self.rank(query).into_iter().next()
    }

    /// Best candidate among `allowed` names only.
    pub fn search_filtered(&self, query: &[f32], allowed: &[&str]) -> Option<Ranked> {
        self.rank(query)
            .into_iter()
            .find(|r| allowed.contains(&r.name.as_str()))
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
