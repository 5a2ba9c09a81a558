//! Deterministic TF-IDF embedding provider.
//!
//! Built from the corpus of handler descriptions at startup, so semantic
//! routing works hermetically with no network embedder. Vector
//! dimensions follow first-seen token order, which is stable for a given
//! organism definition.

use indexmap::IndexMap;

use crate::embedding::EmbeddingProvider;

#[derive(Debug)]
pub struct TfIdfProvider {
    /// token → (dimension, idf weight)
    vocabulary: IndexMap<String, (usize, f32)>,
}

impl TfIdfProvider {
    pub fn from_corpus(documents: &[&str]) -> Self {
        let mut document_frequency: IndexMap<String, usize> = IndexMap::new();
        for doc in documents {
            let mut seen = Vec::new();
            for token in tokenize(doc) {
                if !seen.contains(&token) {
                    *document_frequency.entry(token.clone()).or_insert(0) += 1;
                    seen.push(token);
                }
            }
        }

        let n_docs = documents.len().max(1) as f32;
        let vocabulary = document_frequency
            .into_iter()
            .enumerate()
            .map(|(dim, (token, df))| {
                let idf = (n_docs / (1.0 + df as f32)).ln() + 1.0;
                (token, (dim, idf))
            })
            .collect();
        Self { vocabulary }
    }

    pub fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }
}

impl EmbeddingProvider for TfIdfProvider {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.vocabulary.len()];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vector;
        }
        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }
        let total = tokens.len() as f32;
        for (token, count) in counts {
            if let Some(&(dim, idf)) = self.vocabulary.get(token) {
                vector[dim] = (count as f32 / total) * idf;
            }
        }
        vector
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
