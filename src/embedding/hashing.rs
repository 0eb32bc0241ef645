//! Offline hashing embedder
//!
//! Tokenizes, drops bilingual stop words, and hashes each term into a fixed
//! number of signed buckets weighted by log-scaled term frequency. Needs no
//! vocabulary or model files, so the same text always maps to the same
//! vector on every machine. Matching is purely lexical: only texts sharing
//! terms score as similar.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::Result;

const STOP_WORDS: &[&str] = &[
    // Vietnamese
    "và", "của", "là", "cho", "với", "có", "được", "này", "đó", "để",
    "trong", "những", "các", "một", "về", "từ", "như", "khi", "thì", "bạn",
    "không", "nếu", "nhưng", "cũng", "hoặc", "hay", "đã", "sẽ", "đang",
    // English
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
    "of", "with", "by", "from", "is", "are", "was", "were", "be", "been",
    "being", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "may", "might", "must", "shall", "can", "this",
    "that", "these", "those", "it", "its", "you", "your", "we", "our",
    "they", "their", "he", "she", "him", "her", "his",
];

/// Model id reported by the hashing embedder
pub const HASHING_MODEL: &str = "feature-hashing";

#[derive(Debug, Clone, Default)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous embedding; never fails.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for term in tokenize(text) {
            *counts.entry(term).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        for (term, count) in counts {
            let (bucket, sign) = self.bucket(&term);
            let weight = 1.0 + (count as f32).ln();
            vector[bucket] += sign * weight;
        }

        normalize(&mut vector);
        vector
    }

    fn bucket(&self, term: &str) -> (usize, f32) {
        let digest = Sha256::digest(term.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(bytes);

        let bucket = (hash % EMBEDDING_DIM as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn model(&self) -> &str {
        HASHING_MODEL
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
}
