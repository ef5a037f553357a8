// Memory Selector — given working memory, a token budget, an optional task
// description, and a strategy, returns an ordered subset whose estimated
// token cost stays within budget (spec §4.5).
//
// Relevance scoring reuses the teacher's TF-IDF / cosine-similarity approach
// from `patterns/matcher.rs`, combined multiplicatively with confidence,
// recency decay, and an access-frequency boost per spec §4.5.

use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;

use super::block::{BlockType, MemoryBlock, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    Balanced,
    Recent,
    Relevant,
}

/// Per-type half-life (seconds) for the recency-decay term. Observations
/// and messages age out fastest; knowledge and task blocks are durable.
fn half_life_secs(block_type: BlockType) -> f64 {
    match block_type {
        BlockType::Observation => 600.0,
        BlockType::Message => 3_600.0,
        BlockType::Status => 1_800.0,
        BlockType::CycleState => 300.0,
        BlockType::History => 7_200.0,
        BlockType::Context => 3_600.0,
        BlockType::Task => 86_400.0,
        BlockType::Knowledge => 604_800.0,
        BlockType::File => 43_200.0,
    }
}

/// Estimated token cost of including a block's content in context. This is
/// an *estimate*, deliberately computed without reading the referenced
/// file — the selector must never load content it will not include (spec
/// §4.5 invariant).
pub fn estimate_tokens(block: &MemoryBlock) -> u32 {
    if let Some(value) = block.metadata.get("token_estimate").and_then(|v| v.as_u64()) {
        return value as u32;
    }
    match block.block_type {
        BlockType::File => 150,
        BlockType::Message => 80,
        BlockType::Observation => 40,
        BlockType::Task => 60,
        BlockType::Knowledge => 100,
        BlockType::Status => 20,
        BlockType::History => 60,
        BlockType::Context => 50,
        BlockType::CycleState => 20,
    }
}

pub struct MemorySelector {
    stemmer: Stemmer,
}

impl Default for MemorySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySelector {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    fn tokenize_and_stem(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(|word| {
                let clean: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
                self.stemmer.stem(&clean).to_string()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }

    fn bag_of_words(&self, tokens: &[String]) -> HashMap<String, f64> {
        let mut bow: HashMap<String, f64> = HashMap::new();
        for token in tokens {
            *bow.entry(token.clone()).or_insert(0.0) += 1.0;
        }
        let total: f64 = bow.values().sum();
        if total > 0.0 {
            for v in bow.values_mut() {
                *v /= total;
            }
        }
        bow
    }

    fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
        let mut dot = 0.0;
        for (k, va) in a {
            if let Some(vb) = b.get(k) {
                dot += va * vb;
            }
        }
        let norm_a: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
        let norm_b: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }

    /// Text searched for keyword overlap: the block's metadata "summary"
    /// field if present, else its id's semantic path (the part between
    /// scope:type: and any trailing hash) — we deliberately avoid loading
    /// file content here (spec invariant: lazy loading only for selected
    /// blocks).
    fn searchable_text(&self, block: &MemoryBlock) -> String {
        if let Some(summary) = block.metadata.get("summary").and_then(|v| v.as_str()) {
            return summary.to_string();
        }
        super::block::parse_id(&block.id)
            .map(|(_, _, path, _)| path.replace(['/', '_', '-'], " "))
            .unwrap_or_default()
    }

    /// Multiplicative relevance score (spec §4.5):
    /// confidence * recency_decay * keyword_overlap * access_boost.
    /// `keyword_overlap` defaults to 1.0 when there's no task description
    /// (so it acts as a neutral multiplier rather than zeroing everything
    /// out), matching the intent that relevance is only one input among
    /// several.
    pub fn relevance_score(
        &self,
        block: &MemoryBlock,
        task_description: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
        strategy: SelectionStrategy,
    ) -> f64 {
        let age = block.age_secs(now);
        let half_life = half_life_secs(block.block_type);
        let recency_decay = 0.5_f64.powf(age / half_life);

        let keyword_overlap = match task_description {
            Some(task) if !task.trim().is_empty() => {
                let task_bow = self.bag_of_words(&self.tokenize_and_stem(task));
                let block_text = self.searchable_text(block);
                let block_bow = self.bag_of_words(&self.tokenize_and_stem(&block_text));
                let similarity = Self::cosine_similarity(&task_bow, &block_bow);
                // Floor so unrelated-but-present blocks aren't zeroed out
                // entirely; pure keyword mismatch should demote, not erase.
                0.1 + 0.9 * similarity
            }
            _ => 1.0,
        };

        let access_boost = 1.0 + (block.access_count as f64).ln_1p() * 0.1;

        let (w_recency, w_keyword) = match strategy {
            SelectionStrategy::Balanced => (1.0, 1.0),
            SelectionStrategy::Recent => (2.0, 0.5),
            SelectionStrategy::Relevant => (0.5, 2.0),
        };

        block.confidence
            * recency_decay.powf(w_recency)
            * keyword_overlap.powf(w_keyword)
            * access_boost
    }

    /// Select an ordered subset of `blocks` whose estimated token cost stays
    /// within `budget`, following spec §4.5's ordered rule set.
    pub fn select<'a>(
        &self,
        blocks: &'a [&'a MemoryBlock],
        budget: u32,
        task_description: Option<&str>,
        strategy: SelectionStrategy,
    ) -> Vec<&'a MemoryBlock> {
        let now = chrono::Utc::now();
        let mut selected: Vec<&MemoryBlock> = Vec::new();
        let mut used: u32 = 0;
        let mut taken: std::collections::HashSet<&str> = std::collections::HashSet::new();

        // Rule 1: every critical block, unconditionally.
        for block in blocks.iter().filter(|b| b.priority == Priority::Critical) {
            selected.push(block);
            used += estimate_tokens(block);
            taken.insert(block.id.as_str());
        }

        // Rule 2: every pinned block that still fits.
        let mut pinned: Vec<&&MemoryBlock> = blocks
            .iter()
            .filter(|b| b.pinned && !taken.contains(b.id.as_str()))
            .collect();
        pinned.sort_by(|a, b| a.id.cmp(&b.id));
        for block in pinned {
            let cost = estimate_tokens(block);
            if used + cost <= budget {
                selected.push(block);
                used += cost;
                taken.insert(block.id.as_str());
            }
        }

        // Rule 3 & 4: within each remaining priority class (High, Medium,
        // Low in that order), rank by relevance/recency per strategy and
        // greedily add while respecting budget.
        for priority in [Priority::High, Priority::Medium, Priority::Low] {
            let mut candidates: Vec<(&MemoryBlock, f64)> = blocks
                .iter()
                .filter(|b| b.priority == priority && !taken.contains(b.id.as_str()))
                .map(|&b| (b, self.relevance_score(b, task_description, now, strategy)))
                .collect();
            candidates.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.id.cmp(&b.0.id))
            });

            for (block, _) in candidates {
                let cost = estimate_tokens(block);
                if used + cost > budget {
                    continue;
                }
                selected.push(block);
                used += cost;
                taken.insert(block.id.as_str());
            }
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::block::{BlockDetail, MemoryBlock, Scope};

    fn block(path: &str, priority: Priority, pinned: bool) -> MemoryBlock {
        let mut b = MemoryBlock::new(
            Scope::Personal,
            BlockType::File,
            path,
            None,
            priority,
            BlockDetail::Generic,
        );
        b.pinned = pinned;
        b
    }

    #[test]
    fn critical_always_included_s8_invariant_1() {
        let critical = block("critical.txt", Priority::Critical, false);
        let high = block("high.txt", Priority::High, false);
        let blocks = vec![&critical, &high];
        let selector = MemorySelector::new();

        // Budget covers only the critical block's cost.
        let budget = estimate_tokens(&critical);
        let selected = selector.select(&blocks, budget, None, SelectionStrategy::Balanced);
        assert!(selected.iter().any(|b| b.id == critical.id));
    }

    #[test]
    fn pinned_included_when_it_fits_invariant_2() {
        let critical = block("critical.txt", Priority::Critical, false);
        let pinned = block("pinned.txt", Priority::Low, true);
        let blocks = vec![&critical, &pinned];
        let selector = MemorySelector::new();

        let budget = estimate_tokens(&critical) + estimate_tokens(&pinned);
        let selected = selector.select(&blocks, budget, None, SelectionStrategy::Balanced);
        assert!(selected.iter().any(|b| b.id == pinned.id));
    }

    #[test]
    fn never_exceeds_budget_by_more_than_one_critical_block() {
        let critical = block("critical.txt", Priority::Critical, false);
        let crit_cost = estimate_tokens(&critical);
        let mut blocks_owned = vec![critical];
        for i in 0..20 {
            blocks_owned.push(block(&format!("h{i}.txt"), Priority::High, false));
        }
        let blocks: Vec<&MemoryBlock> = blocks_owned.iter().collect();

        let budget = 500;
        let selector = MemorySelector::new();
        let selected = selector.select(&blocks, budget, None, SelectionStrategy::Balanced);
        let total: u32 = selected.iter().map(|b| estimate_tokens(b)).sum();
        assert!(total <= budget + crit_cost);
    }

    #[test]
    fn s4_budget_enforcement_scenario() {
        // 1 critical block of 200 tokens, 10 high-priority blocks of 300
        // tokens each, budget 1000: selector returns critical + at most 2
        // high-priority blocks, combined estimate <= 1000.
        let mut critical = block("crit.txt", Priority::Critical, false);
        critical
            .metadata
            .insert("token_estimate".to_string(), serde_json::json!(200));

        let mut highs = Vec::new();
        for i in 0..10 {
            let mut h = block(&format!("h{i}.txt"), Priority::High, false);
            h.metadata
                .insert("token_estimate".to_string(), serde_json::json!(300));
            highs.push(h);
        }

        let mut all = vec![critical];
        all.extend(highs);
        let blocks: Vec<&MemoryBlock> = all.iter().collect();

        let selector = MemorySelector::new();
        let selected = selector.select(&blocks, 1000, None, SelectionStrategy::Balanced);

        let total: u32 = selected.iter().map(|b| estimate_tokens(b)).sum();
        assert!(total <= 1000);
        let high_count = selected
            .iter()
            .filter(|b| b.priority == Priority::High)
            .count();
        assert!(high_count <= 2);
        assert!(selected.iter().any(|b| b.priority == Priority::Critical));
    }

    #[test]
    fn deterministic_given_identical_inputs() {
        let mut blocks_owned = Vec::new();
        for i in 0..8 {
            blocks_owned.push(block(&format!("f{i}.txt"), Priority::Medium, false));
        }
        let blocks: Vec<&MemoryBlock> = blocks_owned.iter().collect();
        let selector = MemorySelector::new();

        let first = selector.select(&blocks, 400, Some("find the bug"), SelectionStrategy::Relevant);
        let second = selector.select(&blocks, 400, Some("find the bug"), SelectionStrategy::Relevant);

        let first_ids: Vec<&str> = first.iter().map(|b| b.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn relevant_strategy_favors_keyword_overlap() {
        let mut about_rust = block("rust.txt", Priority::Medium, false);
        about_rust
            .metadata
            .insert("summary".to_string(), serde_json::json!("ownership and borrowing in rust"));
        let mut about_cooking = block("cooking.txt", Priority::Medium, false);
        about_cooking
            .metadata
            .insert("summary".to_string(), serde_json::json!("how to bake sourdough bread"));

        let blocks = vec![&about_rust, &about_cooking];
        let selector = MemorySelector::new();
        let now = chrono::Utc::now();

        let rust_score = selector.relevance_score(
            &about_rust,
            Some("explain rust ownership"),
            now,
            SelectionStrategy::Relevant,
        );
        let cooking_score = selector.relevance_score(
            &about_cooking,
            Some("explain rust ownership"),
            now,
            SelectionStrategy::Relevant,
        );
        assert!(rust_score > cooking_score);
        let _ = blocks;
    }
}
