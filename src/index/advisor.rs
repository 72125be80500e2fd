//! Index advisor
//!
//! Cost model choosing between a full scan and index-driven strategies.
//! Selectivity starts from operator heuristics and is refined by observed
//! execution feedback through an exponentially weighted moving average
//! keyed by (column, operator).

use std::collections::HashMap;

// ============================================================================
// Inputs
// ============================================================================

/// Statistics the advisor knows about one index
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub index_name: String,
    pub column_name: String,
    pub cardinality: u64,
    pub is_composite: bool,
}

/// One costed strategy
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub strategy: Strategy,
    pub estimated_cost: f64,
    pub estimated_rows: u64,
    pub estimated_speedup: f64,
    pub indexes_used: Vec<String>,
}

/// Access strategies the advisor can recommend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FullScan,
    IndexPoint,
    IndexRange,
    CompositeIndex,
    IndexIntersection,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::FullScan => "full_scan",
            Strategy::IndexPoint => "index_point",
            Strategy::IndexRange => "index_range",
            Strategy::CompositeIndex => "composite_index",
            Strategy::IndexIntersection => "index_intersection",
        }
    }
}

/// The advisor's pick plus the ranked estimates behind it
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub strategy: Strategy,
    pub primary_index: Option<String>,
    pub confidence: f64,
    pub estimates: Vec<CostEstimate>,
}

// ============================================================================
// Cost Constants
// ============================================================================

/// Per-lookup index overhead (cache misses, pointer chasing)
const INDEX_LOOKUP_OVERHEAD: f64 = 150.0;
/// Per-row cost of a full scan (predicate evaluation dominates)
const SCAN_COST_PER_ROW: f64 = 2.0;
/// Log factor for single-column B-tree traversal
const BTREE_LOG_FACTOR: f64 = 2.0;
/// Log factor for composite traversal
const COMPOSITE_LOG_FACTOR: f64 = 2.5;
/// Fixed overhead per additional intersected predicate
const INTERSECTION_OVERHEAD: f64 = 200.0;
/// Above this selectivity an index loses to the scan outright
const SELECTIVITY_GUARD: f64 = 0.5;
/// EWMA learning rate for observed selectivities
const LEARNING_ALPHA: f64 = 0.3;

// ============================================================================
// Advisor
// ============================================================================

/// Cost-based advisor with per-(column, operator) selectivity memory
#[derive(Debug, Default)]
pub struct IndexAdvisor {
    learned: HashMap<String, LearnedPattern>,
}

#[derive(Debug, Clone)]
struct LearnedPattern {
    selectivity: f64,
    executions: u64,
}

impl IndexAdvisor {
    pub fn new() -> Self {
        IndexAdvisor::default()
    }

    /// Estimate the selectivity of `column op value` given index
    /// cardinality, preferring the learned value when one exists.
    pub fn estimate_selectivity(&self, column: &str, op: &str, cardinality: u64) -> f64 {
        if let Some(pattern) = self.learned.get(&pattern_key(column, op)) {
            return pattern.selectivity;
        }
        let card = cardinality.max(1) as f64;
        match op {
            "=" | "==" => 1.0 / card,
            "<" | ">" | "<=" | ">=" => 0.25,
            "!=" | "<>" => 1.0 - 1.0 / card,
            _ => 0.5,
        }
    }

    /// Cost every applicable strategy for a single predicate
    pub fn estimate_costs(
        &self,
        column: &str,
        op: &str,
        table_size: u64,
        indexes: &[IndexStats],
    ) -> Vec<CostEstimate> {
        let mut costs = vec![full_scan_cost(table_size)];

        for index in indexes.iter().filter(|i| i.column_name == column) {
            let selectivity = self.estimate_selectivity(column, op, index.cardinality);
            let strategy = if index.is_composite {
                Strategy::CompositeIndex
            } else if matches!(op, "<" | ">" | "<=" | ">=") {
                Strategy::IndexRange
            } else {
                Strategy::IndexPoint
            };
            costs.push(indexed_cost(strategy, index, table_size, selectivity));
        }
        costs
    }

    /// Cost an AND of several predicates answered by intersecting one
    /// index per predicate: per-predicate traversals, a fixed overhead per
    /// merge, and the cumulative intermediate set sizes.
    pub fn estimate_intersection_cost(
        &self,
        predicates: &[(String, String)],
        table_size: u64,
        indexes: &[IndexStats],
    ) -> Option<CostEstimate> {
        if predicates.len() < 2 {
            return None;
        }

        let mut used = Vec::new();
        let mut selectivities = Vec::new();
        for (column, op) in predicates {
            let index = indexes
                .iter()
                .find(|i| !i.is_composite && i.column_name == *column)?;
            used.push(index.index_name.clone());
            selectivities.push(self.estimate_selectivity(column, op, index.cardinality));
        }
        // Most selective predicate first keeps the intermediates small.
        selectivities.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let n = table_size as f64;
        let log_cost = INDEX_LOOKUP_OVERHEAD + BTREE_LOG_FACTOR * log2_ceil(table_size);
        let mut cost = 0.0;
        let mut running = 1.0;
        let mut merge_work = 0.0;
        for (i, sel) in selectivities.iter().enumerate() {
            cost += log_cost + (n * sel).ceil();
            running *= sel;
            if i > 0 {
                merge_work += (n * running).ceil();
            }
        }
        cost += INTERSECTION_OVERHEAD * (predicates.len() as f64 - 1.0) + merge_work;

        let estimated_rows = (n * running).ceil() as u64;
        Some(CostEstimate {
            strategy: Strategy::IndexIntersection,
            estimated_cost: cost,
            estimated_rows,
            estimated_speedup: full_scan_cost(table_size).estimated_cost / cost.max(1.0),
            indexes_used: used,
        })
    }

    /// Pick the minimum-cost strategy and report confidence in the pick
    pub fn recommend(
        &self,
        column: &str,
        op: &str,
        table_size: u64,
        indexes: &[IndexStats],
    ) -> Recommendation {
        let mut estimates = self.estimate_costs(column, op, table_size, indexes);
        estimates.sort_by(|a, b| a.estimated_cost.partial_cmp(&b.estimated_cost).unwrap());

        let best = estimates.first().cloned().unwrap_or_else(|| full_scan_cost(table_size));
        let full_cost = full_scan_cost(table_size).estimated_cost;
        let best_indexed = estimates
            .iter()
            .filter(|c| c.strategy != Strategy::FullScan)
            .map(|c| c.estimated_cost)
            .fold(f64::INFINITY, f64::min);

        let confidence = if full_cost > 0.0 && best_indexed < full_cost {
            ((full_cost - best_indexed) / full_cost).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Recommendation {
            strategy: best.strategy,
            primary_index: best.indexes_used.first().cloned(),
            confidence,
            estimates,
        }
    }

    /// Feed observed execution back into the selectivity memory
    pub fn learn_from_execution(
        &mut self,
        column: &str,
        op: &str,
        rows_examined: u64,
        rows_matched: u64,
    ) {
        if rows_examined == 0 {
            return;
        }
        let observed = rows_matched as f64 / rows_examined as f64;
        let pattern = self
            .learned
            .entry(pattern_key(column, op))
            .or_insert(LearnedPattern {
                selectivity: observed,
                executions: 0,
            });
        if pattern.executions > 0 {
            pattern.selectivity =
                (1.0 - LEARNING_ALPHA) * pattern.selectivity + LEARNING_ALPHA * observed;
        }
        pattern.executions += 1;
    }

    /// Number of learned (column, operator) patterns
    pub fn learned_patterns(&self) -> usize {
        self.learned.len()
    }
}

// ============================================================================
// Cost Functions
// ============================================================================

/// Baseline estimate every indexed strategy competes against
pub fn full_scan_cost(table_size: u64) -> CostEstimate {
    CostEstimate {
        strategy: Strategy::FullScan,
        estimated_cost: table_size as f64 * SCAN_COST_PER_ROW,
        estimated_rows: table_size,
        estimated_speedup: 1.0,
        indexes_used: Vec::new(),
    }
}

fn indexed_cost(
    strategy: Strategy,
    index: &IndexStats,
    table_size: u64,
    selectivity: f64,
) -> CostEstimate {
    // Selectivity guard: past half the table the traversal overhead can
    // never pay off, so the estimate degrades to the scan.
    if selectivity > SELECTIVITY_GUARD {
        return full_scan_cost(table_size);
    }

    let log_factor = if strategy == Strategy::CompositeIndex {
        COMPOSITE_LOG_FACTOR
    } else {
        BTREE_LOG_FACTOR
    };
    let selectivity = if strategy == Strategy::CompositeIndex {
        selectivity * selectivity
    } else {
        selectivity
    };

    let matching = (table_size as f64 * selectivity).ceil().max(1.0);
    let cost = INDEX_LOOKUP_OVERHEAD + log_factor * log2_ceil(table_size) + matching;

    CostEstimate {
        strategy,
        estimated_cost: cost,
        estimated_rows: matching as u64,
        estimated_speedup: full_scan_cost(table_size).estimated_cost / cost.max(1.0),
        indexes_used: vec![index.index_name.clone()],
    }
}

fn log2_ceil(n: u64) -> f64 {
    (n.max(2) as f64).log2().ceil()
}

fn pattern_key(column: &str, op: &str) -> String {
    format!("{}:{}", column, op)
}

// ============================================================================
// Tests
// ============================================================================
