//! Plan rewrites
//!
//! Rule set applied to a fixpoint: predicate pushdown, column pruning,
//! join input swapping, redundant sort elimination, and fusing LIMIT over
//! ORDER BY into a top-k partial sort.

use std::collections::BTreeSet;

use crate::parser::ast::{BinaryOp, Expr, JoinType};
use crate::plan::{CatalogInfo, PlanNode};

/// Rule-loop iteration cap; plans converge in two or three passes
const MAX_PASSES: usize = 8;

/// Optimize a plan by rewriting to a fixpoint
pub fn optimize(mut plan: PlanNode, catalog: &dyn CatalogInfo) -> PlanNode {
    for _ in 0..MAX_PASSES {
        let rewritten = apply_once(plan.clone(), catalog);
        if rewritten == plan {
            return plan;
        }
        plan = rewritten;
    }
    plan
}

fn apply_once(plan: PlanNode, catalog: &dyn CatalogInfo) -> PlanNode {
    let plan = push_down_predicates(plan);
    let plan = fuse_top_k(plan);
    let plan = eliminate_redundant_sort(plan);
    let plan = reorder_joins(plan, catalog);
    prune_columns(plan)
}

// ============================================================================
// Predicate Pushdown
// ============================================================================

fn push_down_predicates(plan: PlanNode) -> PlanNode {
    match plan {
        PlanNode::Filter { child, predicate } => {
            let child = push_down_predicates(*child);
            push_filter(child, predicate)
        }
        other => map_children(other, push_down_predicates),
    }
}

/// Push one filter predicate as far down as it can go
fn push_filter(child: PlanNode, predicate: Expr) -> PlanNode {
    match child {
        // Adjacent filters merge into one conjunction.
        PlanNode::Filter {
            child,
            predicate: inner,
        } => push_filter(
            *child,
            Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(inner),
                right: Box::new(predicate),
            },
        ),
        // A filter above a projection of plain columns moves below it.
        PlanNode::Project {
            child,
            columns,
            distinct,
        } if columns_are_passthrough(&columns) && !distinct => {
            let filtered = push_filter(*child, predicate);
            PlanNode::Project {
                child: Box::new(filtered),
                columns,
                distinct,
            }
        }
        // Conjuncts that touch only one join side sink into that side.
        // Outer joins keep their predicates above the join: pushing below
        // would drop rows the outer side must preserve.
        PlanNode::Join {
            left,
            right,
            predicate: join_pred,
            kind: JoinType::Inner,
            algorithm,
        } => {
            let left_tables: BTreeSet<String> = left.bindings().into_iter().collect();
            let right_tables: BTreeSet<String> = right.bindings().into_iter().collect();

            let mut left_conjuncts = Vec::new();
            let mut right_conjuncts = Vec::new();
            let mut residual = Vec::new();
            for conjunct in split_conjuncts(predicate) {
                let used = tables_used(&conjunct);
                if !used.is_empty() && used.is_subset(&left_tables) {
                    left_conjuncts.push(conjunct);
                } else if !used.is_empty() && used.is_subset(&right_tables) {
                    right_conjuncts.push(conjunct);
                } else {
                    residual.push(conjunct);
                }
            }

            let left = match join_conjuncts(left_conjuncts) {
                Some(p) => Box::new(push_filter(*left, p)),
                None => left,
            };
            let right = match join_conjuncts(right_conjuncts) {
                Some(p) => Box::new(push_filter(*right, p)),
                None => right,
            };
            let join = PlanNode::Join {
                left,
                right,
                predicate: join_pred,
                kind: JoinType::Inner,
                algorithm,
            };
            match join_conjuncts(residual) {
                Some(p) => PlanNode::Filter {
                    child: Box::new(join),
                    predicate: p,
                },
                None => join,
            }
        }
        other => PlanNode::Filter {
            child: Box::new(other),
            predicate,
        },
    }
}

/// Split an AND tree into its conjuncts
fn split_conjuncts(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let mut out = split_conjuncts(*left);
            out.extend(split_conjuncts(*right));
            out
        }
        other => vec![other],
    }
}

fn join_conjuncts(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts.into_iter().reduce(|acc, e| Expr::Binary {
        op: BinaryOp::And,
        left: Box::new(acc),
        right: Box::new(e),
    })
}

/// Bindings referenced by an expression
fn tables_used(expr: &Expr) -> BTreeSet<String> {
    let mut columns = Vec::new();
    expr.collect_columns(&mut columns);
    columns.into_iter().filter_map(|c| c.table).collect()
}

/// True when every output column is a bare column reference
fn columns_are_passthrough(columns: &[super::OutputColumn]) -> bool {
    columns.iter().all(|c| matches!(c.expr, Expr::Column(_)))
}

// ============================================================================
// Top-K Fusion
// ============================================================================

/// LIMIT k over ORDER BY substitutes a partial sort bounded to the first
/// offset + k rows.
fn fuse_top_k(plan: PlanNode) -> PlanNode {
    match plan {
        PlanNode::Limit {
            child,
            limit,
            offset,
        } => match *child {
            PlanNode::Sort {
                child: sort_child,
                keys,
                top_k: None,
            } => PlanNode::Limit {
                child: Box::new(PlanNode::Sort {
                    child: Box::new(fuse_top_k(*sort_child)),
                    keys,
                    top_k: Some(limit + offset),
                }),
                limit,
                offset,
            },
            other => PlanNode::Limit {
                child: Box::new(fuse_top_k(other)),
                limit,
                offset,
            },
        },
        other => map_children(other, fuse_top_k),
    }
}

// ============================================================================
// Sort Elimination
// ============================================================================

/// A sort whose child already delivers the same ordering is dropped;
/// only the outer sort of a sort-over-sort pair survives.
fn eliminate_redundant_sort(plan: PlanNode) -> PlanNode {
    match plan {
        PlanNode::Sort {
            child,
            keys,
            top_k,
        } => {
            let child = eliminate_redundant_sort(*child);
            match child {
                PlanNode::Sort {
                    child: inner_child,
                    keys: inner_keys,
                    ..
                } => {
                    if inner_keys == keys {
                        PlanNode::Sort {
                            child: inner_child,
                            keys,
                            top_k,
                        }
                    } else {
                        PlanNode::Sort {
                            child: Box::new(PlanNode::Sort {
                                child: inner_child,
                                keys: inner_keys,
                                top_k: None,
                            }),
                            keys,
                            top_k,
                        }
                    }
                }
                other => {
                    if keys.is_empty() {
                        other
                    } else {
                        PlanNode::Sort {
                            child: Box::new(other),
                            keys,
                            top_k,
                        }
                    }
                }
            }
        }
        other => map_children(other, eliminate_redundant_sort),
    }
}

// ============================================================================
// Join Reordering
// ============================================================================

/// Inner hash joins build on the smaller input: when the left side is
/// estimated smaller than the right, the inputs swap so the small side
/// becomes the build side.
fn reorder_joins(plan: PlanNode, catalog: &dyn CatalogInfo) -> PlanNode {
    match plan {
        PlanNode::Join {
            left,
            right,
            predicate,
            kind: JoinType::Inner,
            algorithm,
        } => {
            let left = Box::new(reorder_joins(*left, catalog));
            let right = Box::new(reorder_joins(*right, catalog));
            let left_rows = estimate_rows(&left, catalog);
            let right_rows = estimate_rows(&right, catalog);
            if left_rows < right_rows {
                PlanNode::Join {
                    left: right,
                    right: left,
                    predicate,
                    kind: JoinType::Inner,
                    algorithm,
                }
            } else {
                PlanNode::Join {
                    left,
                    right,
                    predicate,
                    kind: JoinType::Inner,
                    algorithm,
                }
            }
        }
        other => map_children(other, |p| reorder_joins(p, catalog)),
    }
}

fn estimate_rows(plan: &PlanNode, catalog: &dyn CatalogInfo) -> u64 {
    match plan {
        PlanNode::Scan { table, .. } => catalog.row_count_of(table),
        // A filter is assumed to keep a quarter of its input.
        PlanNode::Filter { child, .. } => estimate_rows(child, catalog) / 4,
        PlanNode::Project { child, .. } | PlanNode::Sort { child, .. } => {
            estimate_rows(child, catalog)
        }
        PlanNode::Limit { child, limit, .. } => estimate_rows(child, catalog).min(*limit),
        PlanNode::Join { left, right, .. } => {
            estimate_rows(left, catalog).max(estimate_rows(right, catalog))
        }
        PlanNode::Aggregate { child, .. } => estimate_rows(child, catalog) / 10,
    }
}

// ============================================================================
// Column Pruning
// ============================================================================

/// Narrow each scan to the columns referenced above it
fn prune_columns(plan: PlanNode) -> PlanNode {
    let mut required: Option<BTreeSet<(String, String)>> = None;
    prune_rec(plan, &mut required)
}

fn prune_rec(plan: PlanNode, required: &mut Option<BTreeSet<(String, String)>>) -> PlanNode {
    match plan {
        PlanNode::Scan {
            table,
            binding,
            columns,
        } => {
            let columns = match required {
                // The root never starts at a scan in practice; keep all
                // columns when requirements are unknown.
                None => columns,
                Some(required) => {
                    let mut needed: Vec<String> = required
                        .iter()
                        .filter(|(b, _)| *b == binding)
                        .map(|(_, c)| c.clone())
                        .collect();
                    needed.sort();
                    if needed.is_empty() {
                        columns
                    } else {
                        Some(needed)
                    }
                }
            };
            PlanNode::Scan {
                table,
                binding,
                columns,
            }
        }
        PlanNode::Project {
            child,
            columns,
            distinct,
        } => {
            let mut needed = BTreeSet::new();
            for col in &columns {
                add_expr_columns(&col.expr, &mut needed);
            }
            let mut needed = Some(needed);
            PlanNode::Project {
                child: Box::new(prune_rec(*child, &mut needed)),
                columns,
                distinct,
            }
        }
        PlanNode::Aggregate {
            child,
            group_by,
            output,
            having,
            distinct,
        } => {
            let mut needed = BTreeSet::new();
            for expr in &group_by {
                add_expr_columns(expr, &mut needed);
            }
            for col in &output {
                add_expr_columns(&col.expr, &mut needed);
            }
            if let Some(having) = &having {
                add_expr_columns(having, &mut needed);
            }
            let mut needed = Some(needed);
            PlanNode::Aggregate {
                child: Box::new(prune_rec(*child, &mut needed)),
                group_by,
                output,
                having,
                distinct,
            }
        }
        PlanNode::Filter { child, predicate } => {
            if let Some(required) = required {
                add_expr_columns(&predicate, required);
            }
            PlanNode::Filter {
                child: Box::new(prune_rec(*child, required)),
                predicate,
            }
        }
        PlanNode::Join {
            left,
            right,
            predicate,
            kind,
            algorithm,
        } => {
            if let Some(required) = required {
                add_expr_columns(&predicate, required);
            }
            PlanNode::Join {
                left: Box::new(prune_rec(*left, required)),
                right: Box::new(prune_rec(*right, required)),
                predicate,
                kind,
                algorithm,
            }
        }
        PlanNode::Sort {
            child,
            keys,
            top_k,
        } => {
            if let Some(required) = required {
                for key in &keys {
                    add_expr_columns(&key.expr, required);
                }
            }
            PlanNode::Sort {
                child: Box::new(prune_rec(*child, required)),
                keys,
                top_k,
            }
        }
        PlanNode::Limit {
            child,
            limit,
            offset,
        } => PlanNode::Limit {
            child: Box::new(prune_rec(*child, required)),
            limit,
            offset,
        },
    }
}

fn add_expr_columns(expr: &Expr, out: &mut BTreeSet<(String, String)>) {
    let mut columns = Vec::new();
    expr.collect_columns(&mut columns);
    for col in columns {
        if let Some(table) = col.table {
            out.insert((table, col.column));
        }
    }
}

// ============================================================================
// Traversal Helper
// ============================================================================

/// Apply a rewrite to every child of a node
fn map_children(plan: PlanNode, f: impl Fn(PlanNode) -> PlanNode) -> PlanNode {
    match plan {
        PlanNode::Scan { .. } => plan,
        PlanNode::Filter { child, predicate } => PlanNode::Filter {
            child: Box::new(f(*child)),
            predicate,
        },
        PlanNode::Project {
            child,
            columns,
            distinct,
        } => PlanNode::Project {
            child: Box::new(f(*child)),
            columns,
            distinct,
        },
        PlanNode::Join {
            left,
            right,
            predicate,
            kind,
            algorithm,
        } => PlanNode::Join {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
            predicate,
            kind,
            algorithm,
        },
        PlanNode::Aggregate {
            child,
            group_by,
            output,
            having,
            distinct,
        } => PlanNode::Aggregate {
            child: Box::new(f(*child)),
            group_by,
            output,
            having,
            distinct,
        },
        PlanNode::Sort {
            child,
            keys,
            top_k,
        } => PlanNode::Sort {
            child: Box::new(f(*child)),
            keys,
            top_k,
        },
        PlanNode::Limit {
            child,
            limit,
            offset,
        } => PlanNode::Limit {
            child: Box::new(f(*child)),
            limit,
            offset,
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::grammar::parse;
    use crate::parser::Stmt;
    use crate::plan::build_select;
    use std::collections::HashMap;

    struct FakeCatalog {
        tables: HashMap<String, (Vec<String>, u64)>,
    }

    impl FakeCatalog {
        fn new() -> Self {
            let mut tables = HashMap::new();
            tables.insert(
                "employees".to_string(),
                (
                    vec!["emp_id".into(), "dept_id".into(), "salary".into()],
                    1000,
                ),
            );
            tables.insert(
                "departments".to_string(),
                (vec!["dept_id".into(), "name".into()], 10),
            );
            FakeCatalog { tables }
        }
    }

    impl CatalogInfo for FakeCatalog {
        fn columns_of(&self, table: &str) -> Option<Vec<String>> {
            self.tables.get(table).map(|(cols, _)| cols.clone())
        }

        fn row_count_of(&self, table: &str) -> u64 {
            self.tables.get(table).map(|(_, n)| *n).unwrap_or(0)
        }
    }

    fn optimized(sql: &str) -> PlanNode {
        let catalog = FakeCatalog::new();
        let stmt = match parse(sql).unwrap() {
            Stmt::Select(s) => s,
            other => panic!("expected SELECT, got {:?}", other),
        };
        optimize(build_select(&stmt, &catalog).unwrap(), &catalog)
    }

    fn find_scan<'a>(plan: &'a PlanNode, binding: &str) -> Option<&'a PlanNode> {
        match plan {
            PlanNode::Scan { binding: b, .. } if b == binding => Some(plan),
            PlanNode::Scan { .. } => None,
            PlanNode::Filter { child, .. }
            | PlanNode::Project { child, .. }
            | PlanNode::Aggregate { child, .. }
            | PlanNode::Sort { child, .. }
            | PlanNode::Limit { child, .. } => find_scan(child, binding),
            PlanNode::Join { left, right, .. } => {
                find_scan(left, binding).or_else(|| find_scan(right, binding))
            }
        }
    }

    #[test]
    fn test_predicate_pushes_into_join_side() {
        let plan = optimized(
            "SELECT e.emp_id FROM employees e \
             JOIN departments d ON e.dept_id = d.dept_id \
             WHERE e.salary > 50000",
        );
        // The salary filter must sit below the join, on the employees side.
        fn join_has_filter_child(plan: &PlanNode) -> bool {
            match plan {
                PlanNode::Join { left, right, .. } => {
                    let sides = [left.as_ref(), right.as_ref()];
                    sides.iter().any(|side| {
                        matches!(side, PlanNode::Filter { child, .. }
                            if matches!(child.as_ref(), PlanNode::Scan { binding, .. } if binding == "e"))
                    })
                }
                PlanNode::Filter { child, .. }
                | PlanNode::Project { child, .. }
                | PlanNode::Aggregate { child, .. }
                | PlanNode::Sort { child, .. }
                | PlanNode::Limit { child, .. } => join_has_filter_child(child),
                _ => false,
            }
        }
        assert!(join_has_filter_child(&plan), "plan: {:?}", plan);
    }

    #[test]
    fn test_adjacent_filters_merge() {
        let catalog = FakeCatalog::new();
        let inner = PlanNode::Filter {
            child: Box::new(PlanNode::Scan {
                table: "employees".into(),
                binding: "employees".into(),
                columns: None,
            }),
            predicate: Expr::column("a"),
        };
        let outer = PlanNode::Filter {
            child: Box::new(inner),
            predicate: Expr::column("b"),
        };
        let plan = optimize(outer, &catalog);
        match plan {
            PlanNode::Filter { predicate, child } => {
                assert!(matches!(
                    predicate,
                    Expr::Binary {
                        op: BinaryOp::And,
                        ..
                    }
                ));
                assert!(matches!(*child, PlanNode::Scan { .. }));
            }
            other => panic!("expected merged Filter, got {:?}", other.kind_name()),
        }
    }

    #[test]
    fn test_limit_fuses_partial_sort() {
        let plan = optimized("SELECT salary FROM employees ORDER BY salary LIMIT 10 OFFSET 2");
        fn find_top_k(plan: &PlanNode) -> Option<u64> {
            match plan {
                PlanNode::Sort { top_k, .. } => *top_k,
                PlanNode::Filter { child, .. }
                | PlanNode::Project { child, .. }
                | PlanNode::Aggregate { child, .. }
                | PlanNode::Limit { child, .. } => find_top_k(child),
                _ => None,
            }
        }
        assert_eq!(find_top_k(&plan), Some(12));
    }

    #[test]
    fn test_sort_over_sort_collapses() {
        let catalog = FakeCatalog::new();
        let scan = PlanNode::Scan {
            table: "employees".into(),
            binding: "employees".into(),
            columns: None,
        };
        let keys = vec![super::super::SortKey {
            expr: Expr::column("salary"),
            order: crate::parser::ast::SortOrder::Asc,
        }];
        let plan = PlanNode::Sort {
            child: Box::new(PlanNode::Sort {
                child: Box::new(scan),
                keys: keys.clone(),
                top_k: None,
            }),
            keys,
            top_k: None,
        };
        let plan = optimize(plan, &catalog);
        match plan {
            PlanNode::Sort { child, .. } => assert!(matches!(*child, PlanNode::Scan { .. })),
            other => panic!("expected single Sort, got {:?}", other.kind_name()),
        }
    }

    #[test]
    fn test_join_builds_on_small_side() {
        // departments (10 rows) should end up as the build (right) side.
        let plan = optimized(
            "SELECT e.emp_id, d.name FROM departments d \
             JOIN employees e ON d.dept_id = e.dept_id",
        );
        fn right_binding(plan: &PlanNode) -> Option<Vec<String>> {
            match plan {
                PlanNode::Join { right, .. } => Some(right.bindings()),
                PlanNode::Filter { child, .. }
                | PlanNode::Project { child, .. }
                | PlanNode::Aggregate { child, .. }
                | PlanNode::Sort { child, .. }
                | PlanNode::Limit { child, .. } => right_binding(child),
                _ => None,
            }
        }
        assert_eq!(right_binding(&plan), Some(vec!["d".to_string()]));
    }

    #[test]
    fn test_scan_pruned_to_used_columns() {
        let plan = optimized("SELECT emp_id FROM employees WHERE salary > 1");
        match find_scan(&plan, "employees") {
            Some(PlanNode::Scan {
                columns: Some(cols),
                ..
            }) => {
                assert!(cols.contains(&"emp_id".to_string()));
                assert!(cols.contains(&"salary".to_string()));
                assert!(!cols.contains(&"dept_id".to_string()));
            }
            other => panic!("expected pruned Scan, got {:?}", other),
        }
    }
}
