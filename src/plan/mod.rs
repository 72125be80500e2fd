//! Logical plans
//!
//! Plan nodes are a tagged union built from a validated SELECT statement.
//! Column references are fully qualified against the catalog during
//! construction, and `SELECT *` expands to the concrete columns of every
//! table in scope before any rewrite runs.

pub mod optimize;

pub use optimize::optimize;

use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::{ColumnRef, Expr, JoinType, ResultColumn, SelectStmt, SortOrder};

// ============================================================================
// Catalog Access
// ============================================================================

/// What the planner needs to know about tables
pub trait CatalogInfo {
    /// Column names of a table in declaration order, None if unknown
    fn columns_of(&self, table: &str) -> Option<Vec<String>>;

    /// Visible row count estimate for join ordering
    fn row_count_of(&self, table: &str) -> u64;
}

// ============================================================================
// Plan Nodes
// ============================================================================

/// Join algorithms available to the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAlgorithm {
    Hash,
}

/// One output column: the expression and its result name
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub expr: Expr,
    pub name: String,
}

/// Sort key
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub order: SortOrder,
}

/// Logical plan node
#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    /// Read every visible row of a table
    Scan {
        table: String,
        binding: String,
        /// Columns the scan must produce; None means all
        columns: Option<Vec<String>>,
    },
    /// Keep rows satisfying the predicate
    Filter {
        child: Box<PlanNode>,
        predicate: Expr,
    },
    /// Evaluate output expressions, optionally deduplicating rows
    Project {
        child: Box<PlanNode>,
        columns: Vec<OutputColumn>,
        distinct: bool,
    },
    /// Combine two inputs on an equi-join predicate
    Join {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        predicate: Expr,
        kind: JoinType,
        algorithm: JoinAlgorithm,
    },
    /// Group rows and fold aggregates
    Aggregate {
        child: Box<PlanNode>,
        group_by: Vec<Expr>,
        output: Vec<OutputColumn>,
        having: Option<Expr>,
        distinct: bool,
    },
    /// Order rows by the sort keys; `top_k` bounds the result for fused
    /// LIMIT + ORDER BY
    Sort {
        child: Box<PlanNode>,
        keys: Vec<SortKey>,
        top_k: Option<u64>,
    },
    /// Skip `offset` rows and emit at most `limit`
    Limit {
        child: Box<PlanNode>,
        limit: u64,
        offset: u64,
    },
}

impl PlanNode {
    /// Short node name for error context
    pub fn kind_name(&self) -> &'static str {
        match self {
            PlanNode::Scan { .. } => "Scan",
            PlanNode::Filter { .. } => "Filter",
            PlanNode::Project { .. } => "Project",
            PlanNode::Join { .. } => "Join",
            PlanNode::Aggregate { .. } => "Aggregate",
            PlanNode::Sort { .. } => "Sort",
            PlanNode::Limit { .. } => "Limit",
        }
    }

    /// Tables (bindings) this subtree reads
    pub fn bindings(&self) -> Vec<String> {
        match self {
            PlanNode::Scan { binding, .. } => vec![binding.clone()],
            PlanNode::Filter { child, .. }
            | PlanNode::Project { child, .. }
            | PlanNode::Aggregate { child, .. }
            | PlanNode::Sort { child, .. }
            | PlanNode::Limit { child, .. } => child.bindings(),
            PlanNode::Join { left, right, .. } => {
                let mut out = left.bindings();
                out.extend(right.bindings());
                out
            }
        }
    }
}

// ============================================================================
// Scopes
// ============================================================================

#[derive(Debug, Clone)]
struct TableScope {
    binding: String,
    table: String,
    columns: Vec<String>,
}

/// Stable display label for an expression used as an output column
pub fn expr_label(expr: &Expr) -> String {
    match expr {
        Expr::Column(col) => col.column.clone(),
        Expr::Aggregate { func, arg } => match arg {
            None => format!("{}(*)", func.name()),
            Some(arg) => format!("{}({})", func.name(), expr_label(arg)),
        },
        Expr::Literal(lit) => match lit {
            crate::parser::ast::Literal::Null => "NULL".to_string(),
            crate::parser::ast::Literal::Integer(i) => i.to_string(),
            crate::parser::ast::Literal::Float(f) => f.to_string(),
            crate::parser::ast::Literal::String(s) => s.clone(),
            crate::parser::ast::Literal::Bool(b) => b.to_string(),
        },
        Expr::Function { name, .. } => name.to_lowercase(),
        Expr::Binary { op, left, right } => {
            format!("{} {} {}", expr_label(left), op.symbol(), expr_label(right))
        }
        Expr::Unary { expr, .. } => format!("-{}", expr_label(expr)),
        Expr::Like { expr, .. } => format!("{} LIKE", expr_label(expr)),
        Expr::In { expr, .. } => format!("{} IN", expr_label(expr)),
        Expr::IsNull { expr, .. } => format!("{} IS NULL", expr_label(expr)),
    }
}

// ============================================================================
// Plan Construction
// ============================================================================

/// Build a logical plan for a validated SELECT statement
pub fn build_select(stmt: &SelectStmt, catalog: &dyn CatalogInfo) -> Result<PlanNode> {
    let from = stmt.from.as_ref().ok_or_else(|| {
        Error::with_message(ErrorCode::Parse, "SELECT requires a FROM clause")
    })?;

    // Collect scopes for the base table and every join.
    let mut scopes = Vec::new();
    for table_ref in
        std::iter::once(from).chain(stmt.joins.iter().map(|j| &j.table))
    {
        let columns = catalog.columns_of(&table_ref.name).ok_or_else(|| {
            Error::with_message(
                ErrorCode::Name,
                format!("no such table: {}", table_ref.name),
            )
        })?;
        scopes.push(TableScope {
            binding: table_ref.binding().to_string(),
            table: table_ref.name.clone(),
            columns,
        });
    }

    // Base scan plus left-deep join chain.
    let mut plan = PlanNode::Scan {
        table: scopes[0].table.clone(),
        binding: scopes[0].binding.clone(),
        columns: None,
    };
    for (join, scope) in stmt.joins.iter().zip(scopes.iter().skip(1)) {
        let right = PlanNode::Scan {
            table: scope.table.clone(),
            binding: scope.binding.clone(),
            columns: None,
        };
        let predicate = qualify(&join.on, &scopes)?;
        plan = PlanNode::Join {
            left: Box::new(plan),
            right: Box::new(right),
            predicate,
            kind: join.join_type,
            algorithm: JoinAlgorithm::Hash,
        };
    }

    if let Some(where_clause) = &stmt.where_clause {
        plan = PlanNode::Filter {
            child: Box::new(plan),
            predicate: qualify(where_clause, &scopes)?,
        };
    }

    // Expand * and qualify the output list.
    let mut output = Vec::new();
    for column in &stmt.columns {
        match column {
            ResultColumn::Star => {
                for scope in &scopes {
                    for name in &scope.columns {
                        output.push(OutputColumn {
                            expr: Expr::Column(ColumnRef {
                                table: Some(scope.binding.clone()),
                                column: name.clone(),
                            }),
                            name: name.clone(),
                        });
                    }
                }
            }
            ResultColumn::Expr { expr, alias } => {
                let qualified = qualify(expr, &scopes)?;
                let name = alias.clone().unwrap_or_else(|| expr_label(expr));
                output.push(OutputColumn {
                    expr: qualified,
                    name,
                });
            }
        }
    }

    let has_aggregates =
        output.iter().any(|c| c.expr.has_aggregate()) || stmt.group_by.is_some();

    // Sort keys: a key that names an output alias substitutes the aliased
    // expression; everything else qualifies against the table scopes.
    let above_output = has_aggregates || stmt.distinct;
    let sort_keys = stmt
        .order_by
        .as_ref()
        .map(|terms| {
            terms
                .iter()
                .map(|term| SortKey {
                    expr: resolve_sort_expr(&term.expr, &output, &scopes, above_output),
                    order: term.order,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if has_aggregates {
        let group_by = stmt
            .group_by
            .as_ref()
            .map(|exprs| exprs.iter().map(|e| qualify(e, &scopes)).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();
        let having = stmt
            .having
            .as_ref()
            .map(|e| qualify(e, &scopes))
            .transpose()?;
        plan = PlanNode::Aggregate {
            child: Box::new(plan),
            group_by,
            output,
            having,
            distinct: stmt.distinct,
        };
        plan = apply_sort_limit(plan, sort_keys, stmt);
    } else {
        if stmt.having.is_some() {
            return Err(Error::with_message(
                ErrorCode::Parse,
                "HAVING requires GROUP BY or aggregates",
            ));
        }
        if stmt.distinct {
            // DISTINCT dedupes the projected rows, so ordering applies to
            // the output; SQL restricts ORDER BY to the select list here.
            plan = PlanNode::Project {
                child: Box::new(plan),
                columns: output,
                distinct: true,
            };
            plan = apply_sort_limit(plan, sort_keys, stmt);
        } else {
            // Sort and Limit run below the projection so ORDER BY can use
            // columns the select list drops.
            plan = apply_sort_limit(plan, sort_keys, stmt);
            plan = PlanNode::Project {
                child: Box::new(plan),
                columns: output,
                distinct: false,
            };
        }
    }

    Ok(plan)
}

fn apply_sort_limit(mut plan: PlanNode, keys: Vec<SortKey>, stmt: &SelectStmt) -> PlanNode {
    if !keys.is_empty() {
        plan = PlanNode::Sort {
            child: Box::new(plan),
            keys,
            top_k: None,
        };
    }
    if let Some(limit) = &stmt.limit {
        plan = PlanNode::Limit {
            child: Box::new(plan),
            limit: limit.limit,
            offset: limit.offset.unwrap_or(0),
        };
    }
    plan
}

/// Resolve an ORDER BY expression.
///
/// When the sort runs below the projection, an output alias substitutes
/// the aliased expression and table columns qualify. When the sort runs
/// above the producing node (aggregates, DISTINCT), keys resolve to the
/// output column names instead, since the source columns are gone.
fn resolve_sort_expr(
    expr: &Expr,
    output: &[OutputColumn],
    scopes: &[TableScope],
    above_output: bool,
) -> Expr {
    if above_output {
        // Exact match against an output expression or alias.
        if let Some(out) = output.iter().find(|o| {
            o.expr == qualify_lenient(expr, scopes)
                || matches!(expr, Expr::Column(c) if c.table.is_none() && c.column == o.name)
        }) {
            return Expr::Column(ColumnRef {
                table: None,
                column: out.name.clone(),
            });
        }
        // A bare aggregate sorts through its label.
        if matches!(expr, Expr::Aggregate { .. }) {
            return Expr::Column(ColumnRef {
                table: None,
                column: expr_label(expr),
            });
        }
        return qualify_lenient(expr, scopes);
    }

    if let Expr::Column(col) = expr {
        if col.table.is_none() {
            if let Some(out) = output.iter().find(|o| o.name == col.column) {
                return out.expr.clone();
            }
        }
    }
    qualify_lenient(expr, scopes)
}

/// Qualify every column reference in an expression against the scopes.
/// Unqualified names resolve to the first table that has them; unknown
/// columns and unknown qualifiers are name errors.
fn qualify(expr: &Expr, scopes: &[TableScope]) -> Result<Expr> {
    Ok(match expr {
        Expr::Column(col) => Expr::Column(resolve_column(col, scopes)?),
        Expr::Literal(_) => expr.clone(),
        Expr::Unary { op, expr } => Expr::Unary {
            op: *op,
            expr: Box::new(qualify(expr, scopes)?),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(qualify(left, scopes)?),
            right: Box::new(qualify(right, scopes)?),
        },
        Expr::Like {
            expr,
            pattern,
            negated,
        } => Expr::Like {
            expr: Box::new(qualify(expr, scopes)?),
            pattern: Box::new(qualify(pattern, scopes)?),
            negated: *negated,
        },
        Expr::In {
            expr,
            list,
            negated,
        } => Expr::In {
            expr: Box::new(qualify(expr, scopes)?),
            list: list
                .iter()
                .map(|e| qualify(e, scopes))
                .collect::<Result<Vec<_>>>()?,
            negated: *negated,
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(qualify(expr, scopes)?),
            negated: *negated,
        },
        Expr::Function { name, args } => Expr::Function {
            name: name.clone(),
            args: args
                .iter()
                .map(|e| qualify(e, scopes))
                .collect::<Result<Vec<_>>>()?,
        },
        Expr::Aggregate { func, arg } => Expr::Aggregate {
            func: *func,
            arg: arg
                .as_ref()
                .map(|e| Ok::<_, Error>(Box::new(qualify(e, scopes)?)))
                .transpose()?,
        },
    })
}

/// Like `qualify`, but leaves unresolvable references untouched so ORDER
/// BY can name output aliases.
fn qualify_lenient(expr: &Expr, scopes: &[TableScope]) -> Expr {
    qualify(expr, scopes).unwrap_or_else(|_| expr.clone())
}

fn resolve_column(col: &ColumnRef, scopes: &[TableScope]) -> Result<ColumnRef> {
    if let Some(table) = &col.table {
        let scope = scopes
            .iter()
            .find(|s| s.binding == *table || s.table == *table)
            .ok_or_else(|| {
                Error::with_message(ErrorCode::Name, format!("no such table: {}", table))
            })?;
        if !scope.columns.iter().any(|c| c == &col.column) {
            return Err(Error::with_message(
                ErrorCode::Name,
                format!("no such column: {}.{}", table, col.column),
            ));
        }
        return Ok(ColumnRef {
            table: Some(scope.binding.clone()),
            column: col.column.clone(),
        });
    }

    for scope in scopes {
        if scope.columns.iter().any(|c| c == &col.column) {
            return Ok(ColumnRef {
                table: Some(scope.binding.clone()),
                column: col.column.clone(),
            });
        }
    }
    Err(Error::with_message(
        ErrorCode::Name,
        format!("no such column: {}", col.column),
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::grammar::parse;
    use crate::parser::Stmt;
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

    fn plan_for(sql: &str) -> Result<PlanNode> {
        let stmt = match parse(sql).unwrap() {
            Stmt::Select(s) => s,
            other => panic!("expected SELECT, got {:?}", other),
        };
        build_select(&stmt, &FakeCatalog::new())
    }

    #[test]
    fn test_star_expansion() {
        let plan = plan_for("SELECT * FROM employees").unwrap();
        match plan {
            PlanNode::Project { columns, .. } => {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["emp_id", "dept_id", "salary"]);
            }
            other => panic!("expected Project, got {:?}", other.kind_name()),
        }
    }

    #[test]
    fn test_unknown_table_and_column() {
        let err = plan_for("SELECT * FROM missing").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Name);

        let err = plan_for("SELECT bogus FROM employees").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Name);
    }

    #[test]
    fn test_columns_qualified_with_binding() {
        let plan = plan_for("SELECT salary FROM employees e WHERE salary > 10").unwrap();
        match plan {
            PlanNode::Project { columns, child, .. } => {
                match &columns[0].expr {
                    Expr::Column(col) => assert_eq!(col.table.as_deref(), Some("e")),
                    other => panic!("expected column, got {:?}", other),
                }
                assert!(matches!(*child, PlanNode::Filter { .. }));
            }
            other => panic!("expected Project, got {:?}", other.kind_name()),
        }
    }

    #[test]
    fn test_join_plan_shape() {
        let plan = plan_for(
            "SELECT e.emp_id, d.name FROM employees e \
             JOIN departments d ON e.dept_id = d.dept_id",
        )
        .unwrap();
        match plan {
            PlanNode::Project { child, .. } => match *child {
                PlanNode::Join {
                    kind, algorithm, ..
                } => {
                    assert_eq!(kind, JoinType::Inner);
                    assert_eq!(algorithm, JoinAlgorithm::Hash);
                }
                other => panic!("expected Join, got {:?}", other.kind_name()),
            },
            other => panic!("expected Project, got {:?}", other.kind_name()),
        }
    }

    #[test]
    fn test_aggregate_plan() {
        let plan = plan_for(
            "SELECT dept_id, COUNT(*) FROM employees GROUP BY dept_id HAVING COUNT(*) > 2",
        )
        .unwrap();
        match plan {
            PlanNode::Aggregate {
                group_by,
                output,
                having,
                ..
            } => {
                assert_eq!(group_by.len(), 1);
                assert_eq!(output.len(), 2);
                assert_eq!(output[1].name, "COUNT(*)");
                assert!(having.is_some());
            }
            other => panic!("expected Aggregate, got {:?}", other.kind_name()),
        }
    }

    #[test]
    fn test_order_limit_nodes() {
        // Sort and Limit sit below the projection so ORDER BY can use
        // columns the select list drops.
        let plan =
            plan_for("SELECT salary FROM employees ORDER BY salary DESC LIMIT 5 OFFSET 2")
                .unwrap();
        match plan {
            PlanNode::Project { child, .. } => match *child {
                PlanNode::Limit {
                    child,
                    limit,
                    offset,
                } => {
                    assert_eq!(limit, 5);
                    assert_eq!(offset, 2);
                    assert!(matches!(*child, PlanNode::Sort { .. }));
                }
                other => panic!("expected Limit, got {:?}", other.kind_name()),
            },
            other => panic!("expected Project, got {:?}", other.kind_name()),
        }
    }

    #[test]
    fn test_order_by_dropped_column() {
        let plan = plan_for("SELECT emp_id FROM employees ORDER BY salary").unwrap();
        match plan {
            PlanNode::Project { child, .. } => match *child {
                PlanNode::Sort { keys, .. } => match &keys[0].expr {
                    Expr::Column(col) => {
                        assert_eq!(col.column, "salary");
                        assert!(col.table.is_some());
                    }
                    other => panic!("expected column key, got {:?}", other),
                },
                other => panic!("expected Sort, got {:?}", other.kind_name()),
            },
            other => panic!("expected Project, got {:?}", other.kind_name()),
        }
    }

    #[test]
    fn test_bindings() {
        let plan = plan_for(
            "SELECT e.emp_id FROM employees e JOIN departments d ON e.dept_id = d.dept_id",
        )
        .unwrap();
        assert_eq!(plan.bindings(), vec!["e".to_string(), "d".to_string()]);
    }
}
