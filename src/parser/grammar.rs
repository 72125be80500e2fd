//! SQL grammar
//!
//! A recursive descent parser over the token stream. Statement dispatch
//! happens on the first significant token; expressions descend through
//! OR, AND, comparison, additive, multiplicative, unary, and primary
//! levels. Parse failures carry the line, column, and text of the
//! offending token.

use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::*;
use crate::parser::tokenizer::{decode_string, tokenize, Token, TokenKind};
use crate::types::DataType;

// ============================================================================
// Entry Points
// ============================================================================

/// Parse a single SQL statement
pub fn parse(sql: &str) -> Result<Stmt> {
    let mut parser = Parser::new(sql)?;
    let stmt = parser.parse_stmt()?;
    parser.expect_end()?;
    Ok(stmt)
}

// ============================================================================
// Parser
// ============================================================================

/// SQL parser
pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given SQL source
    pub fn new(source: &'a str) -> Result<Self> {
        let tokens = tokenize(source)?;
        Ok(Parser {
            source,
            tokens,
            pos: 0,
        })
    }

    /// Parse one statement, dispatching on the first token
    pub fn parse_stmt(&mut self) -> Result<Stmt> {
        self.skip_semicolons();

        let stmt = match self.current().kind {
            TokenKind::Select => Ok(Stmt::Select(self.parse_select()?)),
            TokenKind::Insert => Ok(Stmt::Insert(self.parse_insert()?)),
            TokenKind::Update => Ok(Stmt::Update(self.parse_update()?)),
            TokenKind::Delete => Ok(Stmt::Delete(self.parse_delete()?)),
            TokenKind::Create => self.parse_create(),
            TokenKind::Drop => self.parse_drop(),
            _ => Err(self.error("expected statement")),
        }?;

        self.skip_semicolons();
        Ok(stmt)
    }

    fn expect_end(&mut self) -> Result<()> {
        if self.current().kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.error("trailing input after statement"))
        }
    }

    // ========================================================================
    // SELECT
    // ========================================================================

    fn parse_select(&mut self) -> Result<SelectStmt> {
        self.expect(TokenKind::Select)?;
        let distinct = self.match_token(TokenKind::Distinct);

        let mut columns = vec![self.parse_result_column()?];
        while self.match_token(TokenKind::Comma) {
            columns.push(self.parse_result_column()?);
        }

        let from = if self.match_token(TokenKind::From) {
            Some(self.parse_table_ref()?)
        } else {
            None
        };

        let mut joins = Vec::new();
        loop {
            let join_type = if self.match_token(TokenKind::Inner) {
                JoinType::Inner
            } else if self.match_token(TokenKind::Left) {
                self.match_token(TokenKind::Outer);
                JoinType::Left
            } else if self.match_token(TokenKind::Right) {
                self.match_token(TokenKind::Outer);
                JoinType::Right
            } else if self.match_token(TokenKind::Full) {
                self.match_token(TokenKind::Outer);
                JoinType::Full
            } else if self.check(TokenKind::Join) {
                JoinType::Inner
            } else {
                break;
            };
            self.expect(TokenKind::Join)?;
            let table = self.parse_table_ref()?;
            self.expect(TokenKind::On)?;
            let on = Box::new(self.parse_expr()?);
            joins.push(JoinClause {
                join_type,
                table,
                on,
            });
        }

        let where_clause = if self.match_token(TokenKind::Where) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        let group_by = if self.match_token(TokenKind::Group) {
            self.expect(TokenKind::By)?;
            let mut exprs = vec![self.parse_expr()?];
            while self.match_token(TokenKind::Comma) {
                exprs.push(self.parse_expr()?);
            }
            Some(exprs)
        } else {
            None
        };

        let having = if self.match_token(TokenKind::Having) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        let order_by = if self.match_token(TokenKind::Order) {
            self.expect(TokenKind::By)?;
            let mut terms = vec![self.parse_ordering_term()?];
            while self.match_token(TokenKind::Comma) {
                terms.push(self.parse_ordering_term()?);
            }
            Some(terms)
        } else {
            None
        };

        let limit = if self.match_token(TokenKind::Limit) {
            let limit = self.parse_unsigned()?;
            let offset = if self.match_token(TokenKind::Offset) {
                Some(self.parse_unsigned()?)
            } else {
                None
            };
            Some(LimitClause { limit, offset })
        } else {
            None
        };

        Ok(SelectStmt {
            distinct,
            columns,
            from,
            joins,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
        })
    }

    fn parse_result_column(&mut self) -> Result<ResultColumn> {
        if self.match_token(TokenKind::Star) {
            return Ok(ResultColumn::Star);
        }
        let expr = self.parse_expr()?;
        let alias = if self.match_token(TokenKind::As) {
            Some(self.expect_identifier()?)
        } else if self.check(TokenKind::Identifier) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        Ok(ResultColumn::Expr { expr, alias })
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        let name = self.expect_identifier()?;
        let alias = if self.match_token(TokenKind::As) {
            Some(self.expect_identifier()?)
        } else if self.check(TokenKind::Identifier) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        Ok(TableRef { name, alias })
    }

    fn parse_ordering_term(&mut self) -> Result<OrderingTerm> {
        let expr = self.parse_expr()?;
        let order = if self.match_token(TokenKind::Desc) {
            SortOrder::Desc
        } else {
            self.match_token(TokenKind::Asc);
            SortOrder::Asc
        };
        Ok(OrderingTerm { expr, order })
    }

    // ========================================================================
    // DML
    // ========================================================================

    fn parse_insert(&mut self) -> Result<InsertStmt> {
        self.expect(TokenKind::Insert)?;
        self.expect(TokenKind::Into)?;
        let table = self.expect_identifier()?;

        let columns = if self.match_token(TokenKind::LParen) {
            let mut cols = vec![self.expect_identifier()?];
            while self.match_token(TokenKind::Comma) {
                cols.push(self.expect_identifier()?);
            }
            self.expect(TokenKind::RParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect(TokenKind::Values)?;
        let mut rows = vec![self.parse_value_row()?];
        while self.match_token(TokenKind::Comma) {
            rows.push(self.parse_value_row()?);
        }

        Ok(InsertStmt {
            table,
            columns,
            rows,
        })
    }

    fn parse_value_row(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut exprs = vec![self.parse_expr()?];
        while self.match_token(TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(exprs)
    }

    fn parse_update(&mut self) -> Result<UpdateStmt> {
        self.expect(TokenKind::Update)?;
        let table = self.expect_identifier()?;
        self.expect(TokenKind::Set)?;

        let mut assignments = vec![self.parse_assignment()?];
        while self.match_token(TokenKind::Comma) {
            assignments.push(self.parse_assignment()?);
        }

        let where_clause = if self.match_token(TokenKind::Where) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        Ok(UpdateStmt {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_assignment(&mut self) -> Result<Assignment> {
        let column = self.expect_identifier()?;
        self.expect(TokenKind::Eq)?;
        let expr = self.parse_expr()?;
        Ok(Assignment { column, expr })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt> {
        self.expect(TokenKind::Delete)?;
        self.expect(TokenKind::From)?;
        let table = self.expect_identifier()?;
        let where_clause = if self.match_token(TokenKind::Where) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        Ok(DeleteStmt {
            table,
            where_clause,
        })
    }

    // ========================================================================
    // DDL
    // ========================================================================

    fn parse_create(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::Create)?;

        let unique = self.match_token(TokenKind::Unique);
        if self.match_token(TokenKind::Table) {
            if unique {
                return Err(self.error("UNIQUE applies to indexes, not tables"));
            }
            return Ok(Stmt::CreateTable(self.parse_create_table()?));
        }
        if self.match_token(TokenKind::Index) {
            return Ok(Stmt::CreateIndex(self.parse_create_index(unique)?));
        }
        Err(self.error("expected TABLE or INDEX after CREATE"))
    }

    fn parse_create_table(&mut self) -> Result<CreateTableStmt> {
        let if_not_exists = if self.match_token(TokenKind::If) {
            self.expect(TokenKind::Not)?;
            self.expect(TokenKind::Exists)?;
            true
        } else {
            false
        };
        let table = self.expect_identifier()?;

        self.expect(TokenKind::LParen)?;
        let mut columns = vec![self.parse_column_def()?];
        while self.match_token(TokenKind::Comma) {
            columns.push(self.parse_column_def()?);
        }
        self.expect(TokenKind::RParen)?;

        Ok(CreateTableStmt {
            table,
            if_not_exists,
            columns,
        })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDefAst> {
        let name = self.expect_identifier()?;
        let data_type = self.parse_data_type()?;

        let mut nullable = true;
        if self.match_token(TokenKind::Not) {
            self.expect(TokenKind::Null)?;
            nullable = false;
        } else if self.match_token(TokenKind::Null) {
            nullable = true;
        }

        Ok(ColumnDefAst {
            name,
            data_type,
            nullable,
        })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let token = self.current();
        let data_type = match token.kind {
            TokenKind::Int | TokenKind::IntegerKw => DataType::Int32,
            TokenKind::Bigint => DataType::Int64,
            TokenKind::FloatKw => DataType::Float32,
            TokenKind::Double => DataType::Float64,
            TokenKind::Varchar | TokenKind::Text => DataType::Text,
            TokenKind::Bool | TokenKind::Boolean => DataType::Bool,
            TokenKind::Date => DataType::Date32,
            TokenKind::Timestamp => DataType::Timestamp,
            TokenKind::Identifier if token.text(self.source).eq_ignore_ascii_case("string") => {
                DataType::Text
            }
            _ => return Err(self.error("expected data type")),
        };
        self.advance();

        // VARCHAR(n): the length is parsed and ignored.
        if data_type == DataType::Text && self.match_token(TokenKind::LParen) {
            self.parse_unsigned()?;
            self.expect(TokenKind::RParen)?;
        }
        Ok(data_type)
    }

    fn parse_create_index(&mut self, unique: bool) -> Result<CreateIndexStmt> {
        let index = self.expect_identifier()?;
        self.expect(TokenKind::On)?;
        let table = self.expect_identifier()?;

        self.expect(TokenKind::LParen)?;
        let mut columns = vec![self.expect_identifier()?];
        while self.match_token(TokenKind::Comma) {
            columns.push(self.expect_identifier()?);
        }
        self.expect(TokenKind::RParen)?;

        let kind = if self.match_token(TokenKind::Using) {
            let name = self.expect_identifier()?;
            match name.to_uppercase().as_str() {
                "BTREE" => IndexKindAst::BTree,
                "HASH" => IndexKindAst::Hash,
                "BITMAP" => IndexKindAst::Bitmap,
                _ => return Err(self.error("expected BTREE, HASH, or BITMAP")),
            }
        } else {
            IndexKindAst::BTree
        };

        Ok(CreateIndexStmt {
            index,
            table,
            columns,
            unique,
            kind,
        })
    }

    fn parse_drop(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::Drop)?;
        if self.match_token(TokenKind::Table) {
            let if_exists = self.parse_if_exists()?;
            let name = self.expect_identifier()?;
            return Ok(Stmt::DropTable(DropStmt { name, if_exists }));
        }
        if self.match_token(TokenKind::Index) {
            let if_exists = self.parse_if_exists()?;
            let name = self.expect_identifier()?;
            return Ok(Stmt::DropIndex(DropStmt { name, if_exists }));
        }
        Err(self.error("expected TABLE or INDEX after DROP"))
    }

    fn parse_if_exists(&mut self) -> Result<bool> {
        if self.match_token(TokenKind::If) {
            self.expect(TokenKind::Exists)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Parse an expression (lowest precedence: OR)
    pub fn parse_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.match_token(TokenKind::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        while self.match_token(TokenKind::And) {
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        let op = match self.current().kind {
            TokenKind::Eq => Some(BinaryOp::Eq),
            TokenKind::Ne => Some(BinaryOp::Ne),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        // [NOT] LIKE / [NOT] IN / IS [NOT] NULL
        let negated = self.check(TokenKind::Not)
            && matches!(self.peek_kind(), TokenKind::Like | TokenKind::In);
        if negated {
            self.advance();
        }

        if self.match_token(TokenKind::Like) {
            let pattern = self.parse_additive()?;
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            });
        }

        if self.match_token(TokenKind::In) {
            self.expect(TokenKind::LParen)?;
            let mut list = vec![self.parse_expr()?];
            while self.match_token(TokenKind::Comma) {
                list.push(self.parse_expr()?);
            }
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::In {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        if self.match_token(TokenKind::Is) {
            let negated = self.match_token(TokenKind::Not);
            self.expect(TokenKind::Null)?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.match_token(TokenKind::Not) {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        if self.match_token(TokenKind::Minus) {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.current();
        match token.kind {
            TokenKind::Integer => {
                let text = token.text(self.source);
                let value: i64 = text
                    .parse()
                    .map_err(|_| self.error("invalid integer literal"))?;
                self.advance();
                Ok(Expr::int(value))
            }
            TokenKind::Float => {
                let text = token.text(self.source);
                let value: f64 = text
                    .parse()
                    .map_err(|_| self.error("invalid float literal"))?;
                self.advance();
                Ok(Expr::float(value))
            }
            TokenKind::String => {
                let value = decode_string(token.text(self.source))?;
                self.advance();
                Ok(Expr::string(value))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::null())
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Identifier => self.parse_identifier_expr(),
            _ => Err(self.error("expected expression")),
        }
    }

    /// Column reference, qualified column, function call, or aggregate
    fn parse_identifier_expr(&mut self) -> Result<Expr> {
        let name = self.expect_identifier()?;

        if self.match_token(TokenKind::LParen) {
            if let Some(func) = AggregateFunc::from_name(&name) {
                // COUNT(*) / AGG(expr)
                if func == AggregateFunc::Count && self.match_token(TokenKind::Star) {
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::Aggregate { func, arg: None });
                }
                let arg = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                return Ok(Expr::Aggregate {
                    func,
                    arg: Some(Box::new(arg)),
                });
            }

            let mut args = Vec::new();
            if !self.check(TokenKind::RParen) {
                args.push(self.parse_expr()?);
                while self.match_token(TokenKind::Comma) {
                    args.push(self.parse_expr()?);
                }
            }
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::Function { name, args });
        }

        if self.match_token(TokenKind::Dot) {
            let column = self.expect_identifier()?;
            return Ok(Expr::Column(ColumnRef {
                table: Some(name),
                column,
            }));
        }

        Ok(Expr::Column(ColumnRef {
            table: None,
            column: name,
        }))
    }

    // ========================================================================
    // Token Cursor
    // ========================================================================

    fn current(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    /// Consume the token if it matches
    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        let token = self.current();
        if token.kind == kind {
            self.advance();
            Ok(token)
        } else {
            Err(self.error(format!("expected {:?}", kind)))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        let token = self.current();
        if token.kind == TokenKind::Identifier {
            self.advance();
            Ok(token.text(self.source).to_string())
        } else {
            Err(self.error("expected identifier"))
        }
    }

    fn parse_unsigned(&mut self) -> Result<u64> {
        let token = self.expect(TokenKind::Integer)?;
        token
            .text(self.source)
            .parse()
            .map_err(|_| self.error("invalid integer literal"))
    }

    fn skip_semicolons(&mut self) {
        while self.match_token(TokenKind::Semicolon) {}
    }

    /// Build a parse error at the current token
    fn error(&self, message: impl Into<String>) -> Error {
        let token = self.current();
        let text = if token.kind == TokenKind::Eof {
            "<end of input>".to_string()
        } else {
            token.text(self.source).to_string()
        };
        Error::with_message(
            ErrorCode::Parse,
            format!(
                "{} at line {}, column {} (near '{}')",
                message.into(),
                token.line,
                token.column,
                text
            ),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn select(sql: &str) -> SelectStmt {
        match parse(sql).unwrap() {
            Stmt::Select(s) => s,
            other => panic!("expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_select() {
        let stmt = select("SELECT id, name FROM users");
        assert_eq!(stmt.columns.len(), 2);
        assert_eq!(stmt.from.as_ref().unwrap().name, "users");
        assert!(stmt.where_clause.is_none());
    }

    #[test]
    fn test_select_star() {
        let stmt = select("SELECT * FROM t");
        assert_eq!(stmt.columns, vec![ResultColumn::Star]);
    }

    #[test]
    fn test_where_precedence() {
        // a = 1 OR b = 2 AND c = 3 parses as a = 1 OR (b = 2 AND c = 3).
        let stmt = select("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3");
        let expr = stmt.where_clause.unwrap();
        match *expr {
            Expr::Binary {
                op: BinaryOp::Or,
                ref right,
                ..
            } => {
                assert!(matches!(
                    **right,
                    Expr::Binary {
                        op: BinaryOp::And,
                        ..
                    }
                ));
            }
            other => panic!("expected OR at root, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        // 1 + 2 * 3: multiplication binds tighter.
        let stmt = select("SELECT 1 + 2 * 3");
        match &stmt.columns[0] {
            ResultColumn::Expr { expr, .. } => match expr {
                Expr::Binary {
                    op: BinaryOp::Add,
                    right,
                    ..
                } => {
                    assert!(matches!(
                        **right,
                        Expr::Binary {
                            op: BinaryOp::Mul,
                            ..
                        }
                    ));
                }
                other => panic!("expected +, got {:?}", other),
            },
            other => panic!("expected expression column, got {:?}", other),
        }
    }

    #[test]
    fn test_join_clauses() {
        let stmt = select(
            "SELECT e.name, d.name FROM employees e \
             JOIN departments d ON e.dept_id = d.dept_id \
             LEFT JOIN offices o ON d.office_id = o.id",
        );
        assert_eq!(stmt.joins.len(), 2);
        assert_eq!(stmt.joins[0].join_type, JoinType::Inner);
        assert_eq!(stmt.joins[1].join_type, JoinType::Left);
        assert_eq!(stmt.joins[1].table.binding(), "o");
    }

    #[test]
    fn test_group_by_having_order_limit() {
        let stmt = select(
            "SELECT dept, COUNT(*) FROM emp GROUP BY dept \
             HAVING COUNT(*) > 2 ORDER BY dept DESC LIMIT 10 OFFSET 5",
        );
        assert_eq!(stmt.group_by.as_ref().unwrap().len(), 1);
        assert!(stmt.having.is_some());
        let order = stmt.order_by.as_ref().unwrap();
        assert_eq!(order[0].order, SortOrder::Desc);
        let limit = stmt.limit.as_ref().unwrap();
        assert_eq!(limit.limit, 10);
        assert_eq!(limit.offset, Some(5));
    }

    #[test]
    fn test_aggregates() {
        let stmt = select("SELECT COUNT(*), SUM(salary), AVG(salary) FROM emp");
        assert!(matches!(
            stmt.columns[0],
            ResultColumn::Expr {
                expr: Expr::Aggregate {
                    func: AggregateFunc::Count,
                    arg: None
                },
                ..
            }
        ));
    }

    #[test]
    fn test_like_in_isnull() {
        let stmt = select(
            "SELECT * FROM t WHERE name LIKE 'A%' AND dept IN (1, 2) AND x IS NOT NULL",
        );
        assert!(stmt.where_clause.is_some());

        let stmt = select("SELECT * FROM t WHERE name NOT LIKE 'A%'");
        match *stmt.where_clause.unwrap() {
            Expr::Like { negated, .. } => assert!(negated),
            other => panic!("expected LIKE, got {:?}", other),
        }
    }

    #[test]
    fn test_insert() {
        let stmt = parse("INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')").unwrap();
        match stmt {
            Stmt::Insert(insert) => {
                assert_eq!(insert.table, "t");
                assert_eq!(insert.columns.as_ref().unwrap().len(), 2);
                assert_eq!(insert.rows.len(), 2);
            }
            other => panic!("expected INSERT, got {:?}", other),
        }
    }

    #[test]
    fn test_update_delete() {
        let stmt = parse("UPDATE t SET a = 1, b = b + 1 WHERE id = 5").unwrap();
        match stmt {
            Stmt::Update(update) => {
                assert_eq!(update.assignments.len(), 2);
                assert!(update.where_clause.is_some());
            }
            other => panic!("expected UPDATE, got {:?}", other),
        }

        let stmt = parse("DELETE FROM t WHERE a < 0").unwrap();
        assert!(matches!(stmt, Stmt::Delete(_)));
    }

    #[test]
    fn test_create_table() {
        let stmt = parse(
            "CREATE TABLE emp (id BIGINT NOT NULL, name VARCHAR(64), salary DOUBLE, active BOOL)",
        )
        .unwrap();
        match stmt {
            Stmt::CreateTable(create) => {
                assert_eq!(create.table, "emp");
                assert_eq!(create.columns.len(), 4);
                assert!(!create.columns[0].nullable);
                assert_eq!(create.columns[1].data_type, DataType::Text);
                assert_eq!(create.columns[2].data_type, DataType::Float64);
            }
            other => panic!("expected CREATE TABLE, got {:?}", other),
        }
    }

    #[test]
    fn test_create_index() {
        let stmt = parse("CREATE INDEX idx_age ON emp (age) USING HASH").unwrap();
        match stmt {
            Stmt::CreateIndex(create) => {
                assert_eq!(create.index, "idx_age");
                assert_eq!(create.kind, IndexKindAst::Hash);
            }
            other => panic!("expected CREATE INDEX, got {:?}", other),
        }

        let stmt = parse("CREATE UNIQUE INDEX u ON t (a, b)").unwrap();
        match stmt {
            Stmt::CreateIndex(create) => {
                assert!(create.unique);
                assert_eq!(create.columns.len(), 2);
            }
            other => panic!("expected CREATE INDEX, got {:?}", other),
        }
    }

    #[test]
    fn test_drop() {
        assert!(matches!(
            parse("DROP TABLE IF EXISTS t").unwrap(),
            Stmt::DropTable(DropStmt {
                if_exists: true,
                ..
            })
        ));
        assert!(matches!(
            parse("DROP INDEX idx").unwrap(),
            Stmt::DropIndex(_)
        ));
    }

    #[test]
    fn test_parse_error_carries_position() {
        let err = parse("SELECT FROM").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parse);
        let msg = err.to_string();
        assert!(msg.contains("line 1"), "message missing position: {}", msg);
        assert!(msg.contains("FROM"), "message missing token: {}", msg);
    }

    #[test]
    fn test_unary_operators() {
        let stmt = select("SELECT * FROM t WHERE NOT active AND x = -5");
        assert!(stmt.where_clause.is_some());
    }
}
