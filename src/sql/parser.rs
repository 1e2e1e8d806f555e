//! Parser for the query language
//!
//! Recursive-descent parser producing the abstract query tree. Errors carry
//! the input position and what was expected there.

use super::ast::*;
use super::lexer::Lexer;
use super::token::{SpannedToken, Token};
use crate::catalog::DataType;
use crate::error::{Error, Result};

/// Query language parser
pub struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
}

impl Parser {
    /// Create a new parser from statement text
    pub fn new(text: &str) -> Result<Self> {
        let tokens = Lexer::new(text).tokenize()?;
        Ok(Self {
            tokens,
            position: 0,
        })
    }

    /// Parse exactly one statement, allowing one trailing semicolon.
    pub fn parse_single(&mut self) -> Result<Statement> {
        let stmt = self.parse_statement()?;
        if self.check(&Token::Semicolon) {
            self.advance();
        }
        if !self.is_at_end() {
            return Err(self.err_expected("end of statement"));
        }
        Ok(stmt)
    }

    /// Parse a sequence of semicolon-separated statements.
    pub fn parse_all(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while self.check(&Token::Semicolon) {
                self.advance();
            }
            if self.is_at_end() {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current() {
            Token::Create => self.parse_create(),
            Token::Drop => self.parse_drop(),
            Token::Insert => self.parse_insert().map(Statement::Insert),
            Token::Select => self.parse_select().map(Statement::Select),
            Token::Update => self.parse_update().map(Statement::Update),
            Token::Delete => self.parse_delete().map(Statement::Delete),
            _ => Err(self.err_expected("SELECT, INSERT, UPDATE, DELETE, CREATE, or DROP")),
        }
    }

    // ========== CREATE Statements ==========

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect(&Token::Create)?;
        match self.current() {
            Token::Table => self.parse_create_table().map(Statement::CreateTable),
            Token::Index => self.parse_create_index().map(Statement::CreateIndex),
            _ => Err(self.err_expected("TABLE or INDEX")),
        }
    }

    fn parse_create_table(&mut self) -> Result<CreateTable> {
        self.expect(&Token::Table)?;
        let name = self.expect_identifier()?;

        self.expect(&Token::LParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_column_def()?);
            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&Token::RParen)?;

        Ok(CreateTable { name, columns })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.expect_identifier()?;
        let data_type = self.parse_data_type()?;

        let mut primary_key = false;
        let mut foreign_key = None;
        loop {
            if self.check(&Token::Primary) {
                self.advance();
                self.expect(&Token::Key)?;
                primary_key = true;
            } else if self.check(&Token::Foreign) {
                self.advance();
                self.expect(&Token::Key)?;
                self.expect(&Token::References)?;
                let table = self.expect_identifier()?;
                self.expect(&Token::LParen)?;
                let column = self.expect_identifier()?;
                self.expect(&Token::RParen)?;
                foreign_key = Some(ForeignKeyRef { table, column });
            } else {
                break;
            }
        }

        Ok(ColumnDef {
            name,
            data_type,
            primary_key,
            foreign_key,
        })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let dt = match self.current() {
            Token::Int => DataType::Int,
            Token::Double => DataType::Double,
            Token::Str => DataType::Str,
            _ => return Err(self.err_expected("INT, STRING, or DOUBLE")),
        };
        self.advance();
        Ok(dt)
    }

    fn parse_create_index(&mut self) -> Result<CreateIndex> {
        self.expect(&Token::Index)?;
        let name = self.expect_identifier()?;
        self.expect(&Token::On)?;
        let table = self.expect_identifier()?;
        self.expect(&Token::LParen)?;
        let column = self.expect_identifier()?;
        self.expect(&Token::RParen)?;

        Ok(CreateIndex {
            name,
            table,
            column,
        })
    }

    // ========== DROP Statements ==========

    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect(&Token::Drop)?;
        match self.current() {
            Token::Table => {
                self.advance();
                let name = self.expect_identifier()?;
                Ok(Statement::DropTable(DropTable { name }))
            }
            Token::Index => {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect(&Token::On)?;
                let table = self.expect_identifier()?;
                Ok(Statement::DropIndex(DropIndex { name, table }))
            }
            _ => Err(self.err_expected("TABLE or INDEX")),
        }
    }

    // ========== INSERT Statement ==========

    fn parse_insert(&mut self) -> Result<Insert> {
        self.expect(&Token::Insert)?;
        self.expect(&Token::Into)?;
        let table = self.expect_identifier()?;

        let columns = if self.check(&Token::LParen) {
            self.advance();
            let mut cols = Vec::new();
            loop {
                cols.push(self.expect_identifier()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
            self.expect(&Token::RParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect(&Token::Values)?;
        self.expect(&Token::LParen)?;
        let mut values = Vec::new();
        loop {
            values.push(self.parse_literal()?);
            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&Token::RParen)?;

        Ok(Insert {
            table,
            columns,
            values,
        })
    }

    // ========== SELECT Statement ==========

    fn parse_select(&mut self) -> Result<Select> {
        self.expect(&Token::Select)?;

        let projections = self.parse_projection_list()?;

        self.expect(&Token::From)?;
        let mut from = TableRef::new(self.expect_identifier()?);

        let join = if self.check(&Token::Join) {
            self.advance();
            let mut table = TableRef::new(self.expect_identifier()?);
            // A self-join gets synthesized logical names so the two
            // instances can be told apart in column references.
            if table.name == from.name {
                from.label = format!("{}_L", from.name);
                table.label = format!("{}_R", table.name);
            }
            self.expect(&Token::On)?;
            let left = self.parse_column_ref()?;
            self.expect(&Token::Eq)?;
            let right = self.parse_column_ref()?;
            Some(Join { table, left, right })
        } else {
            None
        };

        let where_clause = if self.check(&Token::Where) {
            self.advance();
            Some(self.parse_predicate()?)
        } else {
            None
        };

        let group_by = if self.check(&Token::Group) {
            self.advance();
            self.expect(&Token::By)?;
            let mut cols = Vec::new();
            loop {
                cols.push(self.parse_column_ref()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
            cols
        } else {
            Vec::new()
        };

        let having = if self.check(&Token::Having) {
            self.advance();
            Some(self.parse_predicate()?)
        } else {
            None
        };

        let order_by = if self.check(&Token::Order) {
            self.advance();
            self.expect(&Token::By)?;
            let mut items = Vec::new();
            loop {
                let column = self.parse_column_ref()?;
                let ascending = if self.check(&Token::Desc) {
                    self.advance();
                    false
                } else {
                    if self.check(&Token::Asc) {
                        self.advance();
                    }
                    true
                };
                items.push(OrderBy { column, ascending });
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
            items
        } else {
            Vec::new()
        };

        Ok(Select {
            projections,
            from,
            join,
            where_clause,
            group_by,
            having,
            order_by,
        })
    }

    fn parse_projection_list(&mut self) -> Result<Vec<Projection>> {
        if self.check(&Token::Asterisk) {
            self.advance();
            return Ok(vec![Projection::Wildcard]);
        }

        let mut items = Vec::new();
        loop {
            if self.at_aggregate_keyword() {
                items.push(Projection::Aggregate(self.parse_aggregate()?));
            } else {
                items.push(Projection::Column(self.parse_column_ref()?));
            }
            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }
        Ok(items)
    }

    fn at_aggregate_keyword(&self) -> bool {
        matches!(self.current(), Token::Min | Token::Max | Token::Sum)
    }

    fn parse_aggregate(&mut self) -> Result<Aggregate> {
        let func = match self.current() {
            Token::Min => AggregateFunc::Min,
            Token::Max => AggregateFunc::Max,
            Token::Sum => AggregateFunc::Sum,
            _ => return Err(self.err_expected("MIN, MAX, or SUM")),
        };
        self.advance();
        self.expect(&Token::LParen)?;
        let column = self.parse_column_ref()?;
        self.expect(&Token::RParen)?;
        Ok(Aggregate { func, column })
    }

    fn parse_column_ref(&mut self) -> Result<ColumnRef> {
        let first = self.expect_identifier()?;
        if self.check(&Token::Dot) {
            self.advance();
            let column = self.expect_identifier()?;
            Ok(ColumnRef::qualified(first, column))
        } else {
            Ok(ColumnRef::bare(first))
        }
    }

    // ========== UPDATE Statement ==========

    fn parse_update(&mut self) -> Result<Update> {
        self.expect(&Token::Update)?;
        let table = self.expect_identifier()?;
        self.expect(&Token::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier()?;
            self.expect(&Token::Eq)?;
            let value = self.parse_literal()?;
            assignments.push((column, value));
            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        let where_clause = if self.check(&Token::Where) {
            self.advance();
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Update {
            table,
            assignments,
            where_clause,
        })
    }

    // ========== DELETE Statement ==========

    fn parse_delete(&mut self) -> Result<Delete> {
        self.expect(&Token::Delete)?;
        self.expect(&Token::From)?;
        let table = self.expect_identifier()?;

        let where_clause = if self.check(&Token::Where) {
            self.advance();
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Delete {
            table,
            where_clause,
        })
    }

    // ========== Predicates ==========

    /// A predicate is one comparison, or exactly two joined by AND / OR.
    fn parse_predicate(&mut self) -> Result<Predicate> {
        let left = self.parse_comparison()?;

        let connective = match self.current() {
            Token::And => Some(Connective::And),
            Token::Or => Some(Connective::Or),
            _ => None,
        };
        let Some(connective) = connective else {
            return Ok(Predicate::Single(left));
        };
        self.advance();

        let right = self.parse_comparison()?;
        if matches!(self.current(), Token::And | Token::Or) {
            return Err(self.err_expected("end of predicate (at most two comparisons)"));
        }

        Ok(Predicate::Pair {
            left,
            connective,
            right,
        })
    }

    fn parse_comparison(&mut self) -> Result<Comparison> {
        let left = self.parse_operand(false)?;

        let op = match self.current() {
            Token::Eq => CompareOp::Eq,
            Token::Neq => CompareOp::Neq,
            Token::Lt => CompareOp::Lt,
            Token::Gt => CompareOp::Gt,
            _ => return Err(self.err_expected("comparison operator (=, !=, <, >)")),
        };
        self.advance();

        let right = self.parse_operand(true)?;
        Ok(Comparison { left, op, right })
    }

    /// An operand is a column reference or an aggregate; literals are only
    /// valid on the right-hand side of a comparison.
    fn parse_operand(&mut self, allow_literal: bool) -> Result<Operand> {
        if self.at_aggregate_keyword() {
            return Ok(Operand::Aggregate(self.parse_aggregate()?));
        }
        if allow_literal {
            if let Ok(lit) = self.try_literal() {
                return Ok(Operand::Literal(lit));
            }
        }
        if matches!(self.current(), Token::Identifier(_)) {
            return Ok(Operand::Column(self.parse_column_ref()?));
        }
        Err(self.err_expected(if allow_literal {
            "column, aggregate, or literal"
        } else {
            "column or aggregate"
        }))
    }

    // ========== Helper functions ==========

    fn parse_literal(&mut self) -> Result<Literal> {
        self.try_literal()
            .map_err(|_| self.err_expected("literal value"))
    }

    fn try_literal(&mut self) -> std::result::Result<Literal, ()> {
        let lit = match self.current() {
            Token::IntegerLiteral(n) => Literal::Int(*n),
            Token::DoubleLiteral(n) => Literal::Double(*n),
            Token::StringLiteral(s) => Literal::Str(s.clone()),
            _ => return Err(()),
        };
        self.advance();
        Ok(lit)
    }

    fn current(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn current_position(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|s| s.position)
            .unwrap_or(0)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.err_expected(&token.to_string()))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.current().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.err_expected("identifier")),
        }
    }

    fn err_expected(&self, expected: &str) -> Error {
        Error::Parse {
            position: self.current_position(),
            expected: expected.to_string(),
            found: self.current().to_string(),
        }
    }
}
