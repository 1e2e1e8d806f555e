//! Abstract query tree (AQT)
//!
//! This module defines the typed statement representation produced by the
//! parser, plus the canonical formatter: `Display` renders every node back
//! to statement text that re-parses to an equal tree.

use std::fmt;

use crate::catalog::DataType;

/// A parsed statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTable),
    DropTable(DropTable),
    CreateIndex(CreateIndex),
    DropIndex(DropIndex),
    Insert(Insert),
    Select(Select),
    Update(Update),
    Delete(Delete),
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

/// Column definition inside CREATE TABLE
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub foreign_key: Option<ForeignKeyRef>,
}

/// FOREIGN KEY REFERENCES target
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

/// DROP TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    pub name: String,
}

/// CREATE INDEX statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    pub name: String,
    pub table: String,
    pub column: String,
}

/// DROP INDEX statement
#[derive(Debug, Clone, PartialEq)]
pub struct DropIndex {
    pub name: String,
    pub table: String,
}

/// INSERT statement (single row, literal values only)
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    /// Column names, or None for the full table column list
    pub columns: Option<Vec<String>>,
    pub values: Vec<Literal>,
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub projections: Vec<Projection>,
    pub from: TableRef,
    pub join: Option<Join>,
    pub where_clause: Option<Predicate>,
    pub group_by: Vec<ColumnRef>,
    pub having: Option<Predicate>,
    pub order_by: Vec<OrderBy>,
}

/// One item of the projection list
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `*`
    Wildcard,
    /// A plain or qualified column
    Column(ColumnRef),
    /// An aggregate over a column
    Aggregate(Aggregate),
}

/// A base-table reference
///
/// `label` is the logical name column references use. It equals `name`
/// except in a self-join, where the parser synthesizes `<name>_L` and
/// `<name>_R` for the two instances.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub label: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
        }
    }
}

/// JOIN clause (inner equi-join between two tables)
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: TableRef,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    /// Ascending (true) or descending (false)
    pub ascending: bool,
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    /// SET clause: (column, literal) pairs
    pub assignments: Vec<(String, Literal)>,
    pub where_clause: Option<Predicate>,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub where_clause: Option<Predicate>,
}

/// Column reference, optionally qualified by a table label
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

/// Literal value in statement text
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Double(f64),
    Str(String),
}

/// Aggregate function application
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub func: AggregateFunc,
    pub column: ColumnRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Min,
    Max,
    Sum,
}

impl AggregateFunc {
    pub fn keyword(&self) -> &'static str {
        match self {
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Sum => "SUM",
        }
    }
}

/// Comparison operator inside a predicate leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Gt,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
        }
    }
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Literal(Literal),
    Aggregate(Aggregate),
}

/// A single comparison leaf
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub left: Operand,
    pub op: CompareOp,
    pub right: Operand,
}

/// AND / OR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

/// A predicate: one comparison leaf, or exactly two combined by a connective
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Single(Comparison),
    Pair {
        left: Comparison,
        connective: Connective,
        right: Comparison,
    },
}

impl Predicate {
    /// The comparison leaves in the order they were written
    pub fn leaves(&self) -> Vec<&Comparison> {
        match self {
            Predicate::Single(c) => vec![c],
            Predicate::Pair { left, right, .. } => vec![left, right],
        }
    }

    /// The connective joining the leaves, if there are two
    pub fn connective(&self) -> Option<Connective> {
        match self {
            Predicate::Single(_) => None,
            Predicate::Pair { connective, .. } => Some(*connective),
        }
    }
}

// ========== Canonical formatter ==========

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateTable(s) => write!(f, "{}", s),
            Statement::DropTable(s) => write!(f, "DROP TABLE {}", s.name),
            Statement::CreateIndex(s) => {
                write!(f, "CREATE INDEX {} ON {}({})", s.name, s.table, s.column)
            }
            Statement::DropIndex(s) => write!(f, "DROP INDEX {} ON {}", s.name, s.table),
            Statement::Insert(s) => write!(f, "{}", s),
            Statement::Select(s) => write!(f, "{}", s),
            Statement::Update(s) => write!(f, "{}", s),
            Statement::Delete(s) => write!(f, "{}", s),
        }
    }
}

impl fmt::Display for CreateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE TABLE {} (", self.name)?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", col.name, col.data_type)?;
            if col.primary_key {
                write!(f, " PRIMARY KEY")?;
            }
            if let Some(fk) = &col.foreign_key {
                write!(f, " FOREIGN KEY REFERENCES {}({})", fk.table, fk.column)?;
            }
        }
        write!(f, ")")
    }
}

impl fmt::Display for Insert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {}", self.table)?;
        if let Some(columns) = &self.columns {
            write!(f, " ({})", columns.join(", "))?;
        }
        write!(f, " VALUES (")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        for (i, proj) in self.projections.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match proj {
                Projection::Wildcard => write!(f, "*")?,
                Projection::Column(c) => write!(f, "{}", c)?,
                Projection::Aggregate(a) => write!(f, "{}", a)?,
            }
        }
        write!(f, " FROM {}", self.from.name)?;
        if let Some(join) = &self.join {
            write!(
                f,
                " JOIN {} ON {} = {}",
                join.table.name, join.left, join.right
            )?;
        }
        if let Some(pred) = &self.where_clause {
            write!(f, " WHERE {}", pred)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            for (i, col) in self.group_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", col)?;
            }
        }
        if let Some(pred) = &self.having {
            write!(f, " HAVING {}", pred)?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            for (i, item) in self.order_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(
                    f,
                    "{} {}",
                    item.column,
                    if item.ascending { "ASC" } else { "DESC" }
                )?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {} SET ", self.table)?;
        for (i, (col, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", col, value)?;
        }
        if let Some(pred) = &self.where_clause {
            write!(f, " WHERE {}", pred)?;
        }
        Ok(())
    }
}

impl fmt::Display for Delete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", self.table)?;
        if let Some(pred) = &self.where_clause {
            write!(f, " WHERE {}", pred)?;
        }
        Ok(())
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            // A double without a fractional part still needs its decimal
            // point, otherwise it re-parses as an integer.
            Literal::Double(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Literal::Str(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.func.keyword(), self.column)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(c) => write!(f, "{}", c),
            Operand::Literal(l) => write!(f, "{}", l),
            Operand::Aggregate(a) => write!(f, "{}", a),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Single(c) => write!(f, "{}", c),
            Predicate::Pair {
                left,
                connective,
                right,
            } => {
                let word = match connective {
                    Connective::And => "AND",
                    Connective::Or => "OR",
                };
                write!(f, "{} {} {}", left, word, right)
            }
        }
    }
}
