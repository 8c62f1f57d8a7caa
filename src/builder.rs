//! SQL builder for write paths and DDL.
//!
//! Every request node renders through a single [`SqlWriter`], either with bound
//! `$n` parameters ([`Render::Bind`], what the driver executes) or with encoded
//! literals ([`Render::Inline`], for display and dry runs). Literal rules live in
//! [`encode_literal`] and nowhere else.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{DbError, DbResult};
use crate::rows::Rows;
use crate::types::{Datatype, Field};
use crate::value::Value;

/// Fixed-width timestamp text format, always applied to UTC values.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// How values reach the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    /// `$n` placeholders plus a parameter list.
    Bind,
    /// Encoded literals inline; the parameter list stays empty.
    Inline,
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// A statement with no parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Trait for request nodes that render to SQL.
pub trait ToSql {
    fn to_sql(&self, render: Render) -> DbResult<Statement>;
}

/// Accumulates SQL text and parameters.
pub(crate) struct SqlWriter {
    render: Render,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    pub(crate) fn new(render: Render) -> Self {
        Self {
            render,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, s: &str) -> &mut Self {
        self.sql.push_str(s);
        self
    }

    pub(crate) fn ident(&mut self, name: &str) -> &mut Self {
        self.sql.push_str(&quote_ident(name));
        self
    }

    pub(crate) fn idents<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> &mut Self {
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.ident(name);
        }
        self
    }

    /// Write a value. With a known datatype the placeholder is cast to it.
    pub(crate) fn value(&mut self, value: &Value, datatype: Option<Datatype>) -> &mut Self {
        match (self.render, value) {
            (Render::Inline, v) => {
                let dt = datatype.or_else(|| v.datatype()).unwrap_or(Datatype::Text);
                self.sql.push_str(&encode_literal(v, dt));
            }
            // NULL goes inline, typed by the cast.
            (Render::Bind, Value::Null) => {
                self.sql.push_str("NULL");
                if let Some(dt) = datatype {
                    let _ = write!(self.sql, "::{}", dt.sql_name());
                }
            }
            (Render::Bind, v) => {
                self.params.push(v.clone());
                let _ = write!(self.sql, "${}", self.params.len());
                if let Some(dt) = datatype {
                    let _ = write!(self.sql, "::{}", dt.sql_name());
                }
            }
        }
        self
    }

    pub(crate) fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`, or just `"table"` when no schema is given.
pub fn qualified_table(schema: &str, table: &str) -> String {
    if schema.is_empty() {
        quote_ident(table)
    } else {
        format!("{}.{}", quote_ident(schema), quote_ident(table))
    }
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Format a UTC instant in [`TIME_FORMAT`].
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    format_naive(&ts.naive_utc())
}

/// Format a naive (already UTC) timestamp in [`TIME_FORMAT`].
pub fn format_naive(ts: &NaiveDateTime) -> String {
    ts.format(TIME_FORMAT).to_string()
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "'NaN'".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "'Infinity'" } else { "'-Infinity'" }.to_string()
    } else {
        f.to_string()
    }
}

fn real_literal(f: f32) -> String {
    if f.is_finite() {
        f.to_string()
    } else {
        float_literal(f64::from(f))
    }
}

fn bytea_literal(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2 + 6);
    s.push_str("E'\\\\x");
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s.push('\'');
    s
}

fn scalar_literal(value: &Value) -> String {
    match value {
        Value::Bool(_) | Value::Int(_) | Value::BigInt(_) => value.to_string(),
        Value::Real(f) => real_literal(*f),
        Value::Double(f) => float_literal(*f),
        Value::Bytes(b) => bytea_literal(b),
        other => quote_literal(&other.to_string()),
    }
}

/// Encode `value` as a SQL literal for a column of `datatype`.
///
/// Textual kinds are quoted and escaped, floats render NaN/Infinity quoted and
/// finite values bare, blobs use escape-string hex notation, NULL is `NULL`.
pub fn encode_literal(value: &Value, datatype: Datatype) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }
    match datatype {
        dt if dt.is_textual() => quote_literal(&value.to_string()),
        Datatype::Real | Datatype::Double => scalar_literal(value),
        Datatype::Blob => match value {
            Value::Bytes(b) => bytea_literal(b),
            other => quote_literal(&other.to_string()),
        },
        _ => scalar_literal(value),
    }
}

/// Bound parameters PostgreSQL accepts in one statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// INSERT of every tuple in a Rows value, optionally with RETURNING.
pub struct Insert<'a> {
    pub rows: &'a Rows,
    pub returning: &'a [Field],
}

impl<'a> Insert<'a> {
    pub fn new(rows: &'a Rows) -> Self {
        Self { rows, returning: &[] }
    }

    pub fn returning(mut self, fields: &'a [Field]) -> Self {
        self.returning = fields;
        self
    }

    fn write_tail(&self, w: &mut SqlWriter) {
        if !self.returning.is_empty() {
            w.push(" RETURNING ")
                .idents(self.returning.iter().map(|f| f.name.as_str()));
        }
    }

    /// Bound statements covering every tuple in order, each within
    /// [`MAX_BIND_PARAMS`].
    pub fn to_bound_chunks(&self) -> DbResult<Vec<Statement>> {
        bound_chunks(self.rows, MAX_BIND_PARAMS, |w| self.write_tail(w))
    }
}

fn check_insert(rows: &Rows) -> DbResult<()> {
    rows.validate()?;
    if rows.values.is_empty() {
        return Err(DbError::invalid(format!(
            "no value tuples to insert into '{}'",
            rows.table_name
        )));
    }
    Ok(())
}

fn write_insert_head(w: &mut SqlWriter, rows: &Rows, tuples: &[Vec<Value>]) {
    w.push("INSERT INTO ")
        .push(&qualified_table(rows.schema_or_default(), &rows.table_name))
        .push(" (")
        .idents(rows.fields.iter().map(|f| f.name.as_str()))
        .push(") VALUES ");
    for (i, tuple) in tuples.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push("(");
        for (j, (value, field)) in tuple.iter().zip(&rows.fields).enumerate() {
            if j > 0 {
                w.push(", ");
            }
            w.value(value, Some(field.datatype));
        }
        w.push(")");
    }
}

/// Split the tuples of `rows` so no statement binds more than `max_params` values.
pub(crate) fn bound_chunks(
    rows: &Rows,
    max_params: usize,
    tail: impl Fn(&mut SqlWriter),
) -> DbResult<Vec<Statement>> {
    check_insert(rows)?;
    let per_chunk = (max_params / rows.fields.len()).max(1);
    Ok(rows
        .values
        .chunks(per_chunk)
        .map(|tuples| {
            let mut w = SqlWriter::new(Render::Bind);
            write_insert_head(&mut w, rows, tuples);
            tail(&mut w);
            w.finish()
        })
        .collect())
}

impl ToSql for Insert<'_> {
    fn to_sql(&self, render: Render) -> DbResult<Statement> {
        check_insert(self.rows)?;
        let mut w = SqlWriter::new(render);
        write_insert_head(&mut w, self.rows, &self.rows.values);
        self.write_tail(&mut w);
        Ok(w.finish())
    }
}

/// INSERT … ON CONFLICT (constraint) DO UPDATE for every other column.
pub struct Upsert<'a> {
    pub rows: &'a Rows,
    pub constraint: &'a str,
}

impl Upsert<'_> {
    fn check_constraint(&self) -> DbResult<()> {
        if self.rows.column_index(self.constraint).is_none() {
            return Err(DbError::invalid(format!(
                "constraint column '{}' is not among the fields",
                self.constraint
            )));
        }
        Ok(())
    }

    fn write_tail(&self, w: &mut SqlWriter) {
        w.push(" ON CONFLICT (").ident(self.constraint).push(")");
        let others: Vec<&str> = self
            .rows
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| *name != self.constraint)
            .collect();
        if others.is_empty() {
            w.push(" DO NOTHING");
            return;
        }
        w.push(" DO UPDATE SET ");
        for (i, name) in others.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            let col = quote_ident(name);
            w.push(&format!("{} = EXCLUDED.{}", col, col));
        }
    }

    /// Bound statements covering every tuple in order, each within
    /// [`MAX_BIND_PARAMS`].
    pub fn to_bound_chunks(&self) -> DbResult<Vec<Statement>> {
        self.check_constraint()?;
        bound_chunks(self.rows, MAX_BIND_PARAMS, |w| self.write_tail(w))
    }
}

impl ToSql for Upsert<'_> {
    fn to_sql(&self, render: Render) -> DbResult<Statement> {
        self.check_constraint()?;
        check_insert(self.rows)?;
        let mut w = SqlWriter::new(render);
        write_insert_head(&mut w, self.rows, &self.rows.values);
        self.write_tail(&mut w);
        Ok(w.finish())
    }
}

/// Comparison operator for a where clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

/// A single `column op value` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CompareOp::Eq, value)
    }

    fn write(&self, w: &mut SqlWriter) -> DbResult<()> {
        w.ident(&self.column);
        match (&self.value, self.op) {
            (Value::Null, CompareOp::Eq) => {
                w.push(" IS NULL");
            }
            (Value::Null, CompareOp::Ne) => {
                w.push(" IS NOT NULL");
            }
            (Value::Null, op) => {
                return Err(DbError::invalid(format!(
                    "cannot compare '{}' {} NULL",
                    self.column,
                    op.sql()
                )));
            }
            (value, op) => {
                w.push(" ").push(op.sql()).push(" ").value(value, None);
            }
        }
        Ok(())
    }
}

/// One `column = value` assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Value,
    pub datatype: Option<Datatype>,
}

/// UPDATE with ordered set clauses and a single typed where clause.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub table: String,
    pub set: Vec<Assignment>,
    pub filter: Filter,
}

impl UpdateRequest {
    pub fn new(table: impl Into<String>, filter: Filter) -> Self {
        Self {
            table: table.into(),
            set: Vec::new(),
            filter,
        }
    }

    /// Assign a value, sent with its own type.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push(Assignment {
            column: column.into(),
            value: value.into(),
            datatype: None,
        });
        self
    }

    /// Assign a value cast to the column's datatype.
    pub fn set_typed(
        mut self,
        column: impl Into<String>,
        value: impl Into<Value>,
        datatype: Datatype,
    ) -> Self {
        self.set.push(Assignment {
            column: column.into(),
            value: value.into(),
            datatype: Some(datatype),
        });
        self
    }
}

impl ToSql for UpdateRequest {
    fn to_sql(&self, render: Render) -> DbResult<Statement> {
        if self.set.is_empty() {
            return Err(DbError::invalid(format!("nothing to update in '{}'", self.table)));
        }
        let mut w = SqlWriter::new(render);
        w.push("UPDATE ").ident(&self.table).push(" SET ");
        for (i, a) in self.set.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(&a.column).push(" = ").value(&a.value, a.datatype);
        }
        w.push(" WHERE ");
        self.filter.write(&mut w)?;
        Ok(w.finish())
    }
}

/// DELETE FROM table WHERE filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub table: String,
    pub filter: Filter,
}

impl DeleteRequest {
    pub fn new(table: impl Into<String>, filter: Filter) -> Self {
        Self {
            table: table.into(),
            filter,
        }
    }
}

impl ToSql for DeleteRequest {
    fn to_sql(&self, render: Render) -> DbResult<Statement> {
        let mut w = SqlWriter::new(render);
        w.push("DELETE FROM ").ident(&self.table).push(" WHERE ");
        self.filter.write(&mut w)?;
        Ok(w.finish())
    }
}

/// CREATE TABLE IF NOT EXISTS from a Rows value's fields.
pub struct CreateTable<'a> {
    pub rows: &'a Rows,
    /// Columns rendered `NOT NULL UNIQUE`.
    pub constraints: &'a [String],
}

impl ToSql for CreateTable<'_> {
    fn to_sql(&self, _render: Render) -> DbResult<Statement> {
        if self.rows.table_name.is_empty() || self.rows.fields.is_empty() {
            return Err(DbError::invalid("create table needs a name and at least one field"));
        }
        let mut w = SqlWriter::new(Render::Inline);
        w.push("CREATE TABLE IF NOT EXISTS ")
            .push(&qualified_table(self.rows.schema_or_default(), &self.rows.table_name))
            .push(" (");
        for (i, f) in self.rows.fields.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(&f.name).push(" ").push(f.datatype.sql_name());
            if self.constraints.iter().any(|c| *c == f.name) {
                w.push(" NOT NULL UNIQUE");
            }
        }
        w.push(")");
        Ok(w.finish())
    }
}

/// CREATE INDEX IF NOT EXISTS over one or more columns.
pub struct CreateIndex<'a> {
    pub name: &'a str,
    pub table: &'a str,
    pub columns: &'a [String],
}

impl ToSql for CreateIndex<'_> {
    fn to_sql(&self, _render: Render) -> DbResult<Statement> {
        if self.columns.is_empty() {
            return Err(DbError::invalid(format!("index '{}' has no columns", self.name)));
        }
        let mut w = SqlWriter::new(Render::Inline);
        w.push("CREATE INDEX IF NOT EXISTS ")
            .ident(self.name)
            .push(" ON ")
            .ident(self.table)
            .push(" (")
            .idents(self.columns.iter().map(String::as_str))
            .push(")");
        Ok(w.finish())
    }
}

/// Literal INSERT text for `rows`, with RETURNING when `returning` is non-empty.
pub fn build_insert_query(rows: &Rows, returning: &[Field]) -> DbResult<String> {
    Ok(Insert::new(rows).returning(returning).to_sql(Render::Inline)?.sql)
}
