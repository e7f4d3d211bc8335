//! Pushdown predicates and deferred composable queries.
//!
//! # Responsibility
//! - Render structured predicates into parameterized SQL.
//! - Defer execution: a `Query` touches the store only on `fetch`.
//! - Fold eager-load includes into one SELECT with LEFT JOINs, so any
//!   number of includes still costs exactly one round trip.
//!
//! # Invariants
//! - Predicate values are always bound, never spliced into SQL text.
//! - Include order affects only which related data is populated, never
//!   the primary result set.

use crate::context::{StoreContext, StoreResult};
use crate::entity::{find_relation, Entity, RelatedRow, RelationDef};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::rc::Rc;

/// Structured predicate pushed down to the persistence engine.
///
/// Column names are caller-supplied `'static` identifiers; values bind as
/// SQL parameters.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(&'static str, Value),
    Ne(&'static str, Value),
    Gt(&'static str, Value),
    Ge(&'static str, Value),
    Lt(&'static str, Value),
    Le(&'static str, Value),
    Like(&'static str, String),
    IsNull(&'static str),
    IsNotNull(&'static str),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self::Eq(column, value.into())
    }

    pub fn ne(column: &'static str, value: impl Into<Value>) -> Self {
        Self::Ne(column, value.into())
    }

    pub fn gt(column: &'static str, value: impl Into<Value>) -> Self {
        Self::Gt(column, value.into())
    }

    pub fn ge(column: &'static str, value: impl Into<Value>) -> Self {
        Self::Ge(column, value.into())
    }

    pub fn lt(column: &'static str, value: impl Into<Value>) -> Self {
        Self::Lt(column, value.into())
    }

    pub fn le(column: &'static str, value: impl Into<Value>) -> Self {
        Self::Le(column, value.into())
    }

    pub fn like(column: &'static str, pattern: impl Into<String>) -> Self {
        Self::Like(column, pattern.into())
    }

    pub fn is_null(column: &'static str) -> Self {
        Self::IsNull(column)
    }

    pub fn is_not_null(column: &'static str) -> Self {
        Self::IsNotNull(column)
    }

    pub fn and(self, other: Filter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Renders this predicate against table alias `qualifier`, appending
    /// bound values to `binds` in placeholder order.
    pub(crate) fn render(&self, qualifier: &str, binds: &mut Vec<Value>) -> String {
        match self {
            Self::Eq(column, value) => comparison(qualifier, column, "=", value, binds),
            Self::Ne(column, value) => comparison(qualifier, column, "<>", value, binds),
            Self::Gt(column, value) => comparison(qualifier, column, ">", value, binds),
            Self::Ge(column, value) => comparison(qualifier, column, ">=", value, binds),
            Self::Lt(column, value) => comparison(qualifier, column, "<", value, binds),
            Self::Le(column, value) => comparison(qualifier, column, "<=", value, binds),
            Self::Like(column, pattern) => {
                binds.push(Value::Text(pattern.clone()));
                format!("{qualifier}.{column} LIKE ?")
            }
            Self::IsNull(column) => format!("{qualifier}.{column} IS NULL"),
            Self::IsNotNull(column) => format!("{qualifier}.{column} IS NOT NULL"),
            Self::And(left, right) => format!(
                "({} AND {})",
                left.render(qualifier, binds),
                right.render(qualifier, binds)
            ),
            Self::Or(left, right) => format!(
                "({} OR {})",
                left.render(qualifier, binds),
                right.render(qualifier, binds)
            ),
        }
    }
}

fn comparison(
    qualifier: &str,
    column: &str,
    operator: &str,
    value: &Value,
    binds: &mut Vec<Value>,
) -> String {
    binds.push(value.clone());
    format!("{qualifier}.{column} {operator} ?")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Deferred, composable query over one entity type.
///
/// Nothing executes until [`Query::fetch`]; every builder call refines the
/// same eventual statement instead of issuing a new one.
pub struct Query<T: Entity> {
    session: Rc<StoreContext>,
    filter: Option<Filter>,
    order: Vec<(&'static str, SortOrder)>,
    limit: Option<u32>,
    offset: u32,
    includes: Vec<&'static str>,
    _marker: PhantomData<T>,
}

impl<T: Entity> Query<T> {
    pub(crate) fn new(session: Rc<StoreContext>, filter: Option<Filter>) -> Self {
        Self {
            session,
            filter,
            order: Vec::new(),
            limit: None,
            offset: 0,
            includes: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Narrows the query; AND-composed with any existing predicate.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn order_by(mut self, column: &'static str, order: SortOrder) -> Self {
        self.order.push((column, order));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Adds one relation to eagerly load. Cumulative: every include
    /// augments the same statement. Relation names are validated on
    /// `fetch`.
    pub fn include(mut self, relation: &'static str) -> Self {
        if !self.includes.contains(&relation) {
            self.includes.push(relation);
        }
        self
    }

    /// Executes the composed statement and materializes the results.
    pub fn fetch(&self) -> StoreResult<Vec<T>> {
        let relations = self.resolve_includes()?;
        self.session.with_conn(|conn| {
            if relations.is_empty() {
                self.fetch_plain(conn)
            } else {
                self.fetch_with_includes(conn, &relations)
            }
        })
    }

    /// Executes the query and returns the first result, if any.
    ///
    /// Pushes `LIMIT 1` down to the engine rather than materializing the
    /// full result set.
    pub fn fetch_one(&self) -> StoreResult<Option<T>> {
        let limited = Self {
            session: self.session.clone(),
            filter: self.filter.clone(),
            order: self.order.clone(),
            limit: Some(self.limit.map_or(1, |limit| limit.min(1))),
            offset: self.offset,
            includes: self.includes.clone(),
            _marker: PhantomData,
        };
        Ok(limited.fetch()?.into_iter().next())
    }

    fn resolve_includes(&self) -> StoreResult<Vec<&'static RelationDef>> {
        self.includes
            .iter()
            .map(|name| {
                find_relation::<T>(name).ok_or_else(|| crate::context::StoreError::UnknownRelation {
                    table: T::TABLE,
                    relation: (*name).to_string(),
                })
            })
            .collect()
    }

    fn fetch_plain(&self, conn: &Connection) -> StoreResult<Vec<T>> {
        let mut binds: Vec<Value> = Vec::new();
        let columns = T::COLUMNS
            .iter()
            .map(|column| format!("t.{column} AS {column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {columns} FROM {} t", T::TABLE);
        self.render_tail(&mut sql, &mut binds);

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(T::from_row(row)?);
        }
        Ok(entities)
    }

    fn fetch_with_includes(
        &self,
        conn: &Connection,
        relations: &[&'static RelationDef],
    ) -> StoreResult<Vec<T>> {
        let mut binds: Vec<Value> = Vec::new();
        let sql = self.joined_sql(relations, &mut binds);

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;

        let mut entities: Vec<T> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        // Per primary entity, per relation: collected rows and a dedupe
        // set against join fan-out from multiple has-many includes.
        let mut buckets: Vec<Vec<Vec<RelatedRow>>> = Vec::new();
        let mut seen: Vec<Vec<HashSet<String>>> = Vec::new();

        while let Some(row) = rows.next()? {
            let entity = T::from_row(row)?;
            let key_token = value_token(&entity.key_value());
            let slot = match index.get(&key_token) {
                Some(&slot) => slot,
                None => {
                    entities.push(entity);
                    buckets.push(vec![Vec::new(); relations.len()]);
                    seen.push(vec![HashSet::new(); relations.len()]);
                    index.insert(key_token, entities.len() - 1);
                    entities.len() - 1
                }
            };

            for (position, relation) in relations.iter().enumerate() {
                let mut values = Vec::with_capacity(relation.target_columns.len());
                let mut all_null = true;
                for column in relation.target_columns {
                    let alias = format!("{}__{}", relation.name, column);
                    let value: Value = row.get(alias.as_str())?;
                    if !matches!(value, Value::Null) {
                        all_null = false;
                    }
                    values.push(value);
                }
                // A fully-null related tuple is a LEFT JOIN miss.
                if all_null {
                    continue;
                }
                let token = row_token(&values);
                if seen[slot][position].insert(token) {
                    buckets[slot][position].push(RelatedRow { values });
                }
            }
        }

        for (slot, entity) in entities.iter_mut().enumerate() {
            for (position, relation) in relations.iter().enumerate() {
                entity.attach_related(relation.name, std::mem::take(&mut buckets[slot][position]));
            }
        }

        Ok(entities)
    }

    fn joined_sql(&self, relations: &[&'static RelationDef], binds: &mut Vec<Value>) -> String {
        let mut select = T::COLUMNS
            .iter()
            .map(|column| format!("t.{column} AS {column}"))
            .collect::<Vec<_>>();
        let mut joins = String::new();

        for (position, relation) in relations.iter().enumerate() {
            let alias = format!("r{position}");
            for column in relation.target_columns {
                select.push(format!(
                    "{alias}.{column} AS {}__{column}",
                    relation.name
                ));
            }
            let _ = write!(
                joins,
                " LEFT JOIN {} {alias} ON {alias}.{} = t.{}",
                relation.target_table, relation.target_join_column, relation.local_column
            );
        }

        let mut sql = format!(
            "SELECT {} FROM {} t{joins}",
            select.join(", "),
            T::TABLE
        );

        if self.limit.is_some() || self.offset > 0 {
            // Paging must count primary entities, not joined rows: LEFT
            // JOIN fan-out would otherwise consume the limit. Page the
            // keys in a derived subquery and join the includes against
            // that primary set.
            let mut subquery = format!("SELECT s.{} FROM {} s", T::KEY_COLUMN, T::TABLE);
            if let Some(filter) = &self.filter {
                let clause = filter.render("s", binds);
                let _ = write!(subquery, " WHERE {clause}");
            }
            self.render_order(&mut subquery, "s");
            self.render_paging(&mut subquery, binds);

            let _ = write!(sql, " WHERE t.{} IN ({subquery})", T::KEY_COLUMN);
            self.render_order(&mut sql, "t");
        } else {
            self.render_tail(&mut sql, binds);
        }

        sql
    }

    fn render_tail(&self, sql: &mut String, binds: &mut Vec<Value>) {
        if let Some(filter) = &self.filter {
            let clause = filter.render("t", binds);
            let _ = write!(sql, " WHERE {clause}");
        }
        self.render_order(sql, "t");
        self.render_paging(sql, binds);
    }

    fn render_order(&self, sql: &mut String, qualifier: &str) {
        if self.order.is_empty() {
            return;
        }
        let order = self
            .order
            .iter()
            .map(|(column, direction)| format!("{qualifier}.{column} {}", direction.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(sql, " ORDER BY {order}");
    }

    fn render_paging(&self, sql: &mut String, binds: &mut Vec<Value>) {
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            binds.push(Value::from(i64::from(limit)));
            if self.offset > 0 {
                sql.push_str(" OFFSET ?");
                binds.push(Value::from(i64::from(self.offset)));
            }
        } else if self.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            binds.push(Value::from(i64::from(self.offset)));
        }
    }
}

/// Stable textual token for grouping rows by a key value.
fn value_token(value: &Value) -> String {
    match value {
        Value::Null => "n".to_string(),
        Value::Integer(i) => format!("i{i}"),
        Value::Real(r) => format!("r{r}"),
        Value::Text(s) => format!("t{s}"),
        Value::Blob(b) => format!("b{b:?}"),
    }
}

fn row_token(values: &[Value]) -> String {
    let mut token = String::new();
    for value in values {
        token.push_str(&value_token(value));
        token.push('\u{1f}');
    }
    token
}

#[cfg(test)]
mod tests {
    use super::Filter;
    use rusqlite::types::Value;

    #[test]
    fn comparison_filter_binds_value() {
        let mut binds = Vec::new();
        let sql = Filter::eq("type_name", "kushan".to_string()).render("t", &mut binds);
        assert_eq!(sql, "t.type_name = ?");
        assert_eq!(binds, vec![Value::Text("kushan".to_string())]);
    }

    #[test]
    fn and_or_compose_with_parentheses() {
        let mut binds = Vec::new();
        let filter = Filter::gt("user_type_id", 1i64)
            .and(Filter::like("type_name", "k%").or(Filter::is_null("type_name")));
        let sql = filter.render("t", &mut binds);
        assert_eq!(
            sql,
            "(t.user_type_id > ? AND (t.type_name LIKE ? OR t.type_name IS NULL))"
        );
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn null_tests_bind_nothing() {
        let mut binds = Vec::new();
        let sql = Filter::is_not_null("type_name").render("t", &mut binds);
        assert_eq!(sql, "t.type_name IS NOT NULL");
        assert!(binds.is_empty());
    }
}
