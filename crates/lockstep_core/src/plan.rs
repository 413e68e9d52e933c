//! Physical plans.
//!
//! A plan declares the tables it reads and writes and executes against a
//! [`JournalView`]. The scheduler only ever looks at the declarations; the
//! view enforces them at run time.
//!
//! The plans here are deliberately simple: point reads, filtered scans and
//! the three row mutations. They are enough to drive the scheduler end to
//! end, not a query engine.

use crate::error::{CoreError, CoreResult};
use crate::journal::JournalView;
use crate::row::Row;
use crate::schema::IndexKey;
use crate::types::{RowId, TableId};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// An executable plan with declared table access.
pub trait PhysicalPlan: Send + Sync + fmt::Debug {
    /// Tables the plan reads.
    fn inputs(&self) -> Vec<TableId>;

    /// Tables the plan writes. Empty for read plans.
    fn outputs(&self) -> Vec<TableId> {
        Vec::new()
    }

    /// Runs the plan against the task's view.
    ///
    /// # Errors
    ///
    /// Any error rolls the whole task back.
    fn execute(&self, view: &mut JournalView<'_>) -> CoreResult<PlanResult>;
}

/// A shared plan handle.
pub type PlanRef = Arc<dyn PhysicalPlan>;

/// The outcome of one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanResult {
    /// Rows produced by a read, or the rows an insert created.
    Rows(Vec<Row>),
    /// Number of rows an update or delete touched.
    Affected(usize),
}

impl PlanResult {
    /// Returns the rows, if this is a row result.
    #[must_use]
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Affected(_) => None,
        }
    }

    /// Returns the affected count, if this is a count result.
    #[must_use]
    pub fn affected(&self) -> Option<usize> {
        match self {
            Self::Rows(_) => None,
            Self::Affected(n) => Some(*n),
        }
    }
}

/// Row predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every row.
    All,
    /// Column equals a constant.
    Eq {
        /// Column position.
        column: usize,
        /// Value to compare with.
        value: Value,
    },
    /// Column equals a bound parameter.
    EqParam {
        /// Column position.
        column: usize,
        /// Parameter position.
        param: usize,
    },
    /// Every inner filter matches.
    And(Vec<Filter>),
}

impl Filter {
    /// Column equals a constant.
    pub fn eq(column: usize, value: impl Into<Value>) -> Self {
        Self::Eq {
            column,
            value: value.into(),
        }
    }

    /// Column equals the parameter at `param`.
    #[must_use]
    pub fn eq_param(column: usize, param: usize) -> Self {
        Self::EqParam { column, param }
    }

    /// Tests a row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a referenced parameter is not bound.
    pub fn matches(&self, row: &Row, params: &[Value]) -> CoreResult<bool> {
        match self {
            Self::All => Ok(true),
            Self::Eq { column, value } => Ok(row.get(*column) == Some(value)),
            Self::EqParam { column, param } => {
                Ok(row.get(*column) == Some(param_at(params, *param)?))
            }
            Self::And(inner) => {
                for f in inner {
                    if !f.matches(row, params)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// First equality in the filter, usable as an index probe.
    fn probe(&self, params: &[Value]) -> CoreResult<Option<(usize, Value)>> {
        match self {
            Self::All => Ok(None),
            Self::Eq { column, value } => Ok(Some((*column, value.clone()))),
            Self::EqParam { column, param } => {
                Ok(Some((*column, param_at(params, *param)?.clone())))
            }
            Self::And(inner) => {
                for f in inner {
                    if let Some(probe) = f.probe(params)? {
                        return Ok(Some(probe));
                    }
                }
                Ok(None)
            }
        }
    }
}

fn param_at(params: &[Value], index: usize) -> CoreResult<&Value> {
    params.get(index).ok_or_else(|| {
        CoreError::invalid_operation(format!(
            "parameter {index} not bound ({} given)",
            params.len()
        ))
    })
}

/// Rows of `table` matching `filter`, in row id order.
///
/// Uses a single-column index on the first equality when one exists.
fn select(view: &JournalView<'_>, table: TableId, filter: &Filter) -> CoreResult<Vec<Row>> {
    let schema = view.schema(table)?;
    let candidates = match filter.probe(view.params())? {
        Some((column, value)) => match schema.indexes().iter().find(|d| d.columns == [column]) {
            Some(def) => view.lookup(table, &def.name, &IndexKey(vec![value]))?,
            None => view.scan(table)?,
        },
        None => view.scan(table)?,
    };
    let mut rows = Vec::with_capacity(candidates.len());
    for row in candidates {
        if filter.matches(&row, view.params())? {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Reads a single row by id.
#[derive(Debug, Clone)]
pub struct GetPlan {
    table: TableId,
    row_id: RowId,
}

impl GetPlan {
    /// Creates a point read.
    #[must_use]
    pub fn new(table: TableId, row_id: RowId) -> Self {
        Self { table, row_id }
    }
}

impl PhysicalPlan for GetPlan {
    fn inputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn execute(&self, view: &mut JournalView<'_>) -> CoreResult<PlanResult> {
        Ok(PlanResult::Rows(
            view.get(self.table, self.row_id)?.into_iter().collect(),
        ))
    }
}

/// Reads every row matching a filter.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    table: TableId,
    filter: Filter,
}

impl ScanPlan {
    /// Creates a filtered scan.
    #[must_use]
    pub fn new(table: TableId, filter: Filter) -> Self {
        Self { table, filter }
    }
}

impl PhysicalPlan for ScanPlan {
    fn inputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn execute(&self, view: &mut JournalView<'_>) -> CoreResult<PlanResult> {
        select(view, self.table, &self.filter).map(PlanResult::Rows)
    }
}

/// Inserts rows given as positional values.
#[derive(Debug, Clone)]
pub struct InsertPlan {
    table: TableId,
    rows: Vec<Vec<Value>>,
}

impl InsertPlan {
    /// Creates an insert of one or more rows.
    #[must_use]
    pub fn new(table: TableId, rows: Vec<Vec<Value>>) -> Self {
        Self { table, rows }
    }

    /// Creates an insert of a single row.
    #[must_use]
    pub fn one(table: TableId, values: Vec<Value>) -> Self {
        Self::new(table, vec![values])
    }
}

impl PhysicalPlan for InsertPlan {
    fn inputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn outputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn execute(&self, view: &mut JournalView<'_>) -> CoreResult<PlanResult> {
        let mut created = Vec::with_capacity(self.rows.len());
        for values in &self.rows {
            let id = view.insert(self.table, values.clone())?;
            created.push(Row::new(id, values.clone()));
        }
        Ok(PlanResult::Rows(created))
    }
}

/// Overwrites columns of every row matching a filter.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    table: TableId,
    filter: Filter,
    set: Vec<(usize, Value)>,
}

impl UpdatePlan {
    /// Creates an update with no assignments.
    #[must_use]
    pub fn new(table: TableId, filter: Filter) -> Self {
        Self {
            table,
            filter,
            set: Vec::new(),
        }
    }

    /// Adds a column assignment.
    #[must_use]
    pub fn set(mut self, column: usize, value: impl Into<Value>) -> Self {
        self.set.push((column, value.into()));
        self
    }
}

impl PhysicalPlan for UpdatePlan {
    fn inputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn outputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn execute(&self, view: &mut JournalView<'_>) -> CoreResult<PlanResult> {
        let targets = select(view, self.table, &self.filter)?;
        let count = targets.len();
        for row in targets {
            let id = row.id();
            let mut values = row.into_values();
            for (column, value) in &self.set {
                let slot = values.get_mut(*column).ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "column {column} out of range for {}",
                        self.table
                    ))
                })?;
                *slot = value.clone();
            }
            view.update(self.table, id, values)?;
        }
        Ok(PlanResult::Affected(count))
    }
}

/// Deletes every row matching a filter.
#[derive(Debug, Clone)]
pub struct DeletePlan {
    table: TableId,
    filter: Filter,
}

impl DeletePlan {
    /// Creates a filtered delete.
    #[must_use]
    pub fn new(table: TableId, filter: Filter) -> Self {
        Self { table, filter }
    }
}

impl PhysicalPlan for DeletePlan {
    fn inputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn outputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn execute(&self, view: &mut JournalView<'_>) -> CoreResult<PlanResult> {
        let targets = select(view, self.table, &self.filter)?;
        for row in &targets {
            view.delete(self.table, row.id())?;
        }
        Ok(PlanResult::Affected(targets.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Value>) -> Row {
        Row::new(RowId::new(1), values)
    }

    #[test]
    fn filter_matches_constants_and_params() {
        let r = row(vec![Value::Integer(1), Value::from("new")]);
        assert!(Filter::All.matches(&r, &[]).unwrap());
        assert!(Filter::eq(1, "new").matches(&r, &[]).unwrap());
        assert!(!Filter::eq(1, "old").matches(&r, &[]).unwrap());
        assert!(Filter::eq_param(1, 0)
            .matches(&r, &[Value::from("new")])
            .unwrap());
        assert!(Filter::And(vec![Filter::eq(0, 1i64), Filter::eq(1, "old")])
            .matches(&r, &[])
            .is_ok_and(|m| !m));
    }

    #[test]
    fn unbound_parameter_is_an_error() {
        let r = row(vec![Value::Integer(1)]);
        let err = Filter::eq_param(0, 2).matches(&r, &[]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn probe_picks_first_equality() {
        let f = Filter::And(vec![Filter::All, Filter::eq_param(3, 0), Filter::eq(1, 2i64)]);
        assert_eq!(
            f.probe(&[Value::from("x")]).unwrap(),
            Some((3, Value::from("x")))
        );
        assert_eq!(Filter::All.probe(&[]).unwrap(), None);
    }

    #[test]
    fn write_plans_declare_their_table_as_output() {
        let t = TableId::new(4);
        assert!(ScanPlan::new(t, Filter::All).outputs().is_empty());
        assert!(GetPlan::new(t, RowId::new(1)).outputs().is_empty());
        assert_eq!(InsertPlan::one(t, vec![]).outputs(), vec![t]);
        assert_eq!(UpdatePlan::new(t, Filter::All).outputs(), vec![t]);
        assert_eq!(DeletePlan::new(t, Filter::All).outputs(), vec![t]);
    }

    #[test]
    fn plan_result_accessors() {
        assert_eq!(PlanResult::Affected(3).affected(), Some(3));
        assert!(PlanResult::Affected(3).rows().is_none());
        assert_eq!(PlanResult::Rows(vec![]).rows().map(<[Row]>::len), Some(0));
    }
}
