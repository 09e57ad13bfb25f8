//! Result pages and their merge into one [`ResultTable`].

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result, TransportError};
use crate::transport::{Transport, FIRST_PAGE_TOKEN};

/// One page of results as delivered by the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    /// Column names of this page in first-seen order.
    pub columns: Vec<String>,
    /// Rows keyed by column name; absent keys are missing values.
    pub rows: Vec<Map<String, Value>>,
    /// Cursor of the following page, `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Fully materialized query result.
///
/// Every row holds exactly one value per column; missing values are `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let index = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// All values of column `name`, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[index]).collect())
    }

    /// Rows as JSON objects keyed by column, in column order.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Interprets column `name` as Unix epoch seconds (e.g. `_time`).
    ///
    /// Numeric and numeric-string values convert; anything else yields `None`.
    pub fn timestamps(&self, name: &str) -> Option<Vec<Option<DateTime<Utc>>>> {
        let values = self.column(name)?;
        Some(values.into_iter().map(epoch_seconds).collect())
    }
}

fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Accumulates pages under a growing column schema.
#[derive(Debug, Default)]
pub(crate) struct TableBuilder {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl TableBuilder {
    fn add_column(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.columns.len();
        self.columns.push(name.to_string());
        self.index.insert(name.to_string(), i);
        i
    }

    /// Appends the page's rows, extending the schema with unseen columns.
    pub(crate) fn push_page(&mut self, page: ResultPage) {
        for name in &page.columns {
            self.add_column(name);
        }
        for record in page.rows {
            let mut row = vec![Value::Null; self.columns.len()];
            for (name, value) in record {
                let i = self.add_column(&name);
                if i >= row.len() {
                    row.resize(i + 1, Value::Null);
                }
                row[i] = value;
            }
            self.rows.push(row);
        }
    }

    /// Pads every row to the final schema width.
    pub(crate) fn finish(mut self) -> ResultTable {
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, Value::Null);
        }
        ResultTable {
            columns: self.columns,
            rows: self.rows,
        }
    }
}

/// Pulls every page of a completed job and merges them.
pub(crate) struct ResultAssembler<'a> {
    transport: &'a Transport,
}

impl<'a> ResultAssembler<'a> {
    pub(crate) fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    /// Fetches pages until one has no next token.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] when a page token repeats, when the results expired
    /// before the first page could be fetched, or on any fetch failure.
    pub(crate) async fn assemble(&self, job_id: &str) -> Result<ResultTable> {
        let mut builder = TableBuilder::default();
        let mut requested: HashSet<String> = HashSet::from([FIRST_PAGE_TOKEN.to_string()]);
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = match self.transport.fetch_page(job_id, token.as_deref()).await {
                Ok(page) => page,
                Err(err @ TransportError::NotFound(_)) if token.is_none() => {
                    return Err(Error::Query {
                        message: "Result expired before retrieval".to_string(),
                        job_id: Some(job_id.to_string()),
                        source: Some(Box::new(err)),
                    });
                }
                Err(err) => return Err(err.into_error("Failed to retrieve results", Some(job_id))),
            };
            pages += 1;

            let next = page.next_page_token.clone();
            debug!(job_id, page = pages, rows = page.rows.len(), next = ?next, "fetched result page");
            builder.push_page(page);

            match next {
                None => break,
                Some(next) => {
                    if !requested.insert(next.clone()) {
                        return Err(Error::query_for_job(
                            format!("Pagination loop detected: page token '{next}' was already requested"),
                            job_id,
                        ));
                    }
                    token = Some(next);
                }
            }
        }

        let table = builder.finish();
        debug!(job_id, pages, rows = table.len(), columns = table.columns().len(), "assembled result table");
        Ok(table)
    }
}
