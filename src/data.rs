//! Customer feature records, the scored table and their CSV boundary using Polars

use crate::error::CltvError;
use ndarray::Array1;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

pub const EXPECTED_AVERAGE_VALUE_COLUMN: &str = "expected_average_value";
pub const PROB_ALIVE_COLUMN: &str = "prob_alive";
pub const CLV_COLUMN: &str = "clv";
pub const SEGMENT_COLUMN: &str = "segment";

/// Name of the expected-purchases column for a horizon, e.g. `expected_purchases_24`.
pub fn expected_purchases_column(horizon: f64) -> String {
    format!("expected_purchases_{horizon}")
}

/// One customer's transaction summary, the unit of analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    /// Opaque unique key
    pub customer_id: String,
    /// Number of repeat purchase occasions
    pub frequency: u32,
    /// Time between the first and the most recent purchase occasion
    pub recency: f64,
    /// Customer age `T`: time between the first purchase and the observation cutoff
    pub age: f64,
    /// Average transaction value
    pub monetary: f64,
}

impl CustomerRecord {
    pub fn new(
        customer_id: impl Into<String>,
        frequency: u32,
        recency: f64,
        age: f64,
        monetary: f64,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            frequency,
            recency,
            age,
            monetary,
        }
    }

    /// Check the feature-table invariants (`0 <= recency <= T`, no recency
    /// without repeat purchases, finite non-negative monetary value).
    pub fn validate(&self) -> crate::Result<()> {
        let id = self.customer_id.as_str();
        if id.is_empty() {
            return Err(CltvError::invalid_input(id, "customer_id is empty"));
        }
        if !self.recency.is_finite() || self.recency < 0.0 {
            return Err(CltvError::invalid_input(
                id,
                format!("recency must be finite and >= 0, got {}", self.recency),
            ));
        }
        if !self.age.is_finite() {
            return Err(CltvError::invalid_input(
                id,
                format!("T must be finite, got {}", self.age),
            ));
        }
        if self.recency > self.age {
            return Err(CltvError::invalid_input(
                id,
                format!("recency {} exceeds T {}", self.recency, self.age),
            ));
        }
        if self.frequency == 0 && self.recency != 0.0 {
            return Err(CltvError::invalid_input(
                id,
                format!("recency {} is non-zero while frequency is 0", self.recency),
            ));
        }
        if !self.monetary.is_finite() || self.monetary < 0.0 {
            return Err(CltvError::invalid_input(
                id,
                format!("monetary must be finite and >= 0, got {}", self.monetary),
            ));
        }
        Ok(())
    }
}

/// Validate every record and reject an empty set.
pub fn validate_records(records: &[CustomerRecord]) -> crate::Result<()> {
    if records.is_empty() {
        return Err(CltvError::InvalidArgument(
            "at least one customer record is required".to_string(),
        ));
    }
    records.iter().try_for_each(CustomerRecord::validate)
}

/// A derived column appended to the feature table.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedColumn {
    Values(Array1<f64>),
    Labels(Vec<String>),
}

/// The immutable feature table plus derived columns, each written exactly once.
#[derive(Debug, Clone)]
pub struct ScoredTable {
    records: Vec<CustomerRecord>,
    columns: Vec<(String, DerivedColumn)>,
}

impl ScoredTable {
    /// Build a table from validated records with unique customer ids.
    pub fn new(records: Vec<CustomerRecord>) -> crate::Result<Self> {
        validate_records(&records)?;
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.customer_id.as_str()) {
                return Err(CltvError::invalid_input(
                    &record.customer_id,
                    "duplicate customer_id",
                ));
            }
        }
        Ok(Self {
            records,
            columns: Vec::new(),
        })
    }

    pub fn records(&self) -> &[CustomerRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn customer_ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.customer_id.as_str())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn add_values(&mut self, name: impl Into<String>, values: Array1<f64>) -> crate::Result<()> {
        let name = name.into();
        self.check_new_column(&name, values.len())?;
        self.columns.push((name, DerivedColumn::Values(values)));
        Ok(())
    }

    pub fn add_labels(&mut self, name: impl Into<String>, labels: Vec<String>) -> crate::Result<()> {
        let name = name.into();
        self.check_new_column(&name, labels.len())?;
        self.columns.push((name, DerivedColumn::Labels(labels)));
        Ok(())
    }

    pub fn values(&self, name: &str) -> Option<&Array1<f64>> {
        self.column(name).and_then(|c| match c {
            DerivedColumn::Values(v) => Some(v),
            DerivedColumn::Labels(_) => None,
        })
    }

    pub fn labels(&self, name: &str) -> Option<&[String]> {
        self.column(name).and_then(|c| match c {
            DerivedColumn::Labels(l) => Some(l.as_slice()),
            DerivedColumn::Values(_) => None,
        })
    }

    fn column(&self, name: &str) -> Option<&DerivedColumn> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    fn check_new_column(&self, name: &str, len: usize) -> crate::Result<()> {
        if self.column(name).is_some() || is_base_column(name) {
            return Err(CltvError::InvalidArgument(format!(
                "column '{name}' already exists and cannot be overwritten"
            )));
        }
        if len != self.records.len() {
            return Err(CltvError::InvalidArgument(format!(
                "column '{name}' has {len} rows, table has {}",
                self.records.len()
            )));
        }
        Ok(())
    }

    /// Feature columns followed by derived columns in insertion order.
    pub fn to_dataframe(&self) -> crate::Result<DataFrame> {
        let ids: Vec<String> = self.records.iter().map(|r| r.customer_id.clone()).collect();
        let frequency: Vec<u32> = self.records.iter().map(|r| r.frequency).collect();
        let recency: Vec<f64> = self.records.iter().map(|r| r.recency).collect();
        let age: Vec<f64> = self.records.iter().map(|r| r.age).collect();
        let monetary: Vec<f64> = self.records.iter().map(|r| r.monetary).collect();

        let mut series = vec![
            Series::new("customer_id", ids),
            Series::new("frequency", frequency),
            Series::new("recency", recency),
            Series::new("T", age),
            Series::new("monetary", monetary),
        ];
        for (name, column) in &self.columns {
            series.push(match column {
                DerivedColumn::Values(v) => Series::new(name, v.to_vec()),
                DerivedColumn::Labels(l) => Series::new(name, l.clone()),
            });
        }

        Ok(DataFrame::new(series)?)
    }
}

fn is_base_column(name: &str) -> bool {
    matches!(name, "customer_id" | "frequency" | "recency" | "T" | "monetary")
}

/// Load a feature table CSV with columns `customer_id, frequency, recency, T, monetary`.
///
/// Every record is validated; the first violation is reported with its customer id.
pub fn load_feature_table(file_path: &str) -> crate::Result<Vec<CustomerRecord>> {
    let df = LazyCsvReader::new(file_path)
        .with_has_header(true)
        .finish()?
        .select([
            col("customer_id").cast(DataType::String),
            col("frequency").cast(DataType::Float64),
            col("recency").cast(DataType::Float64),
            col("T").cast(DataType::Float64),
            col("monetary").cast(DataType::Float64),
        ])
        .collect()?;

    if df.height() == 0 {
        return Err(CltvError::InvalidArgument(format!(
            "no customer rows found in {file_path}"
        )));
    }

    let records = records_from_dataframe(&df)?;
    validate_records(&records)?;
    info!(customers = records.len(), path = file_path, "feature table loaded");
    Ok(records)
}

fn records_from_dataframe(df: &DataFrame) -> crate::Result<Vec<CustomerRecord>> {
    let ids = df.column("customer_id")?.str()?;
    let frequency = df.column("frequency")?.f64()?;
    let recency = df.column("recency")?.f64()?;
    let age = df.column("T")?.f64()?;
    let monetary = df.column("monetary")?.f64()?;

    let mut records = Vec::with_capacity(df.height());
    for (row, ((((id, f), r), t), m)) in ids
        .into_iter()
        .zip(frequency.into_iter())
        .zip(recency.into_iter())
        .zip(age.into_iter())
        .zip(monetary.into_iter())
        .enumerate()
    {
        let id = id.ok_or_else(|| {
            CltvError::invalid_input(&format!("row {row}"), "missing customer_id")
        })?;
        let (Some(f), Some(r), Some(t), Some(m)) = (f, r, t, m) else {
            return Err(CltvError::invalid_input(id, "missing feature value"));
        };
        if !f.is_finite() || f < 0.0 || f.fract() != 0.0 || f > u32::MAX as f64 {
            return Err(CltvError::invalid_input(
                id,
                format!("frequency must be a non-negative integer, got {f}"),
            ));
        }
        records.push(CustomerRecord::new(id, f as u32, r, t, m));
    }

    debug!(rows = records.len(), "feature rows parsed");
    Ok(records)
}

/// Write the scored table as CSV with a header row.
pub fn write_scored_table(table: &ScoredTable, output_path: &Path) -> crate::Result<()> {
    let mut df = table.to_dataframe()?;
    let mut file = File::create(output_path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    info!(path = %output_path.display(), rows = df.height(), "scored table written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customer_id,frequency,recency,T,monetary").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_record_validation() {
        assert!(CustomerRecord::new("a", 3, 5.0, 20.0, 100.0).validate().is_ok());
        assert!(CustomerRecord::new("a", 0, 0.0, 20.0, 0.0).validate().is_ok());

        let invalid = [
            CustomerRecord::new("a", 3, 25.0, 20.0, 100.0),
            CustomerRecord::new("a", 3, -1.0, 20.0, 100.0),
            CustomerRecord::new("a", 0, 4.0, 20.0, 100.0),
            CustomerRecord::new("a", 3, 5.0, 20.0, -1.0),
            CustomerRecord::new("a", 3, 5.0, f64::NAN, 100.0),
            CustomerRecord::new("", 3, 5.0, 20.0, 100.0),
        ];
        for record in &invalid {
            assert!(
                matches!(record.validate(), Err(CltvError::InvalidInput { .. })),
                "{record:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_records_rejects_empty() {
        assert!(matches!(
            validate_records(&[]),
            Err(CltvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_scored_table_columns_are_write_once() {
        let mut table = ScoredTable::new(vec![
            CustomerRecord::new("a", 1, 1.0, 2.0, 10.0),
            CustomerRecord::new("b", 2, 3.0, 4.0, 20.0),
        ])
        .unwrap();

        table.add_values(CLV_COLUMN, array![1.0, 2.0]).unwrap();
        assert!(matches!(
            table.add_values(CLV_COLUMN, array![3.0, 4.0]),
            Err(CltvError::InvalidArgument(_))
        ));
        assert!(matches!(
            table.add_values("frequency", array![3.0, 4.0]),
            Err(CltvError::InvalidArgument(_))
        ));
        assert!(table.add_values("short", array![1.0]).is_err());
        table
            .add_labels(SEGMENT_COLUMN, vec!["B".to_string(), "A".to_string()])
            .unwrap();

        assert_eq!(table.values(CLV_COLUMN).unwrap(), &array![1.0, 2.0]);
        assert_eq!(table.labels(SEGMENT_COLUMN).unwrap(), ["B", "A"]);
        assert!(table.values(SEGMENT_COLUMN).is_none());
        assert_eq!(table.column_names(), vec![CLV_COLUMN, SEGMENT_COLUMN]);
    }

    #[test]
    fn test_scored_table_rejects_duplicates() {
        let result = ScoredTable::new(vec![
            CustomerRecord::new("a", 1, 1.0, 2.0, 10.0),
            CustomerRecord::new("a", 2, 3.0, 4.0, 20.0),
        ]);
        assert!(matches!(result, Err(CltvError::InvalidInput { .. })));
    }

    #[test]
    fn test_load_feature_table() {
        let file = create_test_csv(&["12347,6,52.1,52.6,615.7", "12348,3,40.3,50.0,442.7", "12350,0,0,45.0,334.4"]);
        let records = load_feature_table(file.path().to_str().unwrap()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].customer_id, "12347");
        assert_eq!(records[0].frequency, 6);
        assert_eq!(records[1].recency, 40.3);
        assert_eq!(records[2].age, 45.0);
        assert_eq!(records[2].monetary, 334.4);
    }

    #[test]
    fn test_load_feature_table_rejects_invalid_rows() {
        let file = create_test_csv(&["1,2,30.0,20.0,10.0"]);
        let result = load_feature_table(file.path().to_str().unwrap());
        assert!(matches!(result, Err(CltvError::InvalidInput { .. })));

        let file = create_test_csv(&["1,2.5,3.0,20.0,10.0"]);
        let result = load_feature_table(file.path().to_str().unwrap());
        assert!(matches!(result, Err(CltvError::InvalidInput { .. })));
    }

    #[test]
    fn test_write_scored_table() {
        let mut table = ScoredTable::new(vec![
            CustomerRecord::new("a", 1, 1.0, 2.0, 10.0),
            CustomerRecord::new("b", 2, 3.0, 4.0, 20.0),
        ])
        .unwrap();
        table.add_values(CLV_COLUMN, array![1.5, 2.5]).unwrap();

        let output = NamedTempFile::new().unwrap();
        write_scored_table(&table, output.path()).unwrap();

        let written = std::fs::read_to_string(output.path()).unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next().unwrap(), "customer_id,frequency,recency,T,monetary,clv");
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn test_expected_purchases_column_name() {
        assert_eq!(expected_purchases_column(24.0), "expected_purchases_24");
        assert_eq!(expected_purchases_column(4.5), "expected_purchases_4.5");
    }
}
