use crate::error::Result;
use crate::events::Event;
use crate::utils::exists_or_create_dir;

use std::path::Path;
use tracing::info;

pub trait CSVWriter<T>
where
    T: Sized,
{
    fn write_csv(&self, data: &[T], path: &Path) -> Result<()>;
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        exists_or_create_dir(parent)?;
    }
    Ok(())
}

/// Writes the event bundle: one row per event, header from the field names.
pub struct EventCSVWriter {}

impl EventCSVWriter {
    pub fn new() -> Self {
        EventCSVWriter {}
    }
}

impl Default for EventCSVWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CSVWriter<Event> for EventCSVWriter {
    fn write_csv(&self, data: &[Event], path: &Path) -> Result<()> {
        info!("Writing {} events to {}", data.len(), path.display());
        ensure_parent(path)?;
        let mut wtr = csv::Writer::from_path(path)?;
        for d in data {
            wtr.serialize(d)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Startup times of one strategy: one column per RTT value, one row per
/// measured round. Failed rounds hold NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub method: String,
    pub rtts: Vec<u32>,
    pub columns: Vec<Vec<f64>>,
}

impl ResultTable {
    pub fn new(method: &str) -> Self {
        ResultTable {
            method: method.to_string(),
            rtts: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn push_column(&mut self, rtt: u32, values: Vec<f64>) {
        self.rtts.push(rtt);
        self.columns.push(values);
    }

    pub fn rows(&self) -> usize {
        self.columns.iter().map(Vec::len).max().unwrap_or(0)
    }
}

pub struct ResultTableCSVWriter {}

impl ResultTableCSVWriter {
    pub fn new() -> Self {
        ResultTableCSVWriter {}
    }
}

impl Default for ResultTableCSVWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CSVWriter<ResultTable> for ResultTableCSVWriter {
    /// Writes a single table; `data` is expected to hold exactly one.
    fn write_csv(&self, data: &[ResultTable], path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let mut wtr = csv::Writer::from_path(path)?;
        for table in data {
            info!(
                "Writing {} x {} results for {} to {}",
                table.rows(),
                table.rtts.len(),
                table.method,
                path.display()
            );
            let mut header = vec!["round".to_string()];
            header.extend(table.rtts.iter().map(|rtt| rtt.to_string()));
            wtr.write_record(&header)?;

            for row in 0..table.rows() {
                let mut record = vec![row.to_string()];
                for column in &table.columns {
                    record.push(match column.get(row) {
                        Some(value) => value.to_string(),
                        None => String::new(),
                    });
                }
                wtr.write_record(&record)?;
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_table_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results/redis-update-vanilla.csv");
        let mut table = ResultTable::new("vanilla");
        table.push_column(2, vec![1.25, 1.5]);
        table.push_column(50, vec![2.5, f64::NAN]);

        ResultTableCSVWriter::new()
            .write_csv(&[table], &path)
            .unwrap();

        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(written, "round,2,50\n0,1.25,2.5\n1,1.5,NaN\n");
    }
}
