//! Ready-made job callbacks.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use oagr_core::RequestState;
use serde_json::Value;
use tracing::{debug, error};

use crate::jobs::{JobCallback, JobEvent};

pub const DEFAULT_SUCCESS_FILE: &str = "oagr_success.csv";
pub const DEFAULT_ERROR_FILE: &str = "oagr_error.csv";

/// Appends freshly resolved identifiers to two CSV files on every event.
///
/// Success rows are `identifier,licence title`; error rows are
/// `identifier,error message`. Missing values are written as empty cells.
#[derive(Debug)]
pub struct CsvExportCallback {
    success_path: PathBuf,
    error_path: PathBuf,
    // Serialises appends when one callback is shared by several jobs.
    write_lock: Mutex<()>,
}

impl Default for CsvExportCallback {
    fn default() -> Self {
        Self::new(DEFAULT_SUCCESS_FILE, DEFAULT_ERROR_FILE)
    }
}

impl CsvExportCallback {
    pub fn new(success_path: impl Into<PathBuf>, error_path: impl Into<PathBuf>) -> Self {
        Self {
            success_path: success_path.into(),
            error_path: error_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn success_path(&self) -> &Path {
        &self.success_path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    /// Drain both buffers of `state` into the CSV files.
    pub fn export(&self, state: &mut RequestState) -> Result<(usize, usize), csv::Error> {
        let successes = state.flush_success();
        let errors = state.flush_error();
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        append_rows(&self.success_path, successes.iter().map(success_row))?;
        append_rows(&self.error_path, errors.iter().map(error_row))?;
        Ok((successes.len(), errors.len()))
    }
}

impl JobCallback for CsvExportCallback {
    fn on_event(&self, event: JobEvent, state: &mut RequestState) {
        match self.export(state) {
            Ok((successes, errors)) => {
                debug!(job_id = %state.id(), %event, successes, errors, "exported to csv")
            }
            Err(err) => error!(job_id = %state.id(), %event, error = %err, "csv export failed"),
        }
    }
}

fn append_rows<I>(path: &Path, rows: I) -> Result<(), csv::Error>
where
    I: IntoIterator<Item = [String; 2]>,
{
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn success_row(item: &Value) -> [String; 2] {
    let id = item
        .pointer("/identifier/0/id")
        .or_else(|| item.pointer("/identifier/id"));
    let licence = item.pointer("/license/0/title");
    [cell(id), cell(licence)]
}

fn error_row(item: &Value) -> [String; 2] {
    let id = item
        .pointer("/identifier/id")
        .or_else(|| item.pointer("/identifier/0/id"));
    [cell(id), cell(item.get("error"))]
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oagr_core::{Identifier, LookupResult, StateDefaults, StateParams};
    use serde_json::json;

    #[test]
    fn appends_flushed_results_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cb = CsvExportCallback::new(dir.path().join("ok.csv"), dir.path().join("err.csv"));

        let ids = ["10.1/a", "PMC1", "x"].iter().map(|s| Identifier::parse(s).unwrap());
        let mut st =
            RequestState::new(ids, StateParams::default(), &StateDefaults::default()).unwrap();
        st.record_result(LookupResult {
            results: vec![
                json!({"identifier": [{"id": "10.1/a"}], "license": [{"title": "CC BY"}]}),
                json!({"identifier": [{"id": "PMC1"}]}),
            ],
            errors: vec![json!({"identifier": {"id": "x"}, "error": "not found, sorry"})],
            processing: vec![],
        });

        cb.on_event(JobEvent::Cycle, &mut st);
        // Buffers are drained, so a second event writes nothing new.
        cb.on_event(JobEvent::Finished, &mut st);

        let ok = std::fs::read_to_string(cb.success_path()).unwrap();
        let err = std::fs::read_to_string(cb.error_path()).unwrap();
        assert_eq!(ok, "10.1/a,CC BY\nPMC1,\n");
        assert_eq!(err, "x,\"not found, sorry\"\n");
    }
}
