// src/aggregate/mod.rs
//! Aggregator: turns the full set of per-acquisition records of one batch into named tables.
//! Runs only on a complete record map and recomputes every table from scratch.
pub mod current_clamp;
pub mod evoked;
pub mod table;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::acq::{AnalysisError, FeatureRecord, Modality};
use crate::settings::AggregateParams;
pub use table::{compare_epochs, Table};

pub const RAW_DATA: &str = "Raw data";
pub const AVERAGE_DATA: &str = "Average data";
pub const FINAL_DATA: &str = "Final data";
pub const HERTZ: &str = "Hertz";
pub const IEI: &str = "IEI";
pub const PULSE_APS: &str = "Pulse APs";
pub const RAMP_APS: &str = "Ramp APs";
pub const IV_CURVE: &str = "IV curve";
pub const DELTA_V: &str = "Delta V";

/// Tables that are kept even without rows.
const CORE_TABLES: [&str; 3] = [RAW_DATA, AVERAGE_DATA, FINAL_DATA];

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Aggregate {
    tables: Vec<Table>,
}

impl Aggregate {
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Writes one CSV per table into `dir` and returns the written paths.
    pub fn write_csv(&self, dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let path = dir.join(format!("{}.csv", file_stem(table.name())));
            let file = BufWriter::new(File::create(&path)?);
            table.write_csv(file).map_err(io::Error::from)?;
            written.push(path);
        }
        Ok(written)
    }
}

fn file_stem(name: &str) -> String {
    name.to_ascii_lowercase().replace(' ', "_")
}

/// Collects the records of one modality, rejecting any other kind.
fn only<'a, T>(
    records: &'a BTreeMap<u32, FeatureRecord>,
    expected: Modality,
    pick: impl Fn(&'a FeatureRecord) -> Option<&'a T>,
) -> Result<Vec<&'a T>, AnalysisError> {
    records
        .values()
        .map(|record| {
            pick(record).ok_or(AnalysisError::ModalityMismatch {
                expected: expected.name(),
                got: record.modality().name(),
            })
        })
        .collect()
}

fn finish(tables: Vec<Table>, count: usize) -> Aggregate {
    let tables: Vec<Table> = tables
        .into_iter()
        .filter(|t| !t.is_empty() || CORE_TABLES.contains(&t.name()))
        .collect();
    info!("aggregated {count} records into {} tables", tables.len());
    Aggregate { tables }
}

/// Aggregates one batch. Every record must come from the same analyzer; field potentials and
/// evoked currents recorded together go through [`aggregate_paired`].
pub fn aggregate(
    records: &BTreeMap<u32, FeatureRecord>,
    params: &AggregateParams,
) -> Result<Aggregate, AnalysisError> {
    let Some(first) = records.values().next() else {
        return Ok(Aggregate::default());
    };
    let tables = match first.modality() {
        Modality::CurrentClamp => {
            let spikes = only(records, Modality::CurrentClamp, FeatureRecord::as_spike)?;
            current_clamp::tables(&spikes, params)
        }
        Modality::Lfp => {
            let lfp = only(records, Modality::Lfp, FeatureRecord::as_lfp)?;
            evoked::tables(&lfp, &[])
        }
        Modality::Evoked => {
            let evoked = only(records, Modality::Evoked, FeatureRecord::as_evoked)?;
            evoked::tables(&[], &evoked)
        }
    };
    Ok(finish(tables, records.len()))
}

/// Aggregates a field-potential batch with the evoked-current batch recorded alongside it.
/// Both maps share acquisition numbers; rows are joined on (acquisition, epoch).
pub fn aggregate_paired(
    field: &BTreeMap<u32, FeatureRecord>,
    evoked: &BTreeMap<u32, FeatureRecord>,
) -> Result<Aggregate, AnalysisError> {
    let lfp = only(field, Modality::Lfp, FeatureRecord::as_lfp)?;
    let currents = only(evoked, Modality::Evoked, FeatureRecord::as_evoked)?;
    if lfp.is_empty() && currents.is_empty() {
        return Ok(Aggregate::default());
    }
    Ok(finish(evoked::tables(&lfp, &currents), field.len() + evoked.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acq::{current_clamp, evoked as evoked_analyzer, CurrentClampParams, EvokedParams};
    use crate::types::{Trace, TraceMeta};

    /// Subthreshold step: -70 mV resting, `amp * 0.1` mV response from 300 ms to 1100 ms.
    fn step(acq: u32, epoch: &str, amp: f64) -> FeatureRecord {
        let samples = (0..12_000)
            .map(|i| {
                let t = i as f64 / 10.0;
                if (300.0..1100.0).contains(&t) {
                    -70.0 + amp * 0.1
                } else {
                    -70.0
                }
            })
            .collect();
        let meta = TraceMeta::new("cc", acq, epoch).with_pulse("p", amp, false);
        let trace = Trace::new(meta, 10_000.0, samples);
        let features = current_clamp::analyze(&trace, &CurrentClampParams::default()).unwrap();
        FeatureRecord::CurrentClamp(features)
    }

    fn batch() -> BTreeMap<u32, FeatureRecord> {
        [(-50.0, 1), (0.0, 2), (50.0, 3), (100.0, 4), (-50.0, 5), (50.0, 6)]
            .into_iter()
            .map(|(amp, acq)| (acq, step(acq, if acq < 5 { "0" } else { "1" }, amp)))
            .collect()
    }

    #[test]
    fn aggregation_is_idempotent() {
        let records = batch();
        let params = AggregateParams::default();
        let first = serde_json::to_string(&aggregate(&records, &params).unwrap()).unwrap();
        let second = serde_json::to_string(&aggregate(&records, &params).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn quiet_cells_skip_firing_tables() {
        let out = aggregate(&batch(), &AggregateParams::default()).unwrap();
        assert!(out.get(PULSE_APS).is_none());
        assert!(out.get(RAMP_APS).is_none());
        let final_data = out.get(FINAL_DATA).unwrap();
        assert_eq!(final_data.len(), 2);
        assert_eq!(final_data.number(0, "Rheobase"), None);
        let resistance = final_data.number(0, "Input_resistance").unwrap();
        assert!((resistance - 100.0).abs() < 1e-6, "{resistance}");
    }

    #[test]
    fn mixed_modalities_are_rejected() {
        let mut records = batch();
        let trace = Trace::new(TraceMeta::new("flat", 9, "0"), 10_000.0, vec![0.0; 12_000]);
        let features = evoked_analyzer::analyze(&trace, &EvokedParams::default()).unwrap();
        records.insert(9, FeatureRecord::Evoked(features));
        assert!(matches!(
            aggregate(&records, &AggregateParams::default()),
            Err(AnalysisError::ModalityMismatch { got: "evoked", .. })
        ));
    }

    #[test]
    fn empty_batch_has_no_tables() {
        let out = aggregate(&BTreeMap::new(), &AggregateParams::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn tables_land_as_csv_files() {
        let dir = std::env::temp_dir().join(format!("ephyskit-aggregate-{}", std::process::id()));
        let out = aggregate(&batch(), &AggregateParams::default()).unwrap();
        let written = out.write_csv(&dir).unwrap();
        assert!(written.iter().any(|p| p.ends_with("final_data.csv")));
        let text = std::fs::read_to_string(dir.join("raw_data.csv")).unwrap();
        assert!(text.starts_with("Acquisition,Pulse_pattern"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
