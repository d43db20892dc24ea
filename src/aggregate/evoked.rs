// src/aggregate/evoked.rs
//! Per-epoch averages of field-potential and evoked-current records.
use std::collections::BTreeMap;

use log::debug;

use super::table::{EpochKey, Table};
use super::{FINAL_DATA, RAW_DATA};
use crate::acq::{EvokedFeatures, LfpFeatures};
use crate::record::{Record, Value};
use crate::signal;

const ACQ: &str = "Acq number";
const EPOCH: &str = "Epoch";
const DIRECTION: &str = "Peak direction";

/// Inner join on (acquisition, epoch) when both kinds are present; LFP fields come first.
fn merge(lfp: &[&LfpFeatures], evoked: &[&EvokedFeatures]) -> Vec<(EpochKey, u32, Record)> {
    let keyed = |acq: u32, epoch: &str, record: Record| (EpochKey(epoch.to_string()), acq, record);
    if evoked.is_empty() {
        return lfp
            .iter()
            .map(|f| keyed(f.meta.acq_number, &f.meta.epoch, f.to_record()))
            .collect();
    }
    if lfp.is_empty() {
        return evoked
            .iter()
            .map(|f| keyed(f.meta.acq_number, &f.meta.epoch, f.to_record()))
            .collect();
    }
    let by_acq: BTreeMap<(u32, &str), &LfpFeatures> = lfp
        .iter()
        .map(|f| ((f.meta.acq_number, f.meta.epoch.as_str()), *f))
        .collect();
    evoked
        .iter()
        .filter_map(|e| {
            let Some(field) = by_acq.get(&(e.meta.acq_number, e.meta.epoch.as_str())) else {
                debug!("acquisition {} has no field-potential partner", e.meta.acq_number);
                return None;
            };
            let mut record = field.to_record();
            for (key, value) in e.to_record().iter() {
                record.insert(key, value.clone());
            }
            Some(keyed(e.meta.acq_number, &e.meta.epoch, record))
        })
        .collect()
}

pub(super) fn tables(lfp: &[&LfpFeatures], evoked: &[&EvokedFeatures]) -> Vec<Table> {
    let mut rows = merge(lfp, evoked);
    rows.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
    let records: Vec<&Record> = rows.iter().map(|(_, _, r)| r).collect();
    let raw = Table::from_records(RAW_DATA, records.iter().copied());

    let by_direction = !evoked.is_empty();
    let mut groups: BTreeMap<(EpochKey, Option<String>), Vec<&Record>> = BTreeMap::new();
    for (epoch, _, record) in &rows {
        let direction = by_direction
            .then(|| record.get(DIRECTION).map(Value::render))
            .flatten();
        groups.entry((epoch.clone(), direction)).or_default().push(record);
    }

    let numeric: Vec<&String> = raw
        .columns()
        .iter()
        .filter(|c| ![ACQ, EPOCH, DIRECTION].contains(&c.as_str()))
        .filter(|c| records.iter().all(|r| r.get(c).map_or(true, |v| v.text().is_none())))
        .collect();

    let averaged: Vec<Record> = groups
        .into_iter()
        .map(|((epoch, direction), members)| {
            let mut record = Record::new().with(EPOCH, epoch.0);
            if let Some(direction) = direction {
                record.insert(DIRECTION, direction);
            }
            for column in &numeric {
                let mean = signal::mean_present(members.iter().map(|r| r.number(column)));
                record.insert(column.as_str(), mean);
            }
            record
        })
        .collect();
    vec![raw, Table::from_records(FINAL_DATA, &averaged)]
}
