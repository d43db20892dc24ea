// src/aggregate/current_clamp.rs
//! Cross-sweep summary of current-clamp records: condition averages, the wide per-epoch
//! table, input resistance and averaged first action potentials.
use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::table::{Amp, EpochKey, Table};
use super::{AVERAGE_DATA, FINAL_DATA, RAW_DATA};
use crate::acq::SpikeFeatures;
use crate::record::{format_number, Record, Value};
use crate::settings::AggregateParams;
use crate::signal::{self, LinearFit};

/// Numeric columns averaged across repeated sweeps of one condition.
const METRICS: [&str; 17] = [
    "Baseline",
    "Delta_v",
    "Spike_threshold (mV)",
    "Spike_threshold_time (ms)",
    "Spike_peak_volt",
    "Spike_time (ms)",
    "Hertz",
    "Spike_iei",
    "Spike_width",
    "Max_AP_vel",
    "Spike_freq_adapt",
    "Local_sfa",
    "Divisor_sfa",
    "Peak_AHP (mV)",
    "Peak_AHP (ms)",
    "Ramp_rheobase",
    "Baseline_stability",
];

/// Metrics kept as one column per pulse amplitude in the final table.
const PER_AMP: [&str; 5] = [
    "Spike_time (ms)",
    "Hertz",
    "Spike_iei",
    "Ramp_rheobase",
    "Baseline_stability",
];

/// Metrics that only mean something from the first spiking amplitude upward.
const FIRST_SPIKE: [&str; 10] = [
    "Spike_threshold (mV)",
    "Spike_threshold_time (ms)",
    "Spike_width",
    "Spike_freq_adapt",
    "Local_sfa",
    "Divisor_sfa",
    "Max_AP_vel",
    "Peak_AHP (mV)",
    "Peak_AHP (ms)",
    "Spike_peak_volt",
];

type Cells<'a> = BTreeMap<Amp, Vec<&'a Record>>;

/// One averaged condition.
struct Condition {
    epoch: EpochKey,
    ramp: bool,
    amp: Amp,
    record: Record,
}

/// Mean over every averaged condition at `amp`, so repeated pulse patterns collapse too.
fn cell(cells: &Cells<'_>, amp: &Amp, metric: &str) -> Option<f64> {
    let records = cells.get(amp)?;
    signal::mean_present(records.iter().map(|r| r.number(metric)))
}

pub(super) fn tables(features: &[&SpikeFeatures], params: &AggregateParams) -> Vec<Table> {
    let conditions = average(features);
    let mut tables = vec![raw_table(features), average_table(&conditions)];

    let mut sheets: BTreeMap<(EpochKey, bool), Cells<'_>> = BTreeMap::new();
    for c in &conditions {
        sheets
            .entry((c.epoch.clone(), c.ramp))
            .or_default()
            .entry(c.amp)
            .or_default()
            .push(&c.record);
    }
    let amps: Vec<Amp> = conditions
        .iter()
        .map(|c| c.amp)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let pulse_amps: Vec<Amp> = conditions
        .iter()
        .filter(|c| !c.ramp)
        .map(|c| c.amp)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let pulses: BTreeMap<&EpochKey, &Cells<'_>> = sheets
        .iter()
        .filter(|((_, ramp), _)| !ramp)
        .map(|((epoch, _), cells)| (epoch, cells))
        .collect();

    let iv_x = iv_range(&pulse_amps, params);
    let fits: BTreeMap<&EpochKey, Option<LinearFit>> = pulses
        .iter()
        .map(|(epoch, cells)| (*epoch, iv_fit(cells, &iv_x)))
        .collect();

    tables.push(final_table(&sheets, &amps, &fits));
    tables.push(iv_table(&iv_x, &fits));
    tables.push(pivot(super::DELTA_V, "deltav_x", "Delta_v", &pulse_amps, &pulses, None));
    tables.push(pivot(super::HERTZ, "Pulse_amp", "Hertz", &pulse_amps, &pulses, Some(0.0)));
    tables.push(pivot(super::IEI, "Pulse_amp", "Spike_iei", &pulse_amps, &pulses, None));
    tables.extend(ap_table(super::PULSE_APS, features, false));
    tables.extend(ap_table(super::RAMP_APS, features, true));
    tables
}

fn sweep_order(f: &SpikeFeatures) -> (EpochKey, bool, Amp, u32) {
    (EpochKey(f.meta.epoch.clone()), f.meta.ramp, Amp(f.meta.pulse_amp), f.meta.acq_number)
}

fn raw_table(features: &[&SpikeFeatures]) -> Table {
    let mut sorted = features.to_vec();
    sorted.sort_by_key(|f| sweep_order(f));
    let records: Vec<Record> = sorted.iter().map(|f| f.to_record()).collect();
    Table::from_records(RAW_DATA, &records)
}

fn average(features: &[&SpikeFeatures]) -> Vec<Condition> {
    let mut groups: BTreeMap<(EpochKey, bool, Amp, String), Vec<Record>> = BTreeMap::new();
    for f in features {
        let key = (
            EpochKey(f.meta.epoch.clone()),
            f.meta.ramp,
            Amp(f.meta.pulse_amp),
            f.meta.pulse_pattern.clone(),
        );
        groups.entry(key).or_default().push(f.to_record());
    }
    groups
        .into_iter()
        .map(|((epoch, ramp, amp, pattern), records)| {
            let mut record = Record::new()
                .with("Pulse_pattern", pattern)
                .with("Epoch", epoch.0.as_str())
                .with("Pulse_amp", amp.0)
                .with("Ramp", ramp)
                .with("Sweeps", records.len() as f64);
            for metric in METRICS {
                let mean = signal::mean_present(records.iter().map(|r| r.number(metric)));
                record.insert(metric, mean);
            }
            Condition { epoch, ramp, amp, record }
        })
        .collect()
}

fn average_table(conditions: &[Condition]) -> Table {
    Table::from_records(AVERAGE_DATA, conditions.iter().map(|c| &c.record))
}

/// Amplitudes used for the IV regression: the 1-based `iv_start..=iv_end` slice.
fn iv_range(pulse_amps: &[Amp], params: &AggregateParams) -> Vec<f64> {
    let start = params.iv_start.saturating_sub(1);
    let end = params.iv_end.min(pulse_amps.len());
    if start >= end {
        return Vec::new();
    }
    pulse_amps[start..end].iter().map(|a| a.0).collect()
}

fn iv_fit(cells: &Cells<'_>, iv_x: &[f64]) -> Option<LinearFit> {
    let (x, y): (Vec<f64>, Vec<f64>) = iv_x
        .iter()
        .filter_map(|&amp| cell(cells, &Amp(amp), "Delta_v").map(|dv| (amp, dv)))
        .unzip();
    linear_fit(&x, &y)
}

fn linear_fit(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let fit = signal::linregress(x, y);
    if fit.is_none() {
        debug!("input resistance skipped: {} usable delta-v points", x.len());
    }
    fit
}

/// Input resistance in MOhm from a mV-per-pA slope.
pub fn input_resistance(fit: &LinearFit) -> Option<f64> {
    signal::finite(fit.slope * 1000.0)
}

fn final_table(
    sheets: &BTreeMap<(EpochKey, bool), Cells<'_>>,
    amps: &[Amp],
    fits: &BTreeMap<&EpochKey, Option<LinearFit>>,
) -> Table {
    let mut columns = vec!["Epoch".to_string(), "Ramp".to_string()];
    for metric in PER_AMP {
        columns.extend(amps.iter().map(|a| format!("{metric}_{}", format_number(a.0))));
    }
    columns.push("Baseline_ave".into());
    columns.push("Input_resistance".into());
    columns.extend(FIRST_SPIKE.iter().map(|m| m.to_string()));
    columns.push("Rheobase".into());

    let mut table = Table::new(FINAL_DATA, columns);
    for ((epoch, ramp), cells) in sheets {
        let mut row = vec![Value::from(epoch.0.as_str()), Value::from(*ramp)];
        for metric in PER_AMP {
            row.extend(amps.iter().map(|a| Value::from(cell(cells, a, metric))));
        }
        row.push(signal::mean_present(amps.iter().map(|a| cell(cells, a, "Baseline"))).into());
        let resistance = fits.get(epoch).copied().flatten().and_then(|f| input_resistance(&f));
        row.push(resistance.into());
        for metric in FIRST_SPIKE {
            let first = amps
                .iter()
                .filter_map(|a| cell(cells, a, metric))
                .find(|v| *v != 0.0);
            row.push(first.into());
        }
        let rheobase = amps
            .iter()
            .find(|a| cell(cells, a, "Hertz").is_some_and(|hz| hz > 0.0))
            .map(|a| a.0);
        row.push(rheobase.into());
        table.push_row(row);
    }
    table
}

fn epoch_columns(head: &str, pulses: &BTreeMap<&EpochKey, &Cells<'_>>) -> Vec<String> {
    std::iter::once(head.to_string())
        .chain(pulses.keys().map(|e| e.0.clone()))
        .collect()
}

fn iv_table(iv_x: &[f64], fits: &BTreeMap<&EpochKey, Option<LinearFit>>) -> Table {
    let columns = std::iter::once("iv_plot_x".to_string())
        .chain(fits.keys().map(|e| e.0.clone()))
        .collect();
    let mut table = Table::new(super::IV_CURVE, columns);
    for &x in iv_x {
        let mut row = vec![Value::from(x)];
        row.extend(fits.values().map(|fit| Value::from(fit.map(|f| f.at(x)))));
        table.push_row(row);
    }
    table
}

/// Pulse amplitudes down, epochs across. `fill` replaces absent cells.
fn pivot(
    name: &str,
    head: &str,
    metric: &str,
    pulse_amps: &[Amp],
    pulses: &BTreeMap<&EpochKey, &Cells<'_>>,
    fill: Option<f64>,
) -> Table {
    let mut table = Table::new(name, epoch_columns(head, pulses));
    for amp in pulse_amps {
        let mut row = vec![Value::from(amp.0)];
        row.extend(pulses.values().map(|cells| Value::from(cell(cells, amp, metric).or(fill))));
        table.push_row(row);
    }
    table
}

/// Averages the first-spike waveforms of the lowest spiking amplitude in each epoch.
fn ap_table(name: &str, features: &[&SpikeFeatures], ramp: bool) -> Option<Table> {
    let mut by_epoch: BTreeMap<EpochKey, BTreeMap<Amp, Vec<&[f64]>>> = BTreeMap::new();
    for f in features.iter().filter(|f| f.meta.ramp == ramp && f.first_spike.len() > 1) {
        by_epoch
            .entry(EpochKey(f.meta.epoch.clone()))
            .or_default()
            .entry(Amp(f.meta.pulse_amp))
            .or_default()
            .push(&f.first_spike);
    }
    let mut columns = Vec::new();
    let mut series = Vec::new();
    for (epoch, amps) in by_epoch {
        let Some((amp, waves)) = amps.into_iter().next() else {
            continue;
        };
        if let Some(mean) = average_aligned(&waves) {
            columns.push(format!("{}_{}", epoch.0, format_number(amp.0)));
            series.push(mean);
        }
    }
    if columns.is_empty() {
        return None;
    }
    let rows = series.iter().map(Vec::len).max().unwrap_or(0);
    let mut table = Table::new(name, columns);
    for i in 0..rows {
        table.push_row(series.iter().map(|s| Value::from(s.get(i).copied())).collect());
    }
    Some(table)
}

/// Aligns waveforms on their maxima by front-padding with each one's first sample, trims to
/// the shortest, and averages pointwise.
pub fn average_aligned(waves: &[&[f64]]) -> Option<Vec<f64>> {
    let peaks: Vec<usize> = waves.iter().map(|w| signal::argmax(w)).collect::<Option<_>>()?;
    let lead = peaks.iter().copied().max()?;
    let aligned: Vec<Vec<f64>> = waves
        .iter()
        .zip(&peaks)
        .map(|(w, &peak)| {
            let mut padded = vec![w[0]; lead - peak];
            padded.extend_from_slice(w);
            padded
        })
        .collect();
    let len = aligned.iter().map(Vec::len).min()?;
    let n = aligned.len() as f64;
    Some((0..len).map(|i| aligned.iter().map(|w| w[i]).sum::<f64>() / n).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{DELTA_V, HERTZ, IV_CURVE};
    use crate::types::TraceMeta;

    fn sweep(acq: u32, epoch: &str, amp: f64, ramp: bool) -> SpikeFeatures {
        SpikeFeatures {
            meta: TraceMeta::new(format!("cell_{acq}"), acq, epoch).with_pulse("p", amp, ramp),
            pulse_start_ms: 300.0,
            baseline: -70.0,
            delta_v: Some(amp * 0.2),
            peaks: Vec::new(),
            threshold_mv: None,
            threshold_ms: None,
            peak_volt: None,
            first_spike_ms: None,
            hertz: None,
            iei: Vec::new(),
            iei_mean: None,
            width_ms: None,
            max_velocity: None,
            adaptation: None,
            local_variance: None,
            divisor: None,
            ahp_mv: None,
            ahp_ms: None,
            ramp_rheobase: None,
            baseline_stability: Some(1.0),
            first_spike: Vec::new(),
        }
    }

    fn spiking(mut f: SpikeFeatures, hertz: f64, threshold: f64) -> SpikeFeatures {
        f.hertz = Some(hertz);
        f.threshold_mv = Some(threshold);
        f.peaks = vec![3_500];
        f
    }

    fn find<'a>(tables: &'a [Table], name: &str) -> &'a Table {
        tables.iter().find(|t| t.name() == name).unwrap()
    }

    fn sweeps() -> Vec<SpikeFeatures> {
        vec![
            sweep(1, "0", -50.0, false),
            sweep(2, "0", 0.0, false),
            spiking(sweep(3, "0", 50.0, false), 0.0, -41.0),
            spiking(sweep(4, "0", 100.0, false), 8.0, -40.0),
            spiking(sweep(5, "0", 150.0, false), 20.0, -38.0),
            spiking(sweep(6, "0", 150.0, false), 22.0, -36.0),
            sweep(7, "1", -50.0, false),
            sweep(8, "1", 0.0, false),
        ]
    }

    #[test]
    fn resistance_is_slope_times_thousand() {
        let features = sweeps();
        let refs: Vec<&SpikeFeatures> = features.iter().collect();
        let tables = tables(&refs, &AggregateParams::default());
        let final_data = find(&tables, FINAL_DATA);
        let r = final_data.number(0, "Input_resistance").unwrap();
        assert!((r - 200.0).abs() < 1e-9, "{r}");
        let iv = find(&tables, IV_CURVE);
        assert_eq!(iv.columns(), &["iv_plot_x", "0", "1"]);
        assert_eq!(iv.len(), 5);
        assert!((iv.number(4, "0").unwrap() - 30.0).abs() < 1e-9);
        let delta_v = find(&tables, DELTA_V);
        assert_eq!(delta_v.columns()[0], "deltav_x");
        assert_eq!(delta_v.number(0, "1"), Some(-10.0));
    }

    #[test]
    fn rheobase_and_first_nonzero_collapse() {
        let features = sweeps();
        let refs: Vec<&SpikeFeatures> = features.iter().collect();
        let tables = tables(&refs, &AggregateParams::default());
        let final_data = find(&tables, FINAL_DATA);
        assert_eq!(final_data.number(0, "Rheobase"), Some(100.0));
        assert_eq!(final_data.number(0, "Spike_threshold (mV)"), Some(-41.0));
        assert_eq!(final_data.number(0, "Hertz_150"), Some(21.0));
        assert_eq!(final_data.number(1, "Rheobase"), None);
        assert_eq!(final_data.number(0, "Baseline_ave"), Some(-70.0));
    }

    #[test]
    fn averages_repeated_conditions() {
        let features = sweeps();
        let refs: Vec<&SpikeFeatures> = features.iter().collect();
        let tables = tables(&refs, &AggregateParams::default());
        let average = find(&tables, AVERAGE_DATA);
        assert_eq!(average.len(), 7);
        let row = (0..average.len())
            .find(|&i| average.number(i, "Pulse_amp") == Some(150.0))
            .unwrap();
        assert_eq!(average.number(row, "Sweeps"), Some(2.0));
        assert_eq!(average.number(row, "Spike_threshold (mV)"), Some(-37.0));
        assert!(average.column_index("Acquisition").is_none());
        let hertz = find(&tables, HERTZ);
        assert_eq!(hertz.number(0, "1"), Some(0.0));
    }

    #[test]
    fn raw_rows_follow_epoch_then_amplitude() {
        let mut features = sweeps();
        features.push(sweep(9, "10", -50.0, false));
        features.push(sweep(10, "2", -50.0, false));
        features.reverse();
        let refs: Vec<&SpikeFeatures> = features.iter().collect();
        let raw = raw_table(&refs);
        let acqs: Vec<f64> = (0..raw.len()).filter_map(|i| raw.number(i, "Acquisition")).collect();
        assert_eq!(acqs, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 10.0, 9.0]);
    }

    #[test]
    fn aligned_average_matches_peaks() {
        let a = [-70.0, 0.0, 40.0, -50.0];
        let b = [-60.0, -60.0, 10.0, 30.0, -40.0, -55.0];
        let mean = average_aligned(&[&a, &b]).unwrap();
        assert_eq!(mean, vec![-65.0, -65.0, 5.0, 35.0, -45.0]);
    }

    #[test]
    fn ap_table_uses_lowest_spiking_amplitude() {
        let mut low = sweep(1, "0", 50.0, false);
        low.first_spike = vec![-60.0, 0.0, 30.0, -50.0];
        let mut high = sweep(2, "0", 100.0, false);
        high.first_spike = vec![-60.0, 40.0, -55.0];
        let features = [&low, &high];
        let table = ap_table("aps", &features, false).unwrap();
        assert_eq!(table.columns(), &["0_50"]);
        assert_eq!(table.len(), 4);
        assert!(ap_table("aps", &features, true).is_none());
    }
}
