use equipment_contracts::{SummaryStats, TypeDistribution, ValidatedRow};

use crate::ValidationError;

/// Reduce validated rows into a summary.
///
/// Averages keep full double precision (compensated summation); rounding is
/// left to presentation. The distribution is ordered by descending count,
/// with equal counts kept in the order their label first appeared.
pub fn aggregate(rows: &[ValidatedRow]) -> Result<SummaryStats, ValidationError> {
    if rows.is_empty() {
        return Err(ValidationError::EmptyFile);
    }

    let n = rows.len() as f64;
    let average_flowrate = compensated_sum(rows.iter().map(|r| r.flowrate)) / n;
    let average_pressure = compensated_sum(rows.iter().map(|r| r.pressure)) / n;
    let average_temperature = compensated_sum(rows.iter().map(|r| r.temperature)) / n;

    let equipment_type_distribution =
        TypeDistribution::tally(rows.iter().map(|r| r.equipment_type.as_str()));

    Ok(SummaryStats {
        total_equipment: rows.len() as u64,
        average_flowrate,
        average_pressure,
        average_temperature,
        equipment_type_distribution,
    })
}

fn compensated_sum(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut compensation = 0.0_f64;
    for value in values {
        let t = sum + value;
        if sum.abs() >= value.abs() {
            compensation += (sum - t) + value;
        } else {
            compensation += (value - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}
