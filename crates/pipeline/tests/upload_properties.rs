use equipment_pipeline::{MAX_UPLOAD_BYTES, ValidationError, summarize_upload};

fn csv_with_rows(rows: &[(&str, f64, f64, f64)]) -> String {
    let mut out = String::from("Type,Flowrate,Pressure,Temperature\n");
    for (t, f, p, temp) in rows {
        out.push_str(&format!("{t},{f},{p},{temp}\n"));
    }
    out
}

#[test]
fn totals_and_distribution_sum_match_row_count() {
    let labels = ["Pump", "Valve", "Reactor", "Condenser", "Heat Exchanger"];
    for n in [1_usize, 2, 7, 64, 501] {
        let rows = (0..n)
            .map(|i| {
                (
                    labels[(i * 7 + i / 3) % labels.len()],
                    i as f64,
                    (i % 13) as f64 * 0.5,
                    100.0 - i as f64,
                )
            })
            .collect::<Vec<_>>();
        let body = csv_with_rows(&rows);

        let stats = summarize_upload("sample.csv", body.len() as u64, body.as_bytes())
            .expect("generated upload should be valid");

        assert_eq!(stats.total_equipment, n as u64);
        assert_eq!(stats.equipment_type_distribution.total(), n as u64);

        let expected_flow = rows.iter().map(|r| r.1).sum::<f64>() / n as f64;
        let expected_temp = rows.iter().map(|r| r.3).sum::<f64>() / n as f64;
        assert!((stats.average_flowrate - expected_flow).abs() < 1e-9);
        assert!((stats.average_temperature - expected_temp).abs() < 1e-9);

        let counts = stats
            .equipment_type_distribution
            .iter()
            .map(|(_, c)| c)
            .collect::<Vec<_>>();
        assert!(counts.windows(2).all(|w| w[0] >= w[1]));
    }
}

#[test]
fn oversized_upload_is_rejected_before_parsing() {
    let err = summarize_upload("huge.csv", MAX_UPLOAD_BYTES + 1, &b"not,even,csv"[..]).unwrap_err();
    assert_eq!(err, ValidationError::TooLarge);
}

#[test]
fn non_numeric_cell_in_any_measure_column_rejects_everything() {
    for column in 0..3 {
        let mut cells = ["10", "5", "20"];
        cells[column] = "n/a";
        let body = format!(
            "Type,Flowrate,Pressure,Temperature\nPump,1,2,3\nValve,{},{},{}\n",
            cells[0], cells[1], cells[2]
        );
        let err = summarize_upload("bad.csv", body.len() as u64, body.as_bytes()).unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_NUMERIC");
    }
}

#[test]
fn quoted_labels_with_commas_are_kept_whole() {
    let body = "Type,Flowrate,Pressure,Temperature\n\"Pump, centrifugal\",1,2,3\n";
    let stats = summarize_upload("quoted.csv", body.len() as u64, body.as_bytes()).unwrap();
    assert_eq!(
        stats.equipment_type_distribution.get("Pump, centrifugal"),
        Some(1)
    );
}

#[test]
fn hundred_thousand_distinct_types_summarize_promptly() {
    let mut body = String::from("Type,Flowrate,Pressure,Temperature\n");
    for i in 0..100_000 {
        body.push_str(&format!("t{i},1,2,3\n"));
    }
    let started = std::time::Instant::now();

    let stats = summarize_upload("wide.csv", body.len() as u64, body.as_bytes())
        .expect("wide upload should be valid");

    assert_eq!(stats.total_equipment, 100_000);
    assert_eq!(stats.equipment_type_distribution.len(), 100_000);
    assert_eq!(stats.equipment_type_distribution.entries()[0].label, "t0");
    stats.validate().expect("wide summary should be self-consistent");
    assert!(
        started.elapsed() < std::time::Duration::from_secs(20),
        "took {:?}",
        started.elapsed()
    );
}
