use std::io::Read;

use equipment_contracts::{REQUIRED_COLUMNS, ValidatedRow};

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const ACCEPTED_EXTENSION: &str = ".csv";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File size cannot exceed 10MB")]
    TooLarge,
    #[error("Only CSV files are allowed")]
    WrongExtension,
    #[error("Failed to read CSV: {0}")]
    ParseError(String),
    #[error("CSV must contain columns: Type, Flowrate, Pressure, Temperature")]
    MissingColumns { missing: Vec<&'static str> },
    #[error("CSV file is empty")]
    EmptyFile,
    /// `row` is the 1-based data row, excluding the header.
    #[error("CSV contains invalid numeric values")]
    InvalidNumeric { row: usize, column: &'static str },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::TooLarge => "ERR_TOO_LARGE",
            ValidationError::WrongExtension => "ERR_WRONG_EXTENSION",
            ValidationError::ParseError(_) => "ERR_PARSE",
            ValidationError::MissingColumns { .. } => "ERR_MISSING_COLUMNS",
            ValidationError::EmptyFile => "ERR_EMPTY_FILE",
            ValidationError::InvalidNumeric { .. } => "ERR_INVALID_NUMERIC",
        }
    }
}

struct ColumnIndex {
    equipment_type: usize,
    flowrate: usize,
    pressure: usize,
    temperature: usize,
}

/// Parse an uploaded CSV into typed rows.
///
/// Checks run in a fixed order: declared size, file name, decoding, required
/// columns, row count, then numeric coercion. The size check happens before
/// any byte is read; a reader that yields more than [`MAX_UPLOAD_BYTES`]
/// despite a smaller declared size is rejected the same way.
pub fn validate_upload<R: Read>(
    name: &str,
    declared_size: u64,
    reader: R,
) -> Result<Vec<ValidatedRow>, ValidationError> {
    if declared_size > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge);
    }
    if !has_accepted_extension(name) {
        return Err(ValidationError::WrongExtension);
    }

    let mut bytes = Vec::with_capacity(declared_size as usize);
    reader
        .take(MAX_UPLOAD_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|err| ValidationError::ParseError(err.to_string()))?;
    if bytes.len() as u64 > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge);
    }

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ValidationError::ParseError(
            "No columns to parse from file".to_string(),
        ));
    }

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes.as_slice());

    let headers = csv_reader
        .headers()
        .map_err(|err| ValidationError::ParseError(err.to_string()))?
        .clone();

    let mut records = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|err| ValidationError::ParseError(err.to_string()))?;
        if record.len() > headers.len() {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            return Err(ValidationError::ParseError(format!(
                "Expected {} fields in line {}, saw {}",
                headers.len(),
                line,
                record.len()
            )));
        }
        records.push(record);
    }

    let columns = locate_columns(&headers)?;

    if records.is_empty() {
        return Err(ValidationError::EmptyFile);
    }

    records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            let row = idx + 1;
            Ok(ValidatedRow {
                equipment_type: record.get(columns.equipment_type).unwrap_or("").to_string(),
                flowrate: parse_numeric(record.get(columns.flowrate), row, "Flowrate")?,
                pressure: parse_numeric(record.get(columns.pressure), row, "Pressure")?,
                temperature: parse_numeric(record.get(columns.temperature), row, "Temperature")?,
            })
        })
        .collect()
}

fn has_accepted_extension(name: &str) -> bool {
    let name = name.trim();
    name.len() > ACCEPTED_EXTENSION.len()
        && name
            .get(name.len() - ACCEPTED_EXTENSION.len()..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(ACCEPTED_EXTENSION))
}

fn locate_columns(headers: &csv::StringRecord) -> Result<ColumnIndex, ValidationError> {
    let position = |column: &str| headers.iter().position(|h| h == column);

    let missing = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| position(column).is_none())
        .collect::<Vec<_>>();

    match (
        position("Type"),
        position("Flowrate"),
        position("Pressure"),
        position("Temperature"),
    ) {
        (Some(equipment_type), Some(flowrate), Some(pressure), Some(temperature)) => {
            Ok(ColumnIndex {
                equipment_type,
                flowrate,
                pressure,
                temperature,
            })
        }
        _ => Err(ValidationError::MissingColumns { missing }),
    }
}

fn parse_numeric(
    cell: Option<&str>,
    row: usize,
    column: &'static str,
) -> Result<f64, ValidationError> {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or(ValidationError::InvalidNumeric { row, column })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Type,Flowrate,Pressure,Temperature\n";

    fn run(name: &str, body: &str) -> Result<Vec<ValidatedRow>, ValidationError> {
        validate_upload(name, body.len() as u64, body.as_bytes())
    }

    #[test]
    fn oversized_declaration_is_rejected_before_reading() {
        struct PanicReader;
        impl Read for PanicReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                panic!("reader must not be touched");
            }
        }

        let err = validate_upload("big.csv", MAX_UPLOAD_BYTES + 1, PanicReader).unwrap_err();
        assert_eq!(err, ValidationError::TooLarge);
    }

    #[test]
    fn understated_size_is_still_capped() {
        let body = vec![b'a'; (MAX_UPLOAD_BYTES + 10) as usize];
        let err = validate_upload("big.csv", 10, body.as_slice()).unwrap_err();
        assert_eq!(err, ValidationError::TooLarge);
    }

    #[test]
    fn exactly_max_size_passes_the_size_gate() {
        let err = validate_upload("x.csv", MAX_UPLOAD_BYTES, &b""[..]).unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn wrong_extension_is_rejected() {
        assert_eq!(
            run("data.xlsx", HEADER).unwrap_err(),
            ValidationError::WrongExtension
        );
        assert_eq!(run(".csv", HEADER).unwrap_err(), ValidationError::WrongExtension);
        assert_eq!(run("data.csv.txt", HEADER).unwrap_err(), ValidationError::WrongExtension);
    }

    #[test]
    fn extension_check_ignores_case() {
        let rows = run("DATA.CSV", "Type,Flowrate,Pressure,Temperature\nPump,1,2,3\n").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn blank_content_is_a_parse_error() {
        let err = run("blank.csv", "  \n\n").unwrap_err();
        assert_eq!(
            err,
            ValidationError::ParseError("No columns to parse from file".to_string())
        );
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let mut body = HEADER.as_bytes().to_vec();
        body.extend_from_slice(&[0xff, 0xfe, b',', b'1', b',', b'2', b',', b'3', b'\n']);
        let err = validate_upload("bad.csv", body.len() as u64, body.as_slice()).unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn extra_fields_are_a_parse_error() {
        let err = run("wide.csv", "Type,Flowrate,Pressure,Temperature\nPump,1,2,3,4\n").unwrap_err();
        match err {
            ValidationError::ParseError(msg) => {
                assert_eq!(msg, "Expected 4 fields in line 2, saw 5")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_columns_are_reported() {
        let err = run("cols.csv", "Type,Flowrate\nPump,1\n").unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingColumns {
                missing: vec!["Pressure", "Temperature"]
            }
        );
        assert_eq!(
            err.to_string(),
            "CSV must contain columns: Type, Flowrate, Pressure, Temperature"
        );
    }

    #[test]
    fn missing_columns_take_precedence_over_empty_body() {
        let err = run("cols.csv", "Type,Flowrate\n").unwrap_err();
        assert!(matches!(err, ValidationError::MissingColumns { .. }));
    }

    #[test]
    fn header_only_is_empty() {
        assert_eq!(run("empty.csv", HEADER).unwrap_err(), ValidationError::EmptyFile);
    }

    #[test]
    fn one_bad_cell_rejects_the_whole_upload() {
        let body = "Type,Flowrate,Pressure,Temperature\n\
                    Pump,10,5,20\n\
                    Valve,5,oops,18\n\
                    Pump,20,7,22\n";
        assert_eq!(
            run("mixed.csv", body).unwrap_err(),
            ValidationError::InvalidNumeric {
                row: 2,
                column: "Pressure"
            }
        );
    }

    #[test]
    fn empty_short_and_non_finite_cells_are_invalid_numeric() {
        for body in [
            "Type,Flowrate,Pressure,Temperature\nPump,,5,20\n",
            "Type,Flowrate,Pressure,Temperature\nPump,1,5\n",
            "Type,Flowrate,Pressure,Temperature\nPump,NaN,5,20\n",
            "Type,Flowrate,Pressure,Temperature\nPump,1,inf,20\n",
        ] {
            let err = run("cells.csv", body).unwrap_err();
            assert_eq!(err.code(), "ERR_INVALID_NUMERIC", "body: {body:?}");
        }
    }

    #[test]
    fn type_is_never_numeric_validated() {
        let rows = run(
            "types.csv",
            "Temperature,Type,Pressure,Flowrate,Notes\n 20 , 42 ,5,1e1,x\n",
        )
        .unwrap();
        assert_eq!(
            rows,
            vec![ValidatedRow {
                equipment_type: "42".to_string(),
                flowrate: 10.0,
                pressure: 5.0,
                temperature: 20.0,
            }]
        );
    }

    #[test]
    fn every_error_kind_has_a_distinct_code() {
        let errors = [
            ValidationError::TooLarge,
            ValidationError::WrongExtension,
            ValidationError::ParseError(String::new()),
            ValidationError::MissingColumns { missing: vec![] },
            ValidationError::EmptyFile,
            ValidationError::InvalidNumeric {
                row: 1,
                column: "Flowrate",
            },
        ];
        let mut codes = errors.iter().map(|e| e.code()).collect::<Vec<_>>();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
