use crate::document::{file_name, source_files, Record};
use anyhow::{bail, Context, Result};
use csv::StringRecord;
use log::{debug, info};
use serde_json::{json, Map, Number, Value};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Number of consecutive rows stored in one record
pub const GROUP_SIZE: usize = 24;

/// Column holding the timestamp of each row
pub const DATETIME_COLUMN: &str = "datetime";

/// Cells read as missing values, matching pandas' default `na_values`
const MISSING_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell)
}

/// Type inferred for a whole CSV column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
}

impl ColumnType {
    /// Pick the narrowest type every present cell of the column fits into.
    ///
    /// An integer column with missing cells is widened to float, as pandas does.
    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut integer = true;
        let mut float = true;
        let mut boolean = true;
        let mut seen = false;
        let mut missing = false;

        for cell in cells {
            if is_missing(cell) {
                missing = true;
                continue;
            }
            seen = true;
            integer &= cell.parse::<i64>().is_ok();
            float &= cell.parse::<f64>().map(f64::is_finite).unwrap_or(false);
            boolean &= matches!(cell, "True" | "False" | "true" | "false");
        }

        match (seen, integer, float, boolean) {
            (false, _, _, _) => ColumnType::Text,
            (true, true, _, _) if missing => ColumnType::Float,
            (true, true, _, _) => ColumnType::Integer,
            (true, _, true, _) => ColumnType::Float,
            (true, _, _, true) => ColumnType::Boolean,
            _ => ColumnType::Text,
        }
    }

    fn to_value(self, cell: &str) -> Value {
        if is_missing(cell) {
            return Value::Null;
        }
        match self {
            ColumnType::Integer => cell.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            ColumnType::Float => cell
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnType::Boolean => Value::Bool(cell.eq_ignore_ascii_case("true")),
            ColumnType::Text => Value::String(cell.to_string()),
        }
    }
}

/// Split CSV data into records of `GROUP_SIZE` consecutive rows.
///
/// Each record's content holds one JSON object per row, one per line, with keys
/// in header order. Ids have the form `<file_name>:group:<index>` and only depend
/// on the file name and row position, so re-chunking an unchanged file yields
/// the same ids.
pub fn split_into_row_groups<R: Read>(reader: R, file_name: &str) -> Result<Vec<Record>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header of {}", file_name))?
        .clone();

    let Some(datetime_idx) = headers.iter().position(|h| h == DATETIME_COLUMN) else {
        bail!("{} has no '{}' column", file_name, DATETIME_COLUMN);
    };

    let rows = reader
        .records()
        .collect::<Result<Vec<StringRecord>, _>>()
        .with_context(|| format!("Failed to parse CSV rows of {}", file_name))?;

    let column_types: Vec<ColumnType> = (0..headers.len())
        .map(|col| ColumnType::infer(rows.iter().map(|row| row.get(col).unwrap_or(""))))
        .collect();
    debug!("{}: inferred column types {:?}", file_name, column_types);

    let mut records = Vec::with_capacity(rows.len().div_ceil(GROUP_SIZE));
    for (group_index, group) in rows.chunks(GROUP_SIZE).enumerate() {
        let start = group_index * GROUP_SIZE;
        let end = start + group.len() - 1;

        let mut lines = Vec::with_capacity(group.len());
        for row in group {
            let object: Map<String, Value> = headers
                .iter()
                .zip(row.iter())
                .zip(column_types.iter())
                .map(|((name, cell), ty)| (name.to_string(), ty.to_value(cell)))
                .collect();
            lines.push(serde_json::to_string(&Value::Object(object))?);
        }

        let date_of = |row: &StringRecord| -> String {
            row.get(datetime_idx).unwrap_or("").chars().take(10).collect()
        };
        let date_start = date_of(&group[0]);
        let date_end = date_of(&group[group.len() - 1]);

        let id = format!("{}:group:{}", file_name, group_index);
        let mut metadata = Map::new();
        metadata.insert("id".to_string(), json!(id));
        metadata.insert("csv_file".to_string(), json!(file_name));
        metadata.insert("group_index".to_string(), json!(group_index));
        metadata.insert("row_range".to_string(), json!(format!("{}-{}", start, end)));
        metadata.insert(
            "date_range".to_string(),
            json!(format!("{}_{}", date_start, date_end)),
        );

        records.push(Record::new(id, lines.join("\n"), metadata));
    }

    Ok(records)
}

/// Chunk a single CSV file
pub fn chunk_csv_file<P: AsRef<Path>>(file_path: P) -> Result<Vec<Record>> {
    let path = file_path.as_ref();
    let name = file_name(path)?;
    let file =
        File::open(path).with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let records = split_into_row_groups(file, &name)?;
    info!("Split {} into {} row groups", name, records.len());
    Ok(records)
}

/// Chunk every CSV file found in the source directory
pub fn load_csv_records<P: AsRef<Path>>(source_dir: P) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for path in source_files(source_dir, &["csv"])? {
        records.extend(chunk_csv_file(&path)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solar_csv(rows: usize) -> String {
        let mut csv = String::from("datetime,power,irradiance,site\n");
        for i in 0..rows {
            let day = 1 + i / 24;
            let hour = i % 24;
            csv.push_str(&format!(
                "2019-02-{:02} {:02}:00:00,{},{}.5,north\n",
                day,
                hour,
                i * 10,
                i
            ));
        }
        csv
    }

    fn row_range(record: &Record) -> (usize, usize) {
        let range = record.metadata_str("row_range").unwrap();
        let (start, end) = range.split_once('-').unwrap();
        (start.parse().unwrap(), end.parse().unwrap())
    }

    #[test]
    fn test_thirty_rows_make_two_groups() {
        let records = split_into_row_groups(solar_csv(30).as_bytes(), "solar.csv").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "solar.csv:group:0");
        assert_eq!(records[0].metadata_str("row_range"), Some("0-23"));
        assert_eq!(records[1].id, "solar.csv:group:1");
        assert_eq!(records[1].metadata_str("row_range"), Some("24-29"));
        assert_eq!(records[1].metadata["group_index"], json!(1));
        assert_eq!(records[1].metadata_str("csv_file"), Some("solar.csv"));
    }

    #[test]
    fn test_group_count_and_sizes() {
        for rows in [1, 23, 24, 25, 47, 48, 49, 100] {
            let records = split_into_row_groups(solar_csv(rows).as_bytes(), "s.csv").unwrap();
            assert_eq!(records.len(), rows.div_ceil(GROUP_SIZE), "rows = {}", rows);

            for (idx, record) in records.iter().enumerate() {
                let (start, end) = row_range(record);
                assert_eq!(start, idx * GROUP_SIZE);
                if idx + 1 < records.len() {
                    assert_eq!(end - start + 1, GROUP_SIZE);
                } else {
                    assert_eq!(end, rows - 1);
                }
                assert_eq!(record.content.lines().count(), end - start + 1);
            }
        }
    }

    #[test]
    fn test_empty_csv_yields_no_records() {
        let records = split_into_row_groups("datetime,power\n".as_bytes(), "empty.csv").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_ids_are_stable() {
        let first = split_into_row_groups(solar_csv(60).as_bytes(), "solar.csv").unwrap();
        let second = split_into_row_groups(solar_csv(60).as_bytes(), "solar.csv").unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, second.iter().map(|r| r.id.clone()).collect::<Vec<_>>());

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_date_range_uses_first_and_last_row() {
        let records = split_into_row_groups(solar_csv(30).as_bytes(), "solar.csv").unwrap();
        assert_eq!(
            records[0].metadata_str("date_range"),
            Some("2019-02-01_2019-02-01")
        );
        assert_eq!(
            records[1].metadata_str("date_range"),
            Some("2019-02-02_2019-02-02")
        );
    }

    #[test]
    fn test_rows_are_typed_json_lines() {
        let records = split_into_row_groups(solar_csv(2).as_bytes(), "solar.csv").unwrap();
        let lines: Vec<&str> = records[0].content.lines().collect();
        assert_eq!(
            lines[0],
            r#"{"datetime":"2019-02-01 00:00:00","power":0,"irradiance":0.5,"site":"north"}"#
        );
        assert_eq!(
            lines[1],
            r#"{"datetime":"2019-02-01 01:00:00","power":10,"irradiance":1.5,"site":"north"}"#
        );
    }

    #[test]
    fn test_empty_cells_become_null() {
        let csv = "datetime,power\n2019-02-01 00:00:00,\n2019-02-01 01:00:00,3\n";
        let records = split_into_row_groups(csv.as_bytes(), "gaps.csv").unwrap();
        let line = records[0].content.lines().next().unwrap();
        let first: Value = serde_json::from_str(line).unwrap();
        assert_eq!(first["power"], Value::Null);
    }

    #[test]
    fn test_nan_cells_keep_column_numeric() {
        let csv = "datetime,power,count,note\n\
                   2019-02-01 00:00:00,12.5,3,clear\n\
                   2019-02-01 01:00:00,NaN,NA,n/a\n\
                   2019-02-01 02:00:00,7,5,cloudy\n";
        let records = split_into_row_groups(csv.as_bytes(), "gaps.csv").unwrap();
        let rows: Vec<Value> = records[0]
            .content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(rows[0]["power"], json!(12.5));
        assert_eq!(rows[1]["power"], Value::Null);
        assert_eq!(rows[2]["power"], json!(7.0));

        // Integers with gaps widen to float
        assert_eq!(rows[0]["count"], json!(3.0));
        assert_eq!(rows[1]["count"], Value::Null);

        assert_eq!(rows[1]["note"], Value::Null);
        assert_eq!(rows[2]["note"], json!("cloudy"));
    }

    #[test]
    fn test_missing_datetime_column_is_an_error() {
        let err = split_into_row_groups("time,power\n1,2\n".as_bytes(), "bad.csv").unwrap_err();
        assert!(err.to_string().contains("datetime"));
    }
}
