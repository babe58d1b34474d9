//! Log file format
//!
//! Recordings are plain CSV, one row per sample in arrival order. The first
//! column is named `Timestamp` for compatibility with existing recordings but
//! holds the device sequence number.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::{SensorSample, GAS_CHANNELS};

/// Header row of every log file
pub const CSV_HEADER: &str = "Timestamp,Gas1,Gas2,Gas3,Gas4,Gas5,Gas6,Gas7,Temperature,Humidity";

/// One data row of a log file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    /// Sequence number of the sample
    pub item_number: u64,
    /// Gas channel readings
    pub gas_values: [f64; GAS_CHANNELS],
    /// Temperature
    pub temperature: f64,
    /// Humidity
    pub humidity: f64,
}

impl From<&SensorSample> for LogRow {
    fn from(sample: &SensorSample) -> Self {
        Self {
            item_number: sample.item_number,
            gas_values: sample.gas_values,
            temperature: sample.temperature,
            humidity: sample.humidity,
        }
    }
}

pub(super) fn write_header<W: Write>(writer: &mut W) -> io::Result<()> {
    writeln!(writer, "{}", CSV_HEADER)
}

pub(super) fn write_row<W: Write>(writer: &mut W, sample: &SensorSample) -> io::Result<()> {
    write!(writer, "{}", sample.item_number)?;
    for value in &sample.gas_values {
        write!(writer, ",{}", value)?;
    }
    writeln!(writer, ",{},{}", sample.temperature, sample.humidity)
}

fn invalid(line_no: usize, msg: impl std::fmt::Display) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line {}: {}", line_no, msg),
    )
}

fn parse_row(line_no: usize, line: &str) -> io::Result<LogRow> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != GAS_CHANNELS + 3 {
        return Err(invalid(
            line_no,
            format!("expected {} fields, found {}", GAS_CHANNELS + 3, fields.len()),
        ));
    }
    let number = |i: usize| -> io::Result<f64> {
        fields[i]
            .parse::<f64>()
            .map_err(|e| invalid(line_no, format!("field {}: {}", i + 1, e)))
    };

    let item_number = fields[0]
        .parse::<u64>()
        .map_err(|e| invalid(line_no, format!("sequence number: {}", e)))?;
    let mut gas_values = [0.0; GAS_CHANNELS];
    for (ch, slot) in gas_values.iter_mut().enumerate() {
        *slot = number(ch + 1)?;
    }
    Ok(LogRow {
        item_number,
        gas_values,
        temperature: number(GAS_CHANNELS + 1)?,
        humidity: number(GAS_CHANNELS + 2)?,
    })
}

/// Read a recorded log back into rows
pub fn read_log<P: AsRef<Path>>(path: P) -> io::Result<Vec<LogRow>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    match lines.next() {
        Some(header) => {
            let header = header?;
            if header.trim() != CSV_HEADER {
                return Err(invalid(1, format!("unexpected header '{}'", header)));
            }
        }
        None => return Err(invalid(1, "empty log file")),
    }

    let mut rows = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(parse_row(idx + 2, &line)?);
    }
    Ok(rows)
}

/// Work out where a recording goes.
///
/// No target gives `data_<unix_seconds>.csv` in `log_dir`. A target without a
/// `.csv` extension gets one appended, and relative targets land in `log_dir`.
pub fn resolve_log_path(log_dir: &Path, target: Option<&Path>, unix_seconds: i64) -> PathBuf {
    let Some(target) = target.filter(|t| !t.as_os_str().is_empty()) else {
        return log_dir.join(format!("data_{}.csv", unix_seconds));
    };

    let has_csv = target
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    let file = if has_csv {
        target.to_path_buf()
    } else {
        let mut name = target.as_os_str().to_os_string();
        name.push(".csv");
        PathBuf::from(name)
    };

    if file.is_absolute() {
        file
    } else {
        log_dir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_format() {
        let sample = SensorSample::new(5, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], 21.5, 40.0, 0);
        let mut out = Vec::new();
        write_row(&mut out, &sample).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "5,1,2,3,4,5,6,7,21.5,40\n");
    }

    #[test]
    fn test_parse_row() {
        let row = parse_row(2, "7,1,2,3,4,5,6,7.5,20,55.25").unwrap();
        assert_eq!(row.item_number, 7);
        assert_eq!(row.gas_values[6], 7.5);
        assert_eq!(row.humidity, 55.25);
        assert!(parse_row(3, "7,1,2").is_err());
        assert!(parse_row(4, "x,1,2,3,4,5,6,7,20,55").is_err());
    }

    #[test]
    fn test_resolve_log_path() {
        let dir = Path::new("/tmp/logs");
        assert_eq!(
            resolve_log_path(dir, None, 1700000000),
            PathBuf::from("/tmp/logs/data_1700000000.csv")
        );
        assert_eq!(
            resolve_log_path(dir, Some(Path::new("run1")), 0),
            PathBuf::from("/tmp/logs/run1.csv")
        );
        assert_eq!(
            resolve_log_path(dir, Some(Path::new("run2.CSV")), 0),
            PathBuf::from("/tmp/logs/run2.CSV")
        );
        assert_eq!(
            resolve_log_path(dir, Some(Path::new("")), 42),
            PathBuf::from("/tmp/logs/data_42.csv")
        );
    }
}
