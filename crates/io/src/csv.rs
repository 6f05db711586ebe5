// CSV-backed source reader

use std::io::Read;
use std::path::{Path, PathBuf};

use plantmatch_core::{Descriptor, UnitRecord};
use plantmatch_recon::{PipelineError, SourceReader};
use serde::Deserialize;
use tracing::debug;

/// Commissioning years outside this range are parse errors.
const YEAR_RANGE: std::ops::RangeInclusive<f64> = 1000.0..=9999.0;

/// Header names for each unit field.
///
/// Optional columns may be missing from the file entirely; their cells may
/// also be blank in individual rows.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub id: String,
    pub name: String,
    pub fueltype: String,
    pub country: String,
    pub capacity_mw: String,
    pub technology: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub commissioning_year: Option<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            id: "id".into(),
            name: "name".into(),
            fueltype: "fueltype".into(),
            country: "country".into(),
            capacity_mw: "capacity_mw".into(),
            technology: Some("technology".into()),
            latitude: Some("lat".into()),
            longitude: Some("lon".into()),
            commissioning_year: Some("commissioning_year".into()),
        }
    }
}

/// A source whose units live in one CSV file.
#[derive(Debug, Clone)]
pub struct CsvSource {
    pub name: String,
    pub path: PathBuf,
    pub columns: ColumnMapping,
    /// `None` sniffs the delimiter from the first lines.
    pub delimiter: Option<u8>,
}

impl CsvSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            columns: ColumnMapping::default(),
            delimiter: None,
        }
    }

    pub fn with_columns(mut self, columns: ColumnMapping) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }
}

impl SourceReader for CsvSource {
    fn read(&self) -> Result<Vec<UnitRecord>, PipelineError> {
        let content = read_file_as_utf8(&self.path)
            .map_err(|e| PipelineError::source_unavailable(&self.name, format!("{}: {e}", self.path.display())))?;
        let delimiter = self.delimiter.unwrap_or_else(|| sniff_delimiter(&content));
        let units = parse_units(&self.name, &content, &self.columns, delimiter)?;
        debug!(source = %self.name, path = %self.path.display(), units = units.len(), "read csv source");
        Ok(units)
    }
}

/// Read file and convert to UTF-8 if needed (Windows-1252 fallback).
pub fn read_file_as_utf8(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Pick the delimiter that splits the header into the most fields and keeps
/// that field count on the following lines.
fn sniff_delimiter(content: &str) -> u8 {
    let sample: Vec<&str> = content.lines().take(10).collect();
    let mut best = (b',', 0usize);

    for delim in [b',', b';', b'\t', b'|'] {
        let widths: Vec<usize> = sample
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map_or(1, |r| r.len())
            })
            .collect();

        let Some(&header) = widths.first() else { continue };
        if header <= 1 {
            continue;
        }
        let score = widths.iter().filter(|&&w| w == header).count() * header;
        if score > best.1 {
            best = (delim, score);
        }
    }

    best.0
}

/// Parse CSV text into units of `source`.
pub fn parse_units(
    source: &str,
    content: &str,
    columns: &ColumnMapping,
    delimiter: u8,
) -> Result<Vec<UnitRecord>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::source_unavailable(source, e))?
        .clone();
    let required = |column: &str| -> Result<usize, PipelineError> {
        headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| PipelineError::MissingColumn {
                name: source.to_string(),
                column: column.to_string(),
            })
    };
    let optional = |column: &Option<String>| -> Option<usize> {
        column.as_deref().and_then(|c| headers.iter().position(|h| h == c))
    };

    let id_col = required(&columns.id)?;
    let name_col = required(&columns.name)?;
    let fuel_col = required(&columns.fueltype)?;
    let country_col = required(&columns.country)?;
    let cap_col = required(&columns.capacity_mw)?;
    let tech_col = optional(&columns.technology);
    let lat_col = optional(&columns.latitude);
    let lon_col = optional(&columns.longitude);
    let year_col = optional(&columns.commissioning_year);

    let mut units = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| PipelineError::source_unavailable(source, e))?;
        let cell = |col: usize| record.get(col).unwrap_or("");
        let cell_opt = |col: Option<usize>| col.map(|c| cell(c)).filter(|v| !v.is_empty());

        let id = cell(id_col).to_string();
        let parse_err = |field: &str, value: &str| PipelineError::FieldParse {
            name: source.to_string(),
            record_id: id.clone(),
            field: field.to_string(),
            value: value.to_string(),
        };

        let capacity = match cell(cap_col) {
            "" => 0.0,
            raw => raw.parse::<f64>().map_err(|_| parse_err(&columns.capacity_mw, raw))?,
        };

        let mut descriptor = Descriptor::new(cell(name_col), cell(fuel_col), cell(country_col), capacity);
        descriptor.technology = cell_opt(tech_col).map(str::to_string);

        if let (Some(lat), Some(lon)) = (cell_opt(lat_col), cell_opt(lon_col)) {
            let lat = lat.parse::<f64>().map_err(|_| parse_err("latitude", lat))?;
            let lon = lon.parse::<f64>().map_err(|_| parse_err("longitude", lon))?;
            descriptor = descriptor.with_location(lat, lon);
        }

        if let Some(raw) = cell_opt(year_col) {
            // Some sources export years as floats ("1975.0").
            let year = raw
                .parse::<f64>()
                .ok()
                .map(f64::round)
                .filter(|y| YEAR_RANGE.contains(y))
                .ok_or_else(|| parse_err("commissioning_year", raw))?;
            descriptor = descriptor.with_commissioning_year(year as i32);
        }

        units.push(UnitRecord::new(source, id, descriptor));
    }

    Ok(units)
}
