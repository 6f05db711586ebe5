// Reduced dataset export

use std::path::Path;

use plantmatch_core::ReducedPlantRecord;
use plantmatch_recon::PipelineError;
use tracing::info;

use crate::write_atomic;

pub const HEADER: [&str; 9] = [
    "name",
    "fueltype",
    "technology",
    "country",
    "capacity_mw",
    "lat",
    "lon",
    "commissioning_year",
    "project_id",
];

/// Write reduced records as CSV. `project_id` is a JSON object column.
pub fn write_reduced_csv(records: &[ReducedPlantRecord], path: &Path) -> Result<(), PipelineError> {
    let bytes = reduced_csv_bytes(records)?;
    write_atomic(path, &bytes).map_err(|e| PipelineError::Io(format!("{}: {e}", path.display())))?;
    info!(path = %path.display(), records = records.len(), "exported reduced records");
    Ok(())
}

pub fn reduced_csv_bytes(records: &[ReducedPlantRecord]) -> Result<Vec<u8>, PipelineError> {
    let io_err = |e: csv::Error| PipelineError::Io(e.to_string());
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(HEADER).map_err(io_err)?;

    for record in records {
        let d = &record.descriptor;
        let project_id = serde_json::to_string(&record.project_id).map_err(|e| PipelineError::Io(e.to_string()))?;
        writer
            .write_record([
                d.name.clone(),
                d.fueltype.clone(),
                d.technology.clone().unwrap_or_default(),
                d.country.clone(),
                d.capacity_mw.to_string(),
                d.latitude.map(|v| v.to_string()).unwrap_or_default(),
                d.longitude.map(|v| v.to_string()).unwrap_or_default(),
                d.commissioning_year.map(|v| v.to_string()).unwrap_or_default(),
                project_id,
            ])
            .map_err(io_err)?;
    }

    writer.into_inner().map_err(|e| PipelineError::Io(e.to_string()))
}
