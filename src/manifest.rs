/// Reading of the sample manifests: headerless, tab-delimited files of
/// (image path, label) pairs, one sample per line.

use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use log::debug;

use crate::error::{Error, Result};

const FIELD_COUNT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample
{
    pub image_path: PathBuf,
    pub label: Option<String>,
}

impl Sample
{
    pub fn new(image_path: impl Into<PathBuf>, label: Option<&str>) -> Self
    {
        Sample { image_path: image_path.into(), label: label.map(str::to_string) }
    }

    /// A sample with no label, for classifying an ad-hoc image.
    pub fn unlabeled(image_path: impl Into<PathBuf>) -> Self
    {
        Sample { image_path: image_path.into(), label: None }
    }
}

/// Loads every sample of the manifest at `path`, in file order.
/// Stops at the first line that does not hold exactly two fields.
pub fn load_manifest(path: &Path) -> Result<Vec<Sample>>
{
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .from_path(path)?;

    let mut samples = Vec::new();
    for result in reader.records()
    {
        let record = match result
        {
            Ok(record) => record,
            Err(e) => return Err(malformed_or_csv_error(path, e)),
        };
        let line = record.position().map(|p| p.line()).unwrap_or(samples.len() as u64 + 1);

        if record.len() != FIELD_COUNT {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                line,
                reason: format!("expected {} tab-separated fields, found {}", FIELD_COUNT, record.len()),
            });
        }

        // File names are taken verbatim; only the label is trimmed.
        let image_path = &record[0];
        if image_path.trim().is_empty() {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                line,
                reason: "image path is empty".to_string(),
            });
        }

        let label = record[1].trim();
        let label = if label.is_empty() { None } else { Some(label) };

        let sample = Sample::new(image_path, label);
        debug!("Path: {}, Label: {}", sample.image_path.display(), sample.label.as_deref().unwrap_or(""));
        samples.push(sample);
    }

    Ok(samples)
}

/// A line that does not decode is a malformed line like any other.
fn malformed_or_csv_error(path: &Path, error: csv::Error) -> Error
{
    if let csv::ErrorKind::Utf8 { pos, .. } = error.kind() {
        return Error::Parse {
            path: path.to_path_buf(),
            line: pos.as_ref().map(|p| p.line()).unwrap_or(0),
            reason: "line is not valid UTF-8".to_string(),
        };
    }
    Error::Csv(error)
}
