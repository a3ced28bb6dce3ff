//! Loading of JSON configuration files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::SimError;

/// Reads and deserializes a JSON file.
///
/// # Errors
///
/// Returns a `SimError` if the file cannot be opened or does not parse as `T`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, SimError> {
    let file = File::open(path).map_err(|e| {
        SimError::ConfigError(format!("cannot open {}: {e}", path.display()))
    })?;
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(value)
}

/// Converts a nested `Vec` into an `rows x cols` array, checking the shape.
pub(crate) fn to_grid(
    name: &str,
    rows: &[Vec<f64>],
    shape: (usize, usize),
) -> Result<ndarray::Array2<f64>, SimError> {
    if rows.len() != shape.0 || rows.iter().any(|r| r.len() != shape.1) {
        return Err(SimError::ConfigError(format!(
            "{name} must have shape {}x{}",
            shape.0, shape.1
        )));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    ndarray::Array2::from_shape_vec(shape, flat).map_err(|e| SimError::ConfigError(e.to_string()))
}

/// Converts a per-age vector into an `A x L` grid by repeating it across risk groups.
pub(crate) fn age_column(
    name: &str,
    values: &[f64],
    shape: (usize, usize),
) -> Result<ndarray::Array2<f64>, SimError> {
    if values.len() != shape.0 {
        return Err(SimError::ConfigError(format!(
            "{name} must have one value per age group ({})",
            shape.0
        )));
    }
    Ok(ndarray::Array2::from_shape_fn(shape, |(a, _)| values[a]))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Deserialize)]
    struct Sample {
        field_int: u32,
    }

    #[test]
    fn load_json_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"field_int\": 7}}").unwrap();
        let sample: Sample = load_json(file.path()).unwrap();
        assert_eq!(sample.field_int, 7);
    }

    #[test]
    fn load_json_missing_file_is_config_error() {
        let result: Result<Sample, _> = load_json(Path::new("/nonexistent/tiered.json"));
        assert!(matches!(result, Err(SimError::ConfigError(_))));
    }

    #[test]
    fn to_grid_checks_shape() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let grid = to_grid("population", &rows, (3, 2)).unwrap();
        assert_eq!(grid[[2, 1]], 6.0);
        assert!(to_grid("population", &rows, (2, 2)).is_err());
    }

    #[test]
    fn age_column_repeats_across_risk_groups() {
        let grid = age_column("eta", &[0.1, 0.2], (2, 3)).unwrap();
        assert_eq!(grid.row(1).to_vec(), vec![0.2, 0.2, 0.2]);
        assert!(age_column("eta", &[0.1], (2, 3)).is_err());
    }
}
