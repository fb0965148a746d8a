//! Artifact file I/O.
//!
//! Every artifact is a JSON document except the feature order, which is a
//! one-column CSV. Writes go to a temp file next to the target and are then
//! renamed into place, so a reader never sees a half-written artifact.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Required artifact '{name}' not found at {}", path.display())]
    Missing { name: &'static str, path: PathBuf },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid artifact '{name}': {message}")]
    Invalid { name: &'static str, message: String },
}

impl ArtifactError {
    pub fn is_missing(&self) -> bool {
        matches!(self, ArtifactError::Missing { .. })
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn read_to_string(name: &'static str, path: &Path) -> Result<String, ArtifactError> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArtifactError::Missing {
            name,
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ArtifactError::io(path, e)),
    }
}

/// Read and deserialize a JSON artifact.
pub fn read_json<T: DeserializeOwned>(name: &'static str, path: &Path) -> Result<T, ArtifactError> {
    let text = read_to_string(name, path)?;
    serde_json::from_str(&text).map_err(|e| ArtifactError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Like [`read_json`], but a missing file is `Ok(None)`.
pub fn read_optional_json<T: DeserializeOwned>(name: &'static str, path: &Path) -> Result<Option<T>, ArtifactError> {
    match read_json(name, path) {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_missing() => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, bytes).map_err(|e| ArtifactError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| ArtifactError::io(path, e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Artifact written");
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| ArtifactError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    write_atomic(path, &json)
}

/// Header some tabular exporters write above a single unnamed column.
const UNNAMED_COLUMN_HEADER: &str = "0";

/// Parse the feature order: one name per line, blank lines ignored.
pub fn parse_feature_columns(text: &str) -> Vec<String> {
    let mut names: Vec<String> = text
        .lines()
        .map(|l| l.trim().trim_matches('"').to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if names.first().map(String::as_str) == Some(UNNAMED_COLUMN_HEADER) {
        names.remove(0);
    }
    names
}

pub fn read_feature_columns(path: &Path) -> Result<Vec<String>, ArtifactError> {
    let names = parse_feature_columns(&read_to_string("feature_columns", path)?);
    if names.is_empty() {
        return Err(ArtifactError::Invalid {
            name: "feature_columns",
            message: "no feature names".to_string(),
        });
    }
    Ok(names)
}

pub fn write_feature_columns(path: &Path, names: &[String]) -> Result<(), ArtifactError> {
    let mut text = names.join("\n");
    text.push('\n');
    write_atomic(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_feature_columns_skip_exporter_header() {
        let names = parse_feature_columns("0\ntemp\n\"current\"\n\n");
        assert_eq!(names, vec!["temp".to_string(), "current".to_string()]);
        assert_eq!(parse_feature_columns("a\nb"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_missing_file_is_missing_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<HashMap<String, f64>>("medians", &dir.path().join("nope.json")).unwrap_err();
        assert!(err.is_missing());
        let none = read_optional_json::<HashMap<String, f64>>("medians", &dir.path().join("nope.json")).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("medians.json");
        let value = HashMap::from([("a".to_string(), 1.5)]);
        write_json_atomic(&path, &value).unwrap();
        assert!(!path.with_extension("tmp").exists());
        let back: HashMap<String, f64> = read_json("medians", &path).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_parse_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<HashMap<String, f64>>("meta", &path).unwrap_err();
        assert!(matches!(err, ArtifactError::Parse { .. }));
        assert!(err.to_string().contains("meta.json"));
    }
}
