//! Loading persisted model bundles.
//!
//! An artifact is one JSON object whose `kind` field selects the backend.
//! Sequential artifacts may leave `columns`, `input_dim` and `num_classes` to
//! a separate metadata file; when both are present the metadata wins.

use crate::model::sequential::{DenseLayer, LstmLayer, SequentialModel};
use crate::model::tabular::{Classifier, StandardScaler, TabularModel};
use crate::model::{ModelBundle, ModelError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

pub const KIND_TABULAR: &str = "tabular";
pub const KIND_SEQUENTIAL: &str = "sequential";

#[derive(Debug, Deserialize)]
struct TabularArtifact {
    columns: Option<Vec<String>>,
    scaler: Option<StandardScaler>,
    classifier: Classifier,
}

#[derive(Debug, Deserialize)]
struct SequentialArtifact {
    columns: Option<Vec<String>>,
    input_dim: Option<usize>,
    num_classes: Option<usize>,
    lstm: Vec<LstmLayer>,
    head: Vec<DenseLayer>,
}

/// Side-car metadata for a bundle.
#[derive(Debug, Default, Deserialize)]
pub struct Metadata {
    pub columns: Option<Vec<String>>,
    pub input_dim: Option<usize>,
    pub num_classes: Option<usize>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let raw = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ModelError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate the bundle at `path`.
pub fn load(path: &Path, metadata_path: Option<&Path>) -> Result<ModelBundle, ModelError> {
    let value: Value = read_json(path)?;
    let metadata: Metadata = match metadata_path {
        Some(meta) => read_json(meta)?,
        None => Metadata::default(),
    };

    let bundle = from_value(value, metadata)?;

    info!(
        path = %path.display(),
        backend = bundle.backend(),
        columns = bundle.columns().len(),
        "Model bundle loaded"
    );
    Ok(bundle)
}

/// Build a bundle from an already-parsed artifact.
pub fn from_value(value: Value, metadata: Metadata) -> Result<ModelBundle, ModelError> {
    let kind = value
        .get("kind")
        .ok_or(ModelError::MissingField("kind"))?
        .as_str()
        .ok_or_else(|| ModelError::UnknownKind(value["kind"].to_string()))?
        .to_string();

    match kind.as_str() {
        KIND_TABULAR => {
            let artifact: TabularArtifact = decode(value)?;
            let columns = metadata
                .columns
                .or(artifact.columns)
                .ok_or(ModelError::MissingField("columns"))?;
            let model = TabularModel::new(columns, artifact.scaler, artifact.classifier)?;
            Ok(ModelBundle::Tabular(model))
        }
        KIND_SEQUENTIAL => {
            let artifact: SequentialArtifact = decode(value)?;
            let columns = metadata
                .columns
                .or(artifact.columns)
                .ok_or(ModelError::MissingField("columns"))?;
            let input_dim = metadata
                .input_dim
                .or(artifact.input_dim)
                .ok_or(ModelError::MissingField("input_dim"))?;
            let num_classes = metadata
                .num_classes
                .or(artifact.num_classes)
                .ok_or(ModelError::MissingField("num_classes"))?;
            let model = SequentialModel::new(
                columns,
                input_dim,
                num_classes,
                artifact.lstm,
                artifact.head,
            )?;
            Ok(ModelBundle::Sequential(model))
        }
        _ => Err(ModelError::UnknownKind(kind)),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ModelError> {
    serde_json::from_value(value).map_err(|err| ModelError::Shape(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn tabular_json() -> Value {
        json!({
            "kind": "tabular",
            "columns": ["a", "b"],
            "classifier": {
                "type": "nearest_centroid",
                "classes": [0, 1],
                "centroids": [[0.0, 0.0], [1.0, 1.0]]
            }
        })
    }

    fn sequential_json() -> Value {
        json!({
            "kind": "sequential",
            "lstm": [{
                "w_ih": [[0.0, 0.0], [0.0, 0.0], [0.0, 0.0], [0.0, 0.0]],
                "w_hh": [[0.0], [0.0], [0.0], [0.0]],
                "b_ih": [0.0, 0.0, 0.0, 0.0],
                "b_hh": [0.0, 0.0, 0.0, 0.0]
            }],
            "head": [{
                "weight": [[1.0], [0.0], [-1.0]],
                "bias": [0.0, 0.0, 0.0]
            }]
        })
    }

    fn write_temp(value: &Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{value}").unwrap();
        file
    }

    #[test]
    fn test_load_tabular() {
        let file = write_temp(&tabular_json());
        let bundle = load(file.path(), None).unwrap();
        assert_eq!(bundle.backend(), KIND_TABULAR);
        assert_eq!(bundle.columns(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_tabular_requires_columns() {
        let mut value = tabular_json();
        value.as_object_mut().unwrap().remove("columns");
        assert!(matches!(
            from_value(value, Metadata::default()),
            Err(ModelError::MissingField("columns"))
        ));
    }

    #[test]
    fn test_sequential_takes_metadata() {
        let artifact = write_temp(&sequential_json());
        let meta = write_temp(&json!({
            "columns": ["x", "y"],
            "input_dim": 2,
            "num_classes": 3
        }));

        let bundle = load(artifact.path(), Some(meta.path())).unwrap();
        assert_eq!(bundle.backend(), KIND_SEQUENTIAL);
        assert_eq!(bundle.columns().len(), 2);
    }

    #[test]
    fn test_sequential_without_metadata_is_fatal() {
        let mut value = sequential_json();
        value["columns"] = json!(["x", "y"]);
        value["input_dim"] = json!(2);
        assert!(matches!(
            from_value(value, Metadata::default()),
            Err(ModelError::MissingField("num_classes"))
        ));
    }

    #[test]
    fn test_unknown_kind_and_missing_file() {
        assert!(matches!(
            from_value(json!({"kind": "transformer"}), Metadata::default()),
            Err(ModelError::UnknownKind(kind)) if kind == "transformer"
        ));
        assert!(matches!(
            from_value(json!({"columns": ["a"]}), Metadata::default()),
            Err(ModelError::MissingField("kind"))
        ));
        assert!(matches!(
            load(Path::new("/nonexistent/model.json"), None),
            Err(ModelError::Io { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            load(file.path(), None),
            Err(ModelError::Parse { .. })
        ));
    }
}
