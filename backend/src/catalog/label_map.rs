use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};

/// How the class-index JSON file is laid out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LabelOrientation {
    /// `{"0": "Apple___Apple_scab", ...}`
    #[default]
    IndexToLabel,
    /// `{"Apple___Apple_scab": 0, ...}`
    LabelToIndex,
}

#[derive(Debug, thiserror::Error)]
pub enum LabelMapError {
    #[error("Failed to read label map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Label map is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Label map must be a JSON object")]
    NotAnObject,
    #[error("Label map is empty")]
    Empty,
    #[error("Label map entry {key:?} is not a valid class index ({orientation} layout){hint}")]
    InvalidIndex {
        key: String,
        orientation: LabelOrientation,
        hint: &'static str,
    },
    #[error("Label map entry {key:?} has no usable label ({orientation} layout){hint}")]
    InvalidLabel {
        key: String,
        orientation: LabelOrientation,
        hint: &'static str,
    },
    #[error("Class index {0} appears more than once in the label map")]
    DuplicateIndex(usize),
    #[error("Label map is missing classes {missing:?} out of the model's {expected} outputs")]
    MissingClasses { expected: usize, missing: Vec<usize> },
}

const LOOKS_INVERTED: &str = "; the file looks like the other orientation, check label_map_orientation";

/// Class index to disease name, immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    labels: BTreeMap<usize, String>,
}

impl LabelMap {
    pub fn load(path: &Path, orientation: LabelOrientation) -> Result<Self, LabelMapError> {
        let text = std::fs::read_to_string(path).map_err(|source| LabelMapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let labels = Self::from_json(&text, orientation)?;
        log::info!(
            "Loaded {} class labels from {} ({} layout)",
            labels.len(),
            path.display(),
            orientation
        );
        Ok(labels)
    }

    pub fn from_json(text: &str, orientation: LabelOrientation) -> Result<Self, LabelMapError> {
        let value: Value = serde_json::from_str(text)?;
        let object = value.as_object().ok_or(LabelMapError::NotAnObject)?;

        let mut pairs = Vec::with_capacity(object.len());
        for (key, value) in object {
            let pair = match orientation {
                LabelOrientation::IndexToLabel => index_to_label_entry(key, value)?,
                LabelOrientation::LabelToIndex => label_to_index_entry(key, value)?,
            };
            pairs.push(pair);
        }
        Self::from_pairs(pairs)
    }

    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, LabelMapError>
    where
        I: IntoIterator<Item = (usize, S)>,
        S: Into<String>,
    {
        let mut labels = BTreeMap::new();
        for (index, label) in pairs {
            if labels.insert(index, label.into()).is_some() {
                return Err(LabelMapError::DuplicateIndex(index));
            }
        }
        if labels.is_empty() {
            return Err(LabelMapError::Empty);
        }
        Ok(Self { labels })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.values().map(String::as_str)
    }

    /// Every output index of a model with `num_classes` outputs must resolve.
    pub fn ensure_covers(&self, num_classes: usize) -> Result<(), LabelMapError> {
        let missing: Vec<usize> = (0..num_classes)
            .filter(|index| !self.labels.contains_key(index))
            .collect();
        if !missing.is_empty() {
            return Err(LabelMapError::MissingClasses {
                expected: num_classes,
                missing,
            });
        }
        if self.labels.len() > num_classes {
            log::warn!(
                "Label map has {} entries but the model only produces {} classes",
                self.labels.len(),
                num_classes
            );
        }
        Ok(())
    }
}

fn index_to_label_entry(key: &str, value: &Value) -> Result<(usize, String), LabelMapError> {
    let orientation = LabelOrientation::IndexToLabel;
    let hint = if value.is_u64() { LOOKS_INVERTED } else { "" };
    let index = key
        .parse::<usize>()
        .map_err(|_| LabelMapError::InvalidIndex {
            key: key.to_string(),
            orientation,
            hint,
        })?;
    match value.as_str().map(str::trim) {
        Some(label) if !label.is_empty() => Ok((index, label.to_string())),
        _ => Err(LabelMapError::InvalidLabel {
            key: key.to_string(),
            orientation,
            hint,
        }),
    }
}

fn label_to_index_entry(key: &str, value: &Value) -> Result<(usize, String), LabelMapError> {
    let orientation = LabelOrientation::LabelToIndex;
    let hint = if key.parse::<usize>().is_ok() && value.is_string() {
        LOOKS_INVERTED
    } else {
        ""
    };
    let label = key.trim();
    if label.is_empty() {
        return Err(LabelMapError::InvalidLabel {
            key: key.to_string(),
            orientation,
            hint,
        });
    }
    let index = value
        .as_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| LabelMapError::InvalidIndex {
            key: key.to_string(),
            orientation,
            hint,
        })?;
    Ok((index, label.to_string()))
}
