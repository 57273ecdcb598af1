use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dataset::generator::{InputReader, Sample, SampleLoader, Target};
use crate::dataset::layout::{GROUNDTRUTH_FOLDER, LABEL_TABLE};
use crate::error::{PipelineError, Result};

/// `filename,label` rows read from a split's `groundtruth/groundtruth.csv`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelTable {
    labels: HashMap<String, usize>,
}

impl LabelTable {
    /// Read the table of `split_dir` and check every label against `num_classes`.
    pub fn load(split_dir: &Path, num_classes: usize) -> Result<Self> {
        let path = split_dir.join(GROUNDTRUTH_FOLDER).join(LABEL_TABLE);
        if !path.is_file() {
            return Err(PipelineError::missing(format!(
                "Label table does not exist: {:?}",
                path
            )));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| PipelineError::io(&path, e))?;
        Self::parse(&content, num_classes)
    }

    pub fn parse(content: &str, num_classes: usize) -> Result<Self> {
        let mut labels = HashMap::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((file, label)) = line.rsplit_once(',') else {
                return Err(PipelineError::configuration(format!(
                    "Label table line {} is not `filename,label`: {line}",
                    index + 1
                )));
            };

            let label = match label.trim().parse::<usize>() {
                Ok(label) => label,
                // Header row.
                Err(_) if index == 0 => continue,
                Err(_) => {
                    return Err(PipelineError::configuration(format!(
                        "Label table line {} has a non-integer label: {line}",
                        index + 1
                    )));
                }
            };

            if label >= num_classes {
                return Err(PipelineError::configuration(format!(
                    "Label {label} of {} is out of range for {num_classes} classes",
                    file.trim()
                )));
            }

            labels.insert(file.trim().to_string(), label);
        }

        Ok(Self { labels })
    }

    pub fn label(&self, file: &str) -> Result<usize> {
        self.labels
            .get(file)
            .copied()
            .ok_or_else(|| PipelineError::missing(format!("No label for {file}")))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub fn one_hot(label: usize, num_classes: usize) -> Vec<f32> {
    let mut target = vec![0.0; num_classes];
    if let Some(slot) = target.get_mut(label) {
        *slot = 1.0;
    }
    target
}

/// Loads an input stack together with the one-hot vector of its label.
#[derive(Clone, Debug)]
pub struct ClassificationLoader {
    reader: InputReader,
    labels: Arc<LabelTable>,
    num_classes: usize,
}

impl ClassificationLoader {
    pub fn new(
        split_dir: PathBuf,
        modalities: Vec<String>,
        spatial: Vec<usize>,
        channels: usize,
        labels: Arc<LabelTable>,
        num_classes: usize,
    ) -> Self {
        Self {
            reader: InputReader::new(split_dir, modalities, spatial, channels),
            labels,
            num_classes,
        }
    }
}

impl SampleLoader for ClassificationLoader {
    fn load(&self, file: &str) -> Result<Sample> {
        let label = self.labels.label(file)?;
        let input = self.reader.read(file)?;

        Ok(Sample {
            input,
            target: Target::Class(one_hot(label, self.num_classes)),
        })
    }

    fn target_len(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_skips_header() {
        let table = LabelTable::parse("filename,label\na.png,0\nb.png, 2\n\n", 3).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.label("b.png").unwrap(), 2);
        assert!(matches!(
            table.label("c.png").unwrap_err(),
            PipelineError::MissingData(_)
        ));
    }

    #[test]
    fn label_out_of_range_is_configuration_error() {
        let err = LabelTable::parse("a.png,3\n", 3).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn non_integer_label_after_header_is_rejected() {
        let err = LabelTable::parse("a.png,1\nb.png,cat\n", 3).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn one_hot_marks_single_class() {
        assert_eq!(one_hot(1, 3), vec![0.0, 1.0, 0.0]);
    }
}
