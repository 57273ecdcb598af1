use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Extensions accepted as input images. `vol` holds 3D volumes.
pub const SUPPORTED_FILES: [&str; 7] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp", "vol"];

/// Folder names stacked as input modalities, in channel order.
pub const MODALITY_FOLDERS: [&str; 8] = [
    "image", "image1", "image2", "image3", "image4", "image5", "image6", "image7",
];

pub const GROUNDTRUTH_FOLDER: &str = "groundtruth";
pub const LABEL_TABLE: &str = "groundtruth.csv";

/// The fixed on-disk convention of a dataset root.
///
/// ```text
/// <root>/train/image[,1..7]/*   training inputs
/// <root>/train/groundtruth/*    training labels
/// <root>/test/image/*           test inputs
/// <root>/logs/                  checkpoint and progress logs
/// <root>/results/               predictions
/// <root>/insights/              uncertainty components
/// <root>/uncertainty/           combined uncertainty
/// ```
#[derive(Clone, Debug)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_name(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string())
    }

    pub fn train_dir(&self) -> PathBuf {
        self.root.join("train")
    }

    pub fn test_dir(&self) -> PathBuf {
        self.root.join("test")
    }

    pub fn train_images(&self) -> PathBuf {
        self.train_dir().join(MODALITY_FOLDERS[0])
    }

    pub fn test_images(&self) -> PathBuf {
        self.test_dir().join(MODALITY_FOLDERS[0])
    }

    pub fn train_groundtruth(&self) -> PathBuf {
        self.train_dir().join(GROUNDTRUTH_FOLDER)
    }

    pub fn test_groundtruth(&self) -> PathBuf {
        self.test_dir().join(GROUNDTRUTH_FOLDER)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Best-validation-loss snapshot, one per dataset path.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.logs_dir()
            .join(format!("pretrained_weights{}.bin", self.dataset_name()))
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn insights_dir(&self) -> PathBuf {
        self.root.join("insights")
    }

    pub fn uncertainty_dir(&self) -> PathBuf {
        self.root.join("uncertainty")
    }

    /// Modality folders present under `train/`, in channel order.
    pub fn modalities(&self) -> Result<Vec<String>> {
        let train_dir = self.train_dir();
        if !train_dir.is_dir() {
            return Err(PipelineError::missing(format!(
                "Training directory does not exist: {:?}",
                train_dir
            )));
        }

        Ok(MODALITY_FOLDERS
            .iter()
            .filter(|folder| train_dir.join(folder).is_dir())
            .map(|folder| folder.to_string())
            .collect())
    }
}

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_FILES
                .iter()
                .any(|&valid_ext| valid_ext.eq_ignore_ascii_case(ext))
        })
}

/// Sorted names of the image files directly inside `dir`.
pub fn list_image_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(PipelineError::missing(format!(
            "Image directory does not exist: {:?}",
            dir
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        if path.is_file() && has_supported_extension(&path) {
            if let Some(name) = path.file_name() {
                files.push(name.to_string_lossy().into_owned());
            }
        }
    }
    files.sort();

    Ok(files)
}

pub fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))
}

/// File name without its extension.
pub fn file_stem(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_is_named_after_dataset() {
        let layout = DatasetLayout::new("/data/nuclei");
        assert_eq!(
            layout.checkpoint_path(),
            PathBuf::from("/data/nuclei/logs/pretrained_weightsnuclei.bin")
        );
    }

    #[test]
    fn lists_only_supported_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.tif", "notes.txt", "c.vol"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let files = list_image_files(dir.path()).unwrap();
        assert_eq!(files, vec!["a.tif", "b.png", "c.vol"]);
    }

    #[test]
    fn missing_directory_is_missing_data() {
        let err = list_image_files(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));
    }
}
