//! Enumerates labeled images from a folder-per-label layout or a tag file,
//! and splits them into training and test sets.

use csv::ReaderBuilder;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::PipelineError;

/// One training or evaluation input: an image file and its category name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: String,
}

impl LabeledImage {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }
}

/// Lists every image in each folder, labeling it with the folder's label.
///
/// Folders are visited in the given order; files inside a folder are sorted
/// by name. Hidden files are skipped.
///
/// # Example
/// ```no_run
/// # fn main() -> Result<(), occipital::PipelineError> {
/// use occipital::dataset::load_from_folders;
///
/// let images = load_from_folders(&[("cats", "cat"), ("dogs", "dog")])?;
/// # Ok(())
/// # }
/// ```
pub fn load_from_folders<P, L>(folders: &[(P, L)]) -> Result<Vec<LabeledImage>, PipelineError>
where
    P: AsRef<Path>,
    L: AsRef<str>,
{
    let mut images = Vec::new();
    for (folder, label) in folders {
        let files = list_files(folder.as_ref())?;
        debug!("Folder {:?}: {} files labeled '{}'", folder.as_ref(), files.len(), label.as_ref());
        images.extend(files.into_iter().map(|path| LabeledImage::new(path, label.as_ref())));
    }
    info!("Loaded {} images from {} folders", images.len(), folders.len());
    Ok(images)
}

/// Treats every subfolder of `root` as one label named after the subfolder.
///
/// Subfolders are visited in name order.
pub fn load_labeled_folders(root: impl AsRef<Path>) -> Result<Vec<LabeledImage>, PipelineError> {
    let root = root.as_ref();
    let mut folders = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if !name.starts_with('.') {
                folders.push((path.clone(), name.to_string()));
            }
        }
    }
    folders.sort();
    load_from_folders(&folders)
}

fn list_files(folder: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if path.is_file() && !hidden {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Reads a tab-delimited `[imagePath, label]` file without header.
///
/// Relative image paths are resolved against the tag file's directory.
///
/// # Errors
/// - `MalformedRecord` for a row without exactly two non-empty columns (1-based row)
/// - `InvalidConfig` if the tag file cannot be opened as a delimited file
/// - `ImageRead` if a listed image file does not exist
pub fn load_tag_file(path: impl AsRef<Path>) -> Result<Vec<LabeledImage>, PipelineError> {
    let path = path.as_ref();
    let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
    load_tag_file_with_root(path, root)
}

/// Like [`load_tag_file`], resolving relative image paths against `image_root`
pub fn load_tag_file_with_root(
    path: impl AsRef<Path>,
    image_root: impl AsRef<Path>,
) -> Result<Vec<LabeledImage>, PipelineError> {
    let path = path.as_ref();
    let image_root = image_root.as_ref();
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_path(path)
        .map_err(|e| csv_to_io(e, path))?;

    let mut images = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|e| PipelineError::MalformedRecord {
            row: e.position().map_or(index + 1, |p| p.line() as usize),
            reason: e.to_string(),
        })?;
        let row = record.position().map_or(index + 1, |p| p.line() as usize);

        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        if record.len() != 2 {
            return Err(PipelineError::MalformedRecord {
                row,
                reason: format!("expected 2 columns (imagePath, label), found {}", record.len()),
            });
        }
        let (image, label) = (record[0].trim(), record[1].trim());
        if image.is_empty() || label.is_empty() {
            return Err(PipelineError::MalformedRecord {
                row,
                reason: "image path and label must not be empty".to_string(),
            });
        }

        let image_path = image_root.join(image);
        if !image_path.is_file() {
            return Err(PipelineError::image_read(&image_path, "file does not exist"));
        }
        images.push(LabeledImage::new(image_path, label));
    }

    info!("Loaded {} records from tag file {:?}", images.len(), path);
    Ok(images)
}

fn csv_to_io(err: csv::Error, path: &Path) -> PipelineError {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => PipelineError::Io(e),
        other => PipelineError::InvalidConfig(format!("cannot read tag file {:?}: {:?}", path, other)),
    }
}

/// Splits records into `(train, test)`, holding out `round(count * test_fraction)`
/// records of every label while keeping at least one of each label for training.
///
/// With `seed: None` the shuffle draws from OS entropy and differs run-to-run.
pub fn train_test_split(
    records: &[LabeledImage],
    test_fraction: f64,
    seed: Option<u64>,
) -> Result<(Vec<LabeledImage>, Vec<LabeledImage>), PipelineError> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(PipelineError::InvalidConfig(format!(
            "test_fraction must be in [0, 1), got {}",
            test_fraction
        )));
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => {
            warn!("No seed fixed; train/test split will vary between runs");
            StdRng::from_entropy()
        }
    };

    // Group by label in first-appearance order
    let mut groups: Vec<(&str, Vec<&LabeledImage>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(label, _)| *label == record.label) {
            Some((_, members)) => members.push(record),
            None => groups.push((record.label.as_str(), vec![record])),
        }
    }

    let mut train = Vec::new();
    let mut test = Vec::new();
    for (label, mut members) in groups {
        members.shuffle(&mut rng);
        let held_out = ((members.len() as f64 * test_fraction).round() as usize)
            .min(members.len().saturating_sub(1));
        debug!("Label '{}': {} train, {} test", label, members.len() - held_out, held_out);
        let (test_part, train_part) = members.split_at(held_out);
        test.extend(test_part.iter().map(|r| (*r).clone()));
        train.extend(train_part.iter().map(|r| (*r).clone()));
    }
    Ok((train, test))
}
