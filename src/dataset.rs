//! YOLO-layout datasets: labels, class names, statistics and validation.
//!
//! Layout: `<root>/<split>/images/*.{jpg,png,...}` with one
//! `<root>/<split>/labels/<stem>.txt` per image. Each label line is
//! `class_id cx cy w h` in normalized units. A missing label file means the
//! image has no ground truth; a malformed one fails the whole dataset.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::detect::BoundingBox;
use crate::error::{DetectError, DetectResult};
use crate::frame::ImageFrame;
use crate::media;

pub const SPLITS: [&str; 3] = ["train", "val", "test"];

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// One labeled object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub class_label: String,
}

impl GroundTruth {
    pub fn new(bbox: BoundingBox, class_label: impl Into<String>) -> Self {
        Self {
            bbox,
            class_label: class_label.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum SampleImage {
    /// Decoded on demand, so a split never sits in memory whole.
    Path(PathBuf),
    Frame(ImageFrame),
}

/// An image with its ground-truth boxes.
#[derive(Clone, Debug)]
pub struct LabeledSample {
    pub id: String,
    pub image: SampleImage,
    pub ground_truth: Vec<GroundTruth>,
}

impl LabeledSample {
    pub fn in_memory(id: impl Into<String>, frame: ImageFrame, ground_truth: Vec<GroundTruth>) -> Self {
        Self {
            id: id.into(),
            image: SampleImage::Frame(frame),
            ground_truth,
        }
    }

    pub fn on_disk(path: PathBuf, ground_truth: Vec<GroundTruth>) -> Self {
        Self {
            id: path.display().to_string(),
            image: SampleImage::Path(path),
            ground_truth,
        }
    }

    pub fn load_image(&self) -> DetectResult<Cow<'_, ImageFrame>> {
        match &self.image {
            SampleImage::Frame(frame) => Ok(Cow::Borrowed(frame)),
            SampleImage::Path(path) => media::load_image(path)
                .map(Cow::Owned)
                .map_err(|e| DetectError::Dataset(format!("sample {}: {}", self.id, e))),
        }
    }
}

/// Class id to display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassNames(BTreeMap<u32, String>);

impl Default for ClassNames {
    fn default() -> Self {
        Self(BTreeMap::from([(0, "Human".to_string())]))
    }
}

#[derive(Deserialize)]
struct Notes {
    categories: Vec<Category>,
}

#[derive(Deserialize)]
struct Category {
    id: u32,
    name: String,
}

impl ClassNames {
    /// Names indexed by position: `["Human", "Dog"]` is `{0: Human, 1: Dog}`.
    pub fn from_list(names: &[String]) -> Self {
        Self(
            names
                .iter()
                .enumerate()
                .map(|(id, name)| (id as u32, name.clone()))
                .collect(),
        )
    }

    /// Read `<root>/notes.json` `categories`. `None` when the file is absent,
    /// unreadable or has no categories.
    pub fn from_notes(root: &Path) -> Option<Self> {
        let path = root.join("notes.json");
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Notes>(&raw) {
            Ok(notes) if !notes.categories.is_empty() => Some(Self(
                notes
                    .categories
                    .into_iter()
                    .map(|c| (c.id, c.name))
                    .collect(),
            )),
            Ok(_) => None,
            Err(e) => {
                log::warn!("ignoring {}: {}", path.display(), e);
                None
            }
        }
    }

    /// `notes.json` when valid, else `configured`.
    pub fn resolve(root: &Path, configured: &ClassNames) -> Self {
        Self::from_notes(root).unwrap_or_else(|| configured.clone())
    }

    pub fn label(&self, id: u32) -> String {
        self.0
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", id))
    }

    /// Names in id order, for backends that index classes by position.
    pub fn to_list(&self) -> Vec<String> {
        let max = self.0.keys().next_back().copied().unwrap_or(0);
        (0..=max).map(|id| self.label(id)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.0.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse one YOLO label file. Blank lines are ignored; anything else that is
/// not five finite numbers in `[0, 1]` with an integral class id is an error.
pub fn parse_labels(content: &str, file: &Path, names: &ClassNames) -> DetectResult<Vec<GroundTruth>> {
    let mut boxes = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let bad = |why: String| {
            DetectError::Dataset(format!("{}:{}: {}", file.display(), line_no + 1, why))
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(bad(format!("expected 5 fields, found {}", fields.len())));
        }
        let class_id: u32 = fields[0]
            .parse()
            .map_err(|_| bad(format!("class id '{}' is not a non-negative integer", fields[0])))?;

        let mut coords = [0f32; 4];
        for (slot, raw) in coords.iter_mut().zip(&fields[1..]) {
            let value: f32 = raw
                .parse()
                .map_err(|_| bad(format!("'{}' is not a number", raw)))?;
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(bad(format!("value {} is outside [0, 1]", raw)));
            }
            *slot = value;
        }

        let [cx, cy, w, h] = coords;
        boxes.push(GroundTruth::new(
            BoundingBox::from_center(cx, cy, w, h).clamped(),
            names.label(class_id),
        ));
    }
    Ok(boxes)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitStatistics {
    pub split: String,
    pub images: usize,
    pub label_files: usize,
    pub total_objects: usize,
    pub avg_objects_per_image: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub root: PathBuf,
    pub splits: Vec<SplitStatistics>,
}

pub struct YoloDataset {
    root: PathBuf,
    classes: ClassNames,
}

impl YoloDataset {
    pub fn open(root: &Path, classes: &ClassNames) -> DetectResult<Self> {
        if !root.is_dir() {
            return Err(DetectError::Dataset(format!(
                "dataset root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            classes: ClassNames::resolve(root, classes),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &ClassNames {
        &self.classes
    }

    pub fn has_split(&self, split: &str) -> bool {
        self.images_dir(split).is_dir()
    }

    fn images_dir(&self, split: &str) -> PathBuf {
        self.root.join(split).join("images")
    }

    fn labels_dir(&self, split: &str) -> PathBuf {
        self.root.join(split).join("labels")
    }

    /// Sorted image files of a split.
    pub fn images(&self, split: &str) -> DetectResult<Vec<PathBuf>> {
        let dir = self.images_dir(split);
        let entries = fs::read_dir(&dir).map_err(|e| {
            DetectError::Dataset(format!("cannot list {}: {}", dir.display(), e))
        })?;
        let mut images: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        images.sort();
        Ok(images)
    }

    /// Load every sample of `split` with parsed labels. Images stay on disk.
    pub fn load_split(&self, split: &str) -> DetectResult<Vec<LabeledSample>> {
        let labels_dir = self.labels_dir(split);
        let mut samples = Vec::new();
        for image in self.images(split)? {
            let ground_truth = match image.file_stem() {
                Some(stem) => {
                    let label_path = labels_dir.join(format!("{}.txt", stem.to_string_lossy()));
                    self.read_labels(&label_path)?
                }
                None => Vec::new(),
            };
            samples.push(LabeledSample::on_disk(image, ground_truth));
        }
        log::debug!("{}: {} samples in split {}", self.root.display(), samples.len(), split);
        Ok(samples)
    }

    fn read_labels(&self, path: &Path) -> DetectResult<Vec<GroundTruth>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| DetectError::Dataset(format!("cannot read {}: {}", path.display(), e)))?;
        parse_labels(&content, path, &self.classes)
    }

    /// Per-split counts for every split directory that exists.
    pub fn statistics(&self) -> DetectResult<DatasetStatistics> {
        let mut splits = Vec::new();
        for split in SPLITS {
            if !self.has_split(split) {
                continue;
            }
            let images = self.images(split)?.len();
            let mut label_files = 0;
            let mut total_objects = 0;
            if let Ok(entries) = fs::read_dir(self.labels_dir(split)) {
                for path in entries.filter_map(Result::ok).map(|e| e.path()) {
                    if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                        continue;
                    }
                    label_files += 1;
                    let content = fs::read_to_string(&path).map_err(|e| {
                        DetectError::Dataset(format!("cannot read {}: {}", path.display(), e))
                    })?;
                    total_objects += content.lines().filter(|l| !l.trim().is_empty()).count();
                }
            }
            splits.push(SplitStatistics {
                split: split.to_string(),
                images,
                label_files,
                total_objects,
                avg_objects_per_image: if images > 0 {
                    total_objects as f64 / images as f64
                } else {
                    0.0
                },
            });
        }
        Ok(DatasetStatistics {
            root: self.root.clone(),
            splits,
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Checks a dataset before training starts.
pub trait DatasetValidator: Send + Sync {
    fn validate(&self, dataset: &Path) -> DetectResult<()>;
}

/// Requires `train` and `val` with at least one image each, and every label
/// file in every present split to parse.
#[derive(Clone, Debug, Default)]
pub struct YoloDatasetValidator {
    classes: ClassNames,
}

impl YoloDatasetValidator {
    pub fn new(classes: ClassNames) -> Self {
        Self { classes }
    }
}

impl DatasetValidator for YoloDatasetValidator {
    fn validate(&self, dataset: &Path) -> DetectResult<()> {
        let dataset = YoloDataset::open(dataset, &self.classes)?;
        for split in SPLITS {
            let required = split != "test";
            if !dataset.has_split(split) {
                if required {
                    return Err(DetectError::Dataset(format!(
                        "missing {} split under {}",
                        split,
                        dataset.root().display()
                    )));
                }
                continue;
            }
            let samples = dataset.load_split(split)?;
            if required && samples.is_empty() {
                return Err(DetectError::Dataset(format!("{} split has no images", split)));
            }
        }
        Ok(())
    }
}
