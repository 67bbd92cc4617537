//! JSONL dataset loading.
//!
//! Each line is one function: `{"func": "<C source>", "target": 0|1, ...}`.
//! Extra fields (project, commit id) are ignored. Nothing is read until a
//! caller asks for it.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::episode::{LABEL_SAFE, LABEL_VULNERABLE};

/// One labelled function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "func")]
    pub code: String,
    #[serde(rename = "target")]
    pub label: u8,
}

/// Named partition of a dataset directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.jsonl", self.as_str())
    }
}

impl FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Split::ALL
            .into_iter()
            .find(|split| split.as_str() == value)
            .ok_or_else(|| anyhow!("unknown split {value:?} (expected train, valid or test)"))
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All three splits of a dataset directory.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub train: Vec<Sample>,
    pub valid: Vec<Sample>,
    pub test: Vec<Sample>,
}

impl Dataset {
    pub fn split(&self, split: Split) -> &[Sample] {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }
}

/// Per-label counts of a sample list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total: usize,
    pub safe: usize,
    pub vulnerable: usize,
}

impl DatasetStats {
    pub fn of<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        samples
            .into_iter()
            .fold(Self::default(), |mut stats, sample| {
                stats.total += 1;
                if sample.label == LABEL_VULNERABLE {
                    stats.vulnerable += 1;
                } else {
                    stats.safe += 1;
                }
                stats
            })
    }
}

/// Load one JSONL split. Blank lines are skipped.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_split(path: &Path) -> Result<Vec<Sample>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read dataset {}", path.display()))?;
    let mut samples = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(line)
            .with_context(|| format!("parse {} line {}", path.display(), index + 1))?;
        if sample.label != LABEL_SAFE && sample.label != LABEL_VULNERABLE {
            bail!(
                "{} line {}: target must be 0 or 1, got {}",
                path.display(),
                index + 1,
                sample.label
            );
        }
        samples.push(sample);
    }
    debug!(samples = samples.len(), "split loaded");
    Ok(samples)
}

/// Load `train.jsonl`, `valid.jsonl` and `test.jsonl` from `dir`.
pub fn load_dataset(dir: &Path) -> Result<Dataset> {
    Ok(Dataset {
        train: load_split(&dir.join(Split::Train.file_name()))?,
        valid: load_split(&dir.join(Split::Valid.file_name()))?,
        test: load_split(&dir.join(Split::Test.file_name()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_split(dir: &Path, split: Split, lines: &[&str]) {
        fs::write(dir.join(split.file_name()), lines.join("\n")).expect("write split");
    }

    #[test]
    fn loads_all_splits_and_ignores_extra_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_split(
            temp.path(),
            Split::Train,
            &[
                r#"{"project": "qemu", "func": "int f(void) { return 0; }", "target": 0}"#,
                "",
                r#"{"func": "void g(char *s) { strcpy(b, s); }", "target": 1}"#,
            ],
        );
        write_split(temp.path(), Split::Valid, &[r#"{"func": "x", "target": 1}"#]);
        write_split(temp.path(), Split::Test, &[]);

        let dataset = load_dataset(temp.path()).expect("load");
        assert_eq!(dataset.train.len(), 2);
        assert_eq!(dataset.split(Split::Valid).len(), 1);
        assert!(dataset.test.is_empty());
        assert_eq!(
            DatasetStats::of(&dataset.train),
            DatasetStats {
                total: 2,
                safe: 1,
                vulnerable: 1
            }
        );
    }

    #[test]
    fn split_parses_from_name() {
        assert_eq!("valid".parse::<Split>().expect("valid"), Split::Valid);
        assert!("dev".parse::<Split>().is_err());
    }

    #[test]
    fn reports_line_of_malformed_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_split(
            temp.path(),
            Split::Train,
            &[r#"{"func": "a", "target": 0}"#, r#"{"func": "b"}"#],
        );
        let err = load_split(&temp.path().join("train.jsonl")).expect_err("missing target");
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn rejects_non_binary_label() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_split(temp.path(), Split::Test, &[r#"{"func": "a", "target": 3}"#]);
        let err = load_split(&temp.path().join("test.jsonl")).expect_err("bad target");
        assert!(err.to_string().contains("target must be 0 or 1"));
    }
}
