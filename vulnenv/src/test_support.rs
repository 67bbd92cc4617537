//! Test-only helpers: sample functions, scripted policies, temp datasets.

use std::collections::VecDeque;
use std::fs;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::episode::PolicyView;
use crate::io::dataset::{Sample, Split};
use crate::io::policy::Policy;

/// No unbounded copies, no indexing, no NULL stores, no frees.
pub const SAFE_FUNCTION: &str = "\
int add_clamped(int a, int b) {
    int sum = a + b;
    if (sum > 100) {
        sum = 100;
    }
    return sum;
}";

/// `p` is read through `p[0]` after `free(p)` (line 3 frees, line 4 reads).
pub const UAF_FUNCTION: &str = "\
int consume(struct item *it) {
    char *p = it->name;
    free(p);
    return p[0];
}";

/// `cur` is stored NULL and then dereferenced with `->`.
pub const NULL_DEREF_FUNCTION: &str = "\
int read_len(struct buf *b) {
    struct buf *cur = NULL;
    log_access(b);
    return cur->len;
}";

/// `strcpy` into a fixed buffer.
pub const OVERFLOW_FUNCTION: &str = "\
void greet(const char *name) {
    char buf[16];
    strcpy(buf, name);
    puts(buf);
}";

/// Policy that replays a fixed list of actions, then fails.
#[derive(Debug, Default)]
pub struct ScriptedPolicy {
    actions: Mutex<VecDeque<String>>,
}

impl ScriptedPolicy {
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: Mutex::new(actions.into_iter().map(Into::into).collect()),
        }
    }

    /// Actions not yet handed out.
    pub fn remaining(&self) -> usize {
        self.actions.lock().map(|queue| queue.len()).unwrap_or_default()
    }
}

impl Policy for ScriptedPolicy {
    fn next_action(&self, _view: &PolicyView<'_>) -> Result<String> {
        self.actions
            .lock()
            .map_err(|_| anyhow!("scripted policy lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("scripted policy exhausted"))
    }
}

/// Policy that always answers the same text.
#[derive(Debug, Clone)]
pub struct ConstantPolicy(pub String);

impl Policy for ConstantPolicy {
    fn next_action(&self, _view: &PolicyView<'_>) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Temp dataset directory whose `test.jsonl` holds `test`; the other splits are empty.
pub fn temp_dataset(test: &[Sample]) -> Result<TempDir> {
    let dir = tempfile::tempdir().context("create temp dataset dir")?;
    for split in Split::ALL {
        let samples: &[Sample] = if split == Split::Test { test } else { &[] };
        let mut body = String::new();
        for sample in samples {
            body.push_str(&serde_json::to_string(sample)?);
            body.push('\n');
        }
        fs::write(dir.path().join(split.file_name()), body)
            .with_context(|| format!("write {split} split"))?;
    }
    Ok(dir)
}
