//! Package planning: turn the immediate children of a package root into work
//! items

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ckool_common::CompressionFormat;

use crate::config::DEFAULT_TMP_DIR_NAME;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    /// Uploaded as-is
    File,
    /// Archived before upload
    Directory,
}

/// A planned unit of package content awaiting preparation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: WorkKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_pattern: Option<String>,
}

impl WorkItem {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Filter to apply to the files inside a directory item
    pub fn filter(&self) -> Result<PathFilter> {
        PathFilter::new(self.include_pattern.as_deref(), self.exclude_pattern.as_deref())
    }
}

/// Include/exclude regular expressions. Exclude always wins.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl PathFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        Ok(Self {
            include: include.map(compile).transpose()?,
            exclude: exclude.map(compile).transpose()?,
        })
    }

    /// Whether `path` belongs to the package
    pub fn is_included(&self, path: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |re| re.is_match(path));
        let excluded = self.exclude.as_ref().is_some_and(|re| re.is_match(path));
        included && !excluded
    }

    pub fn is_unfiltered(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| PipelineError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Path of `path` relative to `root` with `/` separators, for filtering
pub fn relative_display(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walks one package root
#[derive(Debug, Clone)]
pub struct Planner {
    tmp_dir_name: String,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(DEFAULT_TMP_DIR_NAME)
    }
}

impl Planner {
    pub fn new(tmp_dir_name: impl Into<String>) -> Self {
        Self {
            tmp_dir_name: tmp_dir_name.into(),
        }
    }

    /// Plan the immediate children of `root`.
    ///
    /// The directory listing is read up front so a missing root fails
    /// before anything is scheduled; classification and filtering happen as
    /// the returned iterator is consumed.
    pub fn plan(
        &self,
        root: impl AsRef<Path>,
        include_pattern: Option<&str>,
        exclude_pattern: Option<&str>,
    ) -> Result<impl Iterator<Item = Result<WorkItem>>> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(PipelineError::NotADirectory(root));
        }

        let filter = PathFilter::new(include_pattern, exclude_pattern)?;
        let include = include_pattern.map(str::to_string);
        let exclude = exclude_pattern.map(str::to_string);

        let mut entries = std::fs::read_dir(&root)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        let tmp_dir = root.join(&self.tmp_dir_name);
        debug!(root = %root.display(), entries = entries.len(), "planning package");

        Ok(entries.into_iter().filter_map(move |path| {
            if path == tmp_dir {
                return None;
            }
            if !filter.is_included(&relative_display(&root, &path)) {
                debug!(path = %path.display(), "filtered out");
                return None;
            }

            let kind = match std::fs::metadata(&path) {
                Ok(m) if m.is_dir() => WorkKind::Directory,
                Ok(m) if m.is_file() => WorkKind::File,
                Ok(_) => {
                    warn!(path = %path.display(), "skipping special file");
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            };

            Some(Ok(WorkItem {
                kind,
                path,
                include_pattern: include.clone(),
                exclude_pattern: exclude.clone(),
            }))
        }))
    }
}

/// Reject plans where a plain file and a directory archive share a resource
/// name, since both would map to the same cache record and upload name.
pub fn check_resource_names(items: &[WorkItem], compression: CompressionFormat) -> Result<()> {
    let files: std::collections::HashMap<String, &WorkItem> = items
        .iter()
        .filter(|i| i.kind == WorkKind::File)
        .map(|i| (i.name(), i))
        .collect();

    for dir in items.iter().filter(|i| i.kind == WorkKind::Directory) {
        let name = compression.archive_name(&dir.name());
        if let Some(file) = files.get(&name) {
            return Err(PipelineError::ResourceNameCollision {
                name,
                file: file.path.clone(),
                directory: dir.path.clone(),
            });
        }
    }
    Ok(())
}

/// Plan `root` with the default temporary directory name
pub fn plan(
    root: impl AsRef<Path>,
    include_pattern: Option<&str>,
    exclude_pattern: Option<&str>,
) -> Result<impl Iterator<Item = Result<WorkItem>>> {
    Planner::default().plan(root, include_pattern, exclude_pattern)
}
