//! Directory-tree walking hook
//!
//! Each work item is one directory. Processing it:
//! - reads its entries with `std::fs::read_dir` (symlinks are not followed)
//! - counts files, their bytes, and symlinks into the rank's [`TreeStats`]
//! - queues every subdirectory within the depth limit that no exclusion
//!   pattern matches
//!
//! Unreadable directories are not fatal. They are counted in `errors` and
//! logged, and the walk goes on.

use crate::walker::{ProcessItem, WorkSink};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A directory waiting to be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirTask {
    /// Directory path
    pub path: PathBuf,

    /// Depth below the root it was found under (roots are 0)
    pub depth: u32,
}

impl DirTask {
    /// A walk root
    pub fn root(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            depth: 0,
        }
    }

    fn child(&self, path: PathBuf) -> Self {
        Self {
            path,
            depth: self.depth + 1,
        }
    }
}

/// Per-rank walk results
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    /// Directories read
    pub dirs: u64,

    /// Regular files (and anything else that is not a directory or symlink)
    pub files: u64,

    /// Symbolic links, not followed
    pub symlinks: u64,

    /// Sum of file sizes
    pub bytes: u64,

    /// Directories or entries that could not be read
    pub errors: u64,

    /// Directories not descended into (depth limit or exclusion)
    pub skipped: u64,
}

impl TreeStats {
    /// Sum of a set of per-rank results
    pub fn total<'a>(parts: impl IntoIterator<Item = &'a TreeStats>) -> TreeStats {
        parts.into_iter().fold(TreeStats::default(), |mut acc, s| {
            acc += *s;
            acc
        })
    }

    /// Files, directories and symlinks seen
    pub fn entries(&self) -> u64 {
        self.dirs + self.files + self.symlinks
    }
}

impl AddAssign for TreeStats {
    fn add_assign(&mut self, other: TreeStats) {
        self.dirs += other.dirs;
        self.files += other.files;
        self.symlinks += other.symlinks;
        self.bytes += other.bytes;
        self.errors += other.errors;
        self.skipped += other.skipped;
    }
}

/// Live counters shared with a progress display
#[derive(Debug, Default)]
pub struct WalkCounters {
    /// Directories read
    pub dirs: AtomicU64,

    /// Files found
    pub files: AtomicU64,

    /// Bytes found (sum of file sizes)
    pub bytes: AtomicU64,

    /// Errors encountered
    pub errors: AtomicU64,
}

impl WalkCounters {
    fn record(&self, delta: &TreeStats) {
        self.dirs.fetch_add(delta.dirs, Ordering::Relaxed);
        self.files.fetch_add(delta.files, Ordering::Relaxed);
        self.bytes.fetch_add(delta.bytes, Ordering::Relaxed);
        self.errors.fetch_add(delta.errors, Ordering::Relaxed);
    }

    /// Current values as (dirs, files, bytes, errors)
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.dirs.load(Ordering::Relaxed),
            self.files.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

/// Processing hook that walks directory trees
#[derive(Debug, Clone, Default)]
pub struct DirWalker {
    max_depth: Option<u32>,
    exclude: Vec<Regex>,
    counters: Option<Arc<WalkCounters>>,
}

impl DirWalker {
    /// Walk without a depth limit or exclusions
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not descend below `depth` (roots are depth 0)
    pub fn max_depth(mut self, depth: Option<u32>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Skip directories whose path matches any of `patterns`
    pub fn exclude(mut self, patterns: Vec<Regex>) -> Self {
        self.exclude = patterns;
        self
    }

    /// Mirror every directory's counts into `counters`
    pub fn counters(mut self, counters: Arc<WalkCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let path = path.to_string_lossy();
        self.exclude.iter().any(|re| re.is_match(&path))
    }

    fn descends_to(&self, depth: u32) -> bool {
        self.max_depth.map(|max| depth <= max).unwrap_or(true)
    }

    /// Read one directory, returning its counts
    fn read_directory(&self, task: &DirTask, sink: &mut WorkSink<'_, DirTask>) -> io::Result<TreeStats> {
        let mut delta = TreeStats {
            dirs: 1,
            ..TreeStats::default()
        };

        for entry in fs::read_dir(&task.path)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    delta.errors += 1;
                    debug!(path = %task.path.display(), error = %e, "Unreadable entry");
                    continue;
                }
            };

            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    delta.errors += 1;
                    debug!(path = %entry.path().display(), error = %e, "Cannot stat entry");
                    continue;
                }
            };

            if file_type.is_symlink() {
                delta.symlinks += 1;
            } else if file_type.is_dir() {
                let child = task.child(entry.path());
                if self.descends_to(child.depth) && !self.is_excluded(&child.path) {
                    sink.push(child);
                } else {
                    delta.skipped += 1;
                }
            } else {
                delta.files += 1;
                match entry.metadata() {
                    Ok(metadata) => delta.bytes += metadata.len(),
                    Err(_) => delta.errors += 1,
                }
            }
        }

        Ok(delta)
    }
}

impl ProcessItem<DirTask, TreeStats> for DirWalker {
    fn process(&mut self, task: DirTask, results: &mut TreeStats, sink: &mut WorkSink<'_, DirTask>) {
        if self.is_excluded(&task.path) {
            results.skipped += 1;
            debug!(path = %task.path.display(), "Directory excluded");
            return;
        }

        let delta = match self.read_directory(&task, sink) {
            Ok(delta) => {
                trace!(
                    path = %task.path.display(),
                    files = delta.files,
                    subdirs = sink.pushed(),
                    "Directory processed"
                );
                delta
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!(path = %task.path.display(), "Directory skipped: permission denied");
                TreeStats {
                    errors: 1,
                    skipped: 1,
                    ..TreeStats::default()
                }
            }
            Err(e) => {
                warn!(path = %task.path.display(), error = %e, "Directory failed");
                TreeStats {
                    errors: 1,
                    ..TreeStats::default()
                }
            }
        };

        if let Some(counters) = &self.counters {
            counters.record(&delta);
        }
        *results += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::LocalQueue;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::create_dir_all(dir.path().join(".snapshot")).unwrap();
        fs::write(dir.path().join("top.txt"), b"hello").unwrap();
        fs::write(dir.path().join("a/one.bin"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("a/b/two.bin"), vec![0u8; 20]).unwrap();
        dir
    }

    /// Run the hook to completion on one thread
    fn walk(walker: &mut DirWalker, root: &Path) -> TreeStats {
        let mut queue = LocalQueue::new();
        queue.seed([DirTask::root(root)]);
        let mut stats = TreeStats::default();
        while let Some(task) = queue.pop_front() {
            let mut sink = WorkSink::new(&mut queue);
            walker.process(task, &mut stats, &mut sink);
        }
        stats
    }

    #[test]
    fn test_counts_whole_tree() {
        let dir = fixture();
        let stats = walk(&mut DirWalker::new(), dir.path());

        assert_eq!(stats.dirs, 4);
        assert_eq!(stats.files, 3);
        assert_eq!(stats.bytes, 125);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn test_max_depth_stops_descent() {
        let dir = fixture();
        let stats = walk(&mut DirWalker::new().max_depth(Some(1)), dir.path());

        // root, a, .snapshot; b is at depth 2
        assert_eq!(stats.dirs, 3);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_exclusion_patterns() {
        let dir = fixture();
        let mut walker = DirWalker::new().exclude(vec![Regex::new(r"\.snapshot").unwrap()]);
        let stats = walk(&mut walker, dir.path());

        assert_eq!(stats.dirs, 3);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_missing_root_is_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let stats = walk(&mut DirWalker::new(), &dir.path().join("missing"));

        assert_eq!(stats.dirs, 0);
        assert_eq!(stats.errors, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed() {
        let dir = fixture();
        std::os::unix::fs::symlink(dir.path().join("a"), dir.path().join("loop")).unwrap();
        let stats = walk(&mut DirWalker::new(), dir.path());

        assert_eq!(stats.symlinks, 1);
        assert_eq!(stats.dirs, 4);
    }

    #[test]
    fn test_counters_mirror_results() {
        let dir = fixture();
        let counters = Arc::new(WalkCounters::default());
        let stats = walk(&mut DirWalker::new().counters(Arc::clone(&counters)), dir.path());

        assert_eq!(counters.snapshot(), (stats.dirs, stats.files, stats.bytes, stats.errors));
    }

    #[test]
    fn test_total_sums_ranks() {
        let a = TreeStats {
            dirs: 1,
            files: 2,
            bytes: 10,
            ..TreeStats::default()
        };
        let b = TreeStats {
            dirs: 3,
            errors: 1,
            ..TreeStats::default()
        };
        let total = TreeStats::total(&[a, b]);
        assert_eq!(total.dirs, 4);
        assert_eq!(total.files, 2);
        assert_eq!(total.errors, 1);
        assert_eq!(total.entries(), 6);
    }
}
