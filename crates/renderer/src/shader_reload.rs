//! Shader hot reload.
//!
//! A `notify` watcher thread forwards raw filesystem events over a channel.
//! The render thread drains the channel in [`ShaderWatcher::poll`], which
//! debounces per path: editors and compilers often write a file several times
//! in a row, so a path is reported only once it has been quiet for the
//! debounce interval.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, unbounded};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use lumen_core::{Error, Result};

/// File extensions treated as shader sources or binaries.
const SHADER_EXTENSIONS: &[&str] = &["spv", "hlsl", "glsl", "vert", "frag", "comp"];

/// Per-path quiet-period tracking.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: HashMap::new(),
        }
    }

    /// Notes a change to `path` at `now`, restarting its quiet period.
    pub fn record(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Removes and returns the paths quiet since at least the interval,
    /// sorted for a stable reload order.
    pub fn settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let interval = self.interval;
        let mut ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= interval)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready.sort();
        ready
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

pub struct ShaderWatcher {
    // Dropping the watcher stops its thread and disconnects the channel.
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    debouncer: Debouncer,
    root: PathBuf,
}

impl ShaderWatcher {
    /// Watches `dir` recursively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Watch`] if the platform watcher cannot be created or
    /// the directory cannot be watched.
    pub fn new(dir: impl AsRef<Path>, debounce: Duration) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        let (sender, events) = unbounded();
        let mut watcher = notify::recommended_watcher(move |event| {
            // The receiver only disappears on shutdown.
            let _ = sender.send(event);
        })
        .map_err(|e| Error::Watch(e.to_string()))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(format!("{}: {}", root.display(), e)))?;
        info!("Watching {} for shader changes", root.display());

        Ok(Self {
            _watcher: watcher,
            events,
            debouncer: Debouncer::new(debounce),
            root,
        })
    }

    /// Drains pending events and returns shader paths that have settled.
    pub fn poll(&mut self, now: Instant) -> Vec<PathBuf> {
        for event in self.events.try_iter() {
            match event {
                Ok(event) if is_content_change(&event.kind) => {
                    for path in event.paths.into_iter().filter(|p| is_shader(p)) {
                        self.debouncer.record(path, now);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Shader watcher error under {}: {}", self.root.display(), e),
            }
        }

        let settled = self.debouncer.settled(now);
        for path in &settled {
            debug!("Shader changed: {}", path.display());
        }
        settled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn is_shader(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SHADER_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_waits_for_quiet_period() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        let path = PathBuf::from("shaders/mesh.spv");

        debouncer.record(path.clone(), start);
        assert!(debouncer.settled(start + Duration::from_millis(50)).is_empty());

        // A second write restarts the quiet period.
        debouncer.record(path.clone(), start + Duration::from_millis(80));
        assert!(debouncer.settled(start + Duration::from_millis(150)).is_empty());

        assert_eq!(debouncer.settled(start + Duration::from_millis(180)), vec![path]);
        assert_eq!(debouncer.pending(), 0);
    }

    #[test]
    fn test_debounce_reports_each_path_once() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        let start = Instant::now();
        debouncer.record(PathBuf::from("b.spv"), start);
        debouncer.record(PathBuf::from("a.spv"), start);
        debouncer.record(PathBuf::from("a.spv"), start);

        let later = start + Duration::from_millis(20);
        assert_eq!(
            debouncer.settled(later),
            vec![PathBuf::from("a.spv"), PathBuf::from("b.spv")]
        );
        assert!(debouncer.settled(later).is_empty());
    }

    #[test]
    fn test_shader_extensions() {
        assert!(is_shader(Path::new("mesh.vert.spv")));
        assert!(is_shader(Path::new("blur.hlsl")));
        assert!(!is_shader(Path::new("notes.txt")));
        assert!(!is_shader(Path::new("Makefile")));
    }

    #[test]
    fn test_missing_directory_fails() {
        let result = ShaderWatcher::new("/nonexistent/lumen/shaders", Duration::from_millis(10));
        assert!(matches!(result, Err(Error::Watch(_))));
    }
}
