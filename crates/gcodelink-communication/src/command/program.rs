//! Programs: preprocessed G-code with one tracker per line

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcodelink_core::{CommandError, Result};
use gcodelink_gcode::GcodeProcessor;
use serde::{Deserialize, Serialize};

use super::tracker::{CommandStage, CommandTracker, TrackerCallback, TrackerInfo};

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// What a program was loaded as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramKind {
    /// A user program
    Program,
    /// A macro file run through `exec_macro`
    Macro,
}

/// A preprocessed G-code program
///
/// Preprocessing runs once at construction. `lines()` and `trackers()`
/// correspond one to one, in order.
pub struct Program {
    id: u64,
    name: String,
    kind: ProgramKind,
    source: Vec<String>,
    lines: Vec<String>,
    trackers: Vec<Arc<CommandTracker>>,
    queued: AtomicBool,
    progress: Arc<AtomicUsize>,
    estimated_time: Duration,
}

impl Program {
    /// Preprocess `source` and create its trackers
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        source: &[S],
        processor: &mut GcodeProcessor,
    ) -> Self {
        Self::with_kind(name, ProgramKind::Program, source, processor)
    }

    /// Preprocess `source` as a program of the given kind
    pub fn with_kind<S: AsRef<str>>(
        name: impl Into<String>,
        kind: ProgramKind,
        source: &[S],
        processor: &mut GcodeProcessor,
    ) -> Self {
        let name = name.into();
        let id = NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed);
        let source: Vec<String> = source.iter().map(|l| l.as_ref().to_string()).collect();
        let lines = processor.preprocess(&source);

        let progress = Arc::new(AtomicUsize::new(0));
        let cursor = progress.clone();
        let callback: TrackerCallback = Arc::new(move |tracker: &CommandTracker| {
            if tracker.stage() == CommandStage::Cancelled {
                return;
            }
            if let Some(index) = tracker.info().line_index {
                cursor.fetch_max(index + 1, Ordering::SeqCst);
            }
        });

        let trackers = lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let info = TrackerInfo {
                    program_id: Some(id),
                    ..TrackerInfo::for_program(name.clone(), index)
                };
                Arc::new(CommandTracker::with_info(
                    line.clone(),
                    info,
                    Some(callback.clone()),
                ))
            })
            .collect();

        tracing::debug!(
            "Program '{}' preprocessed: {} source lines -> {} commands",
            name,
            source.len(),
            lines.len()
        );

        Self {
            id,
            name,
            kind,
            source,
            lines,
            trackers,
            queued: AtomicBool::new(false),
            progress,
            estimated_time: Duration::ZERO,
        }
    }

    /// Preprocess a program given as one block of text
    pub fn from_text(name: impl Into<String>, text: &str, processor: &mut GcodeProcessor) -> Self {
        let source: Vec<&str> = text.lines().collect();
        Self::new(name, &source, processor)
    }

    /// Read and preprocess a program file
    pub fn load(
        path: impl AsRef<Path>,
        kind: ProgramKind,
        processor: &mut GcodeProcessor,
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let source: Vec<&str> = text.lines().collect();
        Ok(Self::with_kind(name, kind, &source, processor))
    }

    /// Unique id shared by this program's trackers
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Program name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program or macro
    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    /// Lines as loaded
    pub fn source(&self) -> &[String] {
        &self.source
    }

    /// Device-ready lines after preprocessing
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// One tracker per device-ready line
    pub fn trackers(&self) -> &[Arc<CommandTracker>] {
        &self.trackers
    }

    /// Whether `tracker` belongs to this program
    pub fn owns(&self, tracker: &CommandTracker) -> bool {
        tracker.info().program_id == Some(self.id)
    }

    /// Whether the program's commands currently sit in the backlog
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::SeqCst)
    }

    pub(crate) fn set_queued(&self, queued: bool) {
        self.queued.store(queued, Ordering::SeqCst);
    }

    /// Number of lines finished, counted up to the furthest completed line
    pub fn progress(&self) -> usize {
        self.progress.load(Ordering::SeqCst)
    }

    /// Estimated run time; always zero for now
    pub fn estimated_time(&self) -> Duration {
        self.estimated_time
    }

    /// Whether every tracker reached a final stage
    pub fn is_finished(&self) -> bool {
        self.trackers.iter().all(|t| t.is_done())
    }

    /// Block until every tracker reaches a final stage
    pub fn wait(&self, timeout: Option<Duration>) -> std::result::Result<(), CommandError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        for tracker in &self.trackers {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            tracker.wait(remaining)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("lines", &self.lines.len())
            .field("queued", &self.is_queued())
            .field("progress", &self.progress())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> GcodeProcessor {
        GcodeProcessor::with_default_transformers()
    }

    #[test]
    fn test_trackers_follow_final_lines() {
        let program = Program::new("job", &["G1 X10", "M0", "G1 X20"], &mut processor());

        assert_eq!(
            program.lines(),
            &[
                "G1 X10",
                "%wait_for_idle",
                "M0",
                "%wait_for_last_command",
                "G1 X20"
            ]
        );
        assert_eq!(program.trackers().len(), program.lines().len());
        for (index, (tracker, line)) in program.trackers().iter().zip(program.lines()).enumerate() {
            assert_eq!(tracker.raw_command(), line);
            assert_eq!(tracker.info().line_index, Some(index));
            assert_eq!(tracker.info().program.as_deref(), Some("job"));
            assert!(program.owns(tracker));
        }
        assert_eq!(program.estimated_time(), Duration::ZERO);
    }

    #[test]
    fn test_progress_ignores_cancelled() {
        let program = Program::from_text("job", "G0 X1\nG0 X2\nG0 X3", &mut processor());
        let trackers = program.trackers();

        trackers[0].submit().unwrap();
        trackers[0].complete(None).unwrap();
        assert_eq!(program.progress(), 1);

        trackers[2].plan().unwrap();
        trackers[2].cancel().unwrap();
        assert_eq!(program.progress(), 1);
        assert!(!program.is_finished());
    }

    #[test]
    fn test_load_macro_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe_z.g");
        std::fs::write(&path, "; probe\nG38.2 Z-10 F50\nG0 Z[posz]\n").unwrap();

        let program = Program::load(&path, ProgramKind::Macro, &mut processor()).unwrap();
        assert_eq!(program.name(), "probe_z");
        assert_eq!(program.kind(), ProgramKind::Macro);
        assert_eq!(
            program.lines(),
            &["G38.2 Z-10 F50", "%wait_for_last_command", "G0 Z[posz]"]
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = Program::load("/nonexistent/x.g", ProgramKind::Macro, &mut processor());
        assert!(err.is_err());
    }

    #[test]
    fn test_wait_times_out_when_unfinished() {
        let program = Program::from_text("job", "G0 X1", &mut processor());
        assert!(matches!(
            program.wait(Some(Duration::from_millis(10))),
            Err(CommandError::Timeout { .. })
        ));
    }
}
