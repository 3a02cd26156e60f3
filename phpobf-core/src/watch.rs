//! Watch mode
//!
//! Runs the incremental build once, then again whenever the source tree
//! changes. Events are debounced so a burst of saves triggers one build.

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::build::Orchestrator;
use crate::error::{Error, Result};

/// Quiet period after the last change before a build starts
pub const DEBOUNCE: Duration = Duration::from_millis(500);

const POLL: Duration = Duration::from_millis(250);

/// Whether an event can change build output
pub fn is_relevant(event: &Event) -> bool {
    match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Build, then rebuild on every settled change until the orchestrator's
/// cancel token is set.
///
/// Configuration errors end the watch; per-file errors are logged and the
/// watch carries on, the failed file being picked up again next time.
pub fn watch(orchestrator: &mut Orchestrator) -> Result<()> {
    let cancel = orchestrator.cancel_token();
    if !rebuild(orchestrator)? {
        return Ok(());
    }

    let source_dir = orchestrator.layout().source_dir.clone();
    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!("Watch error: {}", e),
        },
        Config::default(),
    )
    .map_err(|e| Error::Configuration(format!("Failed to create watcher: {}", e)))?;
    watcher
        .watch(&source_dir, RecursiveMode::Recursive)
        .map_err(|e| {
            Error::Configuration(format!("Failed to watch {}: {}", source_dir.display(), e))
        })?;

    tracing::info!("Watching {}", source_dir.display());

    let mut pending: Option<Instant> = None;
    loop {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("Watch stopped");
            return Ok(());
        }

        match rx.recv_timeout(POLL) {
            Ok(event) => {
                if is_relevant(&event) {
                    tracing::debug!("Change: {:?} {:?}", event.kind, event.paths);
                    pending = Some(Instant::now());
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(Error::Configuration("File watcher disconnected".to_string()));
            }
        }

        if pending.is_some_and(|at| at.elapsed() >= DEBOUNCE) {
            pending = None;
            if !rebuild(orchestrator)? {
                return Ok(());
            }
        }
    }
}

/// Run one build; `Ok(false)` when the build was interrupted
fn rebuild(orchestrator: &mut Orchestrator) -> Result<bool> {
    match orchestrator.run() {
        Ok(report) => {
            if report.writes() > 0 {
                tracing::info!("Rebuilt {} file(s)", report.writes());
            }
            Ok(true)
        }
        Err(Error::Interrupted) => Ok(false),
        Err(e @ Error::Configuration(_)) => Err(e),
        Err(e) => {
            tracing::error!("{}", e);
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildLayout;
    use crate::encoder::{Encoder, RunKeys};
    use crate::minifier::Minifier;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::path::PathBuf;

    #[test]
    fn test_relevant_events() {
        let path = PathBuf::from("src/a.php");
        let event = |kind| Event::new(kind).add_path(path.clone());

        assert!(is_relevant(&event(EventKind::Create(CreateKind::File))));
        assert!(is_relevant(&event(EventKind::Remove(RemoveKind::File))));
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        )))));
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Any))));
        assert!(!is_relevant(&event(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::WriteTime
        )))));
        assert!(!is_relevant(&event(EventKind::Access(AccessKind::Any))));
    }

    #[test]
    fn test_cancelled_watch_returns() {
        let temp = tempfile::TempDir::new().unwrap();
        let layout = BuildLayout {
            source_dir: temp.path().join("src"),
            target_dir: temp.path().join("build"),
            temp_dir: temp.path().join("tmp"),
        };
        std::fs::create_dir_all(&layout.source_dir).unwrap();
        std::fs::write(layout.source_dir.join("a.txt"), "x").unwrap();

        let mut orchestrator = Orchestrator::new(
            layout,
            Encoder::new(RunKeys::generate(), 1),
            Minifier::php("php"),
        )
        .unwrap();
        orchestrator.cancel_token().store(true, Ordering::SeqCst);
        assert!(watch(&mut orchestrator).is_ok());
        assert!(!temp.path().join("build/a.txt").exists());
    }
}
