//! Incremental build
//!
//! Walks the source tree and brings the target tree up to date: scripts are
//! minified and encoded, other files are copied, directive files only
//! contribute headers. A target at least as new as its source is left alone,
//! so re-running over an unchanged tree writes nothing.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Local};
use walkdir::WalkDir;

use crate::config::{Config, KEY_SOURCE_DIR, KEY_TARGET_DIR, KEY_TEMP_DIR};
use crate::encoder::{Encoder, RunKeys};
use crate::error::{Error, Result};
use crate::header::{is_directive, HeaderResolver};
use crate::minifier::Minifier;
use crate::path_utils::pathbuf_with_suffix;
use crate::script::{is_script, ScriptSource};
use crate::staging::{copy_atomic, is_fresh, write_atomic};

/// Suffix of the minified snapshots kept in the temp tree
pub const SNAPSHOT_SUFFIX: &str = ".tmp";

/// Source, target and temp roots of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl BuildLayout {
    pub fn from_config(config: &Config, base: &Path) -> Self {
        Self {
            source_dir: config.dir(base, KEY_SOURCE_DIR),
            target_dir: config.dir(base, KEY_TARGET_DIR),
            temp_dir: config.dir(base, KEY_TEMP_DIR),
        }
    }

    /// Check the source root and create the target and temp roots
    pub fn prepare(&self) -> Result<()> {
        if !self.source_dir.is_dir() {
            return Err(Error::Configuration(format!(
                "Source dir not found: {}",
                self.source_dir.display()
            )));
        }

        for dir in [&self.target_dir, &self.temp_dir] {
            ensure_dir(dir)?;
        }

        reject_overlap(&self.source_dir, "Target", &self.target_dir)?;
        reject_overlap(&self.source_dir, "Temp", &self.temp_dir)
    }
}

/// Fail when `dir` lies inside `source` or the other way round; both must
/// exist
pub(crate) fn reject_overlap(source: &Path, name: &str, dir: &Path) -> Result<()> {
    let source = canonical(source)?;
    let dir = canonical(dir)?;
    if dir.starts_with(&source) || source.starts_with(&dir) {
        return Err(Error::Configuration(format!(
            "{} dir {} overlaps source dir {}",
            name,
            dir.display(),
            source.display()
        )));
    }
    Ok(())
}

fn canonical(dir: &Path) -> Result<PathBuf> {
    dir.canonicalize()
        .map_err(|e| Error::Configuration(format!("Cannot resolve {}: {}", dir.display(), e)))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::Configuration(format!("Failed to create directory {}: {}", dir.display(), e))
    })
}

/// What happened to a file that was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Encoded,
    Copied,
}

/// A file written during a build
#[derive(Debug, Clone)]
pub struct Transfer {
    pub source: PathBuf,
    /// Modification time of the source when it was processed
    pub modified: SystemTime,
    pub kind: TransferKind,
}

impl Transfer {
    /// `<source path> - <YYYY-MM-DD HH:MM:SS>`
    pub fn console_line(&self) -> String {
        let modified: DateTime<Local> = self.modified.into();
        format!(
            "{} - {}",
            self.source.display(),
            modified.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Outcome of one build
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub encoded: usize,
    pub copied: usize,
    /// Files whose target was already fresh
    pub skipped: usize,
    pub directives: usize,
    pub transfers: Vec<Transfer>,
}

impl BuildReport {
    /// Number of target files written
    pub fn writes(&self) -> usize {
        self.encoded + self.copied
    }

    fn record(&mut self, transfer: Transfer) {
        match transfer.kind {
            TransferKind::Encoded => self.encoded += 1,
            TransferKind::Copied => self.copied += 1,
        }
        self.transfers.push(transfer);
    }
}

/// Drives one or more builds of the same layout with one set of run keys
pub struct Orchestrator {
    layout: BuildLayout,
    encoder: Encoder,
    minifier: Minifier,
    headers: HeaderResolver,
    console: bool,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Prepare the layout; fails when the source root is missing or the
    /// target/temp roots cannot be created
    pub fn new(layout: BuildLayout, encoder: Encoder, minifier: Minifier) -> Result<Self> {
        layout.prepare()?;

        Ok(Self {
            layout,
            encoder,
            minifier,
            headers: HeaderResolver::default(),
            console: false,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Layout, round count, chunk width and PHP binary from configuration,
    /// with freshly generated run keys
    pub fn from_config(config: &Config, base: &Path) -> Result<Self> {
        let encoder = Encoder::new(RunKeys::generate(), config.rounds())
            .with_chunk_width(config.chunk_width());
        Self::new(
            BuildLayout::from_config(config, base),
            encoder,
            Minifier::php(config.php_binary()),
        )
    }

    /// Print a line per written file
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Setting the token stops the build before the next file
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Bring the target tree up to date
    pub fn run(&mut self) -> Result<BuildReport> {
        let started = Instant::now();
        let source_dir = self.layout.source_dir.clone();

        self.headers = HeaderResolver::discover(&source_dir)?;
        let mut report = BuildReport::default();

        for entry in WalkDir::new(&source_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::walk(&source_dir, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!("Build interrupted after {} writes", report.writes());
                return Err(Error::Interrupted);
            }

            let relative = entry.path().strip_prefix(&source_dir).unwrap_or(entry.path());
            self.process_file(relative, &mut report)?;
        }

        tracing::info!(
            "Build finished in {:?}: {} encoded, {} copied, {} fresh",
            started.elapsed(),
            report.encoded,
            report.copied,
            report.skipped
        );
        Ok(report)
    }

    fn process_file(&mut self, relative: &Path, report: &mut BuildReport) -> Result<()> {
        if is_directive(relative) {
            report.directives += 1;
            return Ok(());
        }

        let parent = relative.parent().unwrap_or(Path::new(""));
        ensure_dir(&self.layout.target_dir.join(parent))?;
        ensure_dir(&self.layout.temp_dir.join(parent))?;

        let source = self.layout.source_dir.join(relative);
        let target = self.layout.target_dir.join(relative);

        let metadata = fs::metadata(&source).map_err(|e| Error::access(&source, e))?;
        let modified = metadata.modified().map_err(|e| Error::access(&source, e))?;

        if is_fresh(modified, &target) {
            tracing::debug!("Fresh: {}", relative.display());
            report.skipped += 1;
            return Ok(());
        }

        let kind = if is_script(relative) {
            self.encode_script(relative, &target, &metadata)?;
            TransferKind::Encoded
        } else {
            copy_atomic(&source, &target)?;
            TransferKind::Copied
        };
        tracing::debug!("{:?}: {}", kind, relative.display());

        let transfer = Transfer {
            source,
            modified,
            kind,
        };
        if self.console {
            println!("{}", transfer.console_line());
        }
        report.record(transfer);
        Ok(())
    }

    fn encode_script(&mut self, relative: &Path, target: &Path, metadata: &Metadata) -> Result<()> {
        let script = ScriptSource::load(&self.layout.source_dir, relative)?;
        let source = self.layout.source_dir.join(relative);

        let header = match self.headers.resolve(script.dir()) {
            Some(template) => {
                Some(fs::read_to_string(&template).map_err(|e| Error::access(&template, e))?)
            }
            None => None,
        };

        let minified = self
            .minifier
            .minify_script(&script.text)
            .map_err(|e| Error::encoding(&source, e))?;

        let snapshot = pathbuf_with_suffix(&self.layout.temp_dir.join(relative), SNAPSHOT_SUFFIX);
        fs::write(&snapshot, &minified).map_err(|e| Error::access(&snapshot, e))?;

        let encoded = self
            .encoder
            .encode(&minified, header.as_deref())
            .map_err(|e| Error::encoding(&source, e))?;

        write_atomic(target, encoded.as_bytes(), Some(metadata.permissions()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DIRECTIVE_FILE;
    use crate::minifier::Stripper;
    use filetime::{set_file_mtime, FileTime};
    use std::io;

    /// Returns the file untouched
    struct IdentityStripper;

    impl Stripper for IdentityStripper {
        fn strip(&self, path: &Path) -> io::Result<String> {
            fs::read_to_string(path)
        }
    }

    struct FailingStripper;

    impl Stripper for FailingStripper {
        fn strip(&self, _path: &Path) -> io::Result<String> {
            Err(io::Error::other("PHP Parse error: syntax error"))
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        layout: BuildLayout,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::TempDir::new().unwrap();
            let layout = BuildLayout {
                source_dir: temp.path().join("src"),
                target_dir: temp.path().join("build"),
                temp_dir: temp.path().join("tmp"),
            };
            fs::create_dir_all(&layout.source_dir).unwrap();
            Self {
                _temp: temp,
                layout,
            }
        }

        fn write(&self, relative: &str, contents: &str) -> PathBuf {
            let path = self.layout.source_dir.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            path
        }

        fn target(&self, relative: &str) -> PathBuf {
            self.layout.target_dir.join(relative)
        }

        fn orchestrator(&self, rounds: u32) -> Orchestrator {
            Orchestrator::new(
                self.layout.clone(),
                Encoder::new(RunKeys::generate(), rounds),
                Minifier::new(IdentityStripper),
            )
            .unwrap()
        }
    }

    fn age(path: &Path, seconds_ago: i64) {
        let now = FileTime::now().unix_seconds();
        set_file_mtime(path, FileTime::from_unix_time(now - seconds_ago, 0)).unwrap();
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let temp = tempfile::TempDir::new().unwrap();
        let layout = BuildLayout {
            source_dir: temp.path().join("nope"),
            target_dir: temp.path().join("build"),
            temp_dir: temp.path().join("tmp"),
        };
        let err = layout.prepare().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(!layout.target_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_uncreatable_target_is_fatal() {
        let fixture = Fixture::new();
        let blocker = fixture.layout.target_dir.parent().unwrap().join("file");
        fs::write(&blocker, "not a directory").unwrap();
        let layout = BuildLayout {
            target_dir: blocker.join("build"),
            ..fixture.layout.clone()
        };
        assert!(matches!(layout.prepare(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_overlapping_target_rejected() {
        let fixture = Fixture::new();
        let layout = BuildLayout {
            target_dir: fixture.layout.source_dir.join("build"),
            ..fixture.layout.clone()
        };
        assert!(matches!(layout.prepare(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_layout_from_config() {
        let config = Config::from_yaml("sourceDir: /src/\ntargetDir: /build/\ntempDir: /tmp/").unwrap();
        let layout = BuildLayout::from_config(&config, Path::new("/srv/app"));
        assert_eq!(layout.source_dir, Path::new("/srv/app/src"));
        assert_eq!(layout.target_dir, Path::new("/srv/app/build"));
        assert_eq!(layout.temp_dir, Path::new("/srv/app/tmp"));
    }

    #[test]
    fn test_build_encodes_and_copies() {
        let fixture = Fixture::new();
        fixture.write("index.php", "<?php echo 'hi';");
        fixture.write("lib/util.php", "<?php function util(){return 1;}");
        fixture.write("assets/app.css", "body { margin: 0 }");

        let mut orchestrator = fixture.orchestrator(1);
        let report = orchestrator.run().unwrap();
        assert_eq!(report.encoded, 2);
        assert_eq!(report.copied, 1);
        assert_eq!(report.skipped, 0);

        let index = fs::read_to_string(fixture.target("index.php")).unwrap();
        assert!(index.starts_with("<?php\n"));
        assert!(!index.contains("echo 'hi'"));
        assert_eq!(
            fs::read_to_string(fixture.target("assets/app.css")).unwrap(),
            "body { margin: 0 }"
        );

        // Minified snapshots land in the temp tree
        let snapshot = fixture.layout.temp_dir.join("lib/util.php.tmp");
        assert_eq!(
            fs::read_to_string(snapshot).unwrap(),
            "<?php function util(){return 1;}"
        );
        assert!(fixture.layout.temp_dir.join("assets").is_dir());
    }

    #[test]
    fn test_second_run_writes_nothing() {
        let fixture = Fixture::new();
        let a = fixture.write("a.php", "<?php echo 1;");
        let b = fixture.write("b.txt", "plain");
        age(&a, 60);
        age(&b, 60);

        let mut orchestrator = fixture.orchestrator(2);
        assert_eq!(orchestrator.run().unwrap().writes(), 2);

        let before = fs::read_to_string(fixture.target("a.php")).unwrap();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.writes(), 0);
        assert_eq!(report.skipped, 2);
        assert!(report.transfers.is_empty());
        assert_eq!(fs::read_to_string(fixture.target("a.php")).unwrap(), before);
    }

    #[test]
    fn test_equal_mtime_is_fresh() {
        let fixture = Fixture::new();
        let source = fixture.write("a.php", "<?php echo 1;");
        let target = fixture.target("a.php");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "untouched").unwrap();

        let stamp = FileTime::from_unix_time(1_650_000_000, 0);
        set_file_mtime(&source, stamp).unwrap();
        set_file_mtime(&target, stamp).unwrap();

        let report = fixture.orchestrator(1).run().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(fs::read_to_string(&target).unwrap(), "untouched");
    }

    #[test]
    fn test_newer_source_is_rebuilt() {
        let fixture = Fixture::new();
        let source = fixture.write("a.php", "<?php echo 1;");
        let target = fixture.target("a.php");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "stale").unwrap();
        age(&target, 120);
        age(&source, 60);

        let report = fixture.orchestrator(1).run().unwrap();
        assert_eq!(report.encoded, 1);
        assert_ne!(fs::read_to_string(&target).unwrap(), "stale");
    }

    #[test]
    fn test_headers_follow_deepest_directive() {
        let fixture = Fixture::new();
        fixture.write(&format!("a/{}", DIRECTIVE_FILE), "/* header A */\n");
        fixture.write(&format!("a/c/d/{}", DIRECTIVE_FILE), "/* header D {year} */\n");
        fixture.write("a/b/x.php", "<?php echo 1;");
        fixture.write("a/c/x.php", "<?php echo 2;");
        fixture.write("a/c/d/x.php", "<?php echo 3;");
        fixture.write("top.php", "<?php echo 4;");

        let report = fixture.orchestrator(1).run().unwrap();
        assert_eq!(report.directives, 2);
        assert_eq!(report.encoded, 4);
        assert!(!fixture.target(&format!("a/{}", DIRECTIVE_FILE)).exists());

        let banner = |rel: &str| {
            let text = fs::read_to_string(fixture.target(rel)).unwrap();
            text.lines().nth(1).unwrap().to_string()
        };
        assert_eq!(banner("a/b/x.php"), "/* header A */");
        assert_eq!(banner("a/c/x.php"), "/* header A */");
        assert!(banner("a/c/d/x.php").starts_with("/* header D 2"));
        assert!(banner("top.php").starts_with('$'));
    }

    #[test]
    fn test_console_script_keeps_directive() {
        let fixture = Fixture::new();
        fixture.write("bin/tool.php", "#!/usr/bin/env php\n<?php echo 1;");

        fixture.orchestrator(1).run().unwrap();
        let output = fs::read_to_string(fixture.target("bin/tool.php")).unwrap();
        assert!(output.starts_with("#!/usr/bin/env php\n<?php\n"));
    }

    #[test]
    fn test_failed_file_stays_eligible() {
        let fixture = Fixture::new();
        fixture.write("broken.php", "<?php echo (;");

        let mut failing = Orchestrator::new(
            fixture.layout.clone(),
            Encoder::new(RunKeys::generate(), 1),
            Minifier::new(FailingStripper),
        )
        .unwrap();
        let err = failing.run().unwrap_err();
        match err {
            Error::Encoding { path, message } => {
                assert!(path.ends_with("broken.php"));
                assert!(message.contains("syntax error"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fixture.target("broken.php").exists());

        let report = fixture.orchestrator(1).run().unwrap();
        assert_eq!(report.encoded, 1);
    }

    #[test]
    fn test_cancelled_build_stops_between_files() {
        let fixture = Fixture::new();
        fixture.write("a.php", "<?php echo 1;");

        let mut orchestrator = fixture.orchestrator(1);
        orchestrator.cancel_token().store(true, Ordering::SeqCst);
        assert!(matches!(orchestrator.run(), Err(Error::Interrupted)));
        assert!(!fixture.target("a.php").exists());
    }

    #[test]
    fn test_zero_rounds_mode() {
        let fixture = Fixture::new();
        fixture.write("a.php", "<?php\necho 'plain';");

        let mut orchestrator = fixture.orchestrator(0);
        assert_eq!(orchestrator.encoder().rounds(), 0);
        orchestrator.run().unwrap();
        let output = fs::read_to_string(fixture.target("a.php")).unwrap();
        assert!(output.ends_with("echo 'plain';"));
    }

    #[test]
    fn test_console_line_format() {
        let transfer = Transfer {
            source: PathBuf::from("/srv/src/index.php"),
            modified: SystemTime::now(),
            kind: TransferKind::Encoded,
        };
        let line = transfer.console_line();
        let (path, stamp) = line.split_once(" - ").unwrap();
        assert_eq!(path, "/srv/src/index.php");
        assert_eq!(stamp.len(), "2024-01-01 00:00:00".len());
    }
}
