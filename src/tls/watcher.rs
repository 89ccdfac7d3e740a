//! Filesystem watcher that reloads TLS material on change.
//!
//! Directories are watched rather than files: rotation tooling usually writes
//! new files next to the old ones and then swaps a symlink, which a file-level
//! watch never sees. Events are filtered down to the names the material is
//! reached through, then debounced into a single reload.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::tls::error::{TlsError, TlsResult};
use crate::tls::reloader::Reloader;

/// Symlinks followed per file before giving up.
const MAX_SYMLINK_HOPS: usize = 8;

/// Outcome of one debounced reload, for callers that want to observe them.
#[derive(Debug)]
pub enum ReloadReport {
    Reloaded { generation: u64 },
    Failed { error: TlsError },
}

type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Directories to watch and basenames that count as a change.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchTargets {
    pub dirs: HashSet<PathBuf>,
    pub names: HashSet<OsString>,
}

impl WatchTargets {
    /// Resolve the watch targets for `files`.
    ///
    /// Each file contributes its own directory and basename. Symlinks are
    /// followed into a separate set, which is then merged: the directory
    /// holding the final target is watched too, and every name a relative
    /// link goes through (such as `..data`) becomes interesting. A file
    /// that cannot be resolved is logged and contributes only its own
    /// directory and name.
    pub fn resolve(files: &[PathBuf]) -> Self {
        let mut targets = WatchTargets::default();
        let mut resolved = WatchTargets::default();

        for file in files {
            targets.dirs.insert(parent_dir(file));
            if let Some(name) = file.file_name() {
                targets.names.insert(name.to_os_string());
            }

            if let Err(error) = follow_symlinks(file, &mut resolved) {
                tracing::warn!(
                    path = %file.display(),
                    error = %error,
                    "Cannot resolve certificate path, watching its directory only"
                );
            }
        }

        targets.dirs.extend(resolved.dirs);
        targets.names.extend(resolved.names);
        targets
    }

    /// Whether `event` touches the material.
    pub fn is_relevant(&self, event: &Event) -> bool {
        let kind_matters = match event.kind {
            EventKind::Create(_) | EventKind::Remove(_) => true,
            EventKind::Modify(ModifyKind::Metadata(_)) => false,
            EventKind::Modify(_) => true,
            EventKind::Any | EventKind::Access(_) | EventKind::Other => false,
        };

        kind_matters
            && event.paths.iter().any(|path| {
                path.file_name()
                    .is_some_and(|name| self.names.contains(name))
            })
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Record every symlink met on the way from `file` to its target.
///
/// Any path component may be a link, not only the last one: in
/// `tls.crt -> /vol/..data/tls.crt` the swap happens at `/vol/..data`. Each
/// link contributes its directory and name; the final target contributes its
/// directory.
fn follow_symlinks(file: &Path, out: &mut WatchTargets) -> io::Result<()> {
    let mut pending = file.to_path_buf();
    let mut hops = 0;

    'walk: loop {
        let current = pending.clone();
        let components: Vec<Component<'_>> = current.components().collect();
        let mut prefix = PathBuf::new();

        for (index, component) in components.iter().enumerate() {
            prefix.push(component);
            if !matches!(component, Component::Normal(_))
                || !fs::symlink_metadata(&prefix)?.file_type().is_symlink()
            {
                continue;
            }

            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "too many levels of symbolic links",
                ));
            }

            let link_dir = parent_dir(&prefix);
            out.dirs.insert(link_dir.clone());
            if let Some(name) = prefix.file_name() {
                out.names.insert(name.to_os_string());
            }

            let mut next = link_dir.join(fs::read_link(&prefix)?);
            next.extend(&components[index + 1..]);
            pending = next;
            continue 'walk;
        }
        break;
    }

    let canonical = fs::canonicalize(file)?;
    out.dirs.insert(parent_dir(&canonical));
    Ok(())
}

/// Watches the reloader's material and reloads it after changes settle.
pub struct CertWatcher {
    reloader: Arc<Reloader>,
    debounce: Duration,
    reports: Option<mpsc::UnboundedSender<ReloadReport>>,
    events: Option<EventReceiver>,
}

impl CertWatcher {
    pub fn new(reloader: Arc<Reloader>) -> Self {
        let debounce = reloader.settings().reload_debounce();
        Self {
            reloader,
            debounce,
            reports: None,
            events: None,
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Send a [`ReloadReport`] after every reload attempt.
    #[must_use]
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<ReloadReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Take events from `events` instead of the filesystem.
    #[must_use]
    pub fn with_event_source(mut self, events: EventReceiver) -> Self {
        self.events = Some(events);
        self
    }

    /// Start watching on a background task.
    ///
    /// Fails if the filesystem watcher cannot be created or one of the
    /// configured directories cannot be watched. The task ends when
    /// `shutdown` fires or the event source closes; a pending reload is
    /// dropped.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> TlsResult<JoinHandle<()>> {
        let files = self.reloader.settings().material_paths();
        let targets = WatchTargets::resolve(&files);

        let (events, fs_watcher) = match self.events {
            Some(events) => (events, None),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                let mut watcher = RecommendedWatcher::new(
                    move |res: notify::Result<Event>| {
                        let _ = tx.send(res);
                    },
                    Config::default(),
                )
                .map_err(TlsError::WatchSetup)?;

                let configured: HashSet<PathBuf> = files.iter().map(|f| parent_dir(f)).collect();
                for dir in &targets.dirs {
                    match watcher.watch(dir, RecursiveMode::NonRecursive) {
                        Ok(()) => {}
                        Err(e) if configured.contains(dir) => return Err(TlsError::WatchSetup(e)),
                        Err(e) => tracing::warn!(
                            dir = %dir.display(),
                            error = %e,
                            "Cannot watch resolved symlink target"
                        ),
                    }
                }
                (rx, Some(watcher))
            }
        };

        tracing::info!(
            dirs = ?targets.dirs,
            debounce_ms = self.debounce.as_millis() as u64,
            "TLS material watcher started"
        );

        let state = WatchLoop {
            reloader: self.reloader,
            debounce: self.debounce,
            reports: self.reports,
            files,
            targets,
            fs_watcher,
        };
        Ok(tokio::spawn(state.run(events, shutdown)))
    }
}

struct WatchLoop {
    reloader: Arc<Reloader>,
    debounce: Duration,
    reports: Option<mpsc::UnboundedSender<ReloadReport>>,
    files: Vec<PathBuf>,
    targets: WatchTargets,
    fs_watcher: Option<RecommendedWatcher>,
}

impl WatchLoop {
    async fn run(mut self, mut events: EventReceiver, mut shutdown: broadcast::Receiver<()>) {
        let timer = tokio::time::sleep(self.debounce);
        tokio::pin!(timer);
        let mut pending = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("TLS material watcher shutting down");
                    break;
                }
                event = events.recv() => match event {
                    None => {
                        tracing::debug!("TLS material event source closed");
                        break;
                    }
                    Some(Err(e)) => {
                        let error = TlsError::WatchEvent(e);
                        tracing::warn!(kind = ?error.kind(), error = %error, "Watch event error");
                    }
                    Some(Ok(event)) => {
                        if !pending && self.targets.is_relevant(&event) {
                            tracing::debug!(paths = ?event.paths, "TLS material changed, reload scheduled");
                            pending = true;
                            timer.as_mut().reset(Instant::now() + self.debounce);
                        }
                    }
                },
                () = &mut timer, if pending => {
                    pending = false;
                    self.reload().await;
                }
            }
        }
    }

    async fn reload(&mut self) {
        let reloader = Arc::clone(&self.reloader);
        let files = self.files.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = reloader.reload();
            (result, WatchTargets::resolve(&files))
        })
        .await;
        let (result, next) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "TLS reload task failed");
                return;
            }
        };

        let report = match result {
            Ok(generation) => {
                tracing::info!(generation, "TLS material reloaded");
                ReloadReport::Reloaded { generation }
            }
            Err(error) => {
                tracing::error!(
                    kind = ?error.kind(),
                    path = ?error.path(),
                    error = %error,
                    "TLS reload failed, keeping previous material"
                );
                ReloadReport::Failed { error }
            }
        };

        self.retarget(next);

        if let Some(reports) = &self.reports {
            let _ = reports.send(report);
        }
    }

    /// Move the watches to `next`, the freshly resolved targets.
    fn retarget(&mut self, next: WatchTargets) {
        if let Some(watcher) = self.fs_watcher.as_mut() {
            for dir in next.dirs.difference(&self.targets.dirs) {
                if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                    tracing::warn!(dir = %dir.display(), error = %e, "Cannot watch directory");
                }
            }
            for dir in self.targets.dirs.difference(&next.dirs) {
                if let Err(e) = watcher.unwatch(dir) {
                    tracing::debug!(dir = %dir.display(), error = %e, "Cannot unwatch directory");
                }
            }
        }

        self.targets = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    fn targets(names: &[&str]) -> WatchTargets {
        WatchTargets {
            dirs: HashSet::new(),
            names: names.iter().map(OsString::from).collect(),
        }
    }

    #[test]
    fn relevant_event_kinds() {
        let t = targets(&["tls.crt"]);
        assert!(t.is_relevant(&event(EventKind::Create(CreateKind::File), "/tls/tls.crt")));
        assert!(t.is_relevant(&event(EventKind::Remove(RemoveKind::File), "/tls/tls.crt")));
        assert!(t.is_relevant(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/tls/tls.crt"
        )));
        assert!(!t.is_relevant(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            "/tls/tls.crt"
        )));
        assert!(!t.is_relevant(&event(EventKind::Access(AccessKind::Read), "/tls/tls.crt")));
    }

    #[test]
    fn unrelated_names_are_ignored() {
        let t = targets(&["tls.crt", "..data"]);
        assert!(!t.is_relevant(&event(EventKind::Create(CreateKind::File), "/tls/notes.txt")));
        assert!(t.is_relevant(&event(EventKind::Create(CreateKind::Any), "/tls/..data")));
    }

    #[test]
    fn plain_files_watch_their_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("tls.crt");
        fs::write(&cert, "x").unwrap();

        let t = WatchTargets::resolve(&[cert]);
        assert!(t.dirs.contains(dir.path()));
        assert_eq!(t.names, HashSet::from([OsString::from("tls.crt")]));
    }

    #[cfg(unix)]
    #[test]
    fn data_symlink_is_followed() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let version = dir.path().join("..2024_01_01");
        fs::create_dir(&version).unwrap();
        fs::write(version.join("tls.crt"), "x").unwrap();
        symlink("..2024_01_01", dir.path().join("..data")).unwrap();
        symlink("..data/tls.crt", dir.path().join("tls.crt")).unwrap();

        let t = WatchTargets::resolve(&[dir.path().join("tls.crt")]);

        assert!(t.dirs.contains(dir.path()));
        assert!(t.dirs.contains(&fs::canonicalize(&version).unwrap()));
        assert!(t.names.contains(&OsString::from("..data")));
        assert!(t.names.contains(&OsString::from("tls.crt")));
    }

    #[cfg(unix)]
    #[test]
    fn absolute_link_into_another_directory_tracks_its_data_link() {
        use std::os::unix::fs::symlink;

        let config = tempfile::tempdir().unwrap();
        let volume = tempfile::tempdir().unwrap();
        fs::create_dir(volume.path().join("..v1")).unwrap();
        fs::write(volume.path().join("..v1").join("tls.crt"), "x").unwrap();
        symlink("..v1", volume.path().join("..data")).unwrap();
        symlink(
            volume.path().join("..data").join("tls.crt"),
            config.path().join("tls.crt"),
        )
        .unwrap();

        let t = WatchTargets::resolve(&[config.path().join("tls.crt")]);

        assert!(t.dirs.contains(config.path()));
        assert!(t.dirs.contains(volume.path()));
        assert!(t
            .dirs
            .contains(&fs::canonicalize(volume.path().join("..v1")).unwrap()));
        assert!(t.names.contains(&OsString::from("..data")));
        assert!(t.names.contains(&OsString::from("tls.crt")));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loops_are_cut_off() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        symlink("b.crt", dir.path().join("a.crt")).unwrap();
        symlink("a.crt", dir.path().join("b.crt")).unwrap();

        let mut out = WatchTargets::default();
        assert!(follow_symlinks(&dir.path().join("a.crt"), &mut out).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reload_moves_targets_to_the_new_version() {
        use crate::config::TlsSettings;
        use crate::testdata::{self, Fixture};
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        for (version, fixture) in [("..v1", Fixture::ServerA), ("..v2", Fixture::ServerB)] {
            fs::create_dir(dir.path().join(version)).unwrap();
            testdata::write_material(&dir.path().join(version), fixture);
        }
        symlink("..v1", dir.path().join("..data")).unwrap();
        for name in ["tls.crt", "tls.key"] {
            symlink(format!("..data/{name}"), dir.path().join(name)).unwrap();
        }

        let settings = TlsSettings {
            cert_path: Some(dir.path().join("tls.crt")),
            key_path: Some(dir.path().join("tls.key")),
            watch: false,
            ..TlsSettings::default()
        };
        let reloader = Arc::new(Reloader::new(settings).unwrap());
        let files = reloader.settings().material_paths();
        let (reports, mut outcomes) = mpsc::unbounded_channel();
        let mut state = WatchLoop {
            reloader,
            debounce: Duration::from_millis(10),
            reports: Some(reports),
            targets: WatchTargets::resolve(&files),
            files,
            fs_watcher: None,
        };
        let v1 = fs::canonicalize(dir.path().join("..v1")).unwrap();
        let v2 = fs::canonicalize(dir.path().join("..v2")).unwrap();
        assert!(state.targets.dirs.contains(&v1));

        symlink("..v2", dir.path().join("..data_tmp")).unwrap();
        fs::rename(dir.path().join("..data_tmp"), dir.path().join("..data")).unwrap();
        state.reload().await;

        assert!(matches!(
            outcomes.recv().await,
            Some(ReloadReport::Reloaded { generation: 2 })
        ));
        assert!(state.targets.dirs.contains(&v2));
        assert!(!state.targets.dirs.contains(&v1));
    }

    #[test]
    fn missing_file_still_watches_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let t = WatchTargets::resolve(&[dir.path().join("missing.crt")]);
        assert_eq!(t.dirs, HashSet::from([dir.path().to_path_buf()]));
    }

    #[test]
    fn relative_paths_use_current_directory() {
        assert_eq!(parent_dir(Path::new("tls.crt")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("certs/tls.crt")), PathBuf::from("certs"));
    }
}
