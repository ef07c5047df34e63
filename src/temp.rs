use crate::constants;
use crate::logger::Logger;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};

/// Allocates the temp files of one upload and keeps track of them.
///
/// Tracked files are deleted by [`release`](TempFiles::release), or on drop
/// if the upload never completed. [`into_paths`](TempFiles::into_paths)
/// hands them over to the caller instead.
#[derive(Debug)]
pub(crate) struct TempFiles {
    dir: PathBuf,
    prefix: String,
    counter: u64,
    dir_ready: bool,
    paths: Vec<PathBuf>,
    logger: Logger,
}

impl TempFiles {
    /// `timestamp` is the request time in milliseconds.
    pub(crate) fn new(dir: PathBuf, timestamp: u64, logger: Logger) -> Self {
        TempFiles {
            dir,
            prefix: format!("{}{}", base32(u64::from(std::process::id())), base32(timestamp)),
            counter: 0,
            dir_ready: false,
            paths: Vec::new(),
            logger,
        }
    }

    /// Creates a new file with the extension `ext` (including its dot).
    ///
    /// Names that already exist are skipped.
    pub(crate) async fn allocate(&mut self, ext: &str) -> crate::Result<(PathBuf, File)> {
        if !self.dir_ready {
            fs::create_dir_all(&self.dir)
                .await
                .map_err(|source| crate::Error::TempFile {
                    path: self.dir.clone(),
                    source,
                })?;
            self.dir_ready = true;
        }

        for _ in 0..constants::MAX_TEMP_FILE_ATTEMPTS {
            let candidate = self.dir.join(format!("{}-{}{}", self.prefix, self.counter, ext));
            self.counter += 1;

            match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
                Ok(file) => {
                    self.paths.push(candidate.clone());
                    return Ok((candidate, file));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(crate::Error::TempFile {
                        path: candidate,
                        source,
                    })
                }
            }
        }

        Err(crate::Error::TempFile {
            path: self.dir.clone(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free temp file name"),
        })
    }

    pub(crate) fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Deletes every tracked file. Missing files are ignored and the list is
    /// emptied, so calling it again is a no-op.
    pub(crate) async fn release(&mut self) {
        release_files(&mut self.paths, &self.logger).await;
    }

    /// Stops tracking the files and returns their paths.
    pub(crate) fn into_paths(mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths)
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        remove_files(&mut self.paths, &self.logger);
    }
}

/// Deletes `paths`, ignoring files that are already gone.
pub(crate) async fn release_files(paths: &mut Vec<PathBuf>, logger: &Logger) {
    for path in paths.drain(..) {
        if let Err(err) = fs::remove_file(&path).await {
            warn_unremoved(&path, err, logger);
        }
    }
}

/// Synchronously deletes `paths`, ignoring files that are already gone.
fn remove_files(paths: &mut Vec<PathBuf>, logger: &Logger) {
    for path in paths.drain(..) {
        remove_file(&path, logger);
    }
}

fn remove_file(path: &Path, logger: &Logger) {
    if let Err(err) = std::fs::remove_file(path) {
        warn_unremoved(path, err, logger);
    }
}

fn warn_unremoved(path: &Path, err: io::Error, logger: &Logger) {
    if err.kind() != io::ErrorKind::NotFound {
        logger.warn(format_args!("failed to remove temp file {}: {}", path.display(), err));
    }
}

/// Lowercase base-32 digits (`0-9a-v`), most significant first.
fn base32(mut n: u64) -> String {
    const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

    if n == 0 {
        return "0".to_owned();
    }

    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 32) as usize]);
        n /= 32;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}
