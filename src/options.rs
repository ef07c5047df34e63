use crate::body::Progress;
use crate::limits::{LimitOverrides, Limits};
use crate::logger::Logger;
use crate::sink::OnFile;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Server wide upload settings. [`UploadOptions`] of a single upload take
/// precedence.
#[derive(Debug, Clone)]
pub struct ServerDefaults {
    pub(crate) limits: Limits,
    pub(crate) temp_dir: PathBuf,
    pub(crate) timeout: Option<Duration>,
    pub(crate) logger: Logger,
}

impl ServerDefaults {
    /// Default limits, the system temp dir and no timeout.
    pub fn new() -> ServerDefaults {
        ServerDefaults::default()
    }

    /// Builds the defaults from a deserialized [`UploadConfig`], resolving its
    /// limits over [`Limits::default`].
    pub fn from_config(config: &UploadConfig) -> crate::Result<ServerDefaults> {
        let mut defaults = ServerDefaults::new().limits(Limits::resolve(&Limits::default(), &config.limits)?);

        if let Some(ref dir) = config.temp_dir {
            defaults = defaults.temp_dir(dir.clone());
        }
        if let Some(ms) = config.timeout {
            defaults = defaults.timeout(Duration::from_millis(ms));
        }

        Ok(defaults)
    }

    pub fn limits(mut self, limits: Limits) -> ServerDefaults {
        self.limits = limits;
        self
    }

    /// The directory temp files are created in. Created on first use.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> ServerDefaults {
        self.temp_dir = dir.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> ServerDefaults {
        self.timeout = Some(timeout);
        self
    }

    pub fn logger(mut self, logger: Logger) -> ServerDefaults {
        self.logger = logger;
        self
    }
}

impl Default for ServerDefaults {
    fn default() -> Self {
        ServerDefaults {
            limits: Limits::default(),
            temp_dir: std::env::temp_dir(),
            timeout: None,
            logger: Logger::new(),
        }
    }
}

/// The serde form of [`ServerDefaults`], e.g. a section of a config file.
///
/// ```
/// let config: intake::UploadConfig =
///     serde_json::from_str(r#"{"tempDir": "/var/tmp/uploads", "timeout": 30000, "limits": {"fileSize": "20MB"}}"#).unwrap();
/// let defaults = intake::ServerDefaults::from_config(&config).unwrap();
/// # let _ = defaults;
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadConfig {
    pub limits: LimitOverrides,
    pub temp_dir: Option<PathBuf>,
    /// Milliseconds.
    pub timeout: Option<u64>,
}

/// What to do with bodies that are not forms and are not parsed as JSON or
/// XML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RawPolicy {
    /// Store the whole body as one file, `untitled.tmp` in field `file`.
    #[default]
    Capture,
    /// Fail with [`Error::ContentTypeRejected`](crate::Error::ContentTypeRejected).
    Reject,
}

/// Options of a single upload.
#[derive(Clone, Default)]
pub struct UploadOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) temp_dir: Option<PathBuf>,
    pub(crate) limits: LimitOverrides,
    pub(crate) on_file: Option<Arc<dyn OnFile>>,
    pub(crate) content_type: Option<Vec<String>>,
    pub(crate) parse: bool,
    pub(crate) progress: Option<Progress>,
    pub(crate) raw: RawPolicy,
    pub(crate) extensions: Option<Vec<String>>,
    pub(crate) keep_extension: bool,
    pub(crate) file_fields: Option<Vec<String>>,
    pub(crate) logger: Option<Logger>,
}

impl UploadOptions {
    pub fn new() -> UploadOptions {
        UploadOptions::default()
    }

    /// Aborts the upload when it takes longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> UploadOptions {
        self.timeout = Some(timeout);
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> UploadOptions {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn limits(mut self, limits: LimitOverrides) -> UploadOptions {
        self.limits = limits;
        self
    }

    /// Sets the hook deciding where files go.
    pub fn on_file<H: OnFile + 'static>(mut self, hook: H) -> UploadOptions {
        self.on_file = Some(Arc::new(hook));
        self
    }

    /// Accepted media types. Entries without a `/` are file extensions,
    /// looked up in the MIME table: `"png"` accepts `image/png`.
    pub fn content_type<I, S>(mut self, types: I) -> UploadOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_type = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Parses JSON and XML bodies instead of capturing them raw.
    pub fn parse(mut self, parse: bool) -> UploadOptions {
        self.parse = parse;
        self
    }

    /// Called with `(chunk_len, received, content_length)` for every chunk
    /// received from the client.
    pub fn progress<F>(mut self, f: F) -> UploadOptions
    where
        F: Fn(u64, u64, Option<u64>) + Send + Sync + 'static,
    {
        self.progress = Some(Progress::new(f));
        self
    }

    pub fn raw(mut self, policy: RawPolicy) -> UploadOptions {
        self.raw = policy;
        self
    }

    /// Accepted file extensions, with or without the dot, compared
    /// case-insensitively.
    pub fn extensions<I, S>(mut self, extensions: I) -> UploadOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(
            extensions
                .into_iter()
                .map(|ext| {
                    let ext = ext.into().to_ascii_lowercase();
                    match ext.starts_with('.') {
                        true => ext,
                        false => format!(".{}", ext),
                    }
                })
                .collect(),
        );
        self
    }

    /// Gives temp files the extension of the uploaded file name instead of
    /// `.tmp`.
    pub fn keep_extension(mut self, keep: bool) -> UploadOptions {
        self.keep_extension = keep;
        self
    }

    /// The only field names allowed to carry files.
    pub fn file_fields<I, S>(mut self, fields: I) -> UploadOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Overrides the logger of [`ServerDefaults`].
    pub fn logger(mut self, logger: Logger) -> UploadOptions {
        self.logger = Some(logger);
        self
    }

    pub(crate) fn accepts_file_field(&self, field_name: &str) -> bool {
        self.file_fields
            .as_ref()
            .map_or(true, |fields| fields.iter().any(|f| f == field_name))
    }

    pub(crate) fn accepts_extension(&self, ext: Option<&str>) -> bool {
        match (&self.extensions, ext) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(allowed), Some(ext)) => allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)),
        }
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("timeout", &self.timeout)
            .field("temp_dir", &self.temp_dir)
            .field("limits", &self.limits)
            .field("on_file", &self.on_file.as_ref().map(|_| ".."))
            .field("content_type", &self.content_type)
            .field("parse", &self.parse)
            .field("progress", &self.progress)
            .field("raw", &self.raw)
            .field("extensions", &self.extensions)
            .field("keep_extension", &self.keep_extension)
            .field("file_fields", &self.file_fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config: UploadConfig =
            serde_json::from_str(r#"{"tempDir": "/var/tmp/up", "timeout": 1500, "limits": {"files": 2}}"#).unwrap();
        let defaults = ServerDefaults::from_config(&config).unwrap();

        assert_eq!(defaults.temp_dir, PathBuf::from("/var/tmp/up"));
        assert_eq!(defaults.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(defaults.limits.max_files, Some(2));
        assert_eq!(defaults.limits.field_name_size, Limits::default().field_name_size);

        let config: UploadConfig = serde_json::from_str(r#"{"limits": {"size": "ten"}}"#).unwrap();
        assert!(ServerDefaults::from_config(&config).is_err());
    }

    #[test]
    fn test_allow_lists() {
        let options = UploadOptions::new().extensions(["PNG", ".jpg"]).file_fields(["avatar"]);

        assert!(options.accepts_extension(Some(".png")));
        assert!(options.accepts_extension(Some(".JPG")));
        assert!(!options.accepts_extension(Some(".gif")));
        assert!(!options.accepts_extension(None));

        assert!(options.accepts_file_field("avatar"));
        assert!(!options.accepts_file_field("bio"));

        let open = UploadOptions::new();
        assert!(open.accepts_extension(None));
        assert!(open.accepts_file_field("anything"));
    }
}
