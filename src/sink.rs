use crate::body::BodyStream;
use crate::constants;
use crate::fields::{FieldValue, FileDescriptor};
use crate::helpers;
use crate::limits;
use crate::logger::Logger;
use crate::temp::TempFiles;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::convert::TryFrom;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Where the bytes of a file part should go, as decided by an [`OnFile`] hook.
pub enum FileAction {
    /// Store the file in a new temp file. The default without a hook.
    UseTempFile,
    /// Write the file to this absolute path. The file is not tracked as a temp
    /// file, the caller owns it.
    UseExplicitPath(PathBuf),
    /// Store the file in a new temp file with this extension, e.g. `".png"`.
    UseExtensionOverride(String),
    /// Write the file into the caller's sink. It is shut down once the part
    /// ends.
    UseCustomSink(Box<dyn AsyncWrite + Send + Unpin>),
    /// Skip the bytes and store this value under the field name instead.
    UseResolvedValue(serde_json::Value),
    /// Skip the bytes and leave the part out of the result.
    Reject,
}

impl fmt::Debug for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileAction::UseTempFile => f.write_str("UseTempFile"),
            FileAction::UseExplicitPath(path) => f.debug_tuple("UseExplicitPath").field(path).finish(),
            FileAction::UseExtensionOverride(ext) => f.debug_tuple("UseExtensionOverride").field(ext).finish(),
            FileAction::UseCustomSink(_) => f.write_str("UseCustomSink(..)"),
            FileAction::UseResolvedValue(value) => f.debug_tuple("UseResolvedValue").field(value).finish(),
            FileAction::Reject => f.write_str("Reject"),
        }
    }
}

/// Parses the string form: an absolute path (`"/srv/uploads/a.bin"`) or an
/// extension (`".png"`).
impl TryFrom<&str> for FileAction {
    type Error = crate::Error;

    fn try_from(value: &str) -> crate::Result<Self> {
        if value.starts_with('/') {
            Ok(FileAction::UseExplicitPath(PathBuf::from(value)))
        } else if value.len() > 1 && value.starts_with('.') {
            Ok(FileAction::UseExtensionOverride(value.to_owned()))
        } else {
            Err(unexpected_result())
        }
    }
}

fn unexpected_result() -> crate::Error {
    crate::Error::upload("unexpected onFile result")
}

/// The metadata of a file part.
#[derive(Debug, Clone, Copy)]
pub struct FileInfo<'a> {
    pub field_name: &'a str,
    pub file_name: &'a str,
    /// The declared `Content-Transfer-Encoding`.
    pub encoding: &'a str,
    pub mime_type: Option<&'a str>,
}

/// A file part on its way to a sink.
///
/// Every chunk read from it, by the pipeline or by a hook, counts against the
/// file size limit.
pub struct FilePart<'r> {
    field_name: String,
    file_name: String,
    encoding: String,
    mime_type: Option<String>,
    stream: BodyStream<'r>,
    size: u64,
    limit: Option<u64>,
}

impl<'r> FilePart<'r> {
    pub(crate) fn new(
        field_name: String,
        file_name: String,
        encoding: String,
        mime_type: Option<String>,
        stream: BodyStream<'r>,
        limit: Option<u64>,
    ) -> Self {
        FilePart {
            field_name,
            file_name,
            encoding,
            mime_type,
            stream,
            size: 0,
            limit,
        }
    }

    pub fn info(&self) -> FileInfo<'_> {
        FileInfo {
            field_name: &self.field_name,
            file_name: &self.file_name,
            encoding: &self.encoding,
            mime_type: self.mime_type.as_deref(),
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Bytes read so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads the next chunk of the file.
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        let chunk = match self.stream.next().await.transpose()? {
            Some(chunk) => chunk,
            None => return Ok(None),
        };

        self.size += chunk.len() as u64;
        if limits::exceeds(self.size, self.limit) {
            return Err(crate::Error::FileSizeExceeded {
                limit: self.limit.unwrap_or_default(),
                field_name: self.field_name.clone(),
                file_name: self.file_name.clone(),
            });
        }

        Ok(Some(chunk))
    }

    /// Reads and discards the rest of the file.
    pub(crate) async fn drain(&mut self) -> crate::Result<()> {
        while self.chunk().await?.is_some() {}
        Ok(())
    }

    fn descriptor(&self, size: u64, stored_path: Option<PathBuf>) -> FileDescriptor {
        FileDescriptor {
            name: self.file_name.clone(),
            encoding: self.encoding.clone(),
            mime_type: self.mime_type.clone(),
            size,
            stored_path,
        }
    }
}

impl fmt::Debug for FilePart<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("field_name", &self.field_name)
            .field("file_name", &self.file_name)
            .field("encoding", &self.encoding)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .finish()
    }
}

/// Decides where each uploaded file goes.
///
/// The hook may read from the part before deciding; those bytes are gone
/// for the sink but still count against the file size limit.
#[async_trait]
pub trait OnFile: Send + Sync {
    async fn on_file(&self, part: &mut FilePart<'_>) -> crate::Result<FileAction>;
}

/// An [`OnFile`] hook that only looks at the part metadata.
pub struct OnFileFn<F> {
    f: F,
}

#[async_trait]
impl<F> OnFile for OnFileFn<F>
where
    F: Fn(&FileInfo<'_>) -> crate::Result<FileAction> + Send + Sync,
{
    async fn on_file(&self, part: &mut FilePart<'_>) -> crate::Result<FileAction> {
        (self.f)(&part.info())
    }
}

/// Wraps a closure into an [`OnFile`] hook.
///
/// # Examples
///
/// ```
/// use intake::{on_file_fn, FileAction};
///
/// let hook = on_file_fn(|info| match info.field_name {
///     "avatar" => Ok(FileAction::Reject),
///     _ => Ok(FileAction::UseTempFile),
/// });
/// # let _ = hook;
/// ```
pub fn on_file_fn<F>(f: F) -> OnFileFn<F>
where
    F: Fn(&FileInfo<'_>) -> crate::Result<FileAction> + Send + Sync,
{
    OnFileFn { f }
}

pub(crate) struct SinkContext<'a> {
    pub(crate) temp_files: &'a mut TempFiles,
    pub(crate) on_file: Option<&'a dyn OnFile>,
    pub(crate) keep_extension: bool,
    pub(crate) logger: &'a Logger,
}

/// Streams a file part into the sink chosen by the hook. Resolves to `None`
/// when the part was rejected.
pub(crate) async fn resolve(mut part: FilePart<'_>, ctx: SinkContext<'_>) -> crate::Result<Option<FieldValue>> {
    let action = match ctx.on_file {
        Some(hook) => hook.on_file(&mut part).await?,
        None => FileAction::UseTempFile,
    };

    ctx.logger.debug(format_args!(
        "file '{}' in field '{}': {:?}",
        part.file_name, part.field_name, action
    ));

    match action {
        FileAction::UseTempFile => {
            let ext = match ctx.keep_extension {
                true => helpers::file_extension(&part.file_name).unwrap_or(constants::DEFAULT_TEMP_FILE_EXT),
                false => constants::DEFAULT_TEMP_FILE_EXT,
            }
            .to_owned();
            into_temp_file(part, ctx.temp_files, &ext).await
        }
        FileAction::UseExtensionOverride(ext) => {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(unexpected_result());
            }
            into_temp_file(part, ctx.temp_files, &ext).await
        }
        FileAction::UseExplicitPath(path) => {
            if !path.is_absolute() {
                return Err(unexpected_result());
            }
            let mut file = tokio::fs::File::create(&path)
                .await
                .map_err(|source| write_error(Some(&path), source))?;
            let written = pump(&mut part, &mut file, Some(&path)).await?;
            Ok(Some(FieldValue::File(part.descriptor(written, Some(path)))))
        }
        FileAction::UseCustomSink(mut sink) => {
            let written = pump(&mut part, &mut sink, None).await?;
            Ok(Some(FieldValue::File(part.descriptor(written, None))))
        }
        FileAction::UseResolvedValue(value) => {
            part.drain().await?;
            Ok(Some(FieldValue::Value(value)))
        }
        FileAction::Reject => {
            part.drain().await?;
            Ok(None)
        }
    }
}

async fn into_temp_file(
    mut part: FilePart<'_>,
    temp_files: &mut TempFiles,
    ext: &str,
) -> crate::Result<Option<FieldValue>> {
    let (path, mut file) = temp_files.allocate(ext).await?;
    let written = pump(&mut part, &mut file, Some(&path)).await?;
    Ok(Some(FieldValue::File(part.descriptor(written, Some(path)))))
}

/// Copies the rest of the part into `sink` and shuts it down. Returns the
/// number of bytes written.
async fn pump<W>(part: &mut FilePart<'_>, sink: &mut W, path: Option<&Path>) -> crate::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;

    while let Some(chunk) = part.chunk().await? {
        sink.write_all(&chunk).await.map_err(|source| write_error(path, source))?;
        written += chunk.len() as u64;
    }

    sink.shutdown().await.map_err(|source| write_error(path, source))?;
    Ok(written)
}

fn write_error(path: Option<&Path>, source: std::io::Error) -> crate::Error {
    crate::Error::WriteFile {
        path: path.map(Path::to_path_buf),
        source,
    }
}
