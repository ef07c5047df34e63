pub(crate) const DEFAULT_WHOLE_STREAM_SIZE_LIMIT: Option<u64> = None;
pub(crate) const DEFAULT_FIELD_NAME_SIZE_LIMIT: u64 = 100;
pub(crate) const DEFAULT_FIELD_VALUE_SIZE_LIMIT: u64 = 1024 * 1024;
pub(crate) const DEFAULT_HEADER_PAIRS_LIMIT: u64 = 2000;

pub(crate) const MAX_HEADER_SECTION_SIZE: usize = 64 * 1024;

pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CR: &[u8] = b"\r";
pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const CRLF_CRLF: &[u8] = b"\r\n\r\n";

pub(crate) const DEFAULT_PART_ENCODING: &str = "7bit";
pub(crate) const DEFAULT_TEMP_FILE_EXT: &str = ".tmp";
pub(crate) const RAW_FILE_NAME: &str = "untitled.tmp";
pub(crate) const RAW_FIELD_NAME: &str = "file";
pub(crate) const MAX_TEMP_FILE_ATTEMPTS: u32 = 10_000;

pub(crate) const UNBOUNDED: &str = "unbounded";
