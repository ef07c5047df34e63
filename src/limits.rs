use crate::constants;
use crate::size::parse_size;
use serde::{Deserialize, Deserializer};

/// A limit value as supplied by a caller or a configuration file.
///
/// Deserializes from a number (`1024`), a byte-size string (`"10MB"`), the
/// string `"unbounded"` or, as a [`LimitOverrides`] field, `null`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Size {
    /// A byte (or item) count.
    Bytes(u64),
    /// A byte-size expression such as `"10MB"`, see [`parse_size`](crate::parse_size).
    Human(String),
    /// No limit.
    Unbounded,
}

impl Size {
    fn resolve(&self, name: &str) -> crate::Result<Option<u64>> {
        match self {
            Size::Bytes(n) => Ok(Some(*n)),
            Size::Human(expr) if expr.trim().eq_ignore_ascii_case(constants::UNBOUNDED) => Ok(None),
            Size::Human(expr) => parse_size(expr)
                .map(Some)
                .map_err(|msg| crate::Error::Config(format!("limits.{}: {}", name, msg))),
            Size::Unbounded => Ok(None),
        }
    }
}

impl From<u64> for Size {
    fn from(n: u64) -> Self {
        Size::Bytes(n)
    }
}

impl From<usize> for Size {
    fn from(n: usize) -> Self {
        Size::Bytes(n as u64)
    }
}

impl From<&str> for Size {
    fn from(expr: &str) -> Self {
        Size::Human(expr.to_owned())
    }
}

impl From<String> for Size {
    fn from(expr: String) -> Self {
        Size::Human(expr)
    }
}

/// Caller supplied limit overrides. Absent values fall back to the server
/// defaults when resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitOverrides {
    /// Total body size, after transport decoding.
    #[serde(deserialize_with = "null_is_unbounded")]
    pub size: Option<Size>,
    /// Max field name size.
    #[serde(deserialize_with = "null_is_unbounded")]
    pub field_name_size: Option<Size>,
    /// Max field value size.
    #[serde(deserialize_with = "null_is_unbounded")]
    pub field_size: Option<Size>,
    /// Max number of non-file fields.
    #[serde(deserialize_with = "null_is_unbounded")]
    pub fields: Option<Size>,
    /// Max size of one file.
    #[serde(deserialize_with = "null_is_unbounded")]
    pub file_size: Option<Size>,
    /// Max number of files.
    #[serde(deserialize_with = "null_is_unbounded")]
    pub files: Option<Size>,
    /// Max number of parts (fields and files).
    #[serde(deserialize_with = "null_is_unbounded")]
    pub parts: Option<Size>,
    /// Max number of header lines per part.
    #[serde(deserialize_with = "null_is_unbounded")]
    pub header_pairs: Option<Size>,
}

/// A present `null` lifts the limit, an absent field keeps the default.
fn null_is_unbounded<'de, D>(deserializer: D) -> Result<Option<Size>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Option::<Size>::deserialize(deserializer)?.unwrap_or(Size::Unbounded)))
}

impl LimitOverrides {
    /// Creates empty overrides.
    pub fn new() -> LimitOverrides {
        LimitOverrides::default()
    }

    /// Sets the total body size limit.
    pub fn size(mut self, limit: impl Into<Size>) -> LimitOverrides {
        self.size = Some(limit.into());
        self
    }

    /// Sets the field name size limit.
    pub fn field_name_size(mut self, limit: impl Into<Size>) -> LimitOverrides {
        self.field_name_size = Some(limit.into());
        self
    }

    /// Sets the field value size limit.
    pub fn field_size(mut self, limit: impl Into<Size>) -> LimitOverrides {
        self.field_size = Some(limit.into());
        self
    }

    /// Sets the max number of non-file fields.
    pub fn fields(mut self, limit: impl Into<Size>) -> LimitOverrides {
        self.fields = Some(limit.into());
        self
    }

    /// Sets the size limit of each file.
    pub fn file_size(mut self, limit: impl Into<Size>) -> LimitOverrides {
        self.file_size = Some(limit.into());
        self
    }

    /// Sets the max number of files.
    pub fn files(mut self, limit: impl Into<Size>) -> LimitOverrides {
        self.files = Some(limit.into());
        self
    }

    /// Sets the max number of parts.
    pub fn parts(mut self, limit: impl Into<Size>) -> LimitOverrides {
        self.parts = Some(limit.into());
        self
    }

    /// Sets the max number of header lines per part.
    pub fn header_pairs(mut self, limit: impl Into<Size>) -> LimitOverrides {
        self.header_pairs = Some(limit.into());
        self
    }
}

/// Resolved limits of one upload. `None` means unbounded.
///
/// Use [`Limits::resolve`] to merge [`LimitOverrides`] over server defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub total_size: Option<u64>,
    pub field_name_size: Option<u64>,
    pub field_value_size: Option<u64>,
    pub max_fields: Option<u64>,
    pub max_file_size: Option<u64>,
    pub max_files: Option<u64>,
    pub max_parts: Option<u64>,
    pub max_header_pairs: Option<u64>,
}

impl Limits {
    /// Limits with every ceiling removed.
    pub fn unbounded() -> Limits {
        Limits {
            total_size: None,
            field_name_size: None,
            field_value_size: None,
            max_fields: None,
            max_file_size: None,
            max_files: None,
            max_parts: None,
            max_header_pairs: None,
        }
    }

    /// Merges `overrides` over `defaults`.
    ///
    /// # Examples
    ///
    /// ```
    /// use intake::{LimitOverrides, Limits};
    ///
    /// let limits = Limits::resolve(&Limits::default(), &LimitOverrides::new().file_size("1MB")).unwrap();
    /// assert_eq!(limits.max_file_size, Some(1_048_576));
    /// ```
    pub fn resolve(defaults: &Limits, overrides: &LimitOverrides) -> crate::Result<Limits> {
        fn pick(default: Option<u64>, value: Option<&Size>, name: &str) -> crate::Result<Option<u64>> {
            match value {
                Some(size) => size.resolve(name),
                None => Ok(default),
            }
        }

        Ok(Limits {
            total_size: pick(defaults.total_size, overrides.size.as_ref(), "size")?,
            field_name_size: pick(defaults.field_name_size, overrides.field_name_size.as_ref(), "fieldNameSize")?,
            field_value_size: pick(defaults.field_value_size, overrides.field_size.as_ref(), "fieldSize")?,
            max_fields: pick(defaults.max_fields, overrides.fields.as_ref(), "fields")?,
            max_file_size: pick(defaults.max_file_size, overrides.file_size.as_ref(), "fileSize")?,
            max_files: pick(defaults.max_files, overrides.files.as_ref(), "files")?,
            max_parts: pick(defaults.max_parts, overrides.parts.as_ref(), "parts")?,
            max_header_pairs: pick(defaults.max_header_pairs, overrides.header_pairs.as_ref(), "headerPairs")?,
        })
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            total_size: constants::DEFAULT_WHOLE_STREAM_SIZE_LIMIT,
            field_name_size: Some(constants::DEFAULT_FIELD_NAME_SIZE_LIMIT),
            field_value_size: Some(constants::DEFAULT_FIELD_VALUE_SIZE_LIMIT),
            max_fields: None,
            max_file_size: None,
            max_files: None,
            max_parts: None,
            max_header_pairs: Some(constants::DEFAULT_HEADER_PAIRS_LIMIT),
        }
    }
}

/// Returns `true` when `count` goes past `limit`.
pub(crate) fn exceeds(count: u64, limit: Option<u64>) -> bool {
    limit.map_or(false, |limit| count > limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let limits = Limits::resolve(&Limits::default(), &LimitOverrides::new()).unwrap();
        assert_eq!(limits, Limits::default());
    }

    #[test]
    fn test_resolve_overrides() {
        let overrides = LimitOverrides::new()
            .size("10MB")
            .field_size(256u64)
            .files(3u64)
            .header_pairs(Size::Unbounded);

        let limits = Limits::resolve(&Limits::default(), &overrides).unwrap();
        assert_eq!(limits.total_size, Some(10 * 1_048_576));
        assert_eq!(limits.field_value_size, Some(256));
        assert_eq!(limits.max_files, Some(3));
        assert_eq!(limits.max_header_pairs, None);
        assert_eq!(limits.field_name_size, Limits::default().field_name_size);
    }

    #[test]
    fn test_resolve_rejects_bad_sizes() {
        let err = Limits::resolve(&Limits::default(), &LimitOverrides::new().file_size("-1MB")).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Config);

        let err = Limits::resolve(&Limits::default(), &LimitOverrides::new().size("lots")).unwrap_err();
        assert!(err.to_string().contains("limits.size"));
    }

    #[test]
    fn test_overrides_deserialize() {
        let overrides: LimitOverrides =
            serde_json::from_str(r#"{"size": "2MB", "fieldSize": 1024, "files": "unbounded"}"#).unwrap();
        assert_eq!(overrides.size, Some(Size::Human("2MB".to_owned())));
        assert_eq!(overrides.field_size, Some(Size::Bytes(1024)));

        let defaults = Limits {
            max_files: Some(4),
            ..Limits::default()
        };
        let limits = Limits::resolve(&defaults, &overrides).unwrap();
        assert_eq!(limits.total_size, Some(2 * 1_048_576));
        assert_eq!(limits.max_files, None);
    }

    #[test]
    fn test_null_deserializes_as_unbounded() {
        let overrides: LimitOverrides = serde_json::from_str(r#"{"fileSize": null, "files": 2}"#).unwrap();
        assert_eq!(overrides.file_size, Some(Size::Unbounded));
        assert_eq!(overrides.field_size, None);

        let defaults = Limits {
            max_file_size: Some(10),
            ..Limits::default()
        };
        let limits = Limits::resolve(&defaults, &overrides).unwrap();
        assert_eq!(limits.max_file_size, None);
        assert_eq!(limits.max_files, Some(2));
        assert_eq!(limits.field_value_size, defaults.field_value_size);
    }

    #[test]
    fn test_exceeds() {
        assert!(exceeds(3, Some(2)));
        assert!(!exceeds(2, Some(2)));
        assert!(!exceeds(u64::MAX, None));
    }
}
