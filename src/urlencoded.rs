use crate::body::BodyStream;
use crate::dispatch::DecodeContext;
use crate::fields::{FieldValue, Fields};
use crate::form;
use crate::limits::{self, Limits};
use bytes::{Buf, BytesMut};
use futures_util::stream::StreamExt;
use memchr::memchr;

/// Decodes an `application/x-www-form-urlencoded` body pair by pair, with the
/// same field limits as multipart forms.
pub(crate) async fn decode(mut stream: BodyStream<'_>, ctx: &mut DecodeContext<'_>) -> crate::Result<Fields> {
    let mut fields = Fields::new();
    let mut buf = BytesMut::new();
    let mut count = 0;

    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);

        while let Some(idx) = memchr(b'&', &buf) {
            let pair = buf.split_to(idx);
            buf.advance(1);
            add_pair(&pair, &mut fields, &mut count, &ctx.limits)?;
        }

        check_pending(&buf, &ctx.limits)?;
    }

    add_pair(&buf, &mut fields, &mut count, &ctx.limits)?;
    ctx.logger.debug(format_args!("decoded {} url-encoded fields", count));

    Ok(fields)
}

fn add_pair(raw: &[u8], fields: &mut Fields, count: &mut u64, limits: &Limits) -> crate::Result<()> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(raw)
        .map_err(|err| crate::Error::upload_caused_by("invalid url-encoded body", err))?;

    for (name, value) in pairs {
        *count += 1;
        if limits::exceeds(*count, limits.max_fields) {
            return Err(crate::Error::FieldsLimitExceeded {
                limit: limits.max_fields.unwrap_or_default(),
            });
        }

        form::check_name(&name, limits)?;
        if limits::exceeds(value.len() as u64, limits.field_value_size) {
            return Err(crate::Error::FieldValueTooLarge {
                limit: limits.field_value_size.unwrap_or_default(),
                field_name: name,
            });
        }

        fields.insert(name, FieldValue::Text(value));
    }

    Ok(())
}

/// Fails early when the unterminated pair can no longer decode within the
/// limits. A percent escape takes three bytes per decoded byte.
fn check_pending(pending: &[u8], limits: &Limits) -> crate::Result<()> {
    let (raw_name, raw_value) = match memchr(b'=', pending) {
        Some(idx) => (&pending[..idx], &pending[idx + 1..]),
        None => (pending, &pending[..0]),
    };

    if let Some(limit) = limits.field_name_size {
        if raw_name.len() as u64 > limit.saturating_mul(3) {
            return Err(crate::Error::FieldNameTooLarge { limit });
        }
    }

    if let Some(limit) = limits.field_value_size {
        if raw_value.len() as u64 > limit.saturating_mul(3) {
            let name = serde_urlencoded::from_bytes::<Vec<(String, String)>>(raw_name)
                .ok()
                .and_then(|pairs| pairs.into_iter().next())
                .map(|(name, _)| name)
                .unwrap_or_default();
            return Err(crate::Error::FieldValueTooLarge {
                limit,
                field_name: name,
            });
        }
    }

    Ok(())
}
