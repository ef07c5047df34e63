//! Human readable byte sizes such as `"10MB"` or `"1.5kb"`.

const KB: f64 = 1024.0;

/// Parses a byte-size expression into a number of bytes.
///
/// Units are binary multiples and case-insensitive: `b`, `kb`, `mb`, `gb`,
/// `tb` and `pb`. A bare number is a byte count. Fractional results are
/// floored.
///
/// # Examples
///
/// ```
/// assert_eq!(intake::parse_size("1MB"), Ok(1_048_576));
/// assert_eq!(intake::parse_size("1.5 kb"), Ok(1536));
/// assert!(intake::parse_size("-1MB").is_err());
/// ```
pub fn parse_size(expr: &str) -> Result<u64, String> {
    let expr = expr.trim();
    let split = expr
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.' || ch == '-' || ch == '+'))
        .unwrap_or(expr.len());
    let (number, unit) = expr.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid byte size expression: {:?}", expr))?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => KB,
        "mb" => KB * KB,
        "gb" => KB * KB * KB,
        "tb" => KB * KB * KB * KB,
        "pb" => KB * KB * KB * KB * KB,
        other => return Err(format!("unknown byte size unit {:?} in {:?}", other, expr)),
    };

    let bytes = number * multiplier;
    if !bytes.is_finite() {
        return Err(format!("byte size is not finite: {:?}", expr));
    }
    if bytes < 0.0 {
        return Err(format!("byte size is negative: {:?}", expr));
    }
    if bytes >= u64::MAX as f64 {
        return Err(format!("byte size is too large: {:?}", expr));
    }

    Ok(bytes.floor() as u64)
}
