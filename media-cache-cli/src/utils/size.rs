use crate::error::AppError;

/// Parse a size such as `500MB`, `1.5gb` or `2048` (bytes).
pub fn parse_size(size_str: &str) -> Result<u64, AppError> {
    let size_str = size_str.trim().to_lowercase();
    if size_str.is_empty() {
        return Err(AppError::ParseError("Invalid size: empty string".to_string()));
    }

    let split = size_str
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size_str.len());
    let (number, unit) = size_str.split_at(split);

    if unit.is_empty() {
        return number
            .parse::<u64>()
            .map_err(|_| AppError::ParseError(format!("Invalid size: '{size_str}'")));
    }

    let value = number
        .parse::<f64>()
        .map_err(|_| AppError::ParseError(format!("Invalid size: '{size_str}'")))?;

    let multiplier: u64 = match unit.trim() {
        "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        other => return Err(AppError::ParseError(format!("Invalid size unit: '{other}'"))),
    };

    Ok((value * multiplier as f64) as u64)
}

/// Convert bytes to a human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{b} B"),
    }
}
