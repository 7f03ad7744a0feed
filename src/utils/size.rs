//! Size-string parsing and human-readable formatting.
//!
//! `parse_size` is grounded on the teacher's `backend::rotation::parse_size_limit`
//! (the canonical one of its three near-duplicate copies — `backend/file.rs`
//! and `utils/error.rs` each carried their own, slightly divergent, version),
//! extended to also accept `TB` for consistency with its own upper unit and
//! to reject `"0"` per §8's boundary behaviour ("a rotation threshold of
//! `'0'` is rejected"). `format_size` uses `byte_unit::Byte`, the crate the
//! teacher already depends on for this purpose.

use byte_unit::Byte;

use crate::error::{LoglyError, Result};

/// Parses a decimal size string with an optional `K`/`KB`/`M`/`MB`/`G`/`GB`/
/// `T`/`TB` suffix (case-insensitive); a bare number means bytes. Rejects
/// zero, negative, and malformed input.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(LoglyError::configuration("size string is empty"));
    }

    let mut num_end = 0;
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() {
            num_end = i + c.len_utf8();
        } else {
            break;
        }
    }
    if num_end == 0 {
        return Err(LoglyError::configuration(format!(
            "size string '{s}' does not start with a digit"
        )));
    }

    let num_str = &s[..num_end];
    let unit = s[num_end..].trim().to_ascii_uppercase();
    let multiplier: u64 = match unit.as_str() {
        "B" | "" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024u64 * 1024 * 1024 * 1024,
        other => {
            return Err(LoglyError::configuration(format!(
                "unrecognised size unit '{other}' in '{s}'"
            )));
        }
    };

    let n: u64 = num_str
        .parse()
        .map_err(|_| LoglyError::configuration(format!("invalid numeric size in '{s}'")))?;
    let bytes = n
        .checked_mul(multiplier)
        .ok_or_else(|| LoglyError::configuration(format!("size '{s}' overflows u64 bytes")))?;
    if bytes == 0 {
        return Err(LoglyError::configuration(
            "size must be positive; '0' is rejected",
        ));
    }
    Ok(bytes)
}

/// Human-readable rendering, e.g. `1.50 MiB`, for the adaptive audit block's
/// `<human-formatted>` placeholders (§6).
pub fn format_size(bytes: u64) -> String {
    Byte::from_u64(bytes)
        .get_appropriate_unit(byte_unit::UnitType::Binary)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_is_bytes() {
        assert_eq!(parse_size("100").unwrap(), 100);
    }

    #[test]
    fn units_are_case_insensitive() {
        assert_eq!(parse_size("5kb").unwrap(), 5 * 1024);
        assert_eq!(parse_size("5KB").unwrap(), 5 * 1024);
        assert_eq!(parse_size("1gB").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn terabytes_supported() {
        assert_eq!(parse_size("2TB").unwrap(), 2 * 1024u64 * 1024 * 1024 * 1024);
    }

    #[test]
    fn zero_is_rejected() {
        assert!(parse_size("0").is_err());
        assert!(parse_size("0MB").is_err());
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("abc").is_err());
    }

    #[test]
    fn format_size_is_human_readable() {
        let s = format_size(1024 * 1024);
        assert!(s.contains("MiB") || s.contains("MB"));
    }
}
