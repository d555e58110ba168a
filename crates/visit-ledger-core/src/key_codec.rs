use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Width of the `YYYYMMDDhhmm` suffix carried by every record key.
pub const RECORD_KEY_TIMESTAMP_WIDTH: usize = 12;

const RECORD_KEY_TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day][hour repr:24][minute]");

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum KeyCodecError {
    #[error("failed to format record timestamp: {0}")]
    Format(String),
    #[error("year {0} cannot be encoded in a 4-digit record timestamp")]
    UnsupportedYear(i32),
    #[error("record key `{key}` is shorter than the {RECORD_KEY_TIMESTAMP_WIDTH}-character timestamp suffix")]
    TooShort { key: String },
    #[error("record key `{key}` does not end in a {RECORD_KEY_TIMESTAMP_WIDTH}-digit timestamp")]
    MalformedSuffix { key: String },
}

/// Build the storage key for a record appended to `subject_id` at `now`.
///
/// The suffix is the UTC minute of `now`, so two appends to one subject within
/// the same minute produce the same key. The key is not prefixed or escaped,
/// so it can equal the id of another subject.
///
/// # Errors
/// Returns [`KeyCodecError`] when `now` falls outside years 0000..=9999.
pub fn make_record_key(subject_id: &str, now: OffsetDateTime) -> Result<String, KeyCodecError> {
    let utc = now.to_offset(UtcOffset::UTC);
    let stamp = utc
        .format(RECORD_KEY_TIMESTAMP_FORMAT)
        .map_err(|err| KeyCodecError::Format(err.to_string()))?;
    if stamp.len() != RECORD_KEY_TIMESTAMP_WIDTH || !is_timestamp_digits(&stamp) {
        return Err(KeyCodecError::UnsupportedYear(utc.year()));
    }
    Ok(format!("{subject_id}{stamp}"))
}

/// Return the fixed-width timestamp suffix of a record key.
///
/// # Errors
/// Returns [`KeyCodecError::TooShort`] or [`KeyCodecError::MalformedSuffix`]
/// instead of slicing into a key that was not minted by [`make_record_key`].
pub fn extract_timestamp_suffix(record_key: &str) -> Result<&str, KeyCodecError> {
    let Some(split_at) = record_key.len().checked_sub(RECORD_KEY_TIMESTAMP_WIDTH) else {
        return Err(KeyCodecError::TooShort { key: record_key.to_string() });
    };
    if !record_key.is_char_boundary(split_at) {
        return Err(KeyCodecError::MalformedSuffix { key: record_key.to_string() });
    }

    let suffix = &record_key[split_at..];
    if !is_timestamp_digits(suffix) {
        return Err(KeyCodecError::MalformedSuffix { key: record_key.to_string() });
    }
    Ok(suffix)
}

fn is_timestamp_digits(value: &str) -> bool {
    value.bytes().all(|byte| byte.is_ascii_digit())
}
