use unicode_normalization::UnicodeNormalization;

const FORBIDDEN_CHARACTERS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_FILENAME_CHARS: usize = 50;
const FALLBACK_FILENAME: &str = "download";
const WINDOWS_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// The result only contains `[A-Za-z0-9_.-]`, is at most 50 characters long
/// and is never empty, `.` or `..`.
pub fn sanitize_title(title: &str) -> String {
    let stripped: String = title
        .chars()
        .filter(|character| !FORBIDDEN_CHARACTERS.contains(character))
        .collect();

    let mut safe = secure_filename(&stripped);
    if let Some((index, _)) = safe.char_indices().nth(MAX_FILENAME_CHARS) {
        safe.truncate(index);
    }

    if safe.chars().all(|character| character == '.') {
        FALLBACK_FILENAME.to_string()
    } else {
        safe
    }
}

fn secure_filename(value: &str) -> String {
    let ascii: String = value
        .nfkd()
        .filter(char::is_ascii)
        .map(|character| match character {
            '/' | '\\' => ' ',
            other => other,
        })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let portable: String = joined
        .chars()
        .filter(|character| {
            character.is_ascii_alphanumeric() || matches!(character, '_' | '.' | '-')
        })
        .collect();
    let trimmed = portable.trim_matches(|character| matches!(character, '.' | '_'));

    let stem = trimmed.split('.').next().unwrap_or_default();
    if WINDOWS_DEVICE_NAMES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(stem))
    {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

pub fn sanitize_ascii_filename(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());

    for character in value.chars() {
        if character.is_ascii_alphanumeric()
            || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
        {
            sanitized.push(character);
        } else {
            sanitized.push('_');
        }
    }

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}
