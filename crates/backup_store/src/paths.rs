/// Flattens a root-relative display path into one file-name component.
#[must_use]
pub fn sanitize_source_for_filename(display: &str) -> String {
    let trimmed = display.trim_start_matches("./");
    trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn backup_file_name(display: &str, stamp: &str, sequence: u32) -> String {
    let base = format!("{}_{}", sanitize_source_for_filename(display), stamp);
    if sequence == 0 {
        base
    } else {
        format!("{base}-{sequence}")
    }
}

/// Splits a backup file name into `(sanitized source, stamp, sequence)`.
///
/// Returns `None` for names that were not produced by [`backup_file_name`].
#[must_use]
pub fn parse_backup_name(name: &str) -> Option<(&str, &str, u32)> {
    let (rest, sequence) = match name.rsplit_once('-') {
        Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => {
            (head, tail.parse().ok()?)
        }
        _ => (name, 0),
    };

    // Stamp is `YYYYMMDD_HHMMSS`: 15 bytes preceded by the `_` separator.
    if rest.len() < 17 || !rest.is_char_boundary(rest.len() - 16) {
        return None;
    }
    let (source, tail) = rest.split_at(rest.len() - 16);
    let stamp = tail.strip_prefix('_')?;
    let bytes = stamp.as_bytes();
    let well_formed = bytes.len() == 15
        && bytes[8] == b'_'
        && bytes
            .iter()
            .enumerate()
            .all(|(index, b)| index == 8 || b.is_ascii_digit());
    if !well_formed || source.is_empty() {
        return None;
    }

    Some((source, stamp, sequence))
}

#[cfg(test)]
mod tests {
    use super::{backup_file_name, parse_backup_name, sanitize_source_for_filename};

    #[test]
    fn sanitize_flattens_separators() {
        assert_eq!(sanitize_source_for_filename("src/app/main.py"), "src_app_main.py");
        assert_eq!(sanitize_source_for_filename("./utils.py"), "utils.py");
        assert_eq!(sanitize_source_for_filename("a\\b:c"), "a_b_c");
    }

    #[test]
    fn backup_name_appends_sequence_only_when_needed() {
        assert_eq!(
            backup_file_name("src/lib.rs", "20260214_101500", 0),
            "src_lib.rs_20260214_101500"
        );
        assert_eq!(
            backup_file_name("src/lib.rs", "20260214_101500", 2),
            "src_lib.rs_20260214_101500-2"
        );
    }

    #[test]
    fn parse_recovers_components() {
        assert_eq!(
            parse_backup_name("src_lib.rs_20260214_101500"),
            Some(("src_lib.rs", "20260214_101500", 0))
        );
        assert_eq!(
            parse_backup_name("my-file.txt_20260214_101500-3"),
            Some(("my-file.txt", "20260214_101500", 3))
        );
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(parse_backup_name("notes.txt"), None);
        assert_eq!(parse_backup_name("_20260214_101500"), None);
        assert_eq!(parse_backup_name("x_2026021a_101500"), None);
    }
}
