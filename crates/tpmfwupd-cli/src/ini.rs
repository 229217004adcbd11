//! Minimal INI tokenizer: line-oriented, `[section]` headers and
//! `key = value` pairs, no quoting or escaping or multi-line values. Calls
//! `on_triple(section, key, value)` once per recognized pair; unrecognized
//! syntax (a line that is neither a header, a pair, a blank line, nor a
//! `;`/`#` comment) is skipped rather than treated as an error, the same
//! tolerance applied to unknown sections/keys.

pub fn tokenize(contents: &str, mut on_triple: impl FnMut(&str, &str, &str)) {
    let mut section = String::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('[') {
            if let Some(name) = stripped.strip_suffix(']') {
                section = name.trim().to_string();
            }
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if section.is_empty() {
                continue;
            }
            on_triple(&section, key.trim(), value.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_section_key_value_triples() {
        let mut triples = Vec::new();
        tokenize(
            "[LOGGING]\nLEVEL = debug\nPATH=./x.log\n\n[TargetFirmware]\nversion_SLB966x = 4.40.1.0",
            |s, k, v| triples.push((s.to_string(), k.to_string(), v.to_string())),
        );
        assert_eq!(
            triples,
            vec![
                ("LOGGING".into(), "LEVEL".into(), "debug".into()),
                ("LOGGING".into(), "PATH".into(), "./x.log".into()),
                ("TargetFirmware".into(), "version_SLB966x".into(), "4.40.1.0".into()),
            ]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut count = 0;
        tokenize("; a comment\n# another\n\n[S]\n", |_, _, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn pair_before_any_section_is_ignored() {
        let mut count = 0;
        tokenize("orphan = value\n[S]\nk = v", |_, _, _| count += 1);
        assert_eq!(count, 1);
    }
}
