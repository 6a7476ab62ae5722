/// Upper bound on the combined byte length of all tag names and values.
pub const MAX_TAG_LIST_BYTES: usize = 4096;

/// One name/value pair attached to an upload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    /// Build a tag with a sanitised value.
    pub fn new(name: impl Into<String>, value: impl AsRef<str>) -> Self {
        Self {
            name: name.into(),
            value: sanitize_tag_value(value.as_ref()),
        }
    }
}

/// Strip C0/C1 control characters; an empty result becomes `"unknown"`.
pub fn sanitize_tag_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| {
            let code = *c as u32;
            !(code < 0x20 || (0x7f..=0x9f).contains(&code))
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Total byte length of all names and values in the list.
pub fn tag_list_bytes(tags: &[Tag]) -> usize {
    tags.iter().map(|t| t.name.len() + t.value.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_characters_are_stripped() {
        assert_eq!(sanitize_tag_value("KLM\u{0007}855"), "KLM855");
        assert_eq!(sanitize_tag_value("A\u{009f}B"), "AB");
        assert_eq!(sanitize_tag_value("plain"), "plain");
    }

    #[test]
    fn empty_values_become_unknown() {
        assert_eq!(sanitize_tag_value(""), "unknown");
        assert_eq!(sanitize_tag_value("\u{0000}\u{001f}"), "unknown");
        assert_eq!(sanitize_tag_value("   "), "unknown");
    }

    #[test]
    fn list_size_counts_names_and_values() {
        let tags = vec![Tag::new("Format", "Parquet"), Tag::new("Encrypted", "false")];
        assert_eq!(tag_list_bytes(&tags), 6 + 7 + 9 + 5);
    }
}
