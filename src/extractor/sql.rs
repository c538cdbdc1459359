//! SQL dependency extraction: a `{name}` template scan (§4.1). SQL cells
//! never write module-level variables.

use super::Dependencies;

pub fn extract_sql(source: &str) -> Dependencies {
    let mut deps = Dependencies::default();
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = source[i + 1..].find('}') {
                let candidate = &source[i + 1..i + 1 + end];
                if is_identifier(candidate) {
                    deps.reads.insert(candidate.to_string());
                }
                i += end + 2;
                continue;
            }
        }
        i += 1;
    }
    deps
}

/// Matches spec §4.1's literal `/\{(\w+)\}/`: `\w` is alphanumeric-or-`_`
/// with no restriction on the first character, so a digit-leading name like
/// `{1x}` still counts as a read.
fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_variable() {
        let deps = extract_sql("SELECT * FROM u WHERE id = {user_id}");
        assert!(deps.reads.contains("user_id"));
        assert!(deps.writes.is_empty());
    }

    #[test]
    fn extracts_multiple_variables() {
        let deps = extract_sql("SELECT {col} FROM t WHERE a = {x} AND b = {y}");
        assert_eq!(deps.reads.len(), 3);
    }

    #[test]
    fn ignores_non_identifier_braces() {
        let deps = extract_sql("SELECT '{1,2,3}' FROM t");
        assert!(deps.reads.is_empty());
    }

    #[test]
    fn no_templates_is_empty() {
        let deps = extract_sql("SELECT * FROM t");
        assert!(deps.reads.is_empty());
    }

    #[test]
    fn digit_leading_name_is_still_a_read() {
        let deps = extract_sql("SELECT * FROM t WHERE id = {1x}");
        assert!(deps.reads.contains("1x"));
    }
}
