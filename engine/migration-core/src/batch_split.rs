//! Splits a script on the `GO` batch separator.
//!
//! A separator is a line consisting of `GO` alone (case-insensitive,
//! surrounded only by whitespace) outside string literals and comments.

pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut in_block_comment = false;

    for line in script.lines() {
        let is_separator =
            !in_string && !in_block_comment && line.trim().eq_ignore_ascii_case("GO");

        if is_separator {
            if !current.trim().is_empty() {
                batches.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            continue;
        }

        scan_line(line, &mut in_string, &mut in_block_comment);

        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        batches.push(current);
    }

    batches
}

/// Advances the string/comment state over one line. Line comments end at
/// the newline; strings and block comments may span lines.
fn scan_line(line: &str, in_string: &mut bool, in_block_comment: &mut bool) {
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if *in_block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                *in_block_comment = false;
            }
            continue;
        }

        if *in_string {
            if c == '\'' {
                // A doubled quote is an escaped quote, not a terminator.
                if chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    *in_string = false;
                }
            }
            continue;
        }

        match c {
            '\'' => *in_string = true,
            '-' if chars.peek() == Some(&'-') => return,
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                *in_block_comment = true;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_on_bare_go_lines() {
        let script = "SELECT 1;\nGO\nSELECT 2;\ngo\nSELECT 3;\n";
        let batches = split_batches(script);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], "SELECT 1;\n");
        assert_eq!(batches[2], "SELECT 3;\n");
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let batches = split_batches("SELECT 1;\n  GO  \nSELECT 2;\n");
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn go_inside_a_string_literal_does_not_split() {
        let script = "INSERT INTO t VALUES ('\nGO\n');\nGO\nSELECT 1;\n";
        let batches = split_batches(script);

        assert_eq!(batches.len(), 2);
        assert!(batches[0].contains("INSERT"));
        assert!(batches[0].contains("GO"));
    }

    #[test]
    fn go_inside_a_block_comment_does_not_split() {
        let script = "SELECT 1;\n/* not a separator:\nGO\n*/\nGO\nSELECT 2;\n";
        let batches = split_batches(script);

        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn line_comments_do_not_open_state_across_lines() {
        let script = "SELECT 1; -- it's fine\nGO\nSELECT 2;\n";
        let batches = split_batches(script);

        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn empty_batches_are_dropped() {
        let batches = split_batches("GO\nGO\nSELECT 1;\nGO\n");
        assert_eq!(batches.len(), 1);
    }
}
