//! Multi-line input normalization.

/// Split a multi-line input into entries.
///
/// Each line is trimmed; blank lines and lines starting with `#` are dropped.
pub fn split_input(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_input() {
        let input = "  target \n\n# build output\nnode_modules\r\n   \n~/.cargo/registry";
        assert_eq!(
            split_input(input),
            vec!["target", "node_modules", "~/.cargo/registry"]
        );
    }

    #[test]
    fn test_split_input_empty() {
        assert!(split_input("").is_empty());
        assert!(split_input("\n  \n# only a comment").is_empty());
    }
}
