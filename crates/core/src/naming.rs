//! Per-job file naming.
//!
//! Staged inputs and rendered outputs share directories with every other
//! job the render server has seen, so each name carries a fresh random
//! token rather than relying on any locking.

/// Prefix for the render server's output filename.
pub const OUTPUT_PREFIX_STEM: &str = "seamless_loop";

/// Number of hex characters in a per-job token.
pub const TOKEN_LEN: usize = 8;

/// Generate a fresh lowercase hex token of [`TOKEN_LEN`] characters.
///
/// Taken from the head of a v4 UUID.
pub fn unique_token() -> String {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(TOKEN_LEN);
    token
}

/// Filename under which an inbound image is staged, e.g. `input_1a2b3c4d.png`.
pub fn staged_input_filename() -> String {
    format!("input_{}.png", unique_token())
}

/// Output filename prefix handed to the render server, e.g.
/// `seamless_loop_1a2b3c4d`.
pub fn output_filename_prefix() -> String {
    format!("{OUTPUT_PREFIX_STEM}_{}", unique_token())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn token_is_eight_lowercase_hex_chars() {
        let token = unique_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn staged_input_filename_shape() {
        let name = staged_input_filename();
        assert!(name.starts_with("input_"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), "input_".len() + TOKEN_LEN + ".png".len());
    }

    #[test]
    fn output_prefixes_are_distinct_over_many_samples() {
        let samples: HashSet<String> = (0..1200).map(|_| output_filename_prefix()).collect();
        assert_eq!(samples.len(), 1200);
        assert!(samples.iter().all(|p| p.starts_with("seamless_loop_")));
    }

    #[test]
    fn consecutive_prefixes_differ() {
        let mut previous = output_filename_prefix();
        for _ in 0..2000 {
            let next = output_filename_prefix();
            assert_ne!(next, previous);
            previous = next;
        }
    }
}
