pub mod push;
pub mod revision;
pub mod signature;

pub use push::*;
pub use revision::*;
pub use signature::*;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short version string: the packaged git hash if one was supplied at build
/// time, otherwise the hash `built` detected, otherwise "unknown".
pub fn get_version() -> String {
    let git_hash = option_env!("SIDESWAP_GIT_HASH").or(built_info::GIT_COMMIT_HASH);

    match git_hash {
        Some(hash) => short_hash(hash),
        None => "unknown".to_string(),
    }
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_truncates_to_eight() {
        assert_eq!(short_hash("0123456789abcdef"), "01234567");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn test_short_hash_counts_characters_not_bytes() {
        assert_eq!(short_hash("ééééééééé"), "éééééééé");
        assert_eq!(short_hash("aé"), "aé");
    }
}
