pub mod bootstrap;
pub mod build;
pub mod clean;
pub mod cleanup;
pub mod completions;
pub mod configure;
pub mod destroy;
pub mod enter;
pub mod generate;
pub mod logs;
pub mod migrate;
pub mod rebuild;
pub mod restart;
pub mod start;
pub mod stop;

use console::Style;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
/// External commands exiting 77 ask the caller to retry the whole operation;
/// the code is passed through verbatim.
pub const EXIT_RETRY: u8 = 77;

pub fn success(msg: &str) {
    println!("{}", Style::new().green().apply_to(msg));
}

pub fn notice(msg: &str) {
    println!("{}", Style::new().yellow().apply_to(msg));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CONFIG_ERROR);
        assert_ne!(EXIT_CONFIG_ERROR, EXIT_RETRY);
    }

    #[test]
    fn retry_code_matches_engine_sentinel() {
        assert_eq!(i32::from(EXIT_RETRY), skipper_engine::RETRY_EXIT_CODE);
    }
}
