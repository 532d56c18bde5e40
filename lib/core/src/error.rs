//! Error handling foundation for flowloom.
//!
//! Only the `Result` alias lives here. Each crate defines its own error
//! enums in its own `error` module and converts them into a
//! [`rootcause::Report`] at the boundary where callers need context.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }
}
