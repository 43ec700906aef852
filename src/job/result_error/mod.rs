pub mod error;
pub mod result;

/// Attaches a human-readable context line to an error or a result.
pub trait WithMsg<S: Into<String>> {
    fn with_msg(self, msg: S) -> Self;
}
