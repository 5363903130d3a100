/// Compile a regular expression once and hand back a `&'static Regex`.
///
/// Every module that needs a fixed pattern for tokenizing (dice
/// expressions, placeholder syntax, the conditional lexer, ...) reaches
/// for this instead of recompiling the pattern on every call.
#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}
