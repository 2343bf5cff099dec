//! Delimiter-wrapped text convention shared by code blocks and results.
//!
//! Model output carries code between configurable start/end markers and the
//! executor answers with its result between another marker pair. The parser
//! and formatter here are pure text transforms.

pub mod formatter;
pub mod parser;

pub use formatter::{format_inline_result, ResultFormatter, DEFAULT_SUCCESS_MESSAGE};
pub use parser::{filter_by_language, infer_language, DelimiterParser, DEFAULT_LANGUAGE};
