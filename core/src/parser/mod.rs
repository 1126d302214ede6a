pub mod parser;

pub use parser::{BuildFileParser, ParseError};
