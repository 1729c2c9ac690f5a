//! JSON-Wire-Format des Matchers: Eingabe-Parser und Ergebnis-Writer.

mod parser;
mod writer;

pub use parser::parse_input;
pub use writer::{input_to_json, input_to_string, result_to_json, result_to_string};
