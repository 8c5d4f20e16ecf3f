//! Provides a test procedure for assembly fixtures.
//!
//! Fixtures under `test/` are MIPS listings carrying `#!` expectation
//! directives in their comments:
//!
//! ```text
//! #! returns: 5
//! #! contains: sp4 = (s32) arg0;
//! #! not-contains: temp_v1
//! #! local: sp4
//! #! arg: arg0
//! ```
//!
//! `contains`/`not-contains`/`returns` match against the rendered
//! pseudocode with all whitespace runs collapsed to single spaces.

use crate::output::render_function;
use crate::parse::{self, ParseError};
use crate::translate::{self, Options, translate_function};

#[derive(Debug)]
pub enum TestError {
    FileError(String),
    ParseError(ParseError),
    TranslateError(translate::Error),
    InvalidDirective(String),
    Expectation { wanted: String, output: String },
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn check(src: &str) -> Result<(), TestError> {
    let file = parse::parse(src, "fixture").map_err(TestError::ParseError)?;
    let Some(function) = file.functions.first() else {
        return Err(TestError::FileError("fixture has no function".to_owned()));
    };
    let info = translate_function(function, &Options::default())
        .map_err(TestError::TranslateError)?;
    let output = render_function(&info);
    let normalized = normalize(&output);
    println!("{output}");

    for line in src.lines() {
        let Some(directive) = line.trim_start().strip_prefix("#!") else {
            continue;
        };
        let directive = directive.trim();
        let (keyword, value) = match directive.split_once(':') {
            Some((keyword, value)) => (keyword, value),
            None => (directive, ""),
        };
        let value = value.trim();
        let expectation_failed = |wanted: String| TestError::Expectation {
            wanted,
            output: output.clone(),
        };
        match keyword {
            "contains" => {
                if !normalized.contains(&normalize(value)) {
                    return Err(expectation_failed(format!("contains: {value}")));
                }
            }
            "not-contains" => {
                if normalized.contains(&normalize(value)) {
                    return Err(expectation_failed(format!("not-contains: {value}")));
                }
            }
            "returns" => {
                if !normalized.contains(&normalize(&format!("return {value};"))) {
                    return Err(expectation_failed(format!("returns: {value}")));
                }
            }
            "local" => {
                let found = info
                    .stack
                    .local_var_offsets
                    .iter()
                    .any(|offset| format!("sp{offset:X}") == value);
                if !found {
                    return Err(expectation_failed(format!("local: {value}")));
                }
            }
            "arg" => {
                let found = info
                    .stack
                    .argument_offsets
                    .iter()
                    .any(|offset| format!("arg{:X}", offset / 4) == value);
                if !found {
                    return Err(expectation_failed(format!("arg: {value}")));
                }
            }
            "no-locals" => {
                if !info.stack.local_var_offsets.is_empty() {
                    return Err(expectation_failed("no-locals".to_owned()));
                }
            }
            "no-args" => {
                if !info.stack.argument_offsets.is_empty() {
                    return Err(expectation_failed("no-args".to_owned()));
                }
            }
            _ => return Err(TestError::InvalidDirective(directive.to_owned())),
        }
    }
    Ok(())
}
