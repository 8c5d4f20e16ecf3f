//! Reads a MIPS `.s` listing into functions, labels and instructions.

use std::fmt::Display;

use thiserror::Error;

pub mod instruction;
pub mod lexer;

pub use instruction::{Arg, Instruction, MacroKind, parse_instruction};

/// The body of a function, in source order.
#[derive(Debug, Clone)]
pub enum Item {
    Instr(Instruction),
    Label(String),
}

#[derive(Debug)]
pub struct AsmFunction {
    pub name: String,
    pub body: Vec<Item>,
    pub jumptable_labels: Vec<String>,
}

impl Display for AsmFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "glabel {}", self.name)?;
        for item in &self.body {
            match item {
                Item::Instr(instr) => writeln!(f, "  {instr}")?,
                Item::Label(name) => writeln!(f, "  .{name}:")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct AsmFile {
    pub filename: String,
    pub functions: Vec<AsmFunction>,
}

#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("expected a mnemonic")]
    ExpectedMnemonic,
    #[error("expected an argument")]
    ExpectedArgument,
    #[error("expected a register")]
    ExpectedRegister,
    #[error("expected a number or symbol")]
    ExpectedNumber,
    #[error("expected an operator")]
    ExpectedOperator,
    #[error("unknown register ${0}")]
    UnknownRegister(String),
    #[error("unknown assembler macro %{0}")]
    UnknownMacro(String),
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("trailing tokens after argument list")]
    TrailingTokens,
    #[error("unrecognised characters: {0}")]
    UnrecognisedInput(String),
    #[error("code outside of a function")]
    OutsideFunction,
}

#[derive(Debug, Error)]
#[error("line {line_number}: {error}")]
pub struct ParseError {
    pub line_number: usize,
    pub error: LineError,
}

/// A jump-table label as emitted by the disassembler: `L` followed by the
/// eight uppercase hex digits of its address.
fn is_jumptable_label(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('L') else {
        return false;
    };
    rest.len() >= 8
        && rest
            .bytes()
            .take(8)
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

fn strip_comments(line: &str) -> String {
    let mut line = line.to_owned();
    while let Some(start) = line.find("/*") {
        match line[start..].find("*/") {
            Some(end) => line.replace_range(start..start + end + 2, ""),
            None => line.truncate(start),
        }
    }
    if let Some(pos) = line.find('#') {
        line.truncate(pos);
    }
    line.trim().to_owned()
}

/// Parse a whole listing. Instructions and labels accumulate into the most
/// recent `glabel`-introduced function.
pub fn parse(src: &str, filename: &str) -> Result<AsmFile, ParseError> {
    let mut file = AsmFile {
        filename: filename.to_owned(),
        functions: Vec::new(),
    };

    for (index, raw_line) in src.lines().enumerate() {
        let line_number = index + 1;
        let fail = |error| ParseError { line_number, error };
        let line = strip_comments(raw_line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with('.') && line.ends_with(':') {
            let name = line.trim_start_matches('.').trim_end_matches(':');
            let function = file.functions.last_mut().ok_or(fail(LineError::OutsideFunction))?;
            function.body.push(Item::Label(name.to_owned()));
        } else if line.starts_with('.') {
            // Assembler directive.
        } else if let Some(rest) = line.strip_prefix("glabel ") {
            let name = rest.trim();
            if is_jumptable_label(name) {
                let function = file.functions.last_mut().ok_or(fail(LineError::OutsideFunction))?;
                function.body.push(Item::Label(name.to_owned()));
                function.jumptable_labels.push(name.to_owned());
            } else {
                file.functions.push(AsmFunction {
                    name: name.to_owned(),
                    body: Vec::new(),
                    jumptable_labels: Vec::new(),
                });
            }
        } else {
            let instr = parse_instruction(&line).map_err(fail)?;
            let function = file.functions.last_mut().ok_or(fail(LineError::OutsideFunction))?;
            function.body.push(Item::Instr(instr));
        }
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_functions_and_labels() {
        let src = "\
glabel first
  addiu $v0, $zero, 5
  jr $ra
  nop

glabel second
.L1:
  b .L1
  nop
";
        let file = parse(src, "test.s").unwrap();
        assert_eq!(file.functions.len(), 2);
        assert_eq!(file.functions[0].name, "first");
        assert_eq!(file.functions[0].body.len(), 3);
        assert!(matches!(&file.functions[1].body[0], Item::Label(l) if l == "L1"));
    }

    #[test]
    fn comments_and_directives_are_stripped() {
        let src = "\
glabel f
  .ent f
  addiu $v0, $zero, 1  # load result
  jr $ra /* return */
";
        let file = parse(src, "test.s").unwrap();
        assert_eq!(file.functions[0].body.len(), 2);
    }

    #[test]
    fn jumptable_labels_are_recorded() {
        let src = "\
glabel f
glabel L80240A10
  jr $ra
";
        let file = parse(src, "test.s").unwrap();
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].jumptable_labels, vec!["L80240A10"]);
    }

    #[test]
    fn code_outside_function_is_an_error() {
        let err = parse("  addiu $v0, $zero, 5\n", "test.s").unwrap_err();
        assert_eq!(err.line_number, 1);
        assert_eq!(err.error, LineError::OutsideFunction);
    }
}
