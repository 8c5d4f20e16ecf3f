//! Parses a single instruction line into a mnemonic and its operands.

use std::fmt::Display;
use std::str::FromStr;

use logos::Logos;

use crate::ir::BinOp;
use crate::parse::LineError;
use crate::parse::lexer::Token;
use crate::reg::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
    Hi,
    Lo,
}

impl Display for MacroKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MacroKind::Hi => f.write_str("hi"),
            MacroKind::Lo => f.write_str("lo"),
        }
    }
}

/// One operand of an instruction, in the shape the translator consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Reg(Reg),
    Literal(i64),
    Symbol(String),
    /// `K($reg)`, with `K` either absent, a literal, or a `%lo` macro.
    AddressMode { offset: Option<Box<Arg>>, base: Reg },
    Macro { kind: MacroKind, arg: Box<Arg> },
    BinOp { lhs: Box<Arg>, op: BinOp, rhs: Box<Arg> },
}

impl Display for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Reg(reg) => write!(f, "${reg}"),
            Arg::Literal(value) => write!(f, "{value}"),
            Arg::Symbol(name) => f.write_str(name),
            Arg::AddressMode {
                offset: Some(offset),
                base,
            } => write!(f, "{offset}(${base})"),
            Arg::AddressMode { offset: None, base } => write!(f, "(${base})"),
            Arg::Macro { kind, arg } => write!(f, "%{kind}({arg})"),
            Arg::BinOp { lhs, op, rhs } => write!(f, "({lhs} {op} {rhs})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub mnemonic: String,
    pub args: Vec<Arg>,
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i == 0 {
                write!(f, " {arg}")?;
            } else {
                write!(f, ", {arg}")?;
            }
        }
        Ok(())
    }
}

pub fn parse_instruction(line: &str) -> Result<Instruction, LineError> {
    let line = line.trim();
    let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
        Some((mnemonic, rest)) => (mnemonic, rest),
        None => (line, ""),
    };
    if mnemonic.is_empty() {
        return Err(LineError::ExpectedMnemonic);
    }
    let tokens = Token::lexer(rest)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LineError::UnrecognisedInput(rest.to_owned()))?;
    let mut parser = ArgParser { tokens, pos: 0 };
    let args = parser.parse_args()?;
    Ok(Instruction {
        mnemonic: mnemonic.to_owned(),
        args,
    })
}

struct ArgParser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> ArgParser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token<'a>) -> Result<(), LineError> {
        if self.next().as_ref() == Some(&token) {
            Ok(())
        } else {
            Err(LineError::UnbalancedParens)
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>, LineError> {
        let mut args = Vec::new();
        if self.peek().is_none() {
            return Ok(args);
        }
        loop {
            args.push(self.parse_arg()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(_) => return Err(LineError::TrailingTokens),
                None => return Ok(args),
            }
        }
    }

    fn parse_arg(&mut self) -> Result<Arg, LineError> {
        match self.next() {
            Some(Token::Register(name)) => Ok(Arg::Reg(parse_reg(name)?)),
            Some(Token::Number(value)) => {
                if self.peek() == Some(&Token::LParen) {
                    let base = self.parse_base()?;
                    Ok(Arg::AddressMode {
                        offset: Some(Box::new(Arg::Literal(value))),
                        base,
                    })
                } else {
                    Ok(Arg::Literal(value))
                }
            }
            Some(Token::Ident(name)) => Ok(Arg::Symbol(name.to_owned())),
            Some(Token::Macro(name)) => {
                let kind = match name {
                    "hi" => MacroKind::Hi,
                    "lo" => MacroKind::Lo,
                    _ => return Err(LineError::UnknownMacro(name.to_owned())),
                };
                self.expect(Token::LParen)?;
                let inner = self.parse_value()?;
                self.expect(Token::RParen)?;
                let mac = Arg::Macro {
                    kind,
                    arg: Box::new(inner),
                };
                if self.peek() == Some(&Token::LParen) {
                    let base = self.parse_base()?;
                    Ok(Arg::AddressMode {
                        offset: Some(Box::new(mac)),
                        base,
                    })
                } else {
                    Ok(mac)
                }
            }
            Some(Token::LParen) => {
                // Either a bare `($reg)` address mode or a parenthesized
                // assembler expression such as `(sym >> 16)`.
                if let Some(Token::Register(name)) = self.peek() {
                    let base = parse_reg(name)?;
                    self.pos += 1;
                    self.expect(Token::RParen)?;
                    return Ok(Arg::AddressMode { offset: None, base });
                }
                let lhs = self.parse_value()?;
                let op = match self.next() {
                    Some(Token::Shl) => BinOp::Shl,
                    Some(Token::Shr) => BinOp::Shr,
                    Some(Token::Amp) => BinOp::BitAnd,
                    Some(Token::Pipe) => BinOp::BitOr,
                    Some(Token::Plus) => BinOp::Add,
                    _ => return Err(LineError::ExpectedOperator),
                };
                let rhs = self.parse_value()?;
                self.expect(Token::RParen)?;
                Ok(Arg::BinOp {
                    lhs: Box::new(lhs),
                    op,
                    rhs: Box::new(rhs),
                })
            }
            _ => Err(LineError::ExpectedArgument),
        }
    }

    /// A literal or symbol inside a macro or assembler expression.
    fn parse_value(&mut self) -> Result<Arg, LineError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Arg::Literal(value)),
            Some(Token::Ident(name)) => Ok(Arg::Symbol(name.to_owned())),
            _ => Err(LineError::ExpectedNumber),
        }
    }

    /// The `($reg)` suffix of an address mode.
    fn parse_base(&mut self) -> Result<Reg, LineError> {
        self.expect(Token::LParen)?;
        let base = match self.next() {
            Some(Token::Register(name)) => parse_reg(name)?,
            _ => return Err(LineError::ExpectedRegister),
        };
        self.expect(Token::RParen)?;
        Ok(base)
    }
}

fn parse_reg(name: &str) -> Result<Reg, LineError> {
    Reg::from_str(name).map_err(|_| LineError::UnknownRegister(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_operand_alu() {
        let instr = parse_instruction("addu $v0, $a0, $a1").unwrap();
        assert_eq!(instr.mnemonic, "addu");
        assert_eq!(
            instr.args,
            vec![Arg::Reg(Reg::V0), Arg::Reg(Reg::A0), Arg::Reg(Reg::A1)]
        );
    }

    #[test]
    fn address_modes() {
        let instr = parse_instruction("sw $ra, 0x14($sp)").unwrap();
        assert_eq!(
            instr.args[1],
            Arg::AddressMode {
                offset: Some(Box::new(Arg::Literal(0x14))),
                base: Reg::Sp,
            }
        );
        let instr = parse_instruction("lw $v0, ($a0)").unwrap();
        assert_eq!(
            instr.args[1],
            Arg::AddressMode {
                offset: None,
                base: Reg::A0,
            }
        );
        let instr = parse_instruction("lw $v0, %lo(glob)($at)").unwrap();
        assert_eq!(
            instr.args[1],
            Arg::AddressMode {
                offset: Some(Box::new(Arg::Macro {
                    kind: MacroKind::Lo,
                    arg: Box::new(Arg::Symbol("glob".into())),
                })),
                base: Reg::At,
            }
        );
    }

    #[test]
    fn assembler_expressions() {
        let instr = parse_instruction("lui $at, (sym >> 16)").unwrap();
        assert_eq!(
            instr.args[1],
            Arg::BinOp {
                lhs: Box::new(Arg::Symbol("sym".into())),
                op: BinOp::Shr,
                rhs: Box::new(Arg::Literal(16)),
            }
        );
    }

    #[test]
    fn numeric_register_alias() {
        let instr = parse_instruction("jr $31").unwrap();
        assert_eq!(instr.args, vec![Arg::Reg(Reg::Ra)]);
    }

    #[test]
    fn rejects_unknown_macro() {
        assert!(matches!(
            parse_instruction("lui $at, %gp_rel(sym)"),
            Err(LineError::UnknownMacro(_))
        ));
    }
}
