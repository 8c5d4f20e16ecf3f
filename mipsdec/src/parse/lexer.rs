//! Tokenizes the operand text of a single instruction.

use logos::Logos;

fn parse_imm(s: &str) -> Option<i64> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        rest.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+")]
pub enum Token<'a> {
    /// A register reference, without its `$` sigil.
    #[regex(r"\$[A-Za-z0-9_]+", |lex| &lex.slice()[1..])]
    Register(&'a str),

    #[regex(r"-?(0[xX][0-9a-fA-F]+|[0-9]+)", |lex| parse_imm(lex.slice()))]
    Number(i64),

    /// A symbol or label name. Branch targets keep their leading dot here.
    #[regex(r"[A-Za-z_.][A-Za-z0-9_.]*", |lex| lex.slice())]
    Ident(&'a str),

    /// An assembler macro such as `%hi` or `%lo`, without the `%`.
    #[regex(r"%[a-z]+", |lex| &lex.slice()[1..])]
    Macro(&'a str),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("+")]
    Plus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(s: &str) -> Vec<Token<'_>> {
        Token::lexer(s).collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn registers_numbers_and_macros() {
        assert_eq!(
            lex("$a0, $sp, -0x10"),
            vec![
                Token::Register("a0"),
                Token::Comma,
                Token::Register("sp"),
                Token::Comma,
                Token::Number(-0x10),
            ]
        );
        assert_eq!(
            lex("%lo(some_sym)($v0)"),
            vec![
                Token::Macro("lo"),
                Token::LParen,
                Token::Ident("some_sym"),
                Token::RParen,
                Token::LParen,
                Token::Register("v0"),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn shifted_expression() {
        assert_eq!(
            lex("(sym >> 16)"),
            vec![
                Token::LParen,
                Token::Ident("sym"),
                Token::Shr,
                Token::Number(16),
                Token::RParen,
            ]
        );
    }
}
