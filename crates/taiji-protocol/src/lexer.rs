//! Tokenizer for operator console lines.
//!
//! Recognizes identifiers, decimal integers and double-quoted strings.
//! Anything else comes out one character at a time. Quoted strings keep
//! their quotes and escapes verbatim, since the broker forwards the
//! literal text to clients.

use std::iter::Peekable;
use std::str::CharIndices;

/// A lexical token borrowed from the input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// `[_\p{L}][_\p{L}\p{N}]*`
    Ident(&'a str),
    /// Run of ASCII digits.
    Int(&'a str),
    /// Double-quoted string, including the quotes.
    Str(&'a str),
    /// A string whose closing quote is missing before end of line.
    Unterminated(&'a str),
    /// Any other single character.
    Char(char),
}

/// Iterator over the tokens of one console line.
pub struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    /// Byte offset of the next unread character.
    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.src.len(), |&(i, _)| i)
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        self.src.get(start..end).unwrap_or_default()
    }

    fn skip_whitespace(&mut self) {
        while self
            .chars
            .next_if(|&(_, c)| matches!(c, ' ' | '\t' | '\r' | '\n'))
            .is_some()
        {}
    }

    fn scan_ident(&mut self, start: usize) -> Token<'a> {
        while self
            .chars
            .next_if(|&(_, c)| c == '_' || c.is_alphanumeric())
            .is_some()
        {}
        let end = self.offset();
        Token::Ident(self.slice(start, end))
    }

    fn scan_int(&mut self, start: usize) -> Token<'a> {
        while self.chars.next_if(|&(_, c)| c.is_ascii_digit()).is_some() {}
        let end = self.offset();
        Token::Int(self.slice(start, end))
    }

    fn scan_string(&mut self, start: usize) -> Token<'a> {
        loop {
            match self.chars.peek().copied() {
                None | Some((_, '\n')) => {
                    let end = self.offset();
                    return Token::Unterminated(self.slice(start, end));
                }
                Some((_, '"')) => {
                    self.chars.next();
                    let end = self.offset();
                    return Token::Str(self.slice(start, end));
                }
                Some((_, '\\')) => {
                    self.chars.next();
                    // An escaped newline still ends the line.
                    self.chars.next_if(|&(_, c)| c != '\n');
                }
                Some(_) => {
                    self.chars.next();
                }
            }
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let (start, c) = self.chars.next()?;

        let token = match c {
            '"' => self.scan_string(start),
            c if c.is_ascii_digit() => self.scan_int(start),
            c if c == '_' || c.is_alphabetic() => self.scan_ident(start),
            c => Token::Char(c),
        };
        Some(token)
    }
}
