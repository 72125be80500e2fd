//! SQL tokenization
//!
//! Byte-cursor tokenizer for the SQL dialect: case-insensitive keywords,
//! identifiers, integer and float literals, single- or double-quoted
//! strings with backslash escapes, operators, and punctuation. Whitespace
//! and `--` comments are skipped. Every token carries its 1-based line and
//! column for error reporting.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::error::{Error, ErrorCode, Result};

// ============================================================================
// Token Types
// ============================================================================

/// Token kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    Integer,
    Float,
    String,

    // Identifiers and keywords
    Identifier,

    // Keywords (alphabetical)
    And,
    As,
    Asc,
    Bigint,
    Bool,
    Boolean,
    By,
    Create,
    Date,
    Delete,
    Desc,
    Distinct,
    Double,
    Drop,
    Exists,
    False,
    FloatKw,
    From,
    Full,
    Group,
    Having,
    If,
    In,
    Index,
    Inner,
    Insert,
    Int,
    IntegerKw,
    Into,
    Is,
    Join,
    Left,
    Like,
    Limit,
    Not,
    Null,
    Offset,
    On,
    Or,
    Order,
    Outer,
    Right,
    Select,
    Set,
    Table,
    Text,
    Timestamp,
    True,
    Unique,
    Update,
    Using,
    Values,
    Varchar,
    Where,

    // Operators
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %
    Eq,      // =
    Ne,      // <> or !=
    Lt,      // <
    Le,      // <=
    Gt,      // >
    Ge,      // >=

    // Punctuation
    LParen,    // (
    RParen,    // )
    Comma,     // ,
    Semicolon, // ;
    Dot,       // .

    // Special
    Eof,
}

impl TokenKind {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        KEYWORDS.values().any(|k| k == self)
    }
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, TokenKind> = {
        let mut map = HashMap::new();
        map.insert("AND", TokenKind::And);
        map.insert("AS", TokenKind::As);
        map.insert("ASC", TokenKind::Asc);
        map.insert("BIGINT", TokenKind::Bigint);
        map.insert("BOOL", TokenKind::Bool);
        map.insert("BOOLEAN", TokenKind::Boolean);
        map.insert("BY", TokenKind::By);
        map.insert("CREATE", TokenKind::Create);
        map.insert("DATE", TokenKind::Date);
        map.insert("DELETE", TokenKind::Delete);
        map.insert("DESC", TokenKind::Desc);
        map.insert("DISTINCT", TokenKind::Distinct);
        map.insert("DOUBLE", TokenKind::Double);
        map.insert("DROP", TokenKind::Drop);
        map.insert("EXISTS", TokenKind::Exists);
        map.insert("FALSE", TokenKind::False);
        map.insert("FLOAT", TokenKind::FloatKw);
        map.insert("FROM", TokenKind::From);
        map.insert("FULL", TokenKind::Full);
        map.insert("GROUP", TokenKind::Group);
        map.insert("HAVING", TokenKind::Having);
        map.insert("IF", TokenKind::If);
        map.insert("IN", TokenKind::In);
        map.insert("INDEX", TokenKind::Index);
        map.insert("INNER", TokenKind::Inner);
        map.insert("INSERT", TokenKind::Insert);
        map.insert("INT", TokenKind::Int);
        map.insert("INTEGER", TokenKind::IntegerKw);
        map.insert("INTO", TokenKind::Into);
        map.insert("IS", TokenKind::Is);
        map.insert("JOIN", TokenKind::Join);
        map.insert("LEFT", TokenKind::Left);
        map.insert("LIKE", TokenKind::Like);
        map.insert("LIMIT", TokenKind::Limit);
        map.insert("NOT", TokenKind::Not);
        map.insert("NULL", TokenKind::Null);
        map.insert("OFFSET", TokenKind::Offset);
        map.insert("ON", TokenKind::On);
        map.insert("OR", TokenKind::Or);
        map.insert("ORDER", TokenKind::Order);
        map.insert("OUTER", TokenKind::Outer);
        map.insert("RIGHT", TokenKind::Right);
        map.insert("SELECT", TokenKind::Select);
        map.insert("SET", TokenKind::Set);
        map.insert("TABLE", TokenKind::Table);
        map.insert("TEXT", TokenKind::Text);
        map.insert("TIMESTAMP", TokenKind::Timestamp);
        map.insert("TRUE", TokenKind::True);
        map.insert("UNIQUE", TokenKind::Unique);
        map.insert("UPDATE", TokenKind::Update);
        map.insert("USING", TokenKind::Using);
        map.insert("VALUES", TokenKind::Values);
        map.insert("VARCHAR", TokenKind::Varchar);
        map.insert("WHERE", TokenKind::Where);
        map
    };
}

/// True when the word is a keyword of the dialect (case-insensitive)
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains_key(word.to_uppercase().as_str())
}

// ============================================================================
// Token
// ============================================================================

/// A token from the SQL source
#[derive(Debug, Clone, Copy)]
pub struct Token {
    /// Token type
    pub kind: TokenKind,
    /// Start position in source
    pub start: usize,
    /// End position in source (exclusive)
    pub end: usize,
    /// Line number (1-based)
    pub line: u32,
    /// Column number (1-based)
    pub column: u32,
}

impl Token {
    /// Get the text of this token from the source
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Tokenize a full SQL statement
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokenizer = Tokenizer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = tokenizer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

/// Decode the contents of a string literal token (quotes and escapes)
pub fn decode_string(text: &str) -> Result<String> {
    let bytes = text.as_bytes();
    if bytes.len() < 2 {
        return Err(Error::with_message(ErrorCode::Parse, "malformed string literal"));
    }
    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {
                return Err(Error::with_message(
                    ErrorCode::Parse,
                    "dangling escape in string literal",
                ))
            }
        }
    }
    Ok(out)
}

// ============================================================================
// Tokenizer
// ============================================================================

struct Tokenizer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Tokenizer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let start = self.pos;
        let line = self.line;
        let column = self.column;

        if self.is_eof() {
            return Ok(Token {
                kind: TokenKind::Eof,
                start,
                end: start,
                line,
                column,
            });
        }

        let c = self.current();
        let kind = if c.is_ascii_digit() {
            self.scan_number()?
        } else if c.is_ascii_alphabetic() || c == b'_' {
            self.scan_identifier()
        } else if c == b'\'' || c == b'"' {
            self.scan_string()?
        } else {
            self.scan_operator()?
        };

        Ok(Token {
            kind,
            start,
            end: self.pos,
            line,
            column,
        })
    }

    /// Scan an integer or float literal
    fn scan_number(&mut self) -> Result<TokenKind> {
        while !self.is_eof() && self.current().is_ascii_digit() {
            self.advance();
        }

        let mut kind = TokenKind::Integer;
        if !self.is_eof() && self.current() == b'.' && self.peek().map_or(false, |b| b.is_ascii_digit())
        {
            kind = TokenKind::Float;
            self.advance();
            while !self.is_eof() && self.current().is_ascii_digit() {
                self.advance();
            }
        }

        // Optional exponent
        if !self.is_eof() && (self.current() == b'e' || self.current() == b'E') {
            let saved = self.pos;
            self.advance();
            if !self.is_eof() && (self.current() == b'+' || self.current() == b'-') {
                self.advance();
            }
            if !self.is_eof() && self.current().is_ascii_digit() {
                kind = TokenKind::Float;
                while !self.is_eof() && self.current().is_ascii_digit() {
                    self.advance();
                }
            } else {
                self.pos = saved;
            }
        }

        Ok(kind)
    }

    /// Scan an identifier or keyword
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.pos;
        while !self.is_eof() {
            let c = self.current();
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.source[start..self.pos];
        *KEYWORDS
            .get(text.to_uppercase().as_str())
            .unwrap_or(&TokenKind::Identifier)
    }

    /// Scan a single- or double-quoted string with backslash escapes
    fn scan_string(&mut self) -> Result<TokenKind> {
        let quote = self.current();
        let start_line = self.line;
        self.advance();

        while !self.is_eof() {
            let c = self.current();
            if c == b'\\' {
                self.advance();
                if self.is_eof() {
                    break;
                }
                if self.current() == b'\n' {
                    self.line += 1;
                    self.column = 0;
                }
                self.advance();
                continue;
            }
            if c == quote {
                self.advance();
                return Ok(TokenKind::String);
            }
            if c == b'\n' {
                self.line += 1;
                self.column = 0;
            }
            self.advance();
        }

        Err(Error::with_message(
            ErrorCode::Parse,
            format!("unterminated string starting at line {}", start_line),
        ))
    }

    /// Scan an operator or punctuation
    fn scan_operator(&mut self) -> Result<TokenKind> {
        let line = self.line;
        let column = self.column;
        let c = self.current();
        self.advance();

        match c {
            b'+' => Ok(TokenKind::Plus),
            b'-' => Ok(TokenKind::Minus),
            b'*' => Ok(TokenKind::Star),
            b'/' => Ok(TokenKind::Slash),
            b'%' => Ok(TokenKind::Percent),
            b'=' => Ok(TokenKind::Eq),
            b'<' => {
                if !self.is_eof() && self.current() == b'=' {
                    self.advance();
                    Ok(TokenKind::Le)
                } else if !self.is_eof() && self.current() == b'>' {
                    self.advance();
                    Ok(TokenKind::Ne)
                } else {
                    Ok(TokenKind::Lt)
                }
            }
            b'>' => {
                if !self.is_eof() && self.current() == b'=' {
                    self.advance();
                    Ok(TokenKind::Ge)
                } else {
                    Ok(TokenKind::Gt)
                }
            }
            b'!' => {
                if !self.is_eof() && self.current() == b'=' {
                    self.advance();
                    Ok(TokenKind::Ne)
                } else {
                    Err(Error::with_message(
                        ErrorCode::Parse,
                        format!("unexpected character '!' at line {}, column {}", line, column),
                    ))
                }
            }
            b'(' => Ok(TokenKind::LParen),
            b')' => Ok(TokenKind::RParen),
            b',' => Ok(TokenKind::Comma),
            b';' => Ok(TokenKind::Semicolon),
            b'.' => Ok(TokenKind::Dot),
            _ => Err(Error::with_message(
                ErrorCode::Parse,
                format!(
                    "unexpected character '{}' at line {}, column {}",
                    c as char, line, column
                ),
            )),
        }
    }

    /// Skip whitespace and -- comments
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while !self.is_eof() && self.current().is_ascii_whitespace() {
                if self.current() == b'\n' {
                    self.line += 1;
                    self.column = 0;
                }
                self.advance();
            }

            if !self.is_eof() && self.current() == b'-' && self.peek() == Some(b'-') {
                while !self.is_eof() && self.current() != b'\n' {
                    self.advance();
                }
                continue;
            }

            break;
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn current(&self) -> u8 {
        self.bytes[self.pos]
    }

    fn peek(&self) -> Option<u8> {
        if self.pos + 1 < self.bytes.len() {
            Some(self.bytes[self.pos + 1])
        } else {
            None
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
        self.column += 1;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        tokenize(sql).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(
            kinds("select From WHERE"),
            vec![
                TokenKind::Select,
                TokenKind::From,
                TokenKind::Where,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 3e4"),
            vec![
                TokenKind::Integer,
                TokenKind::Float,
                TokenKind::Float,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("= <> != < <= > >= + - * / %"),
            vec![
                TokenKind::Eq,
                TokenKind::Ne,
                TokenKind::Ne,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Gt,
                TokenKind::Ge,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r"SELECT 'it\'s here'").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::String);
        let text = tokens[1].text(r"SELECT 'it\'s here'");
        assert_eq!(decode_string(text).unwrap(), "it's here");
    }

    #[test]
    fn test_double_quoted_string() {
        let sql = r#"SELECT "hello""#;
        let tokens = tokenize(sql).unwrap();
        assert_eq!(tokens[1].kind, TokenKind::String);
        assert_eq!(decode_string(tokens[1].text(sql)).unwrap(), "hello");
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("SELECT -- this is a comment\n1"),
            vec![TokenKind::Select, TokenKind::Integer, TokenKind::Eof]
        );
    }

    #[test]
    fn test_line_and_column_tracking() {
        let sql = "SELECT\n  name";
        let tokens = tokenize(sql).unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].column, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[1].column, 3);
    }

    #[test]
    fn test_unterminated_string_fails() {
        let err = tokenize("SELECT 'oops").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parse);
    }

    #[test]
    fn test_stray_character_fails() {
        let err = tokenize("SELECT ^").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parse);
    }

    #[test]
    fn test_qualified_identifier() {
        assert_eq!(
            kinds("e.dept_id"),
            vec![
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );
    }
}
