use std::{collections::VecDeque, fmt::Display, str::FromStr};

use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum LexerError {
    #[error("The fragment \"{fragment}\" on line {line} is not a token")]
    UnknownFragment { fragment: String, line: usize },
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum TokenStreamError {
    #[error("Line {number} is not a token (\"{text}\")")]
    InvalidLine { number: usize, text: String },
    #[error("Unknown token kind \"{0}\"")]
    UnknownKind(String),
    #[error("Invalid source line number \"{0}\"")]
    InvalidLineNumber(String),
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum TokenKind {
    Assign,     // =
    Plus,       // +
    Minus,      // -
    Asterisk,   // *
    Slash,      // /
    OpenParen,  // (
    CloseParen, // )

    // Keywords
    KWFor,  // za
    KWFrom, // od
    KWTo,   // do
    KWEnd,  // az

    Identifier,
    Number,
}

impl TokenKind {
    /// The name used for this kind in token streams and derivation trees.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Assign => "OP_PRIDRUZI",
            TokenKind::Plus => "OP_PLUS",
            TokenKind::Minus => "OP_MINUS",
            TokenKind::Asterisk => "OP_PUTA",
            TokenKind::Slash => "OP_DIJELI",
            TokenKind::OpenParen => "L_ZAGRADA",
            TokenKind::CloseParen => "D_ZAGRADA",
            TokenKind::KWFor => "KR_ZA",
            TokenKind::KWFrom => "KR_OD",
            TokenKind::KWTo => "KR_DO",
            TokenKind::KWEnd => "KR_AZ",
            TokenKind::Identifier => "IDN",
            TokenKind::Number => "BROJ",
        }
    }

    /// Kinds whose lexeme is fixed.
    pub fn from_lexeme(lexeme: &str) -> Option<Self> {
        Some(match lexeme {
            "=" => Self::Assign,
            "+" => Self::Plus,
            "-" => Self::Minus,
            "*" => Self::Asterisk,
            "/" => Self::Slash,
            "(" => Self::OpenParen,
            ")" => Self::CloseParen,
            "za" => Self::KWFor,
            "od" => Self::KWFrom,
            "do" => Self::KWTo,
            "az" => Self::KWEnd,
            _ => return None,
        })
    }

    fn from_operator_char(ch: char) -> Option<Self> {
        Some(match ch {
            '=' => Self::Assign,
            '+' => Self::Plus,
            '-' => Self::Minus,
            '*' => Self::Asterisk,
            '/' => Self::Slash,
            '(' => Self::OpenParen,
            ')' => Self::CloseParen,
            _ => return None,
        })
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = TokenStreamError;

    /// Accepts the stream names as well as the descriptive aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "OP_PRIDRUZI" | "OP_ASSIGN" => Self::Assign,
            "OP_PLUS" => Self::Plus,
            "OP_MINUS" => Self::Minus,
            "OP_PUTA" | "OP_MUL" => Self::Asterisk,
            "OP_DIJELI" | "OP_DIV" => Self::Slash,
            "L_ZAGRADA" | "L_PAREN" => Self::OpenParen,
            "D_ZAGRADA" | "R_PAREN" => Self::CloseParen,
            "KR_ZA" | "KW_FOR" => Self::KWFor,
            "KR_OD" | "KW_FROM" => Self::KWFrom,
            "KR_DO" | "KW_TO" => Self::KWTo,
            "KR_AZ" | "KW_END" => Self::KWEnd,
            "IDN" | "IDENTIFIER" => Self::Identifier,
            "BROJ" | "NUMBER" => Self::Number,
            other => return Err(TokenStreamError::UnknownKind(other.to_owned())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based source line.
    pub line: usize,
    pub lexeme: String,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, lexeme: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            lexeme: lexeme.into(),
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.kind, self.line, self.lexeme)
    }
}

impl FromStr for Token {
    type Err = TokenStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(kind), Some(line), Some(lexeme), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenStreamError::InvalidLine {
                number: 0,
                text: s.to_owned(),
            });
        };

        Ok(Token {
            kind: kind.parse()?,
            line: line
                .parse()
                .map_err(|_| TokenStreamError::InvalidLineNumber(line.to_owned()))?,
            lexeme: lexeme.to_owned(),
        })
    }
}

/// Reads the one-token-per-line text format. Blank lines are skipped.
pub fn read_token_stream(input: &str) -> Result<Vec<Token>, TokenStreamError> {
    let mut tokens = vec![];

    for (i, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let token = line.parse::<Token>().map_err(|err| match err {
            TokenStreamError::InvalidLine { text, .. } => TokenStreamError::InvalidLine {
                number: i + 1,
                text,
            },
            err => err,
        })?;
        tokens.push(token);
    }

    Ok(tokens)
}

pub fn write_token_stream(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|token| format!("{token}\n"))
        .collect()
}

/// Splits source text into tokens, one source line at a time.
///
/// Whitespace separated chunks are classified as a whole first. Chunks that
/// are neither a known lexeme, a number nor an identifier are cut at every
/// operator character and the pieces are classified again.
#[derive(Debug)]
pub struct Lexer {
    lines: Vec<String>,
    line: usize,
    pending: VecDeque<Token>,
}

impl Lexer {
    pub fn new(input: String) -> Self {
        Self {
            lines: input.lines().map(str::to_owned).collect(),
            line: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn tokenize(self) -> Result<Vec<Token>, LexerError> {
        self.collect()
    }

    fn lex_line(&mut self, line: usize) -> Result<(), LexerError> {
        let text = std::mem::take(&mut self.lines[line - 1]);
        let code = text.split("//").next().unwrap_or_default();

        for chunk in code.split_whitespace() {
            self.lex_fragment(chunk, line)?;
        }

        Ok(())
    }

    fn lex_fragment(&mut self, fragment: &str, line: usize) -> Result<(), LexerError> {
        if let Some(kind) = TokenKind::from_lexeme(fragment) {
            self.pending.push_back(Token::new(kind, line, fragment));
        } else if is_number(fragment) {
            self.pending
                .push_back(Token::new(TokenKind::Number, line, fragment));
        } else if is_identifier(fragment) {
            self.pending
                .push_back(Token::new(TokenKind::Identifier, line, fragment));
        } else if fragment.chars().count() > 1 {
            let mut piece = String::new();
            let mut split = false;

            for ch in fragment.chars() {
                match TokenKind::from_operator_char(ch) {
                    Some(kind) => {
                        if !piece.is_empty() {
                            self.lex_fragment(&piece, line)?;
                            piece.clear();
                        }
                        self.pending
                            .push_back(Token::new(kind, line, ch.to_string()));
                        split = true;
                    }
                    None => piece.push(ch),
                }
            }

            if !split {
                return Err(LexerError::UnknownFragment {
                    fragment: fragment.to_owned(),
                    line,
                });
            }

            if !piece.is_empty() {
                self.lex_fragment(&piece, line)?;
            }
        } else if !fragment.is_empty() {
            // A lone unmatched character is dropped, not reported.
            warn!(line, fragment, "dropping unrecognized character");
        }

        Ok(())
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(Ok(token));
            }

            if self.line >= self.lines.len() {
                return None;
            }

            self.line += 1;
            if let Err(err) = self.lex_line(self.line) {
                self.line = self.lines.len();
                return Some(Err(err));
            }
        }
    }
}

fn is_number(fragment: &str) -> bool {
    !fragment.is_empty() && fragment.chars().all(|ch| ch.is_ascii_digit())
}

fn is_identifier(fragment: &str) -> bool {
    let mut chars = fragment.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_alphanumeric() || ch == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input.to_owned())
            .tokenize()
            .expect("should tokenize")
            .into_iter()
            .map(|tok| tok.kind)
            .collect()
    }

    #[test]
    fn test_next_token() {
        let input = r"
        rez = 0
        za i od 1 do 10
            rez = rez + i
        az
        "
        .to_owned();
        let tokens = Lexer::new(input).tokenize().expect("should tokenize");

        let expected = vec![
            Token::new(TokenKind::Identifier, 2, "rez"),
            Token::new(TokenKind::Assign, 2, "="),
            Token::new(TokenKind::Number, 2, "0"),
            Token::new(TokenKind::KWFor, 3, "za"),
            Token::new(TokenKind::Identifier, 3, "i"),
            Token::new(TokenKind::KWFrom, 3, "od"),
            Token::new(TokenKind::Number, 3, "1"),
            Token::new(TokenKind::KWTo, 3, "do"),
            Token::new(TokenKind::Number, 3, "10"),
            Token::new(TokenKind::Identifier, 4, "rez"),
            Token::new(TokenKind::Assign, 4, "="),
            Token::new(TokenKind::Identifier, 4, "rez"),
            Token::new(TokenKind::Plus, 4, "+"),
            Token::new(TokenKind::Identifier, 4, "i"),
            Token::new(TokenKind::KWEnd, 5, "az"),
        ];

        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_glued_operators() {
        assert_eq!(
            kinds("x=a*(b+2)/-3"),
            vec![
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Identifier,
                TokenKind::Asterisk,
                TokenKind::OpenParen,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::CloseParen,
                TokenKind::Slash,
                TokenKind::Minus,
                TokenKind::Number,
            ]
        );
    }

    #[test]
    fn test_keywords_need_whole_chunk() {
        assert_eq!(
            kinds("zaba=za"),
            vec![TokenKind::Identifier, TokenKind::Assign, TokenKind::KWFor]
        );
    }

    #[test]
    fn test_comments_are_stripped() {
        assert_eq!(
            kinds("x = 1 // x = 2\n// whole line\ny = x"),
            vec![
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Number,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn test_lone_unknown_character_is_dropped() {
        let tokens = Lexer::new("x=1+$ y = $".to_owned())
            .tokenize()
            .expect("should tokenize");
        let lexemes: Vec<_> = tokens.iter().map(|tok| tok.lexeme.as_str()).collect();

        assert_eq!(lexemes, vec!["x", "=", "1", "+", "y", "="]);
    }

    #[test]
    fn test_unknown_fragment() {
        let err = Lexer::new("x = 3x".to_owned())
            .tokenize()
            .expect_err("3x is not a token");

        assert_eq!(
            err,
            LexerError::UnknownFragment {
                fragment: "3x".to_owned(),
                line: 1
            }
        );
    }

    #[test]
    fn test_token_stream_round_trip() {
        let input = "IDN 1 x\nOP_PRIDRUZI 1 =\n\nBROJ 1 12\n";
        let tokens = read_token_stream(input).expect("should read");

        assert_eq!(
            tokens,
            vec![
                Token::new(TokenKind::Identifier, 1, "x"),
                Token::new(TokenKind::Assign, 1, "="),
                Token::new(TokenKind::Number, 1, "12"),
            ]
        );
        assert_eq!(write_token_stream(&tokens), "IDN 1 x\nOP_PRIDRUZI 1 =\nBROJ 1 12\n");
    }

    #[test]
    fn test_token_stream_aliases_and_errors() {
        let tokens = read_token_stream("KW_FOR 3 za\nIDENTIFIER 3 i").expect("should read");
        assert_eq!(tokens[0].kind, TokenKind::KWFor);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);

        assert_eq!(
            read_token_stream("IDN 1"),
            Err(TokenStreamError::InvalidLine {
                number: 1,
                text: "IDN 1".to_owned()
            })
        );
        assert_eq!(
            read_token_stream("OP_MOD 1 %"),
            Err(TokenStreamError::UnknownKind("OP_MOD".to_owned()))
        );
    }
}
