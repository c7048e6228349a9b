//! Token definitions for the formula lexer.
//!
//! Uses the `logos` crate for fast lexing. ASCII and Unicode spellings of the
//! same connective lex to the same token.

use logos::Logos;

/// Tokens of the formula language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")] // Skip whitespace
pub enum Token {
    // Brackets
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    // Punctuation
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("~")]
    Tilde,
    #[token("-:")]
    DashColon,

    // Connectives
    #[token("!")]
    #[token("¬")]
    #[token("not")]
    Not,
    #[token("&")]
    #[token("∧")]
    #[token("/\\")]
    #[token("and")]
    And,
    #[token("|")]
    #[token("∨")]
    #[token("\\/")]
    #[token("or")]
    Or,
    #[token("->")]
    #[token("=>")]
    #[token("→")]
    #[token("implies")]
    Implies,
    #[token("<->")]
    #[token("<=>")]
    #[token("↔")]
    #[token("iff")]
    Iff,

    // Quantifiers
    #[token("forall")]
    #[token("∀")]
    Forall,
    #[token("exists")]
    #[token("∃")]
    Exists,

    // Symbols and variables
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

const RESERVED_WORDS: &[&str] = &["forall", "exists", "not", "and", "or", "implies", "iff"];

/// True for words the lexer claims as keywords; these cannot name symbols.
pub fn is_reserved_word(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Tilde => write!(f, "~"),
            Token::DashColon => write!(f, "-:"),
            Token::Not => write!(f, "!"),
            Token::And => write!(f, "&"),
            Token::Or => write!(f, "|"),
            Token::Implies => write!(f, "->"),
            Token::Iff => write!(f, "<->"),
            Token::Forall => write!(f, "forall"),
            Token::Exists => write!(f, "exists"),
            Token::Ident(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Token::lexer(input).map(|t| t.unwrap()).collect()
    }

    #[test]
    fn test_spellings_agree() {
        assert_eq!(lex("! ¬ not"), vec![Token::Not; 3]);
        assert_eq!(lex("& ∧ /\\ and"), vec![Token::And; 4]);
        assert_eq!(lex("| ∨ \\/ or"), vec![Token::Or; 4]);
        assert_eq!(lex("-> => → implies"), vec![Token::Implies; 4]);
        assert_eq!(lex("<-> <=> ↔ iff"), vec![Token::Iff; 4]);
        assert_eq!(lex("forall ∀ exists ∃"), vec![Token::Forall, Token::Forall, Token::Exists, Token::Exists]);
    }

    #[test]
    fn test_compact_punctuation() {
        assert_eq!(
            lex("Ax~D: P(x) ; !Q(x) -:"),
            vec![
                Token::Ident("Ax".into()),
                Token::Tilde,
                Token::Ident("D".into()),
                Token::Colon,
                Token::Ident("P".into()),
                Token::LParen,
                Token::Ident("x".into()),
                Token::RParen,
                Token::Semicolon,
                Token::Not,
                Token::Ident("Q".into()),
                Token::LParen,
                Token::Ident("x".into()),
                Token::RParen,
                Token::DashColon,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(lex("forallx"), vec![Token::Ident("forallx".into())]);
        assert_eq!(lex("order"), vec![Token::Ident("order".into())]);
    }

    #[test]
    fn test_unknown_character() {
        let mut lexer = Token::lexer("P(x) $ Q");
        assert!(lexer.any(|t| t.is_err()));
    }

    #[test]
    fn test_reserved_words() {
        assert!(is_reserved_word("iff"));
        assert!(!is_reserved_word("Friend"));
    }
}
