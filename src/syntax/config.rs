//! Surface syntax settings for the parser.
//!
//! A [`ParserConfig`] says which symbols spell each junctor, how tightly the
//! binary connectives bind, and how quantifiers are written. Two presets are
//! provided: [`ParserConfig::standard`] (`forall x. P(x) & Q(x) -> R(x)`) and
//! [`ParserConfig::compact`] (`Ax~D: P(x), Q(x) -: R(x)`).

use logos::Logos;

use super::ast::Connective;
use super::token::Token;
use crate::error::{FtlError, Result};

/// A role a symbol can play between or before formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Junctor {
    Not,
    Binary(Connective),
}

/// How quantifiers are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantifierStyle {
    /// `forall x [: Sort] . body`. The body extends as far right as possible.
    #[default]
    Keyword,
    /// `Ax~Sort: body` and `Ex~Sort: body`. The sort is mandatory and the
    /// body is a single negation, quantification, atom or parenthesised
    /// formula.
    Prefixed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
    junctors: Vec<(Token, Junctor)>,
    /// Loosest first.
    precedence: Vec<Connective>,
    quantifiers: QuantifierStyle,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl ParserConfig {
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder::default()
    }

    /// `!`/`~` not, `&` and, `|` or, `->` implies, `<->` iff, keyword
    /// quantifiers. Unicode and word spellings lex to the same tokens.
    pub fn standard() -> Self {
        Self {
            junctors: vec![
                (Token::Not, Junctor::Not),
                (Token::Tilde, Junctor::Not),
                (Token::And, Junctor::Binary(Connective::And)),
                (Token::Or, Junctor::Binary(Connective::Or)),
                (Token::Implies, Junctor::Binary(Connective::Implies)),
                (Token::Iff, Junctor::Binary(Connective::Iff)),
            ],
            precedence: vec![
                Connective::Iff,
                Connective::Implies,
                Connective::Or,
                Connective::And,
            ],
            quantifiers: QuantifierStyle::Keyword,
        }
    }

    /// `!` not, `,` and, `;` or, `-:` implies, prefixed quantifiers
    /// `Ax~D:` / `Ex~D:`. Implication binds loosest, conjunction tightest.
    /// There is no equivalence symbol.
    pub fn compact() -> Self {
        Self {
            junctors: vec![
                (Token::Not, Junctor::Not),
                (Token::Comma, Junctor::Binary(Connective::And)),
                (Token::Semicolon, Junctor::Binary(Connective::Or)),
                (Token::DashColon, Junctor::Binary(Connective::Implies)),
            ],
            precedence: vec![Connective::Implies, Connective::Or, Connective::And],
            quantifiers: QuantifierStyle::Prefixed,
        }
    }

    /// The role of `token`, if it spells a junctor.
    pub fn junctor(&self, token: &Token) -> Option<Junctor> {
        self.junctors
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, junctor)| *junctor)
    }

    /// Tokens that spell `junctor`.
    pub fn symbols(&self, junctor: Junctor) -> impl Iterator<Item = &Token> {
        self.junctors
            .iter()
            .filter(move |(_, j)| *j == junctor)
            .map(|(t, _)| t)
    }

    /// Binary connectives, loosest first.
    pub fn precedence(&self) -> &[Connective] {
        &self.precedence
    }

    pub fn quantifiers(&self) -> QuantifierStyle {
        self.quantifiers
    }
}

/// Builds a [`ParserConfig`] from symbol strings.
///
/// Each symbol must lex to exactly one token. Brackets, identifiers and
/// quantifier keywords cannot be junctors, nor can the punctuation the chosen
/// quantifier style needs (`:` `.` for keywords, `~` `:` for prefixes).
#[derive(Debug, Default)]
pub struct ParserConfigBuilder {
    symbols: Vec<(String, Junctor)>,
    precedence: Option<Vec<Connective>>,
    quantifiers: QuantifierStyle,
}

impl ParserConfigBuilder {
    pub fn symbol(mut self, junctor: Junctor, text: &str) -> Self {
        self.symbols.push((text.to_string(), junctor));
        self
    }

    /// Binding order of the binary connectives, loosest first. Defaults to
    /// `<->`, `->`, `|`, `&` restricted to the connectives given symbols.
    pub fn precedence(mut self, order: &[Connective]) -> Self {
        self.precedence = Some(order.to_vec());
        self
    }

    pub fn quantifiers(mut self, style: QuantifierStyle) -> Self {
        self.quantifiers = style;
        self
    }

    pub fn build(self) -> Result<ParserConfig> {
        let mut junctors: Vec<(Token, Junctor)> = Vec::with_capacity(self.symbols.len());
        for (text, junctor) in &self.symbols {
            let token = single_token(text)?;
            if !self.usable(&token) {
                return Err(FtlError::Config(format!(
                    "`{}` cannot be used as a junctor with {:?} quantifiers",
                    text, self.quantifiers
                )));
            }
            match junctors.iter().find(|(t, _)| *t == token) {
                Some((_, other)) if other != junctor => {
                    return Err(FtlError::Config(format!(
                        "`{}` is assigned to both {:?} and {:?}",
                        text, other, junctor
                    )))
                }
                Some(_) => {}
                None => junctors.push((token, *junctor)),
            }
        }

        let spelled = |c: Connective| junctors.iter().any(|(_, j)| *j == Junctor::Binary(c));
        if !junctors.iter().any(|(_, j)| *j == Junctor::Not) {
            return Err(FtlError::Config("negation needs a symbol".to_string()));
        }

        let precedence = match self.precedence {
            Some(order) => {
                for (i, c) in order.iter().enumerate() {
                    if order[..i].contains(c) {
                        return Err(FtlError::Config(format!(
                            "`{}` appears twice in the precedence order",
                            c
                        )));
                    }
                    if !spelled(*c) {
                        return Err(FtlError::Config(format!(
                            "`{}` is ranked but has no symbol",
                            c
                        )));
                    }
                }
                order
            }
            None => ParserConfig::standard()
                .precedence
                .into_iter()
                .filter(|c| spelled(*c))
                .collect(),
        };
        for (_, junctor) in &junctors {
            if let Junctor::Binary(c) = junctor {
                if !precedence.contains(c) {
                    return Err(FtlError::Config(format!(
                        "`{}` has a symbol but no place in the precedence order",
                        c
                    )));
                }
            }
        }

        Ok(ParserConfig {
            junctors,
            precedence,
            quantifiers: self.quantifiers,
        })
    }

    fn usable(&self, token: &Token) -> bool {
        match token {
            Token::LParen | Token::RParen | Token::Ident(_) | Token::Forall | Token::Exists => {
                false
            }
            Token::Colon => false,
            Token::Dot => self.quantifiers != QuantifierStyle::Keyword,
            Token::Tilde => self.quantifiers != QuantifierStyle::Prefixed,
            _ => true,
        }
    }
}

fn single_token(text: &str) -> Result<Token> {
    let mut lexer = Token::lexer(text);
    match (lexer.next(), lexer.next()) {
        (Some(Ok(token)), None) => Ok(token),
        _ => Err(FtlError::Config(format!(
            "`{}` is not a single symbol of the formula language",
            text
        ))),
    }
}
