//! Recursive-descent parser for formulas.
//!
//! Standard precedence (loosest to tightest):
//! 1. `<->` (left-assoc)
//! 2. `->` (right-assoc)
//! 3. `|` (left-assoc)
//! 4. `&` (left-assoc)
//! 5. `!`, quantifiers
//! 6. predicate application, parentheses
//!
//! Symbols and the order of levels 1-4 come from a [`ParserConfig`].
//! Implication is always right-associative, the other connectives left.
//!
//! Sorts are resolved in the same pass: every term position has an expected
//! sort from the enclosing predicate or functor declaration.

use std::ops::Range;
use std::sync::OnceLock;

use indexmap::IndexMap;
use logos::Logos;

use super::ast::{Formula, Quantifier, Term};
use super::config::{Junctor, ParserConfig, QuantifierStyle};
use super::token::{is_reserved_word, Token};
use crate::error::{FtlError, Result};
use crate::signature::{Signature, Sort};

/// A variable introduced by a quantifier that is still in scope.
struct Binding {
    name: String,
    sort: Option<Sort>,
}

/// Parser state.
pub struct Parser<'a> {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    end: usize,
    signature: &'a Signature,
    config: &'a ParserConfig,
    scopes: Vec<Binding>,
    free: IndexMap<String, Sort>,
}

impl<'a> Parser<'a> {
    /// Lex `input` and create a parser over it, in the standard syntax.
    pub fn new(input: &str, signature: &'a Signature) -> Result<Self> {
        Self::with_config(input, signature, standard_config())
    }

    pub fn with_config(
        input: &str,
        signature: &'a Signature,
        config: &'a ParserConfig,
    ) -> Result<Self> {
        let mut tokens = Vec::new();
        for (token, span) in Token::lexer(input).spanned() {
            match token {
                Ok(t) => tokens.push((t, span)),
                Err(()) => {
                    let found = &input[span.clone()];
                    return Err(FtlError::syntax(
                        span.start,
                        format!("unrecognised character `{}`", found),
                    ));
                }
            }
        }
        Ok(Self {
            tokens,
            pos: 0,
            end: input.len(),
            signature,
            config,
            scopes: Vec::new(),
            free: IndexMap::new(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Byte offset of the current token, or end of input.
    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> FtlError {
        FtlError::syntax(self.position(), message)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.peek() {
            Some(t) if *t == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => Err(self.error(format!("expected `{}`, found `{}`", expected, t))),
            None => Err(self.error(format!("expected `{}`, found end of input", expected))),
        }
    }

    fn eat_junctor(&mut self, junctor: Junctor) -> bool {
        match self.peek() {
            Some(t) if self.config.junctor(t) == Some(junctor) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.next() {
                Some(Token::Ident(name)) => Ok(name),
                _ => Err(self.error(format!("expected {}", what))),
            },
            Some(t) => Err(self.error(format!("expected {}, found `{}`", what, t))),
            None => Err(self.error(format!("expected {}, found end of input", what))),
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.error(format!("unexpected `{}` after end of formula", t))),
        }
    }

    /// Parse the whole input as one formula.
    pub fn formula(mut self) -> Result<Formula> {
        if self.tokens.is_empty() {
            return Err(self.error("empty formula"));
        }
        let formula = self.parse_formula()?;
        self.expect_end()?;
        Ok(formula)
    }

    /// Parse the whole input as one term, optionally of a known sort.
    pub fn term(mut self, expected: Option<&Sort>) -> Result<Term> {
        if self.tokens.is_empty() {
            return Err(self.error("empty term"));
        }
        let term = self.parse_term(expected)?;
        self.expect_end()?;
        Ok(term)
    }

    fn parse_formula(&mut self) -> Result<Formula> {
        self.parse_binary(0)
    }

    /// Binary connectives from precedence level `level` down.
    fn parse_binary(&mut self, level: usize) -> Result<Formula> {
        let Some(&op) = self.config.precedence().get(level) else {
            return self.parse_unary();
        };
        let mut lhs = self.parse_binary(level + 1)?;
        if op.right_associative() {
            if self.eat_junctor(Junctor::Binary(op)) {
                let rhs = self.parse_binary(level)?;
                lhs = Formula::binary(op, lhs, rhs);
            }
            return Ok(lhs);
        }
        while self.eat_junctor(Junctor::Binary(op)) {
            let rhs = self.parse_binary(level + 1)?;
            lhs = Formula::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Formula> {
        if self.eat_junctor(Junctor::Not) {
            return Ok(Formula::not(self.parse_unary()?));
        }
        match self.config.quantifiers() {
            QuantifierStyle::Keyword => match self.peek() {
                Some(Token::Forall) => {
                    self.pos += 1;
                    return self.parse_quantified(Quantifier::Forall);
                }
                Some(Token::Exists) => {
                    self.pos += 1;
                    return self.parse_quantified(Quantifier::Exists);
                }
                _ => {}
            },
            QuantifierStyle::Prefixed => {
                if let Some((quantifier, variable)) = self.prefixed_quantifier() {
                    return self.parse_prefixed(quantifier, variable);
                }
            }
        }
        self.parse_primary()
    }

    /// `Ax~` or `Ex~` at the current position.
    fn prefixed_quantifier(&self) -> Option<(Quantifier, String)> {
        let Some((Token::Ident(word), _)) = self.tokens.get(self.pos) else {
            return None;
        };
        if self.tokens.get(self.pos + 1).map(|(t, _)| t) != Some(&Token::Tilde) {
            return None;
        }
        let quantifier = match word.as_bytes().first() {
            Some(b'A') => Quantifier::Forall,
            Some(b'E') => Quantifier::Exists,
            _ => return None,
        };
        Some((quantifier, word[1..].to_string()))
    }

    /// `Ax~Sort: body`, with the position on `Ax`.
    fn parse_prefixed(&mut self, quantifier: Quantifier, variable: String) -> Result<Formula> {
        let var_pos = self.position();
        self.pos += 2;
        if !variable.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
            || is_reserved_word(&variable)
        {
            return Err(FtlError::syntax(
                var_pos,
                format!("`{}` is not a valid variable name", variable),
            ));
        }
        self.check_quantifiable(var_pos, &variable)?;
        let sort = self.expect_sort(&variable)?;
        self.expect(Token::Colon)?;
        self.parse_scoped(quantifier, variable, Some(sort))
    }

    /// `x [: Sort] . body`, after the quantifier keyword.
    fn parse_quantified(&mut self, quantifier: Quantifier) -> Result<Formula> {
        let var_pos = self.position();
        let variable = self.expect_ident("variable name")?;
        self.check_quantifiable(var_pos, &variable)?;

        let annotation = if self.eat(&Token::Colon) {
            Some(self.expect_sort(&variable)?)
        } else {
            None
        };
        self.expect(Token::Dot)?;
        self.parse_scoped(quantifier, variable, annotation)
    }

    fn check_quantifiable(&self, position: usize, variable: &str) -> Result<()> {
        if self.signature.contains(variable) {
            return Err(FtlError::syntax(
                position,
                format!("`{}` is a declared symbol and cannot be quantified", variable),
            ));
        }
        Ok(())
    }

    fn expect_sort(&mut self, variable: &str) -> Result<Sort> {
        let sort_name = self.expect_ident("sort name")?;
        match self.signature.sort(&sort_name) {
            Some(sort) => Ok(sort.clone()),
            None => Err(FtlError::Usage(format!(
                "undeclared sort `{}` in quantifier over `{}`",
                sort_name, variable
            ))),
        }
    }

    /// Parse a quantifier body with `variable` in scope and build the node.
    fn parse_scoped(
        &mut self,
        quantifier: Quantifier,
        variable: String,
        annotation: Option<Sort>,
    ) -> Result<Formula> {
        self.scopes.push(Binding {
            name: variable.clone(),
            sort: annotation,
        });
        let body = match self.config.quantifiers() {
            QuantifierStyle::Keyword => self.parse_formula(),
            QuantifierStyle::Prefixed => self.parse_unary(),
        };
        let binding = self.scopes.pop();
        let body = body?;

        match binding.and_then(|b| b.sort) {
            Some(sort) => Ok(Formula::quantified(quantifier, &variable, &sort, body)),
            None => Err(FtlError::Type(format!(
                "cannot infer the sort of `{}`: it is never used and has no annotation",
                variable
            ))),
        }
    }

    fn parse_primary(&mut self) -> Result<Formula> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_formula()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(_)) => self.parse_atom(),
            Some(t) => Err(self.error(format!("expected a formula, found `{}`", t))),
            None => Err(self.error("expected a formula, found end of input")),
        }
    }

    /// Predicate application, or a bare 0-ary predicate.
    fn parse_atom(&mut self) -> Result<Formula> {
        let name_pos = self.position();
        let name = self.expect_ident("predicate")?;
        let signature = self.signature;
        let Some(arg_sorts) = signature.predicate(&name) else {
            let message = if signature.contains(&name) {
                format!("`{}` is not a predicate", name)
            } else {
                format!("unknown predicate `{}`", name)
            };
            return Err(FtlError::syntax(name_pos, message));
        };
        let args = self.parse_args(&name, arg_sorts)?;
        Ok(Formula::Atom {
            predicate: name,
            args,
        })
    }

    /// Optional parenthesised argument list, checked against `sorts`.
    fn parse_args(&mut self, symbol: &str, sorts: &[Sort]) -> Result<Vec<Term>> {
        if self.peek() != Some(&Token::LParen) {
            if sorts.is_empty() {
                return Ok(Vec::new());
            }
            return Err(FtlError::Arity {
                symbol: symbol.to_string(),
                expected: sorts.len(),
                found: 0,
            });
        }
        self.pos += 1;

        let found = self.count_args();
        if found != sorts.len() {
            return Err(FtlError::Arity {
                symbol: symbol.to_string(),
                expected: sorts.len(),
                found,
            });
        }

        let mut args = Vec::with_capacity(sorts.len());
        for (i, sort) in sorts.iter().enumerate() {
            if i > 0 {
                self.expect(Token::Comma)?;
            }
            args.push(self.parse_term(Some(sort))?);
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// Count top-level arguments from the current position up to the
    /// matching `)`, without consuming anything.
    fn count_args(&self) -> usize {
        let mut depth = 0usize;
        let mut commas = 0;
        let mut any = false;
        for (token, _) in &self.tokens[self.pos..] {
            match token {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => break,
                Token::RParen => depth -= 1,
                Token::Comma if depth == 0 => commas += 1,
                _ => {}
            }
            any = true;
        }
        if any {
            commas + 1
        } else {
            0
        }
    }

    fn parse_term(&mut self, expected: Option<&Sort>) -> Result<Term> {
        let name_pos = self.position();
        let name = self.expect_ident("term")?;
        let signature = self.signature;

        if let Some(decl) = signature.functor(&name) {
            let args = self.parse_args(&name, &decl.args)?;
            check_sort(&name, &decl.result, expected)?;
            return Ok(Term::Apply {
                functor: name,
                args,
                sort: decl.result.clone(),
            });
        }
        if self.peek() == Some(&Token::LParen) {
            return Err(FtlError::syntax(name_pos, format!("unknown functor `{}`", name)));
        }
        if let Some(sort) = signature.constant(&name) {
            check_sort(&name, sort, expected)?;
            return Ok(Term::Constant {
                name,
                sort: sort.clone(),
            });
        }
        if signature.predicate(&name).is_some() {
            return Err(FtlError::syntax(
                name_pos,
                format!("predicate `{}` used as a term", name),
            ));
        }

        let sort = self.resolve_variable(&name, expected)?;
        Ok(Term::Variable { name, sort })
    }

    /// Give a variable occurrence its sort, checking it against earlier
    /// occurrences in the same scope.
    fn resolve_variable(&mut self, name: &str, expected: Option<&Sort>) -> Result<Sort> {
        let known = match self.scopes.iter_mut().rev().find(|b| b.name == name) {
            Some(binding) => {
                if binding.sort.is_none() {
                    binding.sort = expected.cloned();
                }
                binding.sort.clone()
            }
            None => {
                if let (None, Some(sort)) = (self.free.get(name), expected) {
                    self.free.insert(name.to_string(), sort.clone());
                }
                self.free.get(name).cloned()
            }
        };

        match (known, expected) {
            (Some(sort), Some(want)) if sort != *want => Err(FtlError::Type(format!(
                "variable `{}` is used as `{}` and as `{}`",
                name, sort, want
            ))),
            (Some(sort), _) => Ok(sort),
            (None, _) => Err(FtlError::Type(format!(
                "cannot infer the sort of variable `{}`",
                name
            ))),
        }
    }
}

fn check_sort(symbol: &str, actual: &Sort, expected: Option<&Sort>) -> Result<()> {
    match expected {
        Some(want) if want != actual => Err(FtlError::Type(format!(
            "`{}` has sort `{}` where `{}` is expected",
            symbol, actual, want
        ))),
        _ => Ok(()),
    }
}

fn standard_config() -> &'static ParserConfig {
    static STANDARD: OnceLock<ParserConfig> = OnceLock::new();
    STANDARD.get_or_init(ParserConfig::standard)
}

/// Parse `input` as a formula over `signature`.
pub fn parse(input: &str, signature: &Signature) -> Result<Formula> {
    Parser::new(input, signature)?.formula()
}

/// Parse `input` written in the syntax `config` describes.
pub fn parse_with(input: &str, signature: &Signature, config: &ParserConfig) -> Result<Formula> {
    Parser::with_config(input, signature, config)?.formula()
}

/// Parse `input` as a single term. Without an expected sort, bare variables
/// cannot be typed and are rejected.
pub fn parse_term(input: &str, signature: &Signature, expected: Option<&Sort>) -> Result<Term> {
    Parser::new(input, signature)?.term(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Connective;

    fn sig() -> Signature {
        Signature::builder()
            .sort("Person")
            .sort("City")
            .predicate("P", &["Person"])
            .predicate("Friend", &["Person", "Person"])
            .predicate("Lives", &["Person", "City"])
            .predicate("Raining", &[])
            .functor("mother", &["Person"], "Person")
            .functor("home", &["Person"], "City")
            .constant("alice", "Person")
            .constant("paris", "City")
            .build()
            .unwrap()
    }

    fn person() -> Sort {
        Sort::new("Person")
    }

    #[test]
    fn test_parse_atom() {
        let f = parse("Friend(x, alice)", &sig()).unwrap();
        assert_eq!(
            f,
            Formula::atom(
                "Friend",
                vec![
                    Term::variable("x", &person()),
                    Term::Constant {
                        name: "alice".into(),
                        sort: person()
                    },
                ]
            )
        );
        assert!(parse("Raining", &sig()).unwrap().is_atom());
    }

    #[test]
    fn test_precedence() {
        let s = sig();
        // & binds tighter than |, | tighter than ->
        let f = parse("P(x) | P(y) & P(z) -> Raining", &s).unwrap();
        match f {
            Formula::Binary {
                op: Connective::Implies,
                lhs,
                ..
            } => match *lhs {
                Formula::Binary {
                    op: Connective::Or,
                    rhs,
                    ..
                } => assert!(matches!(*rhs, Formula::Binary { op: Connective::And, .. })),
                other => panic!("unexpected lhs {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        // ! binds tighter than &
        let g = parse("!P(x) & P(y)", &s).unwrap();
        assert!(matches!(g, Formula::Binary { op: Connective::And, .. }));
    }

    #[test]
    fn test_associativity() {
        let s = sig();
        let imp = parse("P(x) -> P(y) -> P(z)", &s).unwrap();
        match imp {
            Formula::Binary { lhs, rhs, .. } => {
                assert!(lhs.is_atom());
                assert!(matches!(*rhs, Formula::Binary { op: Connective::Implies, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }

        let and = parse("P(x) & P(y) & P(z)", &s).unwrap();
        match and {
            Formula::Binary { lhs, rhs, .. } => {
                assert!(matches!(*lhs, Formula::Binary { op: Connective::And, .. }));
                assert!(rhs.is_atom());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unicode_and_ascii_agree() {
        let s = sig();
        let ascii = parse("forall x. exists y. Friend(x, y) -> !P(x)", &s).unwrap();
        let unicode = parse("∀x. ∃y. Friend(x, y) → ¬P(x)", &s).unwrap();
        let words = parse("forall x. exists y. Friend(x, y) implies not P(x)", &s).unwrap();
        assert_eq!(ascii, unicode);
        assert_eq!(ascii, words);
        assert_eq!(parse("~P(x)", &s).unwrap(), parse("!P(x)", &s).unwrap());
    }

    #[test]
    fn test_compact_syntax_matches_standard() {
        let s = sig();
        let compact = ParserConfig::compact();
        let pairs = [
            (
                "Ax~Person: Ey~Person: (Friend(x, y) -: !P(x))",
                "forall x: Person. exists y: Person. Friend(x, y) -> !P(x)",
            ),
            ("P(x), P(y) ; Raining -: P(alice)", "P(x) & P(y) | Raining -> P(alice)"),
            // the quantifier body stops at the first junctor
            ("Ax~Person: P(x), Raining", "(forall x: Person. P(x)) & Raining"),
            ("!Ex~City: Lives(alice, x)", "!(exists x: City. Lives(alice, x))"),
            (
                "Friend(x, mother(y)), Lives(y, home(x))",
                "Friend(x, mother(y)) & Lives(y, home(x))",
            ),
        ];
        for (text, standard) in pairs {
            assert_eq!(
                parse_with(text, &s, &compact).unwrap(),
                parse(standard, &s).unwrap(),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_compact_syntax_errors() {
        let s = sig();
        let compact = ParserConfig::compact();
        let syntax_error =
            |text: &str| matches!(parse_with(text, &s, &compact), Err(FtlError::Syntax { .. }));
        assert!(syntax_error("forall x. P(x)"));
        assert!(syntax_error("P(x) & P(y)"));
        assert!(syntax_error("Ax: P(x)"));
        assert!(syntax_error("A1~Person: P(x)"));
        assert!(syntax_error("Ax~Person P(x)"));
        assert!(matches!(
            parse_with("Ax~Planet: P(x)", &s, &compact),
            Err(FtlError::Usage(_))
        ));
    }

    #[test]
    fn test_custom_precedence() {
        let s = sig();
        // | binds tighter than &
        let config = ParserConfig::builder()
            .symbol(Junctor::Not, "!")
            .symbol(Junctor::Binary(Connective::And), "&")
            .symbol(Junctor::Binary(Connective::Or), "|")
            .precedence(&[Connective::And, Connective::Or])
            .build()
            .unwrap();
        assert_eq!(
            parse_with("P(x) | P(y) & Raining", &s, &config).unwrap(),
            parse("(P(x) | P(y)) & Raining", &s).unwrap()
        );
        assert!(parse_with("P(x) -> Raining", &s, &config).is_err());
    }

    #[test]
    fn test_quantifier_scope_extends_right() {
        let f = parse("forall x. P(x) & Raining", &sig()).unwrap();
        match f {
            Formula::Quantified { body, sort, .. } => {
                assert_eq!(sort, person());
                assert!(matches!(*body, Formula::Binary { op: Connective::And, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("(forall x. P(x)) & P(y)", &sig()).unwrap().free_variables().contains_key("y"));
    }

    #[test]
    fn test_sort_inference_through_functors() {
        let f = parse("forall x. Lives(x, home(mother(x)))", &sig()).unwrap();
        assert!(f.is_closed());
        assert_eq!(f.functors().len(), 2);
    }

    #[test]
    fn test_arity_error() {
        let err = parse("P(x, y)", &sig()).unwrap_err();
        match err {
            FtlError::Arity {
                symbol,
                expected,
                found,
            } => {
                assert_eq!(symbol, "P");
                assert_eq!(expected, 1);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(parse("Friend", &sig()), Err(FtlError::Arity { found: 0, .. })));
    }

    #[test]
    fn test_type_conflicts() {
        let s = sig();
        assert!(matches!(parse("Lives(x, x)", &s), Err(FtlError::Type(_))));
        assert!(matches!(parse("Lives(paris, paris)", &s), Err(FtlError::Type(_))));
        assert!(matches!(parse("forall c: City. P(c)", &s), Err(FtlError::Type(_))));
        assert!(matches!(parse("forall z. Raining", &s), Err(FtlError::Type(_))));
        // the same name may be rebound at a different sort in a nested scope
        assert!(parse("forall x. P(x) & (forall x. Lives(alice, x))", &s).is_ok());
    }

    #[test]
    fn test_undeclared_annotation_is_usage_error() {
        assert!(matches!(parse("forall x: Planet. P(x)", &sig()), Err(FtlError::Usage(_))));
    }

    #[test]
    fn test_syntax_errors() {
        let s = sig();
        let err = parse("P(x) $ P(y)", &s).unwrap_err();
        assert!(matches!(err, FtlError::Syntax { position: 5, .. }));

        assert!(matches!(parse("(P(x) & P(y)", &s), Err(FtlError::Syntax { .. })));
        assert!(matches!(parse("P(x) P(y)", &s), Err(FtlError::Syntax { .. })));
        assert!(matches!(parse("", &s), Err(FtlError::Syntax { .. })));
        assert!(matches!(parse("Unknown(x)", &s), Err(FtlError::Syntax { .. })));
        assert!(matches!(parse("mother(x)", &s), Err(FtlError::Syntax { .. })));
        assert!(matches!(parse("forall alice. P(alice)", &s), Err(FtlError::Syntax { .. })));
        assert!(matches!(parse("P(Friend)", &s), Err(FtlError::Syntax { .. })));
    }

    #[test]
    fn test_round_trip() {
        let s = sig();
        let inputs = [
            "forall x. exists y. Friend(x, y) & !P(y)",
            "P(x) -> P(y) -> P(x)",
            "(P(x) -> P(y)) -> P(x)",
            "!(P(x) | Raining) <-> (forall y: Person. Friend(y, mother(y)))",
            "P(x) & (P(y) | P(alice)) iff Lives(x, home(x))",
            "!!P(x)",
        ];
        for input in inputs {
            let tree = parse(input, &s).unwrap();
            let text = tree.to_string();
            let again = parse(&text, &s).unwrap();
            assert_eq!(tree, again, "round trip of {:?} via {:?}", input, text);
        }
    }

    #[test]
    fn test_parse_term() {
        let s = sig();
        let t = parse_term("home(mother(alice))", &s, None).unwrap();
        assert_eq!(t.sort(), &Sort::new("City"));
        assert!(matches!(parse_term("x", &s, None), Err(FtlError::Type(_))));
        assert_eq!(parse_term("x", &s, Some(&person())).unwrap(), Term::variable("x", &person()));
    }
}
