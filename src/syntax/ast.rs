//! Parse trees for first-order formulas.
//!
//! Every tree produced by the parser is well-typed against its signature:
//! each term carries the sort it was resolved to.

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use crate::signature::Sort;

/// Binary connectives. Also the key the operator set dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connective {
    And,
    Or,
    Implies,
    Iff,
}

impl Connective {
    pub fn symbol(&self) -> &'static str {
        match self {
            Connective::And => "&",
            Connective::Or => "|",
            Connective::Implies => "->",
            Connective::Iff => "<->",
        }
    }

    /// Binding strength, loosest first.
    fn precedence(&self) -> u8 {
        match self {
            Connective::Iff => 1,
            Connective::Implies => 2,
            Connective::Or => 3,
            Connective::And => 4,
        }
    }

    pub(crate) fn right_associative(&self) -> bool {
        matches!(self, Connective::Implies)
    }
}

impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    Forall,
    Exists,
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantifier::Forall => write!(f, "forall"),
            Quantifier::Exists => write!(f, "exists"),
        }
    }
}

/// A term denotes a domain element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// A variable: `x`
    Variable { name: String, sort: Sort },

    /// A declared constant: `alice`
    Constant { name: String, sort: Sort },

    /// Functor application: `mother(x)`
    Apply {
        functor: String,
        args: Vec<Term>,
        sort: Sort,
    },
}

impl Term {
    pub fn variable(name: &str, sort: &Sort) -> Self {
        Term::Variable {
            name: name.to_string(),
            sort: sort.clone(),
        }
    }

    pub fn sort(&self) -> &Sort {
        match self {
            Term::Variable { sort, .. } | Term::Constant { sort, .. } | Term::Apply { sort, .. } => {
                sort
            }
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Term)) {
        f(self);
        if let Term::Apply { args, .. } = self {
            for arg in args {
                arg.visit(f);
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable { name, .. } | Term::Constant { name, .. } => f.write_str(name),
            Term::Apply { functor, args, .. } => {
                write!(f, "{}", functor)?;
                write_args(f, args)
            }
        }
    }
}

/// A first-order formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    /// Predicate application: `Friend(x, alice)`
    Atom { predicate: String, args: Vec<Term> },

    Not(Box<Formula>),

    /// `lhs op rhs`
    Binary {
        op: Connective,
        lhs: Box<Formula>,
        rhs: Box<Formula>,
    },

    /// `forall x: Sort. body`
    Quantified {
        quantifier: Quantifier,
        variable: String,
        sort: Sort,
        body: Box<Formula>,
    },
}

impl Formula {
    pub fn atom(predicate: &str, args: Vec<Term>) -> Self {
        Formula::Atom {
            predicate: predicate.to_string(),
            args,
        }
    }

    pub fn not(inner: Formula) -> Self {
        Formula::Not(Box::new(inner))
    }

    pub fn binary(op: Connective, lhs: Formula, rhs: Formula) -> Self {
        Formula::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn quantified(quantifier: Quantifier, variable: &str, sort: &Sort, body: Formula) -> Self {
        Formula::Quantified {
            quantifier,
            variable: variable.to_string(),
            sort: sort.clone(),
            body: Box::new(body),
        }
    }

    pub fn is_atom(&self) -> bool {
        matches!(self, Formula::Atom { .. })
    }

    /// True if no variable occurs free.
    pub fn is_closed(&self) -> bool {
        self.free_variables().is_empty()
    }

    /// Nesting depth; an atom has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Formula::Atom { .. } => 1,
            Formula::Not(inner) => 1 + inner.depth(),
            Formula::Binary { lhs, rhs, .. } => 1 + lhs.depth().max(rhs.depth()),
            Formula::Quantified { body, .. } => 1 + body.depth(),
        }
    }

    /// Free variables with their sorts, in order of first occurrence.
    pub fn free_variables(&self) -> IndexMap<String, Sort> {
        let mut free = IndexMap::new();
        let mut bound = Vec::new();
        self.collect_free(&mut bound, &mut free);
        free
    }

    fn collect_free<'a>(&'a self, bound: &mut Vec<&'a str>, free: &mut IndexMap<String, Sort>) {
        match self {
            Formula::Atom { args, .. } => {
                for arg in args {
                    arg.visit(&mut |t| {
                        if let Term::Variable { name, sort } = t {
                            if !bound.contains(&name.as_str()) && !free.contains_key(name) {
                                free.insert(name.clone(), sort.clone());
                            }
                        }
                    });
                }
            }
            Formula::Not(inner) => inner.collect_free(bound, free),
            Formula::Binary { lhs, rhs, .. } => {
                lhs.collect_free(bound, free);
                rhs.collect_free(bound, free);
            }
            Formula::Quantified { variable, body, .. } => {
                bound.push(variable.as_str());
                body.collect_free(bound, free);
                bound.pop();
            }
        }
    }

    /// Quantified variables with their sorts, in order of appearance.
    pub fn bound_variables(&self) -> IndexMap<String, Sort> {
        let mut out = IndexMap::new();
        self.walk(&mut |f| {
            if let Formula::Quantified { variable, sort, .. } = f {
                out.entry(variable.clone()).or_insert_with(|| sort.clone());
            }
        });
        out
    }

    /// Names of every variable, free or bound.
    pub fn variables(&self) -> IndexSet<String> {
        let mut out: IndexSet<String> = self.bound_variables().into_keys().collect();
        self.each_term(&mut |t| {
            if let Term::Variable { name, .. } = t {
                out.insert(name.clone());
            }
        });
        out
    }

    /// Sorts of every variable, i.e. the domains evaluation will touch.
    pub fn sorts(&self) -> IndexSet<Sort> {
        let mut out: IndexSet<Sort> = self.bound_variables().into_values().collect();
        self.each_term(&mut |t| {
            if let Term::Variable { sort, .. } = t {
                out.insert(sort.clone());
            }
        });
        out
    }

    pub fn predicates(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.walk(&mut |f| {
            if let Formula::Atom { predicate, .. } = f {
                out.insert(predicate.clone());
            }
        });
        out
    }

    pub fn functors(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.each_term(&mut |t| {
            if let Term::Apply { functor, .. } = t {
                out.insert(functor.clone());
            }
        });
        out
    }

    pub fn constants(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.each_term(&mut |t| {
            if let Term::Constant { name, .. } = t {
                out.insert(name.clone());
            }
        });
        out
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Formula)) {
        f(self);
        match self {
            Formula::Atom { .. } => {}
            Formula::Not(inner) => inner.walk(f),
            Formula::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Formula::Quantified { body, .. } => body.walk(f),
        }
    }

    fn each_term<'a>(&'a self, f: &mut impl FnMut(&'a Term)) {
        self.walk(&mut |node| {
            if let Formula::Atom { args, .. } = node {
                for arg in args {
                    arg.visit(&mut *f);
                }
            }
        });
    }

    /// Precedence of the node's outermost construct; quantifiers extend
    /// rightwards as far as possible, so they bind loosest.
    fn precedence(&self) -> u8 {
        match self {
            Formula::Quantified { .. } => 0,
            Formula::Binary { op, .. } => op.precedence(),
            Formula::Not(_) => 5,
            Formula::Atom { .. } => 6,
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Term]) -> fmt::Result {
    write!(f, "(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    write!(f, ")")
}

fn write_operand(f: &mut fmt::Formatter<'_>, formula: &Formula, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", formula)
    } else {
        write!(f, "{}", formula)
    }
}

/// Canonical ASCII syntax with minimal parentheses. Quantifiers always carry
/// their sort annotation, so the output parses back to an equal tree.
impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Atom { predicate, args } => {
                write!(f, "{}", predicate)?;
                if args.is_empty() {
                    Ok(())
                } else {
                    write_args(f, args)
                }
            }
            Formula::Not(inner) => {
                write!(f, "!")?;
                write_operand(f, inner, inner.precedence() < 5)
            }
            Formula::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let lhs_parens = lhs.precedence() < prec
                    || (lhs.precedence() == prec && op.right_associative());
                let rhs_parens = rhs.precedence() < prec
                    || (rhs.precedence() == prec && !op.right_associative());
                write_operand(f, lhs, lhs_parens)?;
                write!(f, " {} ", op)?;
                write_operand(f, rhs, rhs_parens)
            }
            Formula::Quantified {
                quantifier,
                variable,
                sort,
                body,
            } => write!(f, "{} {}: {}. {}", quantifier, variable, sort, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d() -> Sort {
        Sort::new("D")
    }

    fn p(var: &str) -> Formula {
        Formula::atom("P", vec![Term::variable(var, &d())])
    }

    #[test]
    fn test_free_and_bound_variables() {
        // forall x. P(x) & P(y)
        let f = Formula::quantified(
            Quantifier::Forall,
            "x",
            &d(),
            Formula::binary(Connective::And, p("x"), p("y")),
        );
        let free: Vec<_> = f.free_variables().into_keys().collect();
        assert_eq!(free, vec!["y".to_string()]);
        assert_eq!(f.bound_variables().len(), 1);
        assert_eq!(f.variables().len(), 2);
        assert!(!f.is_closed());
        assert_eq!(f.depth(), 3);
    }

    #[test]
    fn test_symbol_inventories() {
        let term = Term::Apply {
            functor: "succ".into(),
            args: vec![Term::Constant {
                name: "zero".into(),
                sort: d(),
            }],
            sort: d(),
        };
        let f = Formula::not(Formula::atom("Q", vec![term]));
        assert!(f.functors().contains("succ"));
        assert!(f.constants().contains("zero"));
        assert!(f.predicates().contains("Q"));
        assert!(f.is_closed());
        assert!(f.sorts().is_empty());
    }

    #[test]
    fn test_display_minimal_parens() {
        let a = p("x");
        let b = p("y");
        let and = Formula::binary(Connective::And, a.clone(), b.clone());
        let or = Formula::binary(Connective::Or, and.clone(), a.clone());
        assert_eq!(or.to_string(), "P(x) & P(y) | P(x)");

        let and_of_or = Formula::binary(
            Connective::And,
            Formula::binary(Connective::Or, a.clone(), b.clone()),
            a.clone(),
        );
        assert_eq!(and_of_or.to_string(), "(P(x) | P(y)) & P(x)");

        let imp_left = Formula::binary(
            Connective::Implies,
            Formula::binary(Connective::Implies, a.clone(), b.clone()),
            a.clone(),
        );
        assert_eq!(imp_left.to_string(), "(P(x) -> P(y)) -> P(x)");

        let neg = Formula::not(and);
        assert_eq!(neg.to_string(), "!(P(x) & P(y))");
    }

    #[test]
    fn test_display_quantifier_operand() {
        let q = Formula::quantified(Quantifier::Exists, "x", &d(), p("x"));
        let f = Formula::binary(Connective::And, q.clone(), p("y"));
        assert_eq!(f.to_string(), "(exists x: D. P(x)) & P(y)");
        assert_eq!(Formula::not(q).to_string(), "!(exists x: D. P(x))");
    }
}
