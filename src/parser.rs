//! Pattern compiler
//!
//! Compiles tregex pattern text into the [`TregexPattern`] AST using the
//! pest grammar in `tregex.pest`.  Compilation is pure: it never touches a
//! tree.  Label regexes delegate to the `regex` crate, so regex constructs
//! that crate rejects (e.g. look-around) are compile errors here.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use thiserror::Error;

use crate::pattern::{
    BasicCatFn, CoordNode, DescNode, Descriptor, PatternNode, TregexPattern, penn_basic_category,
};
use crate::relation::{PathConstraint, Relation};

#[derive(Parser)]
#[grammar = "tregex.pest"]
struct PatternParser;

/// Error compiling a pattern
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("tregex parse error: {0}")]
    Syntax(Box<pest::error::Error<Rule>>),

    #[error("tregex parse error: bad regex {source_text:?}: {error}")]
    BadRegex {
        source_text: String,
        error: regex::Error,
    },

    #[error("tregex parse error: no such thing as a zeroth child")]
    ZerothChild,

    #[error("tregex parse error: node {0:?} is named under the scope of a negation")]
    NameUnderNegation(String),

    #[error("tregex parse error: name {0:?} is bound more than once")]
    DuplicateName(String),

    #[error("tregex parse error: a node cannot be both negated and optional")]
    NegatedAndOptional,
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::Syntax(Box::new(err))
    }
}

/// Compile a pattern with the default Penn basic-category function
pub fn compile(pattern: &str) -> Result<TregexPattern, ParseError> {
    compile_with(pattern, penn_basic_category)
}

/// Compile a pattern with a caller-supplied basic-category function,
/// consulted by `@`-descriptors, `~`-links, and chained-relation
/// constraints
pub fn compile_with(pattern: &str, basic_cat: BasicCatFn) -> Result<TregexPattern, ParseError> {
    let mut pairs = PatternParser::parse(Rule::tregex, pattern)?;
    let tregex = pairs.next().expect("grammar yields one tregex");
    let expr = tregex
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .expect("tregex contains an expr");
    let root = build_expr(expr)?;
    let as_node = PatternNode::Desc(root.clone());
    check_names_not_negated(&as_node, false)?;
    check_names_unique(&as_node, &mut std::collections::HashSet::new())?;
    Ok(TregexPattern::new(root, basic_cat, pattern.to_string()))
}

/// An expression: head atom plus an optional constraint chain
fn build_expr(pair: Pair<'_, Rule>) -> Result<DescNode, ParseError> {
    let mut inner = pair.into_inner();
    let atom = inner.next().expect("expr has an atom");
    let mut head = build_atom(atom)?;
    if let Some(chain) = inner.next() {
        let constraints = build_chain(chain)?;
        attach_child(&mut head, constraints);
    }
    Ok(head)
}

fn build_atom(pair: Pair<'_, Rule>) -> Result<DescNode, ParseError> {
    let inner = pair.into_inner().next().expect("atom has content");
    match inner.as_rule() {
        Rule::expr => build_expr(inner),
        Rule::node => build_node(inner),
        rule => unreachable!("unexpected atom rule {rule:?}"),
    }
}

/// Attach further constraints to a head that may already carry some
/// (a parenthesized head with its own chain, then more relations outside)
fn attach_child(head: &mut DescNode, constraints: PatternNode) {
    head.child = match head.child.take() {
        None => Some(Box::new(constraints)),
        Some(existing) => Some(Box::new(PatternNode::Coord(CoordNode {
            conj: true,
            negated: false,
            optional: false,
            children: vec![*existing, constraints],
        }))),
    };
}

fn build_chain(pair: Pair<'_, Rule>) -> Result<PatternNode, ParseError> {
    let disjuncts: Vec<PatternNode> = pair
        .into_inner()
        .map(build_and_chain)
        .collect::<Result<_, _>>()?;
    Ok(if disjuncts.len() == 1 {
        disjuncts.into_iter().next().expect("one disjunct")
    } else {
        PatternNode::Coord(CoordNode {
            conj: false,
            negated: false,
            optional: false,
            children: disjuncts,
        })
    })
}

fn build_and_chain(pair: Pair<'_, Rule>) -> Result<PatternNode, ParseError> {
    let conjuncts: Vec<PatternNode> = pair
        .into_inner()
        .map(build_item)
        .collect::<Result<_, _>>()?;
    Ok(if conjuncts.len() == 1 {
        conjuncts.into_iter().next().expect("one conjunct")
    } else {
        PatternNode::Coord(CoordNode {
            conj: true,
            negated: false,
            optional: false,
            children: conjuncts,
        })
    })
}

fn build_item(pair: Pair<'_, Rule>) -> Result<PatternNode, ParseError> {
    let inner = pair.into_inner().next().expect("item has content");
    match inner.as_rule() {
        Rule::negation => {
            let mut node = build_item(inner.into_inner().next().expect("negated item"))?;
            set_negated(&mut node)?;
            Ok(node)
        }
        Rule::option => {
            let mut node = build_item(inner.into_inner().next().expect("optional item"))?;
            set_optional(&mut node)?;
            Ok(node)
        }
        Rule::bracket | Rule::paren_chain => {
            build_chain(inner.into_inner().next().expect("grouped chain"))
        }
        Rule::rel_item => {
            let mut parts = inner.into_inner();
            let rel = build_relation(parts.next().expect("rel_item has relation"))?;
            let target = parts.next().expect("rel_item has target");
            let mut node = build_target(target)?;
            node.rel = rel;
            Ok(PatternNode::Desc(node))
        }
        rule => unreachable!("unexpected item rule {rule:?}"),
    }
}

fn set_negated(node: &mut PatternNode) -> Result<(), ParseError> {
    let (neg, opt) = match node {
        PatternNode::Desc(d) => (&mut d.negated, d.optional),
        PatternNode::Coord(c) => (&mut c.negated, c.optional),
    };
    if opt {
        return Err(ParseError::NegatedAndOptional);
    }
    *neg = true;
    Ok(())
}

fn set_optional(node: &mut PatternNode) -> Result<(), ParseError> {
    let (opt, neg) = match node {
        PatternNode::Desc(d) => (&mut d.optional, d.negated),
        PatternNode::Coord(c) => (&mut c.optional, c.negated),
    };
    if neg {
        return Err(ParseError::NegatedAndOptional);
    }
    *opt = true;
    Ok(())
}

fn build_target(pair: Pair<'_, Rule>) -> Result<DescNode, ParseError> {
    let inner = pair.into_inner().next().expect("target has content");
    match inner.as_rule() {
        Rule::expr => build_expr(inner),
        Rule::node => build_node(inner),
        rule => unreachable!("unexpected target rule {rule:?}"),
    }
}

fn build_relation(pair: Pair<'_, Rule>) -> Result<Relation, ParseError> {
    let inner = pair.into_inner().next().expect("relation has content");
    match inner.as_rule() {
        Rule::rel_simple => Ok(simple_relation(inner.as_str())),
        Rule::rel_ith => {
            let text = inner.as_str();
            let num: i32 = text[1..].parse().map_err(|_| ParseError::ZerothChild)?;
            if num == 0 {
                return Err(ParseError::ZerothChild);
            }
            Ok(match &text[..1] {
                "<" => Relation::HasIthChild(num),
                _ => Relation::IthChildOf(num),
            })
        }
        Rule::rel_arg => {
            let mut parts = inner.into_inner();
            let op = parts.next().expect("rel_arg has operator").as_str().to_string();
            let spec = parts.next().expect("rel_arg has path_spec");
            let constraint = build_path_spec(spec)?;
            Ok(match op.as_str() {
                "<+" => Relation::UnbrokenDominates(constraint),
                ">+" => Relation::UnbrokenDominatedBy(constraint),
                ".+" => Relation::UnbrokenPrecedes(constraint),
                _ => Relation::UnbrokenFollows(constraint),
            })
        }
        rule => unreachable!("unexpected relation rule {rule:?}"),
    }
}

fn simple_relation(symbol: &str) -> Relation {
    match symbol {
        "<<" => Relation::Dominates,
        ">>" => Relation::DominatedBy,
        "<" => Relation::ParentOf,
        ">" => Relation::ChildOf,
        ".." => Relation::Precedes,
        "." => Relation::ImmediatelyPrecedes,
        ",," => Relation::Follows,
        "," => Relation::ImmediatelyFollows,
        "<<," => Relation::HasLeftmostDescendant,
        "<<-" | "<<`" => Relation::HasRightmostDescendant,
        ">>," => Relation::LeftmostDescendantOf,
        ">>-" | ">>`" => Relation::RightmostDescendantOf,
        "$" => Relation::SisterOf,
        "$++" | "$.." => Relation::LeftSisterOf,
        "$--" | "$,," => Relation::RightSisterOf,
        "$+" | "$." => Relation::ImmediateLeftSisterOf,
        "$-" | "$," => Relation::ImmediateRightSisterOf,
        "<:" => Relation::HasOnlyChild,
        ">:" => Relation::OnlyChildOf,
        "<<:" => Relation::UnaryPathAncestorOf,
        ">>:" => Relation::UnaryPathDescendantOf,
        "<=" => Relation::ParentEquals,
        // first/last-child shorthands
        "<," => Relation::HasIthChild(1),
        "<-" | "<`" => Relation::HasIthChild(-1),
        ">," => Relation::IthChildOf(1),
        ">-" | ">`" => Relation::IthChildOf(-1),
        "<<#" => Relation::HeadedBy,
        ">>#" => Relation::Heads,
        "<#" => Relation::ImmediatelyHeadedBy,
        ">#" => Relation::ImmediatelyHeads,
        "==" => Relation::Equals,
        ":" => Relation::Splitter,
        other => unreachable!("unknown relation symbol {other:?}"),
    }
}

fn build_path_spec(pair: Pair<'_, Rule>) -> Result<PathConstraint, ParseError> {
    let mut negated = false;
    let mut basic_cat = false;
    let mut desc = Descriptor::Anything;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::path_neg => negated = true,
            Rule::path_cat => basic_cat = true,
            Rule::regex => desc = build_regex(part.as_str())?,
            Rule::anything => desc = Descriptor::Anything,
            Rule::ident => desc = Descriptor::Exact(part.as_str().to_string()),
            rule => unreachable!("unexpected path_spec rule {rule:?}"),
        }
    }
    Ok(PathConstraint {
        negated,
        basic_cat,
        desc,
    })
}

fn build_node(pair: Pair<'_, Rule>) -> Result<DescNode, ParseError> {
    let inner = pair.into_inner().next().expect("node has content");
    let mut node = DescNode {
        rel: Relation::Root,
        negated: false,
        optional: false,
        neg_desc: false,
        basic_cat: false,
        desc: None,
        name: None,
        link: None,
        variable_groups: Vec::new(),
        child: None,
    };
    match inner.as_rule() {
        Rule::backref => {
            let name = inner.into_inner().next().expect("backref has name");
            node.name = Some(name.as_str().to_string());
        }
        Rule::link_node => {
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::ident => node.link = Some(part.as_str().to_string()),
                    Rule::name_tag => {
                        let name = part.into_inner().next().expect("name_tag has ident");
                        node.name = Some(name.as_str().to_string());
                    }
                    rule => unreachable!("unexpected link rule {rule:?}"),
                }
            }
        }
        Rule::desc_node => {
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::desc_neg => node.neg_desc = true,
                    Rule::basic_cat => node.basic_cat = true,
                    Rule::desc_core => node.desc = Some(build_desc_core(part)?),
                    Rule::var_group => {
                        let mut vg = part.into_inner();
                        let group: usize = vg
                            .next()
                            .expect("var_group has number")
                            .as_str()
                            .parse()
                            .unwrap_or(0);
                        let var = vg.next().expect("var_group has name").as_str().to_string();
                        node.variable_groups.push((group, var));
                    }
                    Rule::name_tag => {
                        let name = part.into_inner().next().expect("name_tag has ident");
                        node.name = Some(name.as_str().to_string());
                    }
                    rule => unreachable!("unexpected desc rule {rule:?}"),
                }
            }
        }
        rule => unreachable!("unexpected node rule {rule:?}"),
    }
    Ok(node)
}

fn build_desc_core(pair: Pair<'_, Rule>) -> Result<Descriptor, ParseError> {
    let inner = pair.into_inner().next().expect("desc_core has content");
    match inner.as_rule() {
        Rule::regex => build_regex(inner.as_str()),
        Rule::anything => Ok(Descriptor::Anything),
        Rule::ident_disj => {
            let names: Vec<String> = inner
                .into_inner()
                .map(|p| p.as_str().to_string())
                .collect();
            Ok(if names.len() == 1 {
                Descriptor::Exact(names.into_iter().next().expect("one name"))
            } else {
                Descriptor::Strings(names)
            })
        }
        rule => unreachable!("unexpected desc_core rule {rule:?}"),
    }
}

fn build_regex(text: &str) -> Result<Descriptor, ParseError> {
    let source = &text[1..text.len() - 1];
    match regex::Regex::new(source) {
        Ok(re) => Ok(Descriptor::Pattern {
            source: source.to_string(),
            re,
        }),
        Err(error) => Err(ParseError::BadRegex {
            source_text: source.to_string(),
            error,
        }),
    }
}

/// Naming a node under a negation is rejected at compile time: a node
/// that must not match can never be stored.
fn check_names_not_negated(node: &PatternNode, under_neg: bool) -> Result<(), ParseError> {
    let under = under_neg || node.negated();
    match node {
        PatternNode::Desc(d) => {
            if under && d.binds_name() {
                return Err(ParseError::NameUnderNegation(
                    d.name.clone().unwrap_or_default(),
                ));
            }
            if let Some(child) = &d.child {
                check_names_not_negated(child, under)?;
            }
        }
        PatternNode::Coord(c) => {
            for child in &c.children {
                check_names_not_negated(child, under)?;
            }
        }
    }
    Ok(())
}

/// Each name may be bound by at most one node along any match path;
/// reusing a name with no descriptor is the backreference form and binds
/// nothing new.  Disjunction branches are alternatives, so each checks
/// against its own copy of the enclosing scope.
fn check_names_unique(
    node: &PatternNode,
    seen: &mut std::collections::HashSet<String>,
) -> Result<(), ParseError> {
    match node {
        PatternNode::Desc(d) => {
            if d.binds_name() {
                let name = d.name.clone().unwrap_or_default();
                if !seen.insert(name.clone()) {
                    return Err(ParseError::DuplicateName(name));
                }
            }
            if let Some(child) = &d.child {
                check_names_unique(child, seen)?;
            }
        }
        PatternNode::Coord(c) if c.conj => {
            for child in &c.children {
                check_names_unique(child, seen)?;
            }
        }
        PatternNode::Coord(c) => {
            let before = seen.clone();
            for child in &c.children {
                let mut branch = before.clone();
                check_names_unique(child, &mut branch)?;
                seen.extend(branch);
            }
        }
    }
    Ok(())
}
