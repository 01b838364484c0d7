//! Pattern AST
//!
//! A compiled tregex pattern is a boolean tree of relation-constrained node
//! descriptions.  A [`DescNode`] matches one tree node (its description,
//! backreference, or link) reached through a [`Relation`] from the node its
//! parent pattern matched; a [`CoordNode`] conjoins or disjoins several
//! constraints against the same anchor.  Compiled patterns are immutable
//! and freely shared across trees and threads.

use std::fmt;

use regex::Regex;

use crate::matcher::TregexMatcher;
use crate::relation::Relation;
use crate::tree::{HeadFinder, Tree};

/// Maps a label to its basic category, e.g. `NP-SBJ` to `NP`
pub type BasicCatFn = fn(&str) -> &str;

/// Penn-style basic category: cut at the first annotation-introducing
/// character (`-`, `=`, `#`, `|`) after the first position.
pub fn penn_basic_category(label: &str) -> &str {
    for (i, c) in label.char_indices() {
        if i > 0 && matches!(c, '-' | '=' | '#' | '|') {
            return &label[..i];
        }
    }
    label
}

/// One node-label test
#[derive(Debug, Clone)]
pub enum Descriptor {
    /// `__` matches any label
    Anything,
    /// bare identifier, exact string equality
    Exact(String),
    /// `A|B|C` literal disjunction
    Strings(Vec<String>),
    /// `/regex/`, unanchored `find` semantics
    Pattern { source: String, re: Regex },
}

impl Descriptor {
    /// Whether `label` satisfies this descriptor
    pub fn matches(&self, label: &str) -> bool {
        match self {
            Descriptor::Anything => true,
            Descriptor::Exact(s) => s == label,
            Descriptor::Strings(ss) => ss.iter().any(|s| s == label),
            Descriptor::Pattern { re, .. } => re.is_match(label),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Anything => f.write_str("__"),
            Descriptor::Exact(s) => f.write_str(s),
            Descriptor::Strings(ss) => f.write_str(&ss.join("|")),
            Descriptor::Pattern { source, .. } => write!(f, "/{source}/"),
        }
    }
}

/// A pattern node matching one tree node
#[derive(Debug, Clone)]
pub struct DescNode {
    /// Relation to the anchor node (the node the parent pattern matched)
    pub rel: Relation,
    /// Pattern-level negation: no candidate may satisfy this sub-pattern
    pub negated: bool,
    /// Pattern-level optionality: failure to satisfy does not fail the match
    pub optional: bool,
    /// Description-level negation (`!NNP`)
    pub neg_desc: bool,
    /// Match against the basic category rather than the full label (`@NP`)
    pub basic_cat: bool,
    /// The label test; `None` for a backreference or a link
    pub desc: Option<Descriptor>,
    /// Capture name (`=name`); for a descriptorless node this is a
    /// backreference to an earlier binding of the same name
    pub name: Option<String>,
    /// Link target (`~name`): label equality with the named node
    pub link: Option<String>,
    /// Regex capture groups exported as match-global variables (`#n%var`)
    pub variable_groups: Vec<(usize, String)>,
    /// Further constraints anchored at this node
    pub child: Option<Box<PatternNode>>,
}

impl DescNode {
    /// Whether a successful match at this node binds `name`
    pub(crate) fn binds_name(&self) -> bool {
        (self.desc.is_some() || self.link.is_some()) && self.name.is_some()
    }
}

/// Conjunction or disjunction of constraints sharing one anchor
#[derive(Debug, Clone)]
pub struct CoordNode {
    pub conj: bool,
    pub negated: bool,
    pub optional: bool,
    pub children: Vec<PatternNode>,
}

/// A node of the compiled pattern AST
#[derive(Debug, Clone)]
pub enum PatternNode {
    Desc(DescNode),
    Coord(CoordNode),
}

impl PatternNode {
    pub(crate) fn negated(&self) -> bool {
        match self {
            PatternNode::Desc(d) => d.negated,
            PatternNode::Coord(c) => c.negated,
        }
    }
}

/// A compiled tregex pattern
#[derive(Debug, Clone)]
pub struct TregexPattern {
    pub(crate) root: DescNode,
    pub(crate) basic_cat: BasicCatFn,
    source: String,
}

impl TregexPattern {
    pub(crate) fn new(root: DescNode, basic_cat: BasicCatFn, source: String) -> Self {
        Self {
            root,
            basic_cat,
            source,
        }
    }

    /// Compile a pattern with the default (Penn) basic-category function.
    /// Equivalent to [`crate::parser::compile`].
    pub fn compile(pattern: &str) -> Result<Self, crate::parser::ParseError> {
        crate::parser::compile(pattern)
    }

    /// The text the pattern was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// A matcher over `tree`.  Head relations (`<<#` etc.) yield no
    /// candidates without a head finder; use
    /// [`TregexPattern::matcher_with_head_finder`] when the pattern uses
    /// them.
    pub fn matcher<'a>(&'a self, tree: &'a Tree) -> TregexMatcher<'a> {
        TregexMatcher::new(self, tree, None)
    }

    /// A matcher over `tree` resolving head relations through `head_finder`
    pub fn matcher_with_head_finder<'a>(
        &'a self,
        tree: &'a Tree,
        head_finder: &'a dyn HeadFinder,
    ) -> TregexMatcher<'a> {
        TregexMatcher::new(self, tree, Some(head_finder))
    }
}

impl fmt::Display for DescNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        if self.optional {
            f.write_str("?")?;
        }
        if !matches!(self.rel, Relation::Root) {
            write!(f, "{} ", self.rel)?;
        }
        if self.child.is_some() {
            f.write_str("(")?;
        }
        if self.neg_desc {
            f.write_str("!")?;
        }
        if self.basic_cat {
            f.write_str("@")?;
        }
        if let Some(desc) = &self.desc {
            write!(f, "{desc}")?;
        }
        for (group, var) in &self.variable_groups {
            write!(f, "#{group}%{var}")?;
        }
        if let Some(link) = &self.link {
            write!(f, "~{link}")?;
        }
        if let Some(name) = &self.name {
            write!(f, "={name}")?;
        }
        if let Some(child) = &self.child {
            write!(f, " {child})")?;
        }
        Ok(())
    }
}

impl fmt::Display for CoordNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        if self.optional {
            f.write_str("?")?;
        }
        if self.conj {
            // a bare conjunction flattens into its surroundings, but a
            // negated or optional group must keep its parentheses
            let wrap = self.negated || self.optional;
            if wrap {
                f.write_str("(")?;
            }
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{child}")?;
            }
            if wrap {
                f.write_str(")")?;
            }
            Ok(())
        } else {
            f.write_str("[")?;
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    f.write_str(" | ")?;
                }
                write!(f, "{child}")?;
            }
            f.write_str("]")
        }
    }
}

impl fmt::Display for PatternNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternNode::Desc(d) => write!(f, "{d}"),
            PatternNode::Coord(c) => write!(f, "{c}"),
        }
    }
}

impl fmt::Display for TregexPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}
