//! Surgery operations
//!
//! The operation AST produced by the script compiler and the interpreter
//! that applies one compiled operation sequence at one match site.  Every
//! operation consumes the subject tree plus the match's binding table and
//! either edits the tree in place or reports that the tree as a whole was
//! deleted.  Tree-literal operands are instantiated afresh per
//! application and their `=name`d nodes become visible to the operations
//! that follow in the same sequence.

use std::fmt;

use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

use crate::auxtree::TreeFragment;
use crate::matcher::Match;
use crate::tree::{NodeId, Tree};

/// Runtime failure applying an operation
#[derive(Debug, Error)]
pub enum SurgeryError {
    #[error("no node named {0:?} is bound in this match")]
    UndeclaredName(String),

    #[error("node named {0:?} is no longer reachable from the root")]
    NodeNotInTree(String),

    #[error("excise: {top:?} does not dominate {bottom:?}")]
    ExciseDomination { top: String, bottom: String },

    #[error("createSubtree: {first:?} and {second:?} are not siblings")]
    DifferentParents { first: String, second: String },

    #[error("cannot {0} at the tree root")]
    RootPosition(&'static str),

    #[error("child position {0} does not exist at the target node")]
    BadPosition(i32),

    #[error("replacing the root with multiple trees is not possible")]
    MultipleRootReplacement,

    #[error("no variable string {0:?} was captured in this match")]
    UndefinedVariable(String),
}

/// The new-label argument of `relabel`
#[derive(Debug, Clone)]
pub enum RelabelSpec {
    /// `relabel n NewLabel` or `relabel n /text/`
    Literal(String),
    /// `relabel n /regex/replacement/`: global replace over the label
    Regex {
        pattern: Regex,
        replacement: Vec<ReplacePart>,
    },
}

/// One piece of a relabel replacement string
#[derive(Debug, Clone)]
pub enum ReplacePart {
    Text(String),
    /// `$n`: a capture group of the relabel regex
    Group(usize),
    /// `={node}`: the current label of a bound node
    Node(String),
    /// `%{var}`: a variable string captured by the match
    Variable(String),
}

/// A position at which to insert or move a node
#[derive(Debug, Clone)]
pub enum Location {
    /// `$+ name`: immediate left sister of the named node
    LeftSisterOf(String),
    /// `$- name`: immediate right sister of the named node
    RightSisterOf(String),
    /// `>i name` / `>-i name`: i-th (from left or right) child slot
    Child(i32, String),
}

/// An operand that is either a bound name or a tree literal
#[derive(Debug, Clone)]
pub enum OpChild {
    Name(String),
    Fragment(TreeFragment),
}

/// What `replace` substitutes for the target
#[derive(Debug, Clone)]
pub enum ReplaceSource {
    /// a structural copy of another bound node
    Node(String),
    /// fresh instantiations of one or more tree literals
    Trees(Vec<TreeFragment>),
}

/// One surgery operation
#[derive(Debug, Clone)]
pub enum Op {
    Delete(Vec<String>),
    Prune(Vec<String>),
    Excise { top: String, bottom: String },
    Relabel { name: String, spec: RelabelSpec },
    Insert { child: OpChild, location: Location },
    Move { name: String, location: Location },
    Replace { target: String, with: ReplaceSource },
    CreateSubtree {
        shape: TreeFragment,
        start: String,
        end: Option<String>,
    },
    Adjoin { aux: TreeFragment, target: String },
    AdjoinToHead { aux: TreeFragment, target: String },
    AdjoinToFoot { aux: TreeFragment, target: String },
    Coindex(Vec<String>),
    IfExists { name: String, then: Box<Op> },
}

/// A compiled sequence of operations, applied together at each match
#[derive(Debug, Clone)]
pub struct TsurgeonScript {
    pub(crate) ops: Vec<Op>,
    pub(crate) source: String,
}

impl TsurgeonScript {
    /// Compile an operation line; see [`crate::script::parse_operation`]
    pub fn parse(text: &str) -> Result<Self, crate::script::ScriptError> {
        crate::script::parse_operation(text)
    }

    /// The text the script was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Apply the whole sequence to `tree` at the site described by `m`.
    /// Returns `Ok(false)` when an operation deleted the tree outright.
    pub fn evaluate(&self, tree: &mut Tree, m: &Match) -> Result<bool, SurgeryError> {
        let mut cx = SurgeryContext {
            m,
            new_names: FxHashMap::default(),
            coindexer: Coindexer::new(),
        };
        for op in &self.ops {
            if !apply(op, tree, &mut cx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for TsurgeonScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Fresh-index source for `coindex`, scoped to one script application.
/// The first request scans the tree so generated indices never collide
/// with `-N` suffixes already present.
struct Coindexer {
    last: Option<u32>,
}

impl Coindexer {
    fn new() -> Self {
        Self { last: None }
    }

    fn next_index(&mut self, tree: &Tree) -> u32 {
        let last = self.last.unwrap_or_else(|| {
            tree.preorder(tree.root())
                .into_iter()
                .filter_map(|n| trailing_index(tree.label(n)))
                .max()
                .unwrap_or(0)
        });
        let next = last + 1;
        self.last = Some(next);
        next
    }
}

fn trailing_index(label: &str) -> Option<u32> {
    let (_, digits) = label.rsplit_once('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

struct SurgeryContext<'a> {
    m: &'a Match,
    /// nodes named by tree literals instantiated earlier in this pass;
    /// these shadow the match bindings
    new_names: FxHashMap<String, NodeId>,
    coindexer: Coindexer,
}

impl SurgeryContext<'_> {
    fn resolve(&self, name: &str) -> Result<NodeId, SurgeryError> {
        self.new_names
            .get(name)
            .copied()
            .or_else(|| self.m.get(name))
            .ok_or_else(|| SurgeryError::UndeclaredName(name.to_string()))
    }

    fn is_bound(&self, name: &str) -> bool {
        self.new_names.contains_key(name) || self.m.get(name).is_some()
    }
}

/// The parent of `node` and its child index, with reachability checked
fn parent_and_index(
    tree: &Tree,
    node: NodeId,
    name: &str,
) -> Result<(NodeId, usize), SurgeryError> {
    let parent = tree
        .parent_of(node)
        .ok_or_else(|| SurgeryError::NodeNotInTree(name.to_string()))?;
    let index = tree
        .index_in(parent, node)
        .ok_or_else(|| SurgeryError::NodeNotInTree(name.to_string()))?;
    Ok((parent, index))
}

fn apply(op: &Op, tree: &mut Tree, cx: &mut SurgeryContext<'_>) -> Result<bool, SurgeryError> {
    match op {
        Op::Delete(names) => {
            for name in names {
                let node = cx.resolve(name)?;
                if node == tree.root() {
                    return Ok(false);
                }
                let (parent, index) = parent_and_index(tree, node, name)?;
                tree.remove_child(parent, index);
            }
            Ok(true)
        }

        Op::Prune(names) => {
            for name in names {
                let node = cx.resolve(name)?;
                if node == tree.root() {
                    return Ok(false);
                }
                let (parent, index) = parent_and_index(tree, node, name)?;
                tree.remove_child(parent, index);
                // ancestors emptied by the deletion go too
                let mut current = parent;
                while tree.num_children(current) == 0 {
                    if current == tree.root() {
                        return Ok(false);
                    }
                    let (up, index) = parent_and_index(tree, current, name)?;
                    tree.remove_child(up, index);
                    current = up;
                }
            }
            Ok(true)
        }

        Op::Excise { top, bottom } => {
            let top_node = cx.resolve(top)?;
            let bottom_node = cx.resolve(bottom)?;
            let mut cur = bottom_node;
            while cur != top_node {
                cur = tree
                    .parent_of(cur)
                    .ok_or_else(|| SurgeryError::ExciseDomination {
                        top: top.clone(),
                        bottom: bottom.clone(),
                    })?;
            }
            let promoted = tree.children(bottom_node).to_vec();
            if top_node == tree.root() {
                return match promoted.len() {
                    1 => {
                        tree.set_root(promoted[0]);
                        Ok(true)
                    }
                    _ => Ok(false),
                };
            }
            let (parent, index) = parent_and_index(tree, top_node, top)?;
            tree.splice_children(parent, index, index, promoted);
            Ok(true)
        }

        Op::Relabel { name, spec } => {
            let node = cx.resolve(name)?;
            let new_label = match spec {
                RelabelSpec::Literal(s) => s.clone(),
                RelabelSpec::Regex {
                    pattern,
                    replacement,
                } => {
                    let old = tree.label(node).to_string();
                    let mut out = String::new();
                    let mut last = 0;
                    for caps in pattern.captures_iter(&old) {
                        let whole = caps.get(0).expect("group 0 always present");
                        out.push_str(&old[last..whole.start()]);
                        for part in replacement {
                            match part {
                                ReplacePart::Text(t) => out.push_str(t),
                                ReplacePart::Group(n) => {
                                    out.push_str(caps.get(*n).map(|g| g.as_str()).unwrap_or(""));
                                }
                                ReplacePart::Node(other) => {
                                    out.push_str(tree.label(cx.resolve(other)?));
                                }
                                ReplacePart::Variable(var) => {
                                    out.push_str(cx.m.variable(var).ok_or_else(|| {
                                        SurgeryError::UndefinedVariable(var.clone())
                                    })?);
                                }
                            }
                        }
                        last = whole.end();
                    }
                    out.push_str(&old[last..]);
                    out
                }
            };
            tree.set_label(node, new_label);
            Ok(true)
        }

        Op::Insert { child, location } => {
            let node = match child {
                // inserting a bound name inserts a structural copy
                OpChild::Name(name) => {
                    let src = cx.resolve(name)?;
                    tree.copy_subtree(src)
                }
                OpChild::Fragment(frag) => frag.instantiate(tree, &mut cx.new_names).0,
            };
            let (parent, index) = locate(location, tree, cx)?;
            tree.insert_child(parent, index, node);
            Ok(true)
        }

        Op::Move { name, location } => {
            let node = cx.resolve(name)?;
            if node == tree.root() {
                return Err(SurgeryError::RootPosition("move"));
            }
            let (parent, index) = parent_and_index(tree, node, name)?;
            tree.remove_child(parent, index);
            // the slot is computed after the removal
            let (new_parent, new_index) = locate(location, tree, cx)?;
            tree.insert_child(new_parent, new_index, node);
            Ok(true)
        }

        Op::Replace { target, with } => {
            let target_node = cx.resolve(target)?;
            let replacements = match with {
                ReplaceSource::Node(name) => {
                    let src = cx.resolve(name)?;
                    vec![tree.copy_subtree(src)]
                }
                ReplaceSource::Trees(frags) => frags
                    .iter()
                    .map(|f| f.instantiate(tree, &mut cx.new_names).0)
                    .collect(),
            };
            if target_node == tree.root() {
                if replacements.len() != 1 {
                    return Err(SurgeryError::MultipleRootReplacement);
                }
                tree.set_root(replacements[0]);
                return Ok(true);
            }
            let (parent, index) = parent_and_index(tree, target_node, target)?;
            tree.splice_children(parent, index, index, replacements);
            Ok(true)
        }

        Op::CreateSubtree { shape, start, end } => {
            let first = cx.resolve(start)?;
            let second = match end {
                Some(name) => cx.resolve(name)?,
                None => first,
            };
            if first == tree.root() || second == tree.root() {
                return Err(SurgeryError::RootPosition("createSubtree"));
            }
            let (parent, i) = parent_and_index(tree, first, start)?;
            let (parent2, j) =
                parent_and_index(tree, second, end.as_deref().unwrap_or(start))?;
            if parent != parent2 {
                return Err(SurgeryError::DifferentParents {
                    first: start.clone(),
                    second: end.clone().unwrap_or_else(|| start.clone()),
                });
            }
            // the span may be named in either order
            let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
            let (new_root, foot) = shape.instantiate(tree, &mut cx.new_names);
            let foot = foot.expect("createSubtree shapes always carry a foot");
            let span = tree.children(parent)[lo..=hi].to_vec();
            tree.set_children(foot, span);
            tree.splice_children(parent, lo, hi, vec![new_root]);
            Ok(true)
        }

        Op::Adjoin { aux, target } => {
            let target_node = cx.resolve(target)?;
            let (aux_root, foot) = aux.instantiate(tree, &mut cx.new_names);
            let foot = foot.expect("auxiliary trees always carry a foot");
            let kids = tree.take_children(target_node);
            tree.set_children(foot, kids);
            if target_node == tree.root() {
                tree.set_root(aux_root);
            } else {
                let (parent, index) = parent_and_index(tree, target_node, target)?;
                tree.splice_children(parent, index, index, vec![aux_root]);
            }
            Ok(true)
        }

        Op::AdjoinToHead { aux, target } => {
            // the target stays in place and takes over the auxiliary
            // root's children; the foot receives the target's old ones
            let target_node = cx.resolve(target)?;
            let (aux_root, foot) = aux.instantiate(tree, &mut cx.new_names);
            let foot = foot.expect("auxiliary trees always carry a foot");
            let old_kids = tree.take_children(target_node);
            let aux_kids = tree.take_children(aux_root);
            tree.set_children(target_node, aux_kids);
            tree.set_children(foot, old_kids);
            Ok(true)
        }

        Op::AdjoinToFoot { aux, target } => {
            let target_node = cx.resolve(target)?;
            let (aux_root, foot) = aux.instantiate(tree, &mut cx.new_names);
            let foot = foot.expect("auxiliary trees always carry a foot");
            if foot == aux_root {
                warn!(
                    aux = %aux,
                    "adjoinF into a one-level auxiliary tree has no parent for the target; tree left unchanged"
                );
                return Ok(true);
            }
            // note the target's old position before it moves under the foot
            let old_position = if target_node == tree.root() {
                None
            } else {
                Some(parent_and_index(tree, target_node, target)?)
            };
            let foot_parent = tree
                .parent_of_in(aux_root, foot)
                .expect("foot is below the auxiliary root");
            let foot_index = tree
                .index_in(foot_parent, foot)
                .expect("foot is a child of its parent");
            tree.splice_children(foot_parent, foot_index, foot_index, vec![target_node]);
            match old_position {
                None => tree.set_root(aux_root),
                Some((parent, index)) => {
                    tree.splice_children(parent, index, index, vec![aux_root]);
                }
            }
            Ok(true)
        }

        Op::Coindex(names) => {
            let index = cx.coindexer.next_index(tree);
            for name in names {
                let node = cx.resolve(name)?;
                let label = format!("{}-{}", tree.label(node), index);
                tree.set_label(node, label);
            }
            Ok(true)
        }

        Op::IfExists { name, then } => {
            if cx.is_bound(name) {
                apply(then, tree, cx)
            } else {
                Ok(true)
            }
        }
    }
}

/// Resolve a location to a (parent, index) slot
fn locate(
    location: &Location,
    tree: &Tree,
    cx: &SurgeryContext<'_>,
) -> Result<(NodeId, usize), SurgeryError> {
    match location {
        Location::LeftSisterOf(name) => {
            let node = cx.resolve(name)?;
            if node == tree.root() {
                return Err(SurgeryError::RootPosition("insert a sister"));
            }
            parent_and_index(tree, node, name)
        }
        Location::RightSisterOf(name) => {
            let node = cx.resolve(name)?;
            if node == tree.root() {
                return Err(SurgeryError::RootPosition("insert a sister"));
            }
            let (parent, index) = parent_and_index(tree, node, name)?;
            Ok((parent, index + 1))
        }
        Location::Child(i, name) => {
            let parent = cx.resolve(name)?;
            let len = tree.num_children(parent) as i64;
            let slot = if *i > 0 {
                i64::from(*i) - 1
            } else if *i == 0 {
                0
            } else {
                len + i64::from(*i) + 1
            };
            if slot < 0 || slot > len {
                return Err(SurgeryError::BadPosition(*i));
            }
            Ok((parent, slot as usize))
        }
    }
}
