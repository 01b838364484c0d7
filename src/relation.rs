//! Structural relations between tree nodes
//!
//! Each [`Relation`] links a candidate node to the anchor node the
//! enclosing pattern matched.  Relations are evaluated by enumerating,
//! relative to the root tree, every node standing in the relation to the
//! anchor; the matcher then filters candidates through the node
//! description.  Enumeration orders are fixed (generally nearest-first or
//! preorder), which is what makes repeated `find()` deterministic.

use std::fmt;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use crate::pattern::{BasicCatFn, Descriptor};
use crate::tree::{HeadFinder, NodeId, Tree};

/// The label test of a chained relation such as `<+(C)`
#[derive(Debug, Clone)]
pub struct PathConstraint {
    pub negated: bool,
    pub basic_cat: bool,
    pub desc: Descriptor,
}

impl PathConstraint {
    fn admits(&self, label: &str, basic: BasicCatFn) -> bool {
        let label = if self.basic_cat { basic(label) } else { label };
        self.desc.matches(label) != self.negated
    }
}

impl fmt::Display for PathConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        if self.basic_cat {
            f.write_str("@")?;
        }
        write!(f, "{}", self.desc)
    }
}

/// A binary structural relation, read `anchor REL candidate`
#[derive(Debug, Clone)]
pub enum Relation {
    /// Implicit relation of a pattern's head node to its own anchor
    Root,
    /// `==`
    Equals,
    /// `:` places no constraint; the right side may match anywhere
    Splitter,
    /// `<<`
    Dominates,
    /// `>>`
    DominatedBy,
    /// `<`
    ParentOf,
    /// `>`
    ChildOf,
    /// `..`
    Precedes,
    /// `.`
    ImmediatelyPrecedes,
    /// `,,`
    Follows,
    /// `,`
    ImmediatelyFollows,
    /// `<<,`
    HasLeftmostDescendant,
    /// `<<-`
    HasRightmostDescendant,
    /// `>>,`
    LeftmostDescendantOf,
    /// `>>-`
    RightmostDescendantOf,
    /// `$`
    SisterOf,
    /// `$++`
    LeftSisterOf,
    /// `$--`
    RightSisterOf,
    /// `$+`
    ImmediateLeftSisterOf,
    /// `$-`
    ImmediateRightSisterOf,
    /// `<:`
    HasOnlyChild,
    /// `>:`
    OnlyChildOf,
    /// `<<:`
    UnaryPathAncestorOf,
    /// `>>:`
    UnaryPathDescendantOf,
    /// `<=`
    ParentEquals,
    /// `<i` / `<-i`
    HasIthChild(i32),
    /// `>i` / `>-i`
    IthChildOf(i32),
    /// `>>#`
    Heads,
    /// `<<#`
    HeadedBy,
    /// `>#`
    ImmediatelyHeads,
    /// `<#`
    ImmediatelyHeadedBy,
    /// `<+(C)`
    UnbrokenDominates(PathConstraint),
    /// `>+(C)`
    UnbrokenDominatedBy(PathConstraint),
    /// `.+(C)`
    UnbrokenPrecedes(PathConstraint),
    /// `,+(C)`
    UnbrokenFollows(PathConstraint),
}

/// Read-only view of a tree used while matching: the frozen tree, its
/// root, a parent table, and the injected capabilities.
pub(crate) struct TreeWalk<'a> {
    pub tree: &'a Tree,
    pub root: NodeId,
    pub parents: &'a FxHashMap<NodeId, NodeId>,
    pub head_finder: Option<&'a dyn HeadFinder>,
    pub basic_cat: BasicCatFn,
}

impl<'a> TreeWalk<'a> {
    pub fn parent(&self, n: NodeId) -> Option<NodeId> {
        if n == self.root {
            None
        } else {
            self.parents.get(&n).copied()
        }
    }

    fn head(&self, n: NodeId) -> Option<NodeId> {
        self.head_finder.and_then(|hf| hf.head_child(self.tree, n))
    }

    fn first_child(&self, n: NodeId) -> Option<NodeId> {
        self.tree.children(n).first().copied()
    }

    fn last_child(&self, n: NodeId) -> Option<NodeId> {
        self.tree.children(n).last().copied()
    }

    fn admits(&self, c: &PathConstraint, n: NodeId) -> bool {
        c.admits(self.tree.label(n), self.basic_cat)
    }
}

impl Relation {
    /// All nodes standing in this relation to `t`, in enumeration order
    pub(crate) fn candidates(&self, t: NodeId, w: &TreeWalk<'_>) -> Vec<NodeId> {
        match self {
            Relation::Root | Relation::Equals => vec![t],
            Relation::Splitter => w.tree.preorder(w.root),
            Relation::Dominates => {
                let mut nodes = w.tree.preorder(t);
                nodes.remove(0);
                nodes
            }
            Relation::DominatedBy => {
                let mut out = Vec::new();
                let mut cur = w.parent(t);
                while let Some(p) = cur {
                    out.push(p);
                    cur = w.parent(p);
                }
                out
            }
            Relation::ParentOf => w.tree.children(t).to_vec(),
            Relation::ChildOf => w.parent(t).into_iter().collect(),
            Relation::Precedes => {
                // right context of t, nearest subtrees first, preorder within
                let mut stack = Vec::new();
                let mut current = t;
                let mut parent = w.parent(t);
                while let Some(p) = parent {
                    let kids = w.tree.children(p);
                    let at = w.tree.index_in(p, current).unwrap_or(0);
                    for &kid in kids[at + 1..].iter().rev() {
                        stack.push(kid);
                    }
                    current = p;
                    parent = w.parent(p);
                }
                drain_preorder(w.tree, stack)
            }
            Relation::Follows => {
                let mut stack = Vec::new();
                let mut current = t;
                let mut parent = w.parent(t);
                while let Some(p) = parent {
                    let kids = w.tree.children(p);
                    let at = w.tree.index_in(p, current).unwrap_or(0);
                    for &kid in &kids[..at] {
                        stack.push(kid);
                    }
                    current = p;
                    parent = w.parent(p);
                }
                drain_preorder(w.tree, stack)
            }
            Relation::ImmediatelyPrecedes => {
                // the next node in surface order, then its leftmost chain
                let mut out = Vec::new();
                let mut current = t;
                loop {
                    let Some(p) = w.parent(current) else {
                        return out;
                    };
                    if w.last_child(p) != Some(current) {
                        let at = w.tree.index_in(p, current).unwrap_or(0);
                        let mut next = w.tree.children(p)[at + 1];
                        out.push(next);
                        while let Some(first) = w.first_child(next) {
                            out.push(first);
                            next = first;
                        }
                        return out;
                    }
                    current = p;
                }
            }
            Relation::ImmediatelyFollows => {
                let mut out = Vec::new();
                let mut current = t;
                loop {
                    let Some(p) = w.parent(current) else {
                        return out;
                    };
                    if w.first_child(p) != Some(current) {
                        let at = w.tree.index_in(p, current).unwrap_or(0);
                        let mut next = w.tree.children(p)[at - 1];
                        out.push(next);
                        while let Some(last) = w.last_child(next) {
                            out.push(last);
                            next = last;
                        }
                        return out;
                    }
                    current = p;
                }
            }
            Relation::HasLeftmostDescendant => {
                let mut out = Vec::new();
                let mut cur = w.first_child(t);
                while let Some(n) = cur {
                    out.push(n);
                    cur = w.first_child(n);
                }
                out
            }
            Relation::HasRightmostDescendant => {
                let mut out = Vec::new();
                let mut cur = w.last_child(t);
                while let Some(n) = cur {
                    out.push(n);
                    cur = w.last_child(n);
                }
                out
            }
            Relation::LeftmostDescendantOf => {
                let mut out = Vec::new();
                let mut cur = t;
                while let Some(p) = w.parent(cur) {
                    if w.first_child(p) != Some(cur) {
                        break;
                    }
                    out.push(p);
                    cur = p;
                }
                out
            }
            Relation::RightmostDescendantOf => {
                let mut out = Vec::new();
                let mut cur = t;
                while let Some(p) = w.parent(cur) {
                    if w.last_child(p) != Some(cur) {
                        break;
                    }
                    out.push(p);
                    cur = p;
                }
                out
            }
            Relation::SisterOf => match w.parent(t) {
                Some(p) => w
                    .tree
                    .children(p)
                    .iter()
                    .copied()
                    .filter(|&c| c != t)
                    .collect(),
                None => Vec::new(),
            },
            Relation::LeftSisterOf => match w.parent(t) {
                // siblings to the right of t, rightmost first
                Some(p) => {
                    let kids = w.tree.children(p);
                    let at = w.tree.index_in(p, t).unwrap_or(0);
                    kids[at + 1..].iter().rev().copied().collect()
                }
                None => Vec::new(),
            },
            Relation::RightSisterOf => match w.parent(t) {
                // siblings to the left of t, leftmost first
                Some(p) => {
                    let kids = w.tree.children(p);
                    let at = w.tree.index_in(p, t).unwrap_or(0);
                    kids[..at].to_vec()
                }
                None => Vec::new(),
            },
            Relation::ImmediateLeftSisterOf => match w.parent(t) {
                Some(p) => {
                    let kids = w.tree.children(p);
                    let at = w.tree.index_in(p, t).unwrap_or(0);
                    kids.get(at + 1).copied().into_iter().collect()
                }
                None => Vec::new(),
            },
            Relation::ImmediateRightSisterOf => match w.parent(t) {
                Some(p) => {
                    let at = w.tree.index_in(p, t).unwrap_or(0);
                    if at > 0 {
                        vec![w.tree.children(p)[at - 1]]
                    } else {
                        Vec::new()
                    }
                }
                None => Vec::new(),
            },
            Relation::HasOnlyChild => {
                if w.tree.num_children(t) == 1 {
                    vec![w.tree.children(t)[0]]
                } else {
                    Vec::new()
                }
            }
            Relation::OnlyChildOf => match w.parent(t) {
                Some(p) if w.tree.num_children(p) == 1 => vec![p],
                _ => Vec::new(),
            },
            Relation::UnaryPathAncestorOf => {
                let mut out = Vec::new();
                let mut cur = t;
                while w.tree.num_children(cur) == 1 {
                    cur = w.tree.children(cur)[0];
                    out.push(cur);
                }
                out
            }
            Relation::UnaryPathDescendantOf => {
                let mut out = Vec::new();
                let mut cur = t;
                while let Some(p) = w.parent(cur) {
                    if w.tree.num_children(p) != 1 {
                        break;
                    }
                    out.push(p);
                    cur = p;
                }
                out
            }
            Relation::ParentEquals => {
                let mut out = vec![t];
                out.extend_from_slice(w.tree.children(t));
                out
            }
            Relation::HasIthChild(i) => {
                let kids = w.tree.children(t);
                ith(kids, *i).into_iter().collect()
            }
            Relation::IthChildOf(i) => match w.parent(t) {
                Some(p) if ith(w.tree.children(p), *i) == Some(t) => vec![p],
                _ => Vec::new(),
            },
            Relation::Heads => {
                // ancestors headed by the chain starting at t
                let mut out = Vec::new();
                let mut cur = t;
                while let Some(p) = w.parent(cur) {
                    if w.head(p) != Some(cur) {
                        break;
                    }
                    out.push(p);
                    cur = p;
                }
                out
            }
            Relation::HeadedBy => {
                let mut out = Vec::new();
                let mut cur = t;
                while let Some(h) = w.head(cur) {
                    out.push(h);
                    cur = h;
                }
                out
            }
            Relation::ImmediatelyHeads => match w.parent(t) {
                Some(p) if w.head(p) == Some(t) => vec![p],
                _ => Vec::new(),
            },
            Relation::ImmediatelyHeadedBy => w.head(t).into_iter().collect(),
            Relation::UnbrokenDominates(c) => {
                // descendants reachable through chains of C-matching nodes;
                // the endpoint itself need not match C
                let mut out = Vec::new();
                let mut stack: Vec<NodeId> =
                    w.tree.children(t).iter().rev().copied().collect();
                while let Some(n) = stack.pop() {
                    out.push(n);
                    if w.admits(c, n) {
                        for &kid in w.tree.children(n).iter().rev() {
                            stack.push(kid);
                        }
                    }
                }
                out
            }
            Relation::UnbrokenDominatedBy(c) => {
                let mut out = Vec::new();
                let mut cur = w.parent(t);
                while let Some(p) = cur {
                    out.push(p);
                    cur = if w.admits(c, p) { w.parent(p) } else { None };
                }
                out
            }
            Relation::UnbrokenPrecedes(c) => {
                let mut stack = Vec::new();
                let mut seen = FxHashSet::default();
                unbroken_right_context(w, c, t, &mut stack, &mut seen);
                stack.reverse();
                stack
            }
            Relation::UnbrokenFollows(c) => {
                let mut stack = Vec::new();
                let mut seen = FxHashSet::default();
                unbroken_left_context(w, c, t, &mut stack, &mut seen);
                stack.reverse();
                stack
            }
        }
    }
}

fn ith(kids: &[NodeId], i: i32) -> Option<NodeId> {
    if i > 0 {
        kids.get(i as usize - 1).copied()
    } else {
        let back = (-i) as usize;
        if back <= kids.len() {
            Some(kids[kids.len() - back])
        } else {
            None
        }
    }
}

/// Drain a DFS stack, expanding each popped node's children, yielding the
/// popped order (preorder within each pushed subtree)
fn drain_preorder(tree: &Tree, mut stack: Vec<NodeId>) -> Vec<NodeId> {
    let mut out = Vec::new();
    while let Some(n) = stack.pop() {
        out.push(n);
        for &kid in tree.children(n).iter().rev() {
            stack.push(kid);
        }
    }
    out
}

/// Collect the nodes an unbroken C-chain can precede, mirroring the
/// recursive frontier walk of the reference implementation: every node
/// immediately following `node` is reachable; chains extend through nodes
/// that match C.
fn unbroken_right_context(
    w: &TreeWalk<'_>,
    c: &PathConstraint,
    node: NodeId,
    stack: &mut Vec<NodeId>,
    seen: &mut FxHashSet<NodeId>,
) {
    if node == w.root {
        return;
    }
    let mut node = node;
    let Some(mut parent) = w.parent(node) else {
        return;
    };
    let mut i = w.tree.index_in(parent, node).unwrap_or(0);
    while i == w.tree.num_children(parent) - 1 && parent != w.root {
        node = parent;
        let Some(p) = w.parent(parent) else { return };
        parent = p;
        i = w.tree.index_in(parent, node).unwrap_or(0);
    }
    let mut following = if i + 1 < w.tree.num_children(parent) {
        Some(w.tree.children(parent)[i + 1])
    } else {
        None
    };
    while let Some(f) = following {
        if seen.insert(f) {
            stack.push(f);
        }
        if w.admits(c, f) {
            unbroken_right_context(w, c, f, stack, seen);
        }
        following = w.tree.children(f).first().copied();
    }
}

fn unbroken_left_context(
    w: &TreeWalk<'_>,
    c: &PathConstraint,
    node: NodeId,
    stack: &mut Vec<NodeId>,
    seen: &mut FxHashSet<NodeId>,
) {
    if node == w.root {
        return;
    }
    let mut node = node;
    let Some(mut parent) = w.parent(node) else {
        return;
    };
    let mut i = w.tree.index_in(parent, node).unwrap_or(0);
    while i == 0 && parent != w.root {
        node = parent;
        let Some(p) = w.parent(parent) else { return };
        parent = p;
        i = w.tree.index_in(parent, node).unwrap_or(0);
    }
    let mut preceding = if i > 0 {
        Some(w.tree.children(parent)[i - 1])
    } else {
        None
    };
    while let Some(p) = preceding {
        if seen.insert(p) {
            stack.push(p);
        }
        if w.admits(c, p) {
            unbroken_left_context(w, c, p, stack, seen);
        }
        preceding = w.tree.children(p).first().copied();
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Root => f.write_str(""),
            Relation::Equals => f.write_str("=="),
            Relation::Splitter => f.write_str(":"),
            Relation::Dominates => f.write_str("<<"),
            Relation::DominatedBy => f.write_str(">>"),
            Relation::ParentOf => f.write_str("<"),
            Relation::ChildOf => f.write_str(">"),
            Relation::Precedes => f.write_str(".."),
            Relation::ImmediatelyPrecedes => f.write_str("."),
            Relation::Follows => f.write_str(",,"),
            Relation::ImmediatelyFollows => f.write_str(","),
            Relation::HasLeftmostDescendant => f.write_str("<<,"),
            Relation::HasRightmostDescendant => f.write_str("<<-"),
            Relation::LeftmostDescendantOf => f.write_str(">>,"),
            Relation::RightmostDescendantOf => f.write_str(">>-"),
            Relation::SisterOf => f.write_str("$"),
            Relation::LeftSisterOf => f.write_str("$++"),
            Relation::RightSisterOf => f.write_str("$--"),
            Relation::ImmediateLeftSisterOf => f.write_str("$+"),
            Relation::ImmediateRightSisterOf => f.write_str("$-"),
            Relation::HasOnlyChild => f.write_str("<:"),
            Relation::OnlyChildOf => f.write_str(">:"),
            Relation::UnaryPathAncestorOf => f.write_str("<<:"),
            Relation::UnaryPathDescendantOf => f.write_str(">>:"),
            Relation::ParentEquals => f.write_str("<="),
            Relation::HasIthChild(i) => write!(f, "<{i}"),
            Relation::IthChildOf(i) => write!(f, ">{i}"),
            Relation::Heads => f.write_str(">>#"),
            Relation::HeadedBy => f.write_str("<<#"),
            Relation::ImmediatelyHeads => f.write_str(">#"),
            Relation::ImmediatelyHeadedBy => f.write_str("<#"),
            Relation::UnbrokenDominates(c) => write!(f, "<+({c})"),
            Relation::UnbrokenDominatedBy(c) => write!(f, ">+({c})"),
            Relation::UnbrokenPrecedes(c) => write!(f, ".+({c})"),
            Relation::UnbrokenFollows(c) => write!(f, ",+({c})"),
        }
    }
}
