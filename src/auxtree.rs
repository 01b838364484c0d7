//! Tree fragments for surgery operations
//!
//! A [`TreeFragment`] is a parsed tree literal from a surgery script: a
//! little arena of labelled nodes, the `=name`s attached to them, and at
//! most one foot node (a frontier leaf whose label ended in an unescaped
//! `@`).  Fragments are templates: every evaluation of an operation
//! [`TreeFragment::instantiate`]s a fresh copy into the subject tree's
//! arena, so two adjunction sites never share nodes.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::tree::{NodeId, Tree};

#[derive(Debug, Clone)]
struct FragNode {
    label: String,
    name: Option<String>,
    children: Vec<usize>,
}

/// A reusable tree template with optional foot and named nodes
#[derive(Debug, Clone)]
pub struct TreeFragment {
    nodes: Vec<FragNode>,
    root: usize,
    foot: Option<usize>,
    source: String,
}

/// A raw label token split into its parts: the label text (unescaped),
/// the node name from an unescaped `=name` suffix, and whether an
/// unescaped trailing `@` marked the node as a foot.
pub(crate) fn split_label(raw: &str) -> (String, Option<String>, bool) {
    // the name suffix starts at the first unescaped '='
    let mut name = None;
    let mut body: &str = raw;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' => {
                body = &raw[..i];
                name = Some(raw[i + 1..].to_string());
                break;
            }
            _ => {}
        }
    }
    // a trailing unescaped '@' marks the foot
    let mut foot = false;
    let mut body = body.to_string();
    if body.ends_with('@') && !ends_with_escape(&body[..body.len() - 1]) {
        body.pop();
        foot = true;
    }
    (unescape(&body), name, foot)
}

fn ends_with_escape(s: &str) -> bool {
    s.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Incremental builder used by the script parser
pub(crate) struct FragmentBuilder {
    nodes: Vec<FragNode>,
    feet: Vec<usize>,
}

impl FragmentBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            feet: Vec::new(),
        }
    }

    /// Add one node from its raw label token; children were added first
    pub fn add_node(&mut self, raw_label: &str, children: Vec<usize>) -> usize {
        let (label, name, foot) = split_label(raw_label);
        let id = self.nodes.len();
        self.nodes.push(FragNode {
            label,
            name,
            children,
        });
        if foot {
            self.feet.push(id);
        }
        id
    }

    /// Finish with `root` as the fragment root.  Returns the fragment and
    /// the list of foot nodes found; callers enforce their own foot
    /// arity and leaf-ness rules.
    pub fn finish(self, root: usize, source: &str) -> (TreeFragment, Vec<usize>) {
        let feet = self.feet.clone();
        let foot = feet.first().copied();
        (
            TreeFragment {
                nodes: self.nodes,
                root,
                foot,
                source: source.to_string(),
            },
            feet,
        )
    }
}

impl TreeFragment {
    /// A fragment of a single node which is also its own foot; used for
    /// the bare-label form of `createSubtree`
    pub(crate) fn single(label: &str) -> Self {
        let (label, name, _) = split_label(label);
        TreeFragment {
            nodes: vec![FragNode {
                label: label.clone(),
                name,
                children: Vec::new(),
            }],
            root: 0,
            foot: Some(0),
            source: label,
        }
    }

    /// Whether a foot node was marked anywhere in the literal
    pub fn has_foot(&self) -> bool {
        self.foot.is_some()
    }

    pub(crate) fn is_leaf(&self, id: usize) -> bool {
        self.nodes[id].children.is_empty()
    }

    /// The text the fragment was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Copy this fragment into `tree` with fresh node identities,
    /// registering every named node into `names`.  Returns the new root
    /// and, when the fragment has one, the new foot.
    pub(crate) fn instantiate(
        &self,
        tree: &mut Tree,
        names: &mut FxHashMap<String, NodeId>,
    ) -> (NodeId, Option<NodeId>) {
        let mut mapping: FxHashMap<usize, NodeId> = FxHashMap::default();
        let root = self.copy_into(self.root, tree, names, &mut mapping);
        (root, self.foot.map(|f| mapping[&f]))
    }

    fn copy_into(
        &self,
        frag_node: usize,
        tree: &mut Tree,
        names: &mut FxHashMap<String, NodeId>,
        mapping: &mut FxHashMap<usize, NodeId>,
    ) -> NodeId {
        let node = &self.nodes[frag_node];
        let children = node
            .children
            .iter()
            .map(|&c| self.copy_into(c, tree, names, mapping))
            .collect();
        let id = tree.new_node(&node.label, children);
        if let Some(name) = &node.name {
            names.insert(name.clone(), id);
        }
        mapping.insert(frag_node, id);
        id
    }
}

impl fmt::Display for TreeFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
