//! Backtracking match engine
//!
//! A [`TregexMatcher`] walks the tree in preorder, anchoring the pattern
//! at each node and enumerating every way the pattern's constraints can be
//! satisfied there.  Matcher state mirrors the pattern AST: one
//! description matcher per [`DescNode`], one coordination matcher per
//! [`CoordNode`], each able to produce its next local solution on demand.
//! Name and variable bindings live in a shared context and are unwound as
//! the engine backtracks, so a [`Match`] is a consistent snapshot.
//!
//! The tree must not be mutated while a matcher for it exists; the driver
//! loop in [`crate::process`] builds a fresh matcher after every edit.

use rustc_hash::FxHashMap;

use crate::pattern::{CoordNode, DescNode, Descriptor, PatternNode, TregexPattern};
use crate::relation::TreeWalk;
use crate::tree::{HeadFinder, NodeId, Tree};

/// One successful match: the matched node plus binding snapshots
#[derive(Debug, Clone)]
pub struct Match {
    node: NodeId,
    names: FxHashMap<String, NodeId>,
    variables: FxHashMap<String, String>,
}

impl Match {
    /// The node the whole pattern matched at
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The node bound to a capture name, if that name was bound
    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// The string captured for a regex variable group
    pub fn variable(&self, var: &str) -> Option<&str> {
        self.variables.get(var).map(String::as_str)
    }

    /// All (name, node) bindings of this match
    pub fn iter_named(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.names.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

/// Shared mutable state of one match attempt
struct MatchContext<'a> {
    tree: &'a Tree,
    root: NodeId,
    parents: FxHashMap<NodeId, NodeId>,
    head_finder: Option<&'a dyn HeadFinder>,
    pattern: &'a TregexPattern,
    names: FxHashMap<String, NodeId>,
    // variable -> (string, commit count); several pattern nodes may
    // commit the same variable and must release it independently
    variables: FxHashMap<String, (String, u32)>,
}

impl<'a> MatchContext<'a> {
    fn walk(&self) -> TreeWalk<'_> {
        TreeWalk {
            tree: self.tree,
            root: self.root,
            parents: &self.parents,
            head_finder: self.head_finder,
            basic_cat: self.pattern.basic_cat,
        }
    }

    fn get_var(&self, var: &str) -> Option<&str> {
        self.variables.get(var).map(|(s, _)| s.as_str())
    }

    fn set_var(&mut self, var: &str, value: String) {
        self.variables
            .entry(var.to_string())
            .and_modify(|(_, n)| *n += 1)
            .or_insert((value, 1));
    }

    fn unset_var(&mut self, var: &str) {
        if let Some((_, n)) = self.variables.get_mut(var) {
            if *n > 1 {
                *n -= 1;
            } else {
                self.variables.remove(var);
            }
        }
    }
}

/// Matcher state for one pattern node
enum MatcherNode<'p> {
    Desc(DescMatcher<'p>),
    Coord(CoordMatcher<'p>),
}

impl<'p> MatcherNode<'p> {
    fn build(pattern: &'p PatternNode) -> Self {
        match pattern {
            PatternNode::Desc(d) => MatcherNode::Desc(DescMatcher::build(d)),
            PatternNode::Coord(c) => MatcherNode::Coord(CoordMatcher::build(c)),
        }
    }

    /// Re-anchor at `anchor` and discard all prior iteration state
    fn reset(&mut self, anchor: NodeId, cx: &mut MatchContext<'_>) {
        self.cleanup(cx);
        match self {
            MatcherNode::Desc(m) => m.anchor = anchor,
            MatcherNode::Coord(m) => m.anchor = anchor,
        }
    }

    /// Unwind bindings and iteration state, recursively
    fn cleanup(&mut self, cx: &mut MatchContext<'_>) {
        match self {
            MatcherNode::Desc(m) => m.cleanup(cx),
            MatcherNode::Coord(m) => m.cleanup(cx),
        }
    }

    /// Produce the next local solution, or report that none remains
    fn matches(&mut self, cx: &mut MatchContext<'_>) -> bool {
        match self {
            MatcherNode::Desc(m) => m.matches(cx),
            MatcherNode::Coord(m) => m.matches(cx),
        }
    }
}

struct DescMatcher<'p> {
    node: &'p DescNode,
    anchor: NodeId,
    candidates: Option<Vec<NodeId>>,
    pos: usize,
    current: Option<NodeId>,
    child: Option<Box<MatcherNode<'p>>>,
    matched_once: bool,
    committed_vars: bool,
    finished: bool,
}

impl<'p> DescMatcher<'p> {
    fn build(node: &'p DescNode) -> Self {
        Self {
            node,
            anchor: 0,
            candidates: None,
            pos: 0,
            current: None,
            child: node.child.as_deref().map(|c| Box::new(MatcherNode::build(c))),
            matched_once: false,
            committed_vars: false,
            finished: false,
        }
    }

    fn cleanup(&mut self, cx: &mut MatchContext<'_>) {
        self.decommit_vars(cx);
        self.unbind_name(cx);
        self.candidates = None;
        self.pos = 0;
        self.current = None;
        self.matched_once = false;
        self.finished = false;
        if let Some(child) = &mut self.child {
            child.cleanup(cx);
        }
    }

    fn matches(&mut self, cx: &mut MatchContext<'_>) -> bool {
        // a negated or optional node reports at most one outcome
        if self.finished {
            return false;
        }
        loop {
            if self.match_child(cx) {
                if self.node.negated {
                    // a witness refutes the negation once and for all
                    self.finished = true;
                    return false;
                }
                if self.node.optional {
                    self.finished = true;
                }
                return true;
            }
            self.advance(cx);
            if self.finished {
                break;
            }
        }
        if self.node.negated {
            // no candidate satisfied the sub-pattern: the negation holds
            return true;
        }
        self.decommit_vars(cx);
        self.unbind_name(cx);
        self.current = None;
        self.node.optional
    }

    /// Ask the child pattern for its next solution at the current node
    fn match_child(&mut self, cx: &mut MatchContext<'_>) -> bool {
        if self.current.is_none() {
            return false;
        }
        match &mut self.child {
            Some(child) => child.matches(cx),
            None => {
                if self.matched_once {
                    false
                } else {
                    self.matched_once = true;
                    true
                }
            }
        }
    }

    /// Move to the next candidate node satisfying the description
    fn advance(&mut self, cx: &mut MatchContext<'_>) {
        let tree = cx.tree;
        self.decommit_vars(cx);
        self.unbind_name(cx);
        self.finished = true;
        if self.candidates.is_none() {
            self.candidates = Some(self.node.rel.candidates(self.anchor, &cx.walk()));
        }
        loop {
            let cand = {
                let cands = self.candidates.as_ref().expect("candidates computed");
                if self.pos >= cands.len() {
                    return;
                }
                let c = cands[self.pos];
                self.pos += 1;
                c
            };
            match &self.node.desc {
                None => {
                    // backreference or link: no description to test
                    if let Some(link) = &self.node.link {
                        let Some(&other) = cx.names.get(link) else {
                            continue;
                        };
                        if tree.label(cand) == tree.label(other) {
                            self.accept(cx, cand, None);
                            return;
                        }
                    } else if let Some(name) = &self.node.name {
                        // quiet-fail: an unbound name simply never matches
                        if cx.names.get(name) == Some(&cand) {
                            self.accept(cx, cand, None);
                            return;
                        }
                    }
                }
                Some(desc) => {
                    let label = tree.label(cand);
                    let value = if self.node.basic_cat {
                        (cx.pattern.basic_cat)(label)
                    } else {
                        label
                    };
                    let caps = match desc {
                        Descriptor::Pattern { re, .. } => re.captures(value),
                        _ => None,
                    };
                    let mut found = match desc {
                        Descriptor::Pattern { .. } => caps.is_some(),
                        other => other.matches(value),
                    };
                    if found {
                        // captured groups must agree with variables already
                        // committed elsewhere in this match attempt
                        for (group, var) in &self.node.variable_groups {
                            if let Some(existing) = cx.get_var(var) {
                                let this = match &caps {
                                    Some(c) => c.get(*group).map(|m| m.as_str()).unwrap_or(""),
                                    None => value,
                                };
                                if existing != this {
                                    found = false;
                                    break;
                                }
                            }
                        }
                    }
                    if found != self.node.neg_desc {
                        let commits: Vec<(String, String)> = self
                            .node
                            .variable_groups
                            .iter()
                            .map(|(group, var)| {
                                let s = match &caps {
                                    Some(c) => {
                                        c.get(*group).map(|m| m.as_str()).unwrap_or("")
                                    }
                                    None => value,
                                };
                                (var.clone(), s.to_string())
                            })
                            .collect();
                        self.accept(cx, cand, Some(commits));
                        return;
                    }
                }
            }
        }
    }

    fn accept(
        &mut self,
        cx: &mut MatchContext<'_>,
        cand: NodeId,
        commits: Option<Vec<(String, String)>>,
    ) {
        self.current = Some(cand);
        self.finished = false;
        match &mut self.child {
            Some(child) => child.reset(cand, cx),
            None => self.matched_once = false,
        }
        if self.node.binds_name() {
            let name = self.node.name.clone().expect("binds_name implies a name");
            cx.names.insert(name, cand);
        }
        if let Some(commits) = commits {
            for (var, value) in commits {
                cx.set_var(&var, value);
            }
            self.committed_vars = true;
        }
    }

    fn decommit_vars(&mut self, cx: &mut MatchContext<'_>) {
        if self.committed_vars {
            for (_, var) in &self.node.variable_groups {
                cx.unset_var(var);
            }
            self.committed_vars = false;
        }
    }

    fn unbind_name(&mut self, cx: &mut MatchContext<'_>) {
        if self.node.binds_name() {
            if let Some(name) = &self.node.name {
                cx.names.remove(name);
            }
        }
    }
}

struct CoordMatcher<'p> {
    node: &'p CoordNode,
    children: Vec<MatcherNode<'p>>,
    anchor: NodeId,
    curr: usize,
    started: bool,
    matched_any: bool,
    finished: bool,
}

impl<'p> CoordMatcher<'p> {
    fn build(node: &'p CoordNode) -> Self {
        Self {
            node,
            children: node.children.iter().map(MatcherNode::build).collect(),
            anchor: 0,
            curr: 0,
            started: false,
            matched_any: false,
            finished: false,
        }
    }

    fn cleanup(&mut self, cx: &mut MatchContext<'_>) {
        self.curr = 0;
        self.started = false;
        self.matched_any = false;
        self.finished = false;
        for child in &mut self.children {
            child.cleanup(cx);
        }
    }

    fn matches(&mut self, cx: &mut MatchContext<'_>) -> bool {
        if self.finished {
            return false;
        }
        let found = if self.node.conj {
            self.next_conj(cx)
        } else {
            self.next_disj(cx)
        };
        if self.node.negated {
            self.finished = true;
            return !found;
        }
        if found {
            self.matched_any = true;
            return true;
        }
        self.finished = true;
        // an optional group that never matched still succeeds, exactly
        // once, with nothing bound
        self.node.optional && !self.matched_any
    }

    /// Next joint solution of all conjuncts, odometer-style: advance the
    /// last conjunct, backtracking into earlier ones as they run dry
    fn next_conj(&mut self, cx: &mut MatchContext<'_>) -> bool {
        let anchor = self.anchor;
        if !self.started {
            self.started = true;
            self.curr = 0;
            self.children[0].reset(anchor, cx);
        }
        loop {
            if self.children[self.curr].matches(cx) {
                if self.curr == self.children.len() - 1 {
                    return true;
                }
                self.curr += 1;
                self.children[self.curr].reset(anchor, cx);
            } else {
                if self.curr == 0 {
                    return false;
                }
                self.curr -= 1;
            }
        }
    }

    /// Next solution of any disjunct; each disjunct is drained in turn
    fn next_disj(&mut self, cx: &mut MatchContext<'_>) -> bool {
        let anchor = self.anchor;
        if !self.started {
            self.started = true;
            self.curr = 0;
            self.children[0].reset(anchor, cx);
        }
        while self.curr < self.children.len() {
            if self.children[self.curr].matches(cx) {
                return true;
            }
            self.curr += 1;
            if self.curr < self.children.len() {
                self.children[self.curr].reset(anchor, cx);
            }
        }
        false
    }
}

/// A restartable iterator over the matches of a pattern in one tree
pub struct TregexMatcher<'a> {
    cx: MatchContext<'a>,
    matcher: MatcherNode<'a>,
    anchors: Vec<NodeId>,
    next_anchor: usize,
    current_anchor: NodeId,
    active: bool,
}

impl<'a> TregexMatcher<'a> {
    pub(crate) fn new(
        pattern: &'a TregexPattern,
        tree: &'a Tree,
        head_finder: Option<&'a dyn HeadFinder>,
    ) -> Self {
        let root = tree.root();
        let anchors = tree.preorder(root);
        let mut parents = FxHashMap::default();
        for &n in &anchors {
            for &c in tree.children(n) {
                parents.insert(c, n);
            }
        }
        Self {
            cx: MatchContext {
                tree,
                root,
                parents,
                head_finder,
                pattern,
                names: FxHashMap::default(),
                variables: FxHashMap::default(),
            },
            matcher: MatcherNode::Desc(DescMatcher::build(&pattern.root)),
            anchors,
            next_anchor: 0,
            current_anchor: root,
            active: false,
        }
    }

    /// The next match, anchors visited in preorder; `None` when the tree
    /// is exhausted.  Repeated calls enumerate every way the pattern
    /// matches, one binding snapshot per call.
    pub fn find(&mut self) -> Option<Match> {
        loop {
            if self.active && self.matcher.matches(&mut self.cx) {
                return Some(Match {
                    node: self.current_anchor,
                    names: self.cx.names.clone(),
                    variables: self
                        .cx
                        .variables
                        .iter()
                        .map(|(k, (v, _))| (k.clone(), v.clone()))
                        .collect(),
                });
            }
            self.active = false;
            if self.next_anchor >= self.anchors.len() {
                return None;
            }
            let anchor = self.anchors[self.next_anchor];
            self.next_anchor += 1;
            self.matcher.reset(anchor, &mut self.cx);
            self.current_anchor = anchor;
            self.active = true;
        }
    }

    /// Restart enumeration from the first anchor
    pub fn restart(&mut self) {
        self.matcher.cleanup(&mut self.cx);
        self.next_anchor = 0;
        self.active = false;
    }
}

impl Iterator for TregexMatcher<'_> {
    type Item = Match;

    fn next(&mut self) -> Option<Self::Item> {
        self.find()
    }
}
