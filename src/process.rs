//! Driver loop
//!
//! Ties matching and surgery together: find a match on the *current*
//! tree, apply the whole operation sequence at that site, then search
//! again from scratch, until nothing matches or the tree deletes itself.
//! Re-searching after every application is what lets one edit feed the
//! next; the flip side is that a pattern which stays satisfiable after
//! its own remedy loops forever.  Guard such scripts with a negated
//! post-condition (`S=node << NP !<< foo` rather than `S=node << NP`);
//! the engine deliberately does not second-guess the caller here.

use tracing::debug;

use crate::parser;
use crate::pattern::TregexPattern;
use crate::script;
use crate::surgery::{SurgeryError, TsurgeonScript};
use crate::tree::{HeadFinder, Tree};

/// Error reading a paired pattern/operations script file
#[derive(Debug, thiserror::Error)]
pub enum ReadScriptError {
    #[error(transparent)]
    Pattern(#[from] parser::ParseError),
    #[error(transparent)]
    Operations(#[from] script::ScriptError),
}

/// Apply `ops` at every site `pattern` matches, repeatedly, until the
/// pattern no longer matches.  Returns `None` when an operation deleted
/// the whole tree.
pub fn process_pattern(
    pattern: &TregexPattern,
    ops: &TsurgeonScript,
    tree: Tree,
) -> Result<Option<Tree>, SurgeryError> {
    process(pattern, ops, tree, None)
}

/// As [`process_pattern`], resolving head relations through `head_finder`
pub fn process_pattern_with_head_finder(
    pattern: &TregexPattern,
    ops: &TsurgeonScript,
    tree: Tree,
    head_finder: &dyn HeadFinder,
) -> Result<Option<Tree>, SurgeryError> {
    process(pattern, ops, tree, Some(head_finder))
}

fn process(
    pattern: &TregexPattern,
    ops: &TsurgeonScript,
    mut tree: Tree,
    head_finder: Option<&dyn HeadFinder>,
) -> Result<Option<Tree>, SurgeryError> {
    loop {
        let m = {
            let mut matcher = match head_finder {
                Some(hf) => pattern.matcher_with_head_finder(&tree, hf),
                None => pattern.matcher(&tree),
            };
            matcher.find()
        };
        let Some(m) = m else {
            return Ok(Some(tree));
        };
        debug!(pattern = %pattern, at = %tree.subtree_string(m.node()), "applying operations");
        if !ops.evaluate(&mut tree, &m)? {
            return Ok(None);
        }
    }
}

/// Run several (pattern, operations) pairs over one tree, in order
pub fn process_patterns_on_tree(
    pairs: &[(TregexPattern, TsurgeonScript)],
    tree: Tree,
) -> Result<Option<Tree>, SurgeryError> {
    let mut current = Some(tree);
    for (pattern, ops) in pairs {
        match current {
            Some(tree) => current = process_pattern(pattern, ops, tree)?,
            None => break,
        }
    }
    Ok(current)
}

/// Run the pairs over a batch of trees with cooperative cancellation.
///
/// `cancelled` is polled once per tree; when it reports true, the
/// remaining trees are skipped and the results produced so far are
/// returned as-is.  Each tree carries its own result, so one tree's
/// structural violation does not poison its neighbours.
pub fn process_batch(
    pairs: &[(TregexPattern, TsurgeonScript)],
    trees: impl IntoIterator<Item = Tree>,
    mut cancelled: impl FnMut() -> bool,
) -> Vec<Result<Option<Tree>, SurgeryError>> {
    let mut results = Vec::new();
    for tree in trees {
        if cancelled() {
            debug!(processed = results.len(), "batch cancelled");
            break;
        }
        results.push(process_patterns_on_tree(pairs, tree));
    }
    results
}

/// Read a paired script: a tregex pattern over one or more lines, a
/// blank line, operation lines, a blank line, repeated.  `%` starts a
/// comment (escape as `\%`).
pub fn read_script(text: &str) -> Result<Vec<(TregexPattern, TsurgeonScript)>, ReadScriptError> {
    let mut pairs = Vec::new();
    let mut lines = text.lines();
    loop {
        // the pattern block; only a genuinely blank line ends it, so a
        // line holding nothing but a comment does not
        let mut pattern_text = String::new();
        for line in lines.by_ref() {
            if line.trim().is_empty() {
                if pattern_text.is_empty() {
                    continue;
                }
                break;
            }
            let line = script::strip_comments(line);
            if line.trim().is_empty() {
                continue;
            }
            pattern_text.push_str(&line);
            pattern_text.push(' ');
        }
        if pattern_text.trim().is_empty() {
            return Ok(pairs);
        }
        let pattern = parser::compile(pattern_text.trim())?;

        // the operations block
        let mut ops_text = String::new();
        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            let line = script::strip_comments(line);
            if line.trim().is_empty() {
                continue;
            }
            ops_text.push_str(&line);
            ops_text.push('\n');
        }
        let ops = script::parse_script(&ops_text)?;
        pairs.push((pattern, ops));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile;
    use crate::script::parse_operation;
    use crate::surgery::SurgeryError;

    /// Apply one pattern/operation pair and compare the printed result;
    /// `None` means the tree was deleted
    fn run_test(pattern: &str, operation: &str, input: &str, expected: Option<&str>) {
        let pattern = compile(pattern).unwrap();
        let ops = parse_operation(operation).unwrap();
        let tree = Tree::read(input).unwrap();
        let result = process_pattern(&pattern, &ops, tree).unwrap();
        assert_eq!(
            result.as_ref().map(Tree::to_string).as_deref(),
            expected,
            "pattern {:?} op {:?} on {:?}",
            pattern.source(),
            ops.source(),
            input
        );
    }

    fn run_error_test(pattern: &str, operation: &str, input: &str) -> SurgeryError {
        let pattern = compile(pattern).unwrap();
        let ops = parse_operation(operation).unwrap();
        let tree = Tree::read(input).unwrap();
        process_pattern(&pattern, &ops, tree).unwrap_err()
    }

    #[test]
    fn delete() {
        run_test("B=bob", "delete bob", "(A (B (C 1)))", Some("A"));
        run_test("B=bob", "delete bob", "(A (foo 1) (B (C 1)))", Some("(A (foo 1))"));
        run_test("B=bob", "delete bob", "(A (B 1) (B (C 1)))", Some("A"));
        run_test(
            "B=bob",
            "delete bob",
            "(A (foo 1) (bar (C 1)))",
            Some("(A (foo 1) (bar (C 1)))"),
        );
        run_test("C=bob", "delete bob", "(A (B (C 1)))", Some("(A B)"));
        run_test("C=bob", "delete bob", "(A (foo 1) (B (C 1)))", Some("(A (foo 1) B)"));
        // deleting the root deletes the tree
        run_test("A=bob", "delete bob", "(A (B 1))", None);
    }

    #[test]
    fn prune() {
        run_test("B=bob", "prune bob", "(A (B (C 1)))", None);
        run_test("B=bob", "prune bob", "(A (foo 1) (B (C 1)))", Some("(A (foo 1))"));
        run_test("B=bob", "prune bob", "(A (B 1) (B (C 1)))", None);
        run_test("C=bob", "prune bob", "(A (B (C 1)))", None);
        run_test("C=bob", "prune bob", "(A (foo 1) (B (C 1)))", Some("(A (foo 1))"));
        run_test("C=bob", "prune bob", "(A (B 1) (B (C 1)))", Some("(A (B 1))"));
        run_test("C=bob", "prune bob", "(A (foo 1) (bar (C 1)))", Some("(A (foo 1))"));
    }

    #[test]
    fn excise() {
        // excising a node down to itself promotes its children
        run_test(
            "__=repeat <: (~repeat < __)",
            "excise repeat repeat",
            "(A (B (B foo)))",
            Some("(A (B foo))"),
        );
        // an excised root with one promoted child keeps that child
        run_test(
            "__=repeat <: (~repeat < __)",
            "excise repeat repeat",
            "(B (B foo))",
            Some("(B foo)"),
        );
        // an excised root with several children deletes the tree
        run_test("A=root", "excise root root", "(A (B bar) (C foo))", None);
        // scenario: collapse SBARQ onto its SQ and relabel
        run_test(
            "SBARQ=n1 < SQ=n2",
            "[excise n1 n1] [relabel n2 S]",
            "(SBARQ (SQ (VP likes (NP it))))",
            Some("(S (VP likes (NP it)))"),
        );
        // top must dominate bottom
        let err = run_error_test("A << B=b << C=c", "excise b c", "(A (B 1) (C 2))");
        assert!(matches!(err, SurgeryError::ExciseDomination { .. }));
    }

    #[test]
    fn relabel() {
        run_test("B=foo", "relabel foo blah", "(A (B 0) (C 1))", Some("(A (blah 0) (C 1))"));
        run_test("B=foo", "relabel foo blah", "(A (B 0) (B 1))", Some("(A (blah 0) (blah 1))"));
        run_test("B=foo", "relabel foo /\\//", "(A (B 0) (C 1))", Some("(A (/ 0) (C 1))"));
        run_test("B=foo", "relabel foo /{/", "(A (B 0) (C 1))", Some("(A ({ 0) (C 1))"));
        run_test("B=foo", "relabel foo /\\]/", "(A (B 0) (C 1))", Some("(A (] 0) (C 1))"));
        run_test(
            "/^a.*t/=foo",
            "relabel foo /.*(voc.*)/$1/",
            "(A (avocet 0) (advocate 1))",
            Some("(A (vocet 0) (vocate 1))"),
        );
        // global replacement over the label
        run_test(
            "/foo/=foo",
            "relabel foo /foo/bar/",
            "(foofoo (curlew 0) (avocet 1))",
            Some("(barbar (curlew 0) (avocet 1))"),
        );
        run_test(
            "/^foo(.*)$/=foo",
            "relabel foo /foo(.*)$/bar$1/",
            "(foofoo (curlew 0) (avocet 1))",
            Some("(barfoo (curlew 0) (avocet 1))"),
        );
        // the scenario from the head docs: VBD becomes verb/D
        run_test(
            "/^VB/=nodeX",
            "relabel nodeX /^VB(.*)$/verb\\/$1/",
            "(S (VBD ran))",
            Some("(S (verb/D ran))"),
        );
    }

    #[test]
    fn relabel_splices() {
        // ={node} splices another node's label
        run_test(
            "curlew=baz < /^a(.*)t/#1%bar=foo",
            "relabel baz /cu(rle)w/={foo}/",
            "(curlew (avocet 0))",
            Some("(avocet (avocet 0))"),
        );
        // %{var} splices a captured variable string
        run_test(
            "curlew=baz < /^a(.*)t/#1%bar=foo",
            "relabel baz /cu(rle)w/%{bar}/",
            "(curlew (avocet 0))",
            Some("(voce (avocet 0))"),
        );
        run_test(
            "curlew=baz < /^a(.*)t/#1%bar=foo",
            "relabel baz /cu(rle)w/$1/",
            "(curlew (avocet 0))",
            Some("(rle (avocet 0))"),
        );
        run_test(
            "curlew=baz < /^a(.*)t/#1%bar=foo",
            "relabel baz /cu(rle)w/$1={foo}/",
            "(curlew (avocet 0))",
            Some("(rleavocet (avocet 0))"),
        );
        run_test(
            "curlew=baz < /^a(.*)t/#1%bar=foo",
            "relabel baz /cu(rle)w/%{bar}$1={foo}/",
            "(curlew (avocet 0))",
            Some("(vocerleavocet (avocet 0))"),
        );
        // concatenating two node labels
        run_test(
            "A=baz < /curlew.*/=foo < /avocet.*/=bar",
            "relabel baz /^.*$/={foo}={bar}/",
            "(A (curlewfoo 0) (avocetzzz 1))",
            Some("(curlewfooavocetzzz (curlewfoo 0) (avocetzzz 1))"),
        );
        // unbraced = and % stay literal
        run_test(
            "A=baz < /curle.*/=foo < /avo(.*)/#1%bar",
            "relabel baz /^(.*)$/=foo$1%bar/",
            "(A (curlew 0) (avocet 1))",
            Some("(=fooA%bar (curlew 0) (avocet 1))"),
        );
    }

    #[test]
    fn relabel_via_backreference() {
        // the relabel target must be the node bound first, not the twin
        run_test(
            "__ <1 B=n <2 ~n",
            "relabel n X",
            "(A (B w) (B w))",
            Some("(A (X w) (B w))"),
        );
    }

    #[test]
    fn relabel_foreign() {
        run_test(
            "atentát=test",
            "relabel test perform_atentát",
            "(foo atentát)",
            Some("(foo perform_atentát)"),
        );
    }

    #[test]
    fn insert() {
        run_test(
            "B=bar !$ D",
            "insert (D (E 6)) $+ bar",
            "(A (B 0) (C 1))",
            Some("(A (D (E 6)) (B 0) (C 1))"),
        );
        run_test(
            "B=bar !$ D",
            "insert (D (E 6)) $- bar",
            "(A (B 0) (C 1))",
            Some("(A (B 0) (D (E 6)) (C 1))"),
        );
        run_test(
            "B=bar !<D",
            "insert (D (E 6)) >0 bar",
            "(A (B 0) (C 1))",
            Some("(A (B (D (E 6)) 0) (C 1))"),
        );
        // inserting a bound name inserts a fresh copy of that node
        run_test(
            "B=bar !<C $C=foo",
            "insert foo >0 bar",
            "(A (B 0) (C 1))",
            Some("(A (B (C 1) 0) (C 1))"),
        );
        // =name suffixes are names, not label text
        run_test(
            "B=bar !<D",
            "insert (D (E=blah 6)) >0 bar",
            "(A (B 0) (C 1))",
            Some("(A (B (D (E 6)) 0) (C 1))"),
        );
        // an escaped = is label text
        run_test(
            "B=bar !<D",
            "insert (D (E\\=blah 6)) >0 bar",
            "(A (B 0) (C 1))",
            Some("(A (B (D (E=blah 6)) 0) (C 1))"),
        );
        // an escaped backslash, then the name is cut off again
        run_test(
            "B=bar !<D",
            "insert (D (E\\\\=blah 6)) >0 bar",
            "(A (B 0) (C 1))",
            Some("(A (B (D (E\\ 6)) 0) (C 1))"),
        );
    }

    #[test]
    fn insert_with_named_node() {
        run_test(
            "B=bar !$- D",
            "[insert (D=target E) $+ bar] [insert (F 1) >0 target]",
            "(A (B C))",
            Some("(A (D (F 1) E) (B C))"),
        );
        run_test(
            "B=bar !$- D",
            "[insert (D=target E) $+ bar] [insert (F 1) $+ target]",
            "(A (B C))",
            Some("(A (F 1) (D E) (B C))"),
        );
        // a named leaf
        run_test(
            "B=bar !$- D",
            "[insert (D E=target) $+ bar] [insert (F 1) $+ target]",
            "(A (B C))",
            Some("(A (D (F 1) E) (B C))"),
        );
    }

    #[test]
    fn move_op() {
        run_test(
            "__ !> __ <1 /``/=bad <2 S=good",
            "move bad >1 good",
            "(TOP (`` ``) (S foo))",
            Some("(TOP (S (`` ``) foo))"),
        );
        run_test(
            "A=foo < B=bar < C=baz",
            "[relabel baz BAZ] [move baz >-1 bar]",
            "(A (B foo) (C foo) (C bar))",
            Some("(A (B foo (BAZ foo) (BAZ bar)))"),
        );
        run_test(
            "A=foo < B=bar < C=baz",
            "[relabel baz /^.*$/={bar}={baz}FOO/] [move baz >-1 bar]",
            "(A (B foo) (C foo) (C bar))",
            Some("(A (B foo (BCFOO foo) (BCFOO bar)))"),
        );
    }

    #[test]
    fn replace_node() {
        run_test(
            "B=foo : C=blah",
            "replace foo blah",
            "(A (B 0) (C 1))",
            Some("(A (C 1) (C 1))"),
        );
        // each replacement is a fresh copy, so every site is rewritten
        run_test(
            "(/-([0-9]+)$/#1%i=src > /^FILLER$/) : (/^-NONE-/=dest <: /-([0-9]+)$/#1%i)",
            "replace dest src",
            "(S (FILLER (NP-1 x)) (VP (X (-NONE- *-1)) (Y (-NONE- *-1))))",
            Some("(S (FILLER (NP-1 x)) (VP (X (NP-1 x)) (Y (NP-1 x))))"),
        );
    }

    #[test]
    fn replace_tree() {
        run_test(
            "B=foo",
            "replace foo (BAR 1)",
            "(A (B 0) (B 1) (C 2))",
            Some("(A (BAR 1) (BAR 1) (C 2))"),
        );
        // a single replacement at the root is allowed
        run_test("B=foo", "replace foo (BAR 1)", "(B (C 1))", Some("(BAR 1)"));
        run_test(
            "B=foo",
            "replace foo (BAR 1) (BAZ 2)",
            "(A (B 0) (B 1) (C 2))",
            Some("(A (BAR 1) (BAZ 2) (BAR 1) (BAZ 2) (C 2))"),
        );
        let err = run_error_test("B=foo", "replace foo (BAR 1) (BAZ 2)", "(B 0)");
        assert!(matches!(err, SurgeryError::MultipleRootReplacement));
        run_test(
            "B=foo",
            "replace foo (BAR blah)",
            "(A (B 0) (B 1) (C 2))",
            Some("(A (BAR blah) (BAR blah) (C 2))"),
        );
    }

    #[test]
    fn replace_only_matching_repeats() {
        // with identical siblings, only the one next to CC is replaced
        run_test(
            "@NP < (/^,/=comma $+ CC)",
            "replace comma (COMMA)",
            "(NP NP , NP , NP , CC NP)",
            Some("(NP NP , NP , NP COMMA CC NP)"),
        );
    }

    #[test]
    fn create_subtree() {
        let pattern = "A < B=left < C=right";
        run_test(pattern, "createSubtree FOO left right", "(A (B 1) (C 2))", Some("(A (FOO (B 1) (C 2)))"));
        // endpoints may come in either order
        run_test(pattern, "createSubtree FOO left right", "(A (C 1) (B 2))", Some("(A (FOO (C 1) (B 2)))"));
        // nodes between the endpoints come along
        run_test(
            pattern,
            "createSubtree FOO left right",
            "(A (B 1) (D 3) (C 2))",
            Some("(A (FOO (B 1) (D 3) (C 2)))"),
        );
        // nodes outside the span stay put
        run_test(
            pattern,
            "createSubtree FOO left right",
            "(A (D 3) (B 1) (C 2))",
            Some("(A (D 3) (FOO (B 1) (C 2)))"),
        );
        run_test(
            pattern,
            "createSubtree FOO left right",
            "(A (B 1) (C 2) (D 3))",
            Some("(A (FOO (B 1) (C 2)) (D 3))"),
        );
        // both endpoints the same node
        run_test(
            "A < B=left < B=right",
            "createSubtree FOO left right",
            "(A (B 1) (C 2))",
            Some("(A (FOO (B 1)) (C 2))"),
        );
        run_test(
            "A < B=left < B=right",
            "createSubtree FOO left right",
            "(A (B 1) (B 2))",
            Some("(A (FOO (B 1)) (FOO (B 2)))"),
        );
        // single-endpoint form
        run_test("A < B=child", "createSubtree FOO child", "(A (B 1) (C 2))", Some("(A (FOO (B 1)) (C 2))"));
        // endpoints with different parents are a runtime error
        let err = run_error_test(
            "A << B=left << C=right",
            "createSubtree FOO left right",
            "(A (B 1) (D (C 2)))",
        );
        assert!(matches!(err, SurgeryError::DifferentParents { .. }));
    }

    #[test]
    fn create_subtree_from_fragment() {
        let op = "createSubtree (F (G 1) H@ I) left right";
        run_test(
            "A < B=left < C=right",
            op,
            "(A (B 1) (C 2))",
            Some("(A (F (G 1) (H (B 1) (C 2)) I))"),
        );
        run_test(
            "A < B=left < C=right",
            op,
            "(A (D 3) (B 1) (C 2) (E 4))",
            Some("(A (D 3) (F (G 1) (H (B 1) (C 2)) I) (E 4))"),
        );
        run_test(
            "A < B=left < B=right",
            op,
            "(A (B 1) (B 2))",
            Some("(A (F (G 1) (H (B 1)) I) (F (G 1) (H (B 2)) I))"),
        );
        run_test(
            "A < B=child",
            "createSubtree (F (G 1) H@ I) child",
            "(A (B 1) (C 2))",
            Some("(A (F (G 1) (H (B 1)) I) (C 2))"),
        );
    }

    #[test]
    fn adjoin() {
        run_test("B=foo", "adjoin (FOO (BAR@)) foo", "(A (B 1 2))", Some("(A (FOO (BAR 1 2)))"));
        run_test("B=foo", "adjoin (FOO (BAR@)) foo", "(A (C 1 2))", Some("(A (C 1 2))"));
        // re-matching adjoins at the inner site too
        run_test(
            "B=foo",
            "adjoin (FOO (BAR@)) foo",
            "(A (B (B 1 2)))",
            Some("(A (FOO (BAR (FOO (BAR 1 2)))))"),
        );
    }

    #[test]
    fn adjoin_to_head() {
        run_test("B=foo !< BAR", "adjoinH (FOO (BAR@)) foo", "(A (B 1 2))", Some("(A (B (BAR 1 2)))"));
        run_test("B=foo !< BAR", "adjoinH (FOO (BAR@)) foo", "(A (C 1 2))", Some("(A (C 1 2))"));
        run_test(
            "B=foo !< BAR",
            "adjoinH (FOO (BAR@)) foo",
            "(A (B (B 1 2)))",
            Some("(A (B (BAR (B (BAR 1 2)))))"),
        );
    }

    #[test]
    fn adjoin_to_foot() {
        run_test("B=foo !> FOO", "adjoinF (FOO (BAR@)) foo", "(A (B 1 2))", Some("(A (FOO (B 1 2)))"));
        run_test("B=foo !> FOO", "adjoinF (FOO (BAR@)) foo", "(A (C 1 2))", Some("(A (C 1 2))"));
        run_test(
            "B=foo !> FOO",
            "adjoinF (FOO (BAR@)) foo",
            "(A (B (B 1 2)))",
            Some("(A (FOO (B (FOO (B 1 2)))))"),
        );
    }

    #[test]
    fn adjoin_to_foot_depth_one_is_a_noop() {
        // the foot has no parent to receive the target, so the tree is
        // returned unchanged; applied once here since the no-op would
        // keep the driver loop matching forever
        let pattern = compile("B=foo").unwrap();
        let ops = parse_operation("adjoinF (FOO@) foo").unwrap();
        let mut tree = Tree::read("(A (B 1 2))").unwrap();
        let m = {
            let mut matcher = pattern.matcher(&tree);
            matcher.find().unwrap()
        };
        assert!(ops.evaluate(&mut tree, &m).unwrap());
        assert_eq!(tree.to_string(), "(A (B 1 2))");
    }

    #[test]
    fn adjoin_with_named_node() {
        run_test(
            "B=bar !>> D",
            "[adjoinF (D (E=target foot@)) bar] [insert (G 1) $+ target]",
            "(A (B C))",
            Some("(A (D (G 1) (E (B C))))"),
        );
        run_test(
            "B=bar !>> D",
            "[adjoinF (D (E=target foot@)) bar] [insert (G 1) >0 target]",
            "(A (B C))",
            Some("(A (D (E (G 1) (B C))))"),
        );
        // a named leaf of the auxiliary tree
        run_test(
            "B=bar !>> D",
            "[adjoinF (D (E foot@) F=target) bar] [insert (G 1) >0 target]",
            "(A (B C))",
            Some("(A (D (E (B C)) (F (G 1))))"),
        );
    }

    #[test]
    fn coindex() {
        run_test(
            "A=foo << B=bar << C=baz",
            "coindex foo bar baz",
            "(A (B (C foo)))",
            Some("(A-1 (B-1 (C-1 foo)))"),
        );
        // relabelled nodes no longer match, so indexing happens once
        run_test(
            "A=foo << B=bar << C=baz",
            "coindex foo bar baz",
            "(A (B foo) (C foo) (C bar))",
            Some("(A-1 (B-1 foo) (C-1 foo) (C bar))"),
        );
        // indices already in the tree are never reused
        run_test(
            "A=foo << B=bar << C=baz",
            "coindex foo bar baz",
            "(A (B foo) (C-1 bar) (C baz))",
            Some("(A-2 (B-2 foo) (C-1 bar) (C-2 baz))"),
        );
    }

    #[test]
    fn insert_then_coindex_share_one_index() {
        // the inserted trace and its antecedent get the same fresh index
        run_test(
            "VP=node !$- NP",
            "[insert (NP (-NONE- *T*=trace)) $+ node] [coindex trace node]",
            "(S (VP (VB sleep)))",
            Some("(S (NP (-NONE- *T*-1)) (VP-1 (VB sleep)))"),
        );
    }

    #[test]
    fn keyword_as_new_label() {
        run_test(
            "A=foo << B=bar << C=baz",
            "relabel foo relabel",
            "(A (B foo) (C foo) (C bar))",
            Some("(relabel (B foo) (C foo) (C bar))"),
        );
    }

    #[test]
    fn if_exists() {
        run_test(
            "A=foo [ << B=bar | << C=baz ]",
            "if exists bar relabel bar BAR",
            "(A (B foo))",
            Some("(A (BAR foo))"),
        );
        let op = "[if exists bar relabel bar BAR] [if exists baz relabel baz BAZ]";
        run_test("A=foo [ << B=bar | << C=baz ]", op, "(A (B foo))", Some("(A (BAR foo))"));
        run_test("A=foo [ << B=bar | << C=baz ]", op, "(A (C foo))", Some("(A (BAZ foo))"));
        run_test(
            "A=foo [ << B=bar | << C=baz ]",
            op,
            "(A (B foo) (C foo))",
            Some("(A (BAR foo) (BAZ foo))"),
        );
    }

    #[test]
    fn insert_then_delete_sequence() {
        let pairs = vec![
            (
                compile("(/-([0-9]+)$/#1%i=src > /^FILLER$/) : (/^-NONE-/=dest <: /-([0-9]+)$/#1%i !$ ~src)")
                    .unwrap(),
                parse_operation("insert src $+ dest").unwrap(),
            ),
            (
                compile("(/-([0-9]+)$/#1%i=src > /^FILLER$/) : (/^-NONE-/=dest <: /-([0-9]+)$/#1%i)")
                    .unwrap(),
                parse_operation("delete dest").unwrap(),
            ),
        ];
        let tree = Tree::read("(S (FILLER (NP-1 x)) (VP (X (-NONE- *-1))))").unwrap();
        let result = process_patterns_on_tree(&pairs, tree).unwrap().unwrap();
        assert_eq!(result.to_string(), "(S (FILLER (NP-1 x)) (VP (X (NP-1 x))))");
    }

    #[test]
    fn batch_with_cancellation() {
        let pairs = vec![(
            compile("B=b").unwrap(),
            parse_operation("relabel b X").unwrap(),
        )];
        let trees: Vec<Tree> = ["(A (B 1))", "(A (B 2))", "(A (B 3))"]
            .iter()
            .map(|s| Tree::read(s).unwrap())
            .collect();

        // uncancelled: every tree is processed
        let results = process_batch(&pairs, trees.clone(), || false);
        assert_eq!(results.len(), 3);
        for r in &results {
            let t = r.as_ref().unwrap().as_ref().unwrap();
            assert!(t.to_string().contains("(X "));
        }

        // cancel after the first tree: partial results are kept
        let mut seen = 0;
        let results = process_batch(&pairs, trees, || {
            seen += 1;
            seen > 1
        });
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].as_ref().unwrap().as_ref().unwrap().to_string(),
            "(A (X 1))"
        );
    }

    #[test]
    fn batch_isolates_runtime_errors() {
        let pairs = vec![(
            compile("A << B=left << C=right").unwrap(),
            parse_operation("createSubtree FOO left right").unwrap(),
        )];
        let trees: Vec<Tree> = ["(A (B 1) (D (C 2)))", "(A (B 1) (C 2))"]
            .iter()
            .map(|s| Tree::read(s).unwrap())
            .collect();
        let results = process_batch(&pairs, trees, || false);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(
            results[1].as_ref().unwrap().as_ref().unwrap().to_string(),
            "(A (FOO (B 1) (C 2)))"
        );
    }

    #[test]
    fn read_paired_script() {
        let text = "\
% excise an SBARQ over SQ and relabel
SBARQ=n1 < SQ=n2

excise n1 n1
relabel n2 S

B=b

relabel b X
";
        let pairs = read_script(text).unwrap();
        assert_eq!(pairs.len(), 2);
        let tree = Tree::read("(SBARQ (SQ (VP likes (NP it))))").unwrap();
        let result = process_patterns_on_tree(&pairs, tree).unwrap().unwrap();
        assert_eq!(result.to_string(), "(S (VP likes (NP it)))");
    }

    #[test]
    fn excise_discards_everything_between() {
        let pattern = compile("A=top << C=bottom").unwrap();
        let ops = parse_operation("excise top bottom").unwrap();
        let mut tree = Tree::read("(R (A (B (C (D d)))))").unwrap();
        let m = {
            let mut matcher = pattern.matcher(&tree);
            matcher.find().unwrap()
        };
        let a = m.get("top").unwrap();
        let c = m.get("bottom").unwrap();
        let b = tree.children(a)[0];
        assert!(ops.evaluate(&mut tree, &m).unwrap());
        assert_eq!(tree.to_string(), "(R (D d))");
        // nothing on the excised path stays reachable
        for node in [a, b, c] {
            assert!(!tree.contains(node));
        }
    }

    #[test]
    fn undeclared_name_is_an_error() {
        let err = run_error_test("B=b", "relabel nobody X", "(A (B 1))");
        assert!(matches!(err, SurgeryError::UndeclaredName(_)));
    }
}
