//! Tregex: tree pattern matching and surgery for constituency treebanks
//!
//! A tregex pattern describes a configuration of nodes in a labelled
//! tree (domination, precedence, sisterhood, headedness, ...); a
//! tsurgeon script edits the tree at each place the pattern matches.
//! Patterns and scripts compile once and are then applied to any number
//! of trees, including from several threads; all per-application state
//! lives in the matcher and the evaluation context.
//!
//! ```
//! use tregex::{Tree, TregexPattern, TsurgeonScript, process_pattern};
//!
//! let pattern = TregexPattern::compile("SBARQ=n1 < SQ=n2").unwrap();
//! let ops = TsurgeonScript::parse("[excise n1 n1] [relabel n2 S]").unwrap();
//! let tree = Tree::read("(SBARQ (SQ (VP likes (NP it))))").unwrap();
//! let result = process_pattern(&pattern, &ops, tree).unwrap().unwrap();
//! assert_eq!(result.to_string(), "(S (VP likes (NP it)))");
//! ```

pub mod auxtree; // tree fragments: names, foot, instantiation
pub mod matcher; // backtracking match engine
pub mod parser; // pattern compiler (tregex.pest)
pub mod pattern; // pattern AST
pub mod process; // driver loop and batch application
pub mod relation; // structural relation table
pub mod script; // surgery script compiler (tsurgeon.pest)
pub mod surgery; // operation AST and interpreter
pub mod tree; // arena trees and Penn reading/printing

// Re-exports for convenience
pub use matcher::{Match, TregexMatcher};
pub use parser::{ParseError, compile, compile_with};
pub use pattern::{BasicCatFn, TregexPattern, penn_basic_category};
pub use process::{
    process_batch, process_pattern, process_pattern_with_head_finder, process_patterns_on_tree,
    read_script,
};
pub use script::{ScriptError, parse_operation, parse_script};
pub use surgery::{SurgeryError, TsurgeonScript};
pub use tree::{HeadFinder, NodeId, Tree, TreeReadError};
