//! Surgery script compiler
//!
//! Parses tsurgeon operation text into the [`Op`] AST using the pest
//! grammar in `tsurgeon.pest`.  One call to [`parse_operation`] covers a
//! single operation or a `[op] [op] ...` sequence; [`parse_script`]
//! handles multi-line scripts with `%` comments (`\%` for a literal
//! percent), one operation per line.  Auxiliary-tree contracts (exactly
//! one foot, on a leaf) are enforced here, at compile time.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use thiserror::Error;

use crate::auxtree::{FragmentBuilder, TreeFragment};
use crate::surgery::{
    Location, Op, OpChild, RelabelSpec, ReplacePart, ReplaceSource, TsurgeonScript,
};

#[derive(Parser)]
#[grammar = "tsurgeon.pest"]
struct ScriptParser;

/// Error compiling surgery script text
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("tsurgeon parse error: {0}")]
    Syntax(Box<pest::error::Error<Rule>>),

    #[error("tsurgeon parse error: no foot node in auxiliary tree {0:?}")]
    NoFootNode(String),

    #[error("tsurgeon parse error: more than one foot node in auxiliary tree {0:?}")]
    MultipleFootNodes(String),

    #[error("tsurgeon parse error: the foot of {0:?} is not a leaf")]
    InternalFootNode(String),

    #[error("tsurgeon parse error: unexpected foot node in tree literal {0:?}")]
    UnexpectedFootNode(String),

    #[error("tsurgeon parse error: bad relabel argument {0:?}")]
    BadRelabelSpec(String),

    #[error("tsurgeon parse error: bad regex {source_text:?}: {error}")]
    BadRegex {
        source_text: String,
        error: regex::Error,
    },

    #[error("tsurgeon parse error: empty script")]
    EmptyScript,
}

impl From<pest::error::Error<Rule>> for ScriptError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ScriptError::Syntax(Box::new(err))
    }
}

/// Compile one operation line: a single operation, or several operations
/// each enclosed in `[...]`
pub fn parse_operation(text: &str) -> Result<TsurgeonScript, ScriptError> {
    let mut pairs = ScriptParser::parse(Rule::script, text)?;
    let script = pairs.next().expect("grammar yields one script");
    let mut ops = Vec::new();
    for statement in script.into_inner() {
        if statement.as_rule() == Rule::statement {
            ops.push(build_statement(statement)?);
        }
    }
    if ops.is_empty() {
        return Err(ScriptError::EmptyScript);
    }
    Ok(TsurgeonScript {
        ops,
        source: text.trim().to_string(),
    })
}

/// Compile a multi-line script: strip `%` comments, then parse each
/// non-blank line as one operation, collecting them into one sequence
pub fn parse_script(text: &str) -> Result<TsurgeonScript, ScriptError> {
    let mut ops = Vec::new();
    for line in text.lines() {
        let line = strip_comments(line);
        if line.trim().is_empty() {
            continue;
        }
        ops.extend(parse_operation(&line)?.ops);
    }
    if ops.is_empty() {
        return Err(ScriptError::EmptyScript);
    }
    Ok(TsurgeonScript {
        ops,
        source: text.trim().to_string(),
    })
}

/// Remove a trailing `%`-comment and unescape `\%`
pub(crate) fn strip_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('%') => out.push('%'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '%' => break,
            _ => out.push(c),
        }
    }
    out
}

fn build_statement(pair: Pair<'_, Rule>) -> Result<Op, ScriptError> {
    let inner = pair.into_inner().next().expect("statement has content");
    match inner.as_rule() {
        Rule::bracketed => {
            build_statement(inner.into_inner().next().expect("bracketed statement"))
        }
        Rule::operation => build_operation(inner),
        rule => unreachable!("unexpected statement rule {rule:?}"),
    }
}

fn build_operation(pair: Pair<'_, Rule>) -> Result<Op, ScriptError> {
    let inner = pair.into_inner().next().expect("operation has content");
    let rule = inner.as_rule();
    let mut parts = inner.into_inner();
    match rule {
        Rule::delete_op => Ok(Op::Delete(names(parts))),
        Rule::prune_op => Ok(Op::Prune(names(parts))),
        Rule::excise_op => {
            parts.next(); // keyword
            let top = parts.next().expect("excise has a top name").as_str().to_string();
            let bottom = parts
                .next()
                .expect("excise has a bottom name")
                .as_str()
                .to_string();
            Ok(Op::Excise { top, bottom })
        }
        Rule::relabel_op => {
            parts.next();
            let name = parts.next().expect("relabel has a name").as_str().to_string();
            let spec = parts.next().expect("relabel has a spec");
            let spec = build_relabel_spec(spec.as_str())?;
            Ok(Op::Relabel { name, spec })
        }
        Rule::insert_op => {
            parts.next();
            let child = parts.next().expect("insert has a child");
            let child = build_child(child)?;
            let location = build_location(parts.next().expect("insert has a location"));
            Ok(Op::Insert { child, location })
        }
        Rule::move_op => {
            parts.next();
            let name = parts.next().expect("move has a name").as_str().to_string();
            let location = build_location(parts.next().expect("move has a location"));
            Ok(Op::Move { name, location })
        }
        Rule::replace_op => {
            parts.next();
            let target = parts.next().expect("replace has a target").as_str().to_string();
            let mut trees = Vec::new();
            let mut name = None;
            for operand in parts {
                match operand.as_rule() {
                    Rule::tree_node => trees.push(build_plain_fragment(operand)?),
                    Rule::name => name = Some(operand.as_str().to_string()),
                    rule => unreachable!("unexpected replace operand {rule:?}"),
                }
            }
            let with = match name {
                Some(n) => ReplaceSource::Node(n),
                None => ReplaceSource::Trees(trees),
            };
            Ok(Op::Replace { target, with })
        }
        Rule::create_op => {
            parts.next();
            let shape = parts.next().expect("createSubtree has a shape");
            let shape = match shape.as_rule() {
                Rule::tree_node => build_footed_fragment(shape)?,
                Rule::name => TreeFragment::single(shape.as_str()),
                rule => unreachable!("unexpected createSubtree shape {rule:?}"),
            };
            let start = parts
                .next()
                .expect("createSubtree has a start name")
                .as_str()
                .to_string();
            let end = parts.next().map(|p| p.as_str().to_string());
            Ok(Op::CreateSubtree { shape, start, end })
        }
        Rule::adjoin_op | Rule::adjoin_h_op | Rule::adjoin_f_op => {
            parts.next();
            let aux = build_footed_fragment(parts.next().expect("adjoin has a tree"))?;
            let target = parts.next().expect("adjoin has a target").as_str().to_string();
            Ok(match rule {
                Rule::adjoin_op => Op::Adjoin { aux, target },
                Rule::adjoin_h_op => Op::AdjoinToHead { aux, target },
                _ => Op::AdjoinToFoot { aux, target },
            })
        }
        Rule::coindex_op => Ok(Op::Coindex(names(parts))),
        Rule::if_exists => {
            parts.next(); // "if"
            parts.next(); // "exists"
            let name = parts.next().expect("if exists has a name").as_str().to_string();
            let then = build_statement(parts.next().expect("if exists has a statement"))?;
            Ok(Op::IfExists {
                name,
                then: Box::new(then),
            })
        }
        rule => unreachable!("unexpected operation rule {rule:?}"),
    }
}

/// An insert operand: a tree literal or a bound name
fn build_child(pair: Pair<'_, Rule>) -> Result<OpChild, ScriptError> {
    let inner = pair.into_inner().next().expect("child has content");
    match inner.as_rule() {
        Rule::tree_node => Ok(OpChild::Fragment(build_plain_fragment(inner)?)),
        Rule::name => Ok(OpChild::Name(inner.as_str().to_string())),
        rule => unreachable!("unexpected child rule {rule:?}"),
    }
}

/// Collect the name operands, skipping the keyword token
fn names(parts: pest::iterators::Pairs<'_, Rule>) -> Vec<String> {
    parts
        .filter(|p| p.as_rule() == Rule::name)
        .map(|p| p.as_str().to_string())
        .collect()
}

/// A tree literal that must carry exactly one foot, on a leaf
fn build_footed_fragment(pair: Pair<'_, Rule>) -> Result<TreeFragment, ScriptError> {
    let source = pair.as_str().to_string();
    let (fragment, feet) = build_fragment(pair);
    match feet.len() {
        0 => Err(ScriptError::NoFootNode(source)),
        1 => {
            if fragment.is_leaf(feet[0]) {
                Ok(fragment)
            } else {
                Err(ScriptError::InternalFootNode(source))
            }
        }
        _ => Err(ScriptError::MultipleFootNodes(source)),
    }
}

/// A tree literal for insert/replace: feet make no sense here
fn build_plain_fragment(pair: Pair<'_, Rule>) -> Result<TreeFragment, ScriptError> {
    let source = pair.as_str().to_string();
    let (fragment, feet) = build_fragment(pair);
    if feet.is_empty() {
        Ok(fragment)
    } else {
        Err(ScriptError::UnexpectedFootNode(source))
    }
}

fn build_fragment(pair: Pair<'_, Rule>) -> (TreeFragment, Vec<usize>) {
    let source = pair.as_str().to_string();
    let mut builder = FragmentBuilder::new();
    let root = build_fragment_node(pair, &mut builder);
    let (fragment, feet) = builder.finish(root, &source);
    (fragment, feet)
}

fn build_fragment_node(pair: Pair<'_, Rule>, builder: &mut FragmentBuilder) -> usize {
    let mut label = String::new();
    let mut children = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::label => label = part.as_str().to_string(),
            Rule::tree_node => children.push(build_fragment_node(part, builder)),
            Rule::node_child => {
                let inner = part.into_inner().next().expect("node_child has content");
                match inner.as_rule() {
                    Rule::tree_node => children.push(build_fragment_node(inner, builder)),
                    Rule::label => {
                        let leaf = builder.add_node(inner.as_str(), Vec::new());
                        children.push(leaf);
                    }
                    rule => unreachable!("unexpected node_child rule {rule:?}"),
                }
            }
            rule => unreachable!("unexpected tree_node rule {rule:?}"),
        }
    }
    builder.add_node(&label, children)
}

fn build_location(pair: Pair<'_, Rule>) -> Location {
    let inner = pair.into_inner().next().expect("location has content");
    let rule = inner.as_rule();
    let mut parts = inner.into_inner();
    match rule {
        Rule::loc_left => Location::LeftSisterOf(
            parts.next().expect("$+ has a name").as_str().to_string(),
        ),
        Rule::loc_right => Location::RightSisterOf(
            parts.next().expect("$- has a name").as_str().to_string(),
        ),
        Rule::loc_ith => {
            let ith = parts.next().expect(">i has an index").as_str();
            let index: i32 = ith[1..].parse().unwrap_or(0);
            let name = parts.next().expect(">i has a name").as_str().to_string();
            Location::Child(index, name)
        }
        rule => unreachable!("unexpected location rule {rule:?}"),
    }
}

/// Parse a relabel argument: a bare label, `/text/`, or
/// `/regex/replacement/` with `$n`, `={node}` and `%{var}` splices
fn build_relabel_spec(raw: &str) -> Result<RelabelSpec, ScriptError> {
    if !raw.starts_with('/') {
        return Ok(RelabelSpec::Literal(raw.to_string()));
    }
    // split on unescaped slashes
    let mut segments: Vec<String> = vec![String::new()];
    let mut chars = raw[1..].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let seg = segments.last_mut().expect("segments never empty");
                seg.push('\\');
                if let Some(next) = chars.next() {
                    seg.push(next);
                }
            }
            '/' => segments.push(String::new()),
            _ => segments.last_mut().expect("segments never empty").push(c),
        }
    }
    // the grammar guarantees a trailing slash, leaving an empty last segment
    if segments.last().is_some_and(String::is_empty) {
        segments.pop();
    }
    match segments.len() {
        // `/text/`: a quoted literal label
        1 => Ok(RelabelSpec::Literal(unquote(&segments[0]))),
        // `/regex/replacement/`
        2 => {
            let source_text = segments[0].replace("\\/", "/");
            let pattern = regex::Regex::new(&source_text).map_err(|error| {
                ScriptError::BadRegex { source_text, error }
            })?;
            let replacement = parse_replacement(&segments[1]);
            Ok(RelabelSpec::Regex {
                pattern,
                replacement,
            })
        }
        _ => Err(ScriptError::BadRelabelSpec(raw.to_string())),
    }
}

/// Strip backslash quoting from the `/text/` relabel form
fn unquote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_replacement(s: &str) -> Vec<ReplacePart> {
    let mut parts: Vec<ReplacePart> = Vec::new();
    let mut text = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    text.push(next);
                }
            }
            '$' if chars.peek().is_some_and(char::is_ascii_digit) => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                flush(&mut parts, &mut text);
                parts.push(ReplacePart::Group(digits.parse().unwrap_or(0)));
            }
            '=' if chars.peek() == Some(&'{') => {
                chars.next();
                let name = take_until_brace(&mut chars);
                flush(&mut parts, &mut text);
                parts.push(ReplacePart::Node(name));
            }
            '%' if chars.peek() == Some(&'{') => {
                chars.next();
                let name = take_until_brace(&mut chars);
                flush(&mut parts, &mut text);
                parts.push(ReplacePart::Variable(name));
            }
            _ => text.push(c),
        }
    }
    flush(&mut parts, &mut text);
    parts
}

fn flush(parts: &mut Vec<ReplacePart>, text: &mut String) {
    if !text.is_empty() {
        parts.push(ReplacePart::Text(std::mem::take(text)));
    }
}

fn take_until_brace(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut name = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            break;
        }
        name.push(c);
    }
    name
}
