//! Turning command lines into pipelines
//!
//! The executor consumes the structured [`AndOrList`] form; how text
//! becomes that structure is pluggable through [`PipelineParser`], so a
//! full grammar can be swapped in without touching execution. The
//! built-in [`WordSplitParser`] covers the classic interactive subset:
//! words are split with shell quoting rules, and `;`, `&&`, `||`, `|`,
//! `!`, and the redirection operators are recognized as standalone
//! tokens. Operators must be separated by whitespace; `a|b` is one word
//! to this parser. `!` negates only at the start of a pipeline and is an
//! ordinary word anywhere else.

use crate::error::{Error, Result};
use crate::pipeline::{AndOrList, AndOrOp, Pipeline, PipelineSegment};

/// Produces executable pipelines from a line of input.
pub trait PipelineParser: Send + Sync {
    /// Parse one line into its sequence of and-or lists, one per
    /// `;`-separated statement.
    fn parse(&self, input: &str) -> Result<Vec<AndOrList>>;
}

/// Whitespace-and-quotes parser for the interactive subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordSplitParser;

impl WordSplitParser {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineParser for WordSplitParser {
    fn parse(&self, input: &str) -> Result<Vec<AndOrList>> {
        let words = shell_words::split(input).map_err(|err| Error::Parse(err.to_string()))?;
        let mut lists = Vec::new();
        for statement in words.split(|token| token == ";") {
            // Empty statements (stray or trailing ';') are skipped
            if statement.is_empty() {
                continue;
            }
            lists.push(parse_and_or(statement)?);
        }
        Ok(lists)
    }
}

fn syntax_error(near: &str) -> Error {
    Error::Parse(format!("syntax error near '{near}'"))
}

fn parse_and_or(tokens: &[String]) -> Result<AndOrList> {
    let mut first_tokens: Vec<String> = Vec::new();
    let mut rest_groups: Vec<(AndOrOp, Vec<String>)> = Vec::new();
    let mut in_first = true;

    for token in tokens {
        let op = match token.as_str() {
            "&&" => Some(AndOrOp::And),
            "||" => Some(AndOrOp::Or),
            _ => None,
        };
        match op {
            Some(op) => {
                let current_empty = if in_first {
                    first_tokens.is_empty()
                } else {
                    rest_groups.last().is_none_or(|(_, group)| group.is_empty())
                };
                if current_empty {
                    return Err(syntax_error(token));
                }
                rest_groups.push((op, Vec::new()));
                in_first = false;
            }
            None => {
                if in_first {
                    first_tokens.push(token.clone());
                } else if let Some((_, group)) = rest_groups.last_mut() {
                    group.push(token.clone());
                }
            }
        }
    }
    if let Some((op, group)) = rest_groups.last() {
        if group.is_empty() {
            return Err(syntax_error(match op {
                AndOrOp::And => "&&",
                AndOrOp::Or => "||",
            }));
        }
    }

    let first = parse_pipeline(&first_tokens)?;
    let mut rest = Vec::with_capacity(rest_groups.len());
    for (op, group) in rest_groups {
        rest.push((op, parse_pipeline(&group)?));
    }
    Ok(AndOrList { first, rest })
}

fn parse_pipeline(tokens: &[String]) -> Result<Pipeline> {
    let mut negated = false;
    let mut tokens = tokens;
    while tokens.first().is_some_and(|token| token == "!") {
        negated = !negated;
        tokens = &tokens[1..];
    }
    if tokens.is_empty() {
        return Err(syntax_error("!"));
    }

    let mut groups: Vec<Vec<String>> = vec![Vec::new()];
    for token in tokens {
        if token == "|" {
            if groups.last().is_none_or(|group| group.is_empty()) {
                return Err(syntax_error("|"));
            }
            groups.push(Vec::new());
        } else if let Some(group) = groups.last_mut() {
            group.push(token.clone());
        }
    }
    if groups.last().is_none_or(|group| group.is_empty()) {
        return Err(syntax_error("|"));
    }

    let mut segments = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().enumerate() {
        segments.push(PipelineSegment::from_tokens(group, index)?);
    }
    let mut pipeline = Pipeline::new(segments);
    pipeline.negated = negated;
    Ok(pipeline)
}
