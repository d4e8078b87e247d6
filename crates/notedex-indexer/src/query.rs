//! Query language for the document index.
//!
//! A query is a whitespace-separated list of clauses, each of the form
//! `[+|-][field:]term[~N][^B]`. A term may contain `*` wildcards. Clauses
//! without a field search every field with its default boost.

use std::collections::BTreeSet;

use regex::Regex;
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, EmptyQuery, FuzzyTermQuery, Occur, PhraseQuery, Query,
    TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::{TextAnalyzer, TokenStream};
use tantivy::{Searcher, Term};
use thiserror::Error;

use crate::{IndexFields, SearchField};

const MAX_EDIT_DISTANCE: u8 = 2;
const MAX_EXPANSIONS: usize = 128;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("clause `{clause}` has no term")]
    EmptyTerm { clause: String },
    #[error("invalid boost `{value}` in clause `{clause}`")]
    InvalidBoost { clause: String, value: String },
    #[error("invalid edit distance `{value}` in clause `{clause}`")]
    InvalidEditDistance { clause: String, value: String },
    #[error("invalid wildcard pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("index search failed: {0}")]
    Execution(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Optional,
    Required,
    Prohibited,
}

impl Presence {
    fn occur(self) -> Occur {
        match self {
            Presence::Optional => Occur::Should,
            Presence::Required => Occur::Must,
            Presence::Prohibited => Occur::MustNot,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub presence: Presence,
    pub field: Option<SearchField>,
    pub term: String,
    pub edit_distance: u8,
    pub boost: f32,
}

impl Clause {
    pub fn has_wildcard(&self) -> bool {
        self.term.contains('*')
    }
}

/// Parse a query string into clauses. An empty string yields no clauses.
pub fn parse_query(query: &str) -> Result<Vec<Clause>, QueryError> {
    query.split_whitespace().map(parse_clause).collect()
}

fn parse_clause(raw: &str) -> Result<Clause, QueryError> {
    let (presence, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (Presence::Required, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (Presence::Prohibited, rest)
    } else {
        (Presence::Optional, raw)
    };

    let (field, rest) = match rest.split_once(':') {
        Some((name, term)) => {
            let field = SearchField::from_name(name)
                .ok_or_else(|| QueryError::UnknownField(name.to_string()))?;
            (Some(field), term)
        }
        None => (None, rest),
    };

    let modifiers_at = rest.find(['~', '^']).unwrap_or(rest.len());
    let (term, mut modifiers) = rest.split_at(modifiers_at);
    if term.is_empty() {
        return Err(QueryError::EmptyTerm {
            clause: raw.to_string(),
        });
    }

    let mut edit_distance = 0;
    let mut boost = 1.0;
    while let Some(marker) = modifiers.chars().next() {
        let body = &modifiers[1..];
        let end = body.find(['~', '^']).unwrap_or(body.len());
        let value = &body[..end];
        if marker == '~' {
            edit_distance = value
                .parse::<u8>()
                .ok()
                .filter(|d| *d <= MAX_EDIT_DISTANCE)
                .ok_or_else(|| QueryError::InvalidEditDistance {
                    clause: raw.to_string(),
                    value: value.to_string(),
                })?;
        } else {
            boost = value
                .parse::<f32>()
                .ok()
                .filter(|b| b.is_finite() && *b > 0.0)
                .ok_or_else(|| QueryError::InvalidBoost {
                    clause: raw.to_string(),
                    value: value.to_string(),
                })?;
        }
        modifiers = &body[end..];
    }

    Ok(Clause {
        presence,
        field,
        term: term.to_string(),
        edit_distance,
        boost,
    })
}

/// Compile parsed clauses into a single boolean query over the index fields.
///
/// Wildcard pieces are expanded against the term dictionaries visible to
/// `searcher`, so the expanded terms score with BM25 like any other term.
pub(crate) fn compile(
    clauses: &[Clause],
    fields: &IndexFields,
    analyzer: &mut TextAnalyzer,
    searcher: &Searcher,
) -> Result<Box<dyn Query>, QueryError> {
    let mut compiled: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    for clause in clauses {
        if let Some(query) = compile_clause(clause, fields, analyzer, searcher)? {
            compiled.push((clause.presence.occur(), query));
        }
    }

    if compiled.is_empty() {
        return Ok(Box::new(EmptyQuery));
    }
    // A purely negative query means "everything except".
    if compiled.iter().all(|(occur, _)| *occur == Occur::MustNot) {
        compiled.push((Occur::Should, Box::new(AllQuery)));
    }
    Ok(Box::new(BooleanQuery::new(compiled)))
}

/// One analyzed piece of a wildcard term.
#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Token(String),
    Pattern(String),
}

fn compile_clause(
    clause: &Clause,
    fields: &IndexFields,
    analyzer: &mut TextAnalyzer,
    searcher: &Searcher,
) -> Result<Option<Box<dyn Query>>, QueryError> {
    let targets: Vec<SearchField> = match clause.field {
        Some(field) => vec![field],
        None => SearchField::ALL.to_vec(),
    };

    let (pieces, tokens) = if clause.has_wildcard() {
        (wildcard_pieces(analyzer, &clause.term), Vec::new())
    } else {
        (Vec::new(), tokenize(analyzer, &clause.term))
    };
    if pieces.is_empty() && tokens.is_empty() {
        return Ok(None);
    }

    let mut per_field: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(targets.len());
    for target in targets {
        let field = fields.get(target);
        let query: Box<dyn Query> = if !pieces.is_empty() {
            wildcard_query(&pieces, field, searcher)?
        } else if tokens.len() > 1 {
            let terms = tokens
                .iter()
                .map(|token| Term::from_field_text(field, token))
                .collect();
            Box::new(PhraseQuery::new(terms))
        } else {
            let term = Term::from_field_text(field, &tokens[0]);
            if clause.edit_distance > 0 {
                Box::new(FuzzyTermQuery::new(term, clause.edit_distance, true))
            } else {
                Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))
            }
        };
        let weight = target.boost() * clause.boost;
        per_field.push((Occur::Should, Box::new(BoostQuery::new(query, weight))));
    }

    Ok(Some(Box::new(BooleanQuery::new(per_field))))
}

/// Split a wildcard term the way the analyzer splits text, keeping `*`
/// inside the pieces that carry it. Pieces made only of `*` are dropped.
fn wildcard_pieces(analyzer: &mut TextAnalyzer, term: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    for raw in term.split(|c: char| !c.is_alphanumeric() && c != '*') {
        if raw.chars().all(|c| c == '*') {
            continue;
        }
        if raw.contains('*') {
            pieces.push(Piece::Pattern(raw.to_lowercase()));
        } else {
            pieces.extend(tokenize(analyzer, raw).into_iter().map(Piece::Token));
        }
    }
    pieces
}

/// All pieces must hold in the same field.
fn wildcard_query(
    pieces: &[Piece],
    field: Field,
    searcher: &Searcher,
) -> Result<Box<dyn Query>, QueryError> {
    let mut required: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        let query: Box<dyn Query> = match piece {
            Piece::Token(token) => Box::new(TermQuery::new(
                Term::from_field_text(field, token),
                IndexRecordOption::WithFreqs,
            )),
            Piece::Pattern(pattern) => {
                let terms = expand_pattern(pattern, field, searcher)?;
                if terms.is_empty() {
                    return Ok(Box::new(EmptyQuery));
                }
                let alternatives = terms
                    .into_iter()
                    .map(|term| {
                        let query: Box<dyn Query> =
                            Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                        (Occur::Should, query)
                    })
                    .collect();
                Box::new(BooleanQuery::new(alternatives))
            }
        };
        required.push((Occur::Must, query));
    }
    if required.len() == 1 {
        return Ok(required.remove(0).1);
    }
    Ok(Box::new(BooleanQuery::new(required)))
}

/// Indexed terms of `field` matching a `*` pattern, walked from the literal
/// prefix of the pattern. Capped at [`MAX_EXPANSIONS`].
fn expand_pattern(
    pattern: &str,
    field: Field,
    searcher: &Searcher,
) -> Result<Vec<Term>, QueryError> {
    let source = format!("^{}$", wildcard_pattern(pattern));
    let matcher = Regex::new(&source).map_err(|err| QueryError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })?;
    let prefix = pattern.split('*').next().unwrap_or("").as_bytes();

    let mut found = BTreeSet::new();
    'segments: for segment in searcher.segment_readers() {
        let inverted = segment
            .inverted_index(field)
            .map_err(|err| QueryError::Execution(err.to_string()))?;
        let mut stream = inverted
            .terms()
            .range()
            .ge(prefix)
            .into_stream()
            .map_err(|err| QueryError::Execution(err.to_string()))?;
        while stream.advance() {
            let key = stream.key();
            if !key.starts_with(prefix) {
                break;
            }
            let Ok(text) = std::str::from_utf8(key) else {
                continue;
            };
            if matcher.is_match(text)
                && found.insert(text.to_string())
                && found.len() >= MAX_EXPANSIONS
            {
                break 'segments;
            }
        }
    }
    Ok(found
        .into_iter()
        .map(|text| Term::from_field_text(field, &text))
        .collect())
}

/// Translate a `*` wildcard into an unanchored regex body.
fn wildcard_pattern(term: &str) -> String {
    term.to_lowercase()
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

fn tokenize(analyzer: &mut TextAnalyzer, text: &str) -> Vec<String> {
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while let Some(token) = stream.next() {
        tokens.push(token.text.clone());
    }
    tokens
}
