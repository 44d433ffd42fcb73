//! Full-text search and access query evaluation over one workspace's state.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::index::memory::IndexState;
use crate::model::Path;
use crate::query::{
    AccessQuery, Constraint, FullTextSearch, QueryResults, QueryRow, SearchHit, SearchResults,
};
use crate::util::text::terms;

/// Summed term frequency per path for nodes matching every term.
fn score(
    state: &IndexState,
    expression: &str,
    property: Option<&str>,
) -> BTreeMap<Path, u32> {
    let terms = terms(expression);
    if terms.is_empty() {
        return BTreeMap::new();
    }

    let mut scores: Option<BTreeMap<Path, u32>> = None;
    for term in &terms {
        let Some(paths) = state.postings.get(term) else {
            return BTreeMap::new();
        };
        let term_scores: BTreeMap<Path, u32> = paths
            .iter()
            .filter_map(|(path, by_property)| {
                frequency(by_property, property).map(|tf| (path.clone(), tf))
            })
            .collect();
        scores = Some(match scores {
            None => term_scores,
            Some(acc) => acc
                .into_iter()
                .filter_map(|(path, tf)| term_scores.get(&path).map(|more| (path, tf + more)))
                .collect(),
        });
        if scores.as_ref().is_some_and(BTreeMap::is_empty) {
            break;
        }
    }
    scores.unwrap_or_default()
}

fn frequency(by_property: &AHashMap<String, u32>, property: Option<&str>) -> Option<u32> {
    let tf = match property {
        Some(name) => by_property.get(name).copied().unwrap_or(0),
        None => by_property.values().sum(),
    };
    (tf > 0).then_some(tf)
}

pub(super) fn search(state: &IndexState, request: &FullTextSearch) -> SearchResults {
    let mut scored: Vec<(Path, u32)> = score(state, &request.expression, request.property.as_deref())
        .into_iter()
        .collect();
    scored.sort_by(by_score_then_path);

    let total = scored.len();
    let hits = scored
        .into_iter()
        .skip(request.offset)
        .take(request.limit)
        .filter_map(|(path, tf)| {
            state.nodes.get(&path).map(|node| SearchHit {
                location: node.location.clone(),
                score: tf as f32,
            })
        })
        .collect();
    SearchResults { hits, total }
}

fn matches(state: &IndexState, path: &Path, constraint: &Constraint) -> bool {
    let Some(node) = state.nodes.get(path) else {
        return false;
    };
    match constraint {
        Constraint::PropertyEquals { name, value } => node
            .properties
            .get(name)
            .is_some_and(|property| property.values().contains(value)),
        Constraint::PropertyExists { name } => node.properties.contains_key(name),
        Constraint::NodeName { name } => path
            .last_segment()
            .is_some_and(|segment| &segment.name == name),
        Constraint::ChildOf { parent } => path.parent().as_ref() == Some(parent),
        Constraint::DescendantOf { ancestor } => path.is_descendant_of(ancestor),
        Constraint::FullText { expression } => {
            let terms = terms(expression);
            !terms.is_empty()
                && terms.iter().all(|term| {
                    state
                        .postings
                        .get(term)
                        .is_some_and(|paths| paths.contains_key(path))
                })
        }
        Constraint::And(left, right) => {
            matches(state, path, left) && matches(state, path, right)
        }
        Constraint::Or(left, right) => matches(state, path, left) || matches(state, path, right),
        Constraint::Not(inner) => !matches(state, path, inner),
    }
}

pub(super) fn evaluate(state: &IndexState, request: &AccessQuery) -> QueryResults {
    let rows = state
        .nodes
        .iter()
        .filter(|(path, _)| {
            request
                .constraint
                .as_ref()
                .is_none_or(|constraint| matches(state, path, constraint))
        })
        .skip(request.offset)
        .take(request.limit.unwrap_or(usize::MAX))
        .map(|(_, node)| QueryRow {
            location: node.location.clone(),
            values: request
                .columns
                .iter()
                .map(|column| {
                    node.properties
                        .get(column)
                        .map(|property| property.first_value().clone())
                })
                .collect(),
        })
        .collect();
    QueryResults {
        columns: request.columns.clone(),
        rows,
    }
}

fn by_score_then_path(a: &(Path, u32), b: &(Path, u32)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
