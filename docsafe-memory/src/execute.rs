//! Runs a [`StructuredQuery`] against the in-memory data.
//!
//! Evaluation order: target selection, filter, `order_by` field presence, sort,
//! cursors, offset, limit. Documents with equal sort values are ordered by path,
//! in the direction of the last `order_by` clause.

use bson::Bson;
use std::cmp::Ordering;

use docsafe_core::{
    backend::QueryTarget,
    document::lookup_path,
    error::DocumentStoreResult,
    expr::{Bound, CursorPosition, Sort, SortDirection, StructuredQuery},
    snapshot::DocumentSnapshot,
};

use crate::{
    evaluator::{DocumentEvaluator, compare_values},
    store::{StoreMap, StoredDocument},
};

struct Candidate<'a> {
    collection: &'a str,
    id: &'a str,
    stored: &'a StoredDocument,
}

impl Candidate<'_> {
    fn field(&self, field: &str) -> Option<&Bson> {
        lookup_path(&self.stored.data, field)
    }

    fn snapshot(&self) -> DocumentSnapshot {
        self.stored.snapshot(self.collection, self.id)
    }
}

/// Returns the documents matching `query`, in query order.
pub(crate) fn execute(
    data: &StoreMap,
    target: &QueryTarget,
    query: &StructuredQuery,
) -> DocumentStoreResult<Vec<DocumentSnapshot>> {
    let mut candidates = Vec::new();

    for (collection, documents) in data {
        if !target.matches(collection) {
            continue;
        }

        for (id, stored) in documents {
            let candidate = Candidate {
                collection: collection.as_str(),
                id: id.as_str(),
                stored,
            };

            if let Some(filter) = &query.filter {
                if !DocumentEvaluator::matches(&stored.data, filter)? {
                    continue;
                }
            }

            if query
                .order_by
                .iter()
                .any(|sort| candidate.field(&sort.field).is_none())
            {
                continue;
            }

            candidates.push(candidate);
        }
    }

    let tie_break = query
        .order_by
        .last()
        .map(|sort| sort.direction)
        .unwrap_or_default();

    candidates.sort_by(|a, b| {
        compare_sorted(&query.order_by, |sort| a.field(&sort.field), |sort| b.field(&sort.field))
            .then_with(|| directed(compare_paths(a.collection, a.id, b.collection, b.id), tie_break))
    });

    Ok(candidates
        .iter()
        .filter(|candidate| within(candidate, query.start.as_ref(), &query.order_by, tie_break, true))
        .filter(|candidate| within(candidate, query.end.as_ref(), &query.order_by, tie_break, false))
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .map(Candidate::snapshot)
        .collect())
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

fn compare_paths(left_collection: &str, left_id: &str, right_collection: &str, right_id: &str) -> Ordering {
    left_collection
        .cmp(right_collection)
        .then_with(|| left_id.cmp(right_id))
}

/// Compares two positions clause by clause. Missing values sort as null.
fn compare_sorted<'a, 'b>(
    order_by: &[Sort],
    left: impl Fn(&Sort) -> Option<&'a Bson>,
    right: impl Fn(&Sort) -> Option<&'b Bson>,
) -> Ordering {
    order_by
        .iter()
        .map(|sort| {
            let ordering = compare_values(left(sort).unwrap_or(&Bson::Null), right(sort).unwrap_or(&Bson::Null));
            directed(ordering, sort.direction)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Where the candidate sits relative to the cursor, in query order.
fn position(candidate: &Candidate<'_>, cursor: &CursorPosition, order_by: &[Sort], tie_break: SortDirection) -> Ordering {
    match cursor {
        CursorPosition::Values(values) => order_by
            .iter()
            .zip(values)
            .map(|(sort, value)| {
                let field = candidate.field(&sort.field).unwrap_or(&Bson::Null);
                directed(compare_values(field, value), sort.direction)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal),
        CursorPosition::Snapshot(snapshot) => compare_sorted(order_by, |sort| candidate.field(&sort.field), |sort| {
            snapshot.get(&sort.field)
        })
        .then_with(|| {
            directed(
                compare_paths(candidate.collection, candidate.id, snapshot.collection(), snapshot.id()),
                tie_break,
            )
        }),
    }
}

fn within(
    candidate: &Candidate<'_>,
    bound: Option<&Bound>,
    order_by: &[Sort],
    tie_break: SortDirection,
    is_start: bool,
) -> bool {
    let Some(bound) = bound else {
        return true;
    };

    match (position(candidate, &bound.position, order_by, tie_break), is_start) {
        (Ordering::Equal, _) => bound.inclusive,
        (Ordering::Greater, true) | (Ordering::Less, false) => true,
        _ => false,
    }
}
