//! Applying writes to stored documents, including field directive resolution.

use bson::{Bson, DateTime, Document};
use chrono::Utc;

use docsafe_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    value::FieldValue,
};

/// Resolves every directive in a full-document write.
///
/// Nested documents are walked; a `delete` directive is rejected because a set
/// has no existing field to remove.
pub(crate) fn resolve_set(data: Document, now: chrono::DateTime<Utc>) -> DocumentStoreResult<Document> {
    let mut resolved = Document::new();

    for (key, value) in data {
        if matches!(FieldValue::from_bson(&value), Some(FieldValue::Delete)) {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "field {key:?}: delete can only be used in an update"
            )));
        }

        if let Some(value) = resolve_value(value, None, now)? {
            resolved.insert(key, value);
        }
    }

    Ok(resolved)
}

/// Merges `fields` into `current`.
///
/// Keys are dotted paths. Intermediate documents are created when missing and
/// must be documents when present.
pub(crate) fn apply_update(
    mut current: Document,
    fields: Document,
    now: chrono::DateTime<Utc>,
) -> DocumentStoreResult<Document> {
    for (path, value) in fields {
        let segments: Vec<&str> = path.split('.').collect();
        let (leaf, parents) = segments
            .split_last()
            .ok_or_else(|| DocumentStoreError::InvalidDocument("empty field path".into()))?;

        if leaf.is_empty() || parents.iter().any(|segment| segment.is_empty()) {
            return Err(DocumentStoreError::InvalidDocument(format!("invalid field path {path:?}")));
        }

        let deleting = matches!(FieldValue::from_bson(&value), Some(FieldValue::Delete));
        let Some(parent) = descend(&mut current, parents, &path, deleting)? else {
            continue;
        };

        match resolve_value(value, parent.get(*leaf), now)? {
            Some(value) => {
                parent.insert(*leaf, value);
            }
            None => {
                parent.remove(*leaf);
            }
        }
    }

    Ok(current)
}

/// Walks to the document holding the leaf of a dotted path.
///
/// Returns `None` when a delete targets a path whose parent does not exist.
fn descend<'a>(
    document: &'a mut Document,
    parents: &[&str],
    path: &str,
    deleting: bool,
) -> DocumentStoreResult<Option<&'a mut Document>> {
    let mut current = document;

    for segment in parents {
        if deleting && !current.contains_key(*segment) {
            return Ok(None);
        }

        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Bson::Document(Document::new()));

        current = match entry {
            Bson::Document(inner) => inner,
            other => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "cannot update {path:?}: {segment:?} is {:?}, not a document",
                    other.element_type()
                )));
            }
        };
    }

    Ok(Some(current))
}

/// Resolves one value against the field's current value.
///
/// Returns `None` when the field should be removed.
fn resolve_value(
    value: Bson,
    current: Option<&Bson>,
    now: chrono::DateTime<Utc>,
) -> DocumentStoreResult<Option<Bson>> {
    let directive = match FieldValue::from_bson(&value) {
        Some(directive) => directive,
        None => {
            return match value {
                Bson::Document(nested) => Ok(Some(Bson::Document(resolve_set(nested, now)?))),
                Bson::Array(items) => Ok(Some(Bson::Array(
                    items
                        .into_iter()
                        .map(|item| resolve_element(item, now))
                        .collect::<DocumentStoreResult<_>>()?,
                ))),
                other => Ok(Some(other)),
            };
        }
    };

    match directive {
        FieldValue::ServerTimestamp => Ok(Some(Bson::DateTime(DateTime::from_chrono(now)))),
        FieldValue::Delete => Ok(None),
        FieldValue::Increment(operand) => increment(current, operand).map(Some),
        FieldValue::ArrayUnion(elements) => {
            let mut array = current_array(current);
            for element in elements {
                if !array.contains(&element) {
                    array.push(element);
                }
            }
            Ok(Some(Bson::Array(array)))
        }
        FieldValue::ArrayRemove(elements) => {
            let mut array = current_array(current);
            array.retain(|item| !elements.contains(item));
            Ok(Some(Bson::Array(array)))
        }
    }
}

fn resolve_element(item: Bson, now: chrono::DateTime<Utc>) -> DocumentStoreResult<Bson> {
    match FieldValue::from_bson(&item) {
        Some(FieldValue::ServerTimestamp) => Ok(Bson::DateTime(DateTime::from_chrono(now))),
        Some(_) => Err(DocumentStoreError::InvalidDocument(
            "field directives other than server timestamps cannot be used inside arrays".into(),
        )),
        None => Ok(item),
    }
}

fn current_array(current: Option<&Bson>) -> Vec<Bson> {
    match current {
        Some(Bson::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn increment(current: Option<&Bson>, operand: Bson) -> DocumentStoreResult<Bson> {
    let base = match current {
        Some(value @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))) => value.clone(),
        // Missing and non-numeric fields are replaced by the operand.
        _ => Bson::Int32(0),
    };

    match (base, operand) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(a
            .checked_add(b)
            .map(Bson::Int32)
            .unwrap_or_else(|| Bson::Int64(i64::from(a) + i64::from(b)))),
        (Bson::Int32(a), Bson::Int64(b)) => Ok(Bson::Int64(i64::from(a).saturating_add(b))),
        (Bson::Int64(a), Bson::Int32(b)) => Ok(Bson::Int64(a.saturating_add(i64::from(b)))),
        (Bson::Int64(a), Bson::Int64(b)) => Ok(Bson::Int64(a.saturating_add(b))),
        (Bson::Double(a), Bson::Int32(b)) => Ok(Bson::Double(a + f64::from(b))),
        (Bson::Double(a), Bson::Int64(b)) => Ok(Bson::Double(a + b as f64)),
        (Bson::Int32(a), Bson::Double(b)) => Ok(Bson::Double(f64::from(a) + b)),
        (Bson::Int64(a), Bson::Double(b)) => Ok(Bson::Double(a as f64 + b)),
        (Bson::Double(a), Bson::Double(b)) => Ok(Bson::Double(a + b)),
        (_, operand) => Err(DocumentStoreError::InvalidDocument(format!(
            "increment operand must be numeric, found {:?}",
            operand.element_type()
        ))),
    }
}
