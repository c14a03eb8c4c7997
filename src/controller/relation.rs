//! Writes through a relation controller. Queries here are always rooted at the owning row.

use crate::config::ModelDef;
use crate::error::AppError;
use crate::query::{Executor, Query};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Insert `row` as a related row. With `relate`, a row carrying an id connects the existing
/// row instead.
pub(crate) async fn insert_related(
    ex: &Executor,
    query: &Query,
    row: Map<String, Value>,
    relate: bool,
) -> Result<Value, AppError> {
    if relate {
        if let Some(id) = query.model.id_of(&Value::Object(row.clone())) {
            return ex.relate(query, &id).await;
        }
    }
    ex.insert(query, row).await
}

/// Make the related rows equal to `rows`, matched by id. Current rows missing from the payload
/// are removed first (unrelated with `relate`, deleted otherwise); rows present on both sides
/// are updated; the remaining payload rows are inserted or related.
pub(crate) async fn replace_related(
    ex: &Executor,
    query: &Query,
    rows: Vec<Map<String, Value>>,
    relate: bool,
) -> Result<Vec<Value>, AppError> {
    let model = query.model.clone();
    let key_of = |row: &Value| model.id_of(row).map(|id| ModelDef::id_key(&id));

    let current = ex.select(&query.unpaged()).await?;
    let current_keys: HashSet<String> = current.iter().filter_map(key_of).collect();
    let wanted: HashSet<String> = rows
        .iter()
        .filter_map(|row| key_of(&Value::Object(row.clone())))
        .collect();

    let mut removed = 0;
    for row in &current {
        let Some(id) = model.id_of(row) else { continue };
        if wanted.contains(&ModelDef::id_key(&id)) {
            continue;
        }
        let by_id = query.clone().find_by_id(&id);
        removed += if relate { ex.unrelate(&by_id).await? } else { ex.delete(&by_id).await? };
    }

    let mut written = Vec::with_capacity(rows.len());
    let (mut updated, mut added) = (0, 0);
    for row in rows {
        let existing = model
            .id_of(&Value::Object(row.clone()))
            .filter(|id| current_keys.contains(&ModelDef::id_key(id)));
        let value = match existing {
            Some(id) => {
                updated += 1;
                ex.update(&query.clone().find_by_id(&id), row)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::NotFound(format!("{} {}", model.name, ModelDef::id_key(&id))))?
            }
            None => {
                added += 1;
                insert_related(ex, query, row, relate).await?
            }
        };
        written.push(value);
    }
    tracing::debug!(model = %model.name, removed, updated, added, "related rows replaced");
    Ok(written)
}
