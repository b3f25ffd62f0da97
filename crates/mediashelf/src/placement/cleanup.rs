use std::collections::BTreeSet;

use tracing::info;

use crate::db::DatabaseError;
use crate::pipeline::PipelineContext;
use crate::queue::JobKind;

/// What [`remove_placement`] deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    pub placement_removed: bool,
    /// Set when the placement was the content's last one.
    pub content_removed: Option<i64>,
}

/// Deletes a placement record in one transaction. If it was the last
/// placement of its content, the content record is deleted as well, every
/// series linked through its associations is added to `touched`, and the
/// external catalog is asked to drop its reference.
pub fn remove_placement(
    ctx: &PipelineContext,
    placement_id: i64,
    touched: &mut BTreeSet<i64>,
) -> Result<Removal, DatabaseError> {
    let outcome = ctx.store.transaction(|tx| {
        let Some(placement) = tx.get_placement(placement_id)? else {
            return Ok(None);
        };
        tx.delete_placement(placement.id)?;

        if !tx.placements_for_content(placement.content_id)?.is_empty() {
            return Ok(Some((placement, None)));
        }

        let orphan = match tx.get_content(placement.content_id)? {
            Some(content) => {
                let series: Vec<i64> = if content.hash.is_empty() {
                    Vec::new()
                } else {
                    tx.associations_for_hash(&content.hash)?
                        .into_iter()
                        .map(|a| a.series_id)
                        .collect()
                };
                tx.delete_content(content.id)?;
                Some((content, series))
            }
            None => None,
        };
        Ok(Some((placement, orphan)))
    })?;

    let Some((placement, orphan)) = outcome else {
        return Ok(Removal::default());
    };

    let mut removal = Removal {
        placement_removed: true,
        content_removed: None,
    };
    match orphan {
        Some((content, series)) => {
            info!(
                placement_id = placement.id,
                content_id = content.id,
                "Removed last placement of content"
            );
            touched.extend(series);
            if !content.hash.is_empty() {
                ctx.enqueue(JobKind::DeleteExternalReference {
                    hash: content.hash.clone(),
                    size: content.file_size,
                });
            }
            removal.content_removed = Some(content.id);
        }
        None => info!(placement_id = placement.id, "Removed placement"),
    }
    Ok(removal)
}
