use relgrid_core::{UpdateDetection, check_id};
use relgrid_release::Detection;
use serde::Serialize;

use super::{Context, parse_version};

/// What a detection run found and what it left in the store.
#[derive(Debug, Serialize)]
pub struct DetectReport {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded: Option<semver::Version>,
    pub detection: Option<UpdateDetection>,
}

/// Check one endpoint's installed version of a product and keep its
/// stored detection current. An up-to-date endpoint has no detection.
pub fn run(
    ctx: &Context,
    endpoint_id: &str,
    product_id: &str,
    current: &str,
) -> anyhow::Result<DetectReport> {
    check_id("endpoint", endpoint_id)?;
    check_id("product", product_id)?;
    let current = parse_version(current)?;
    let versions = ctx.store.list_versions(product_id)?;
    let existing = ctx.store.get_detection(endpoint_id, product_id)?;

    let found = relgrid_release::detect(
        endpoint_id,
        product_id,
        &current,
        &versions,
        existing.as_ref(),
        ctx.now(),
    );

    let (outcome, superseded) = match &found {
        Detection::UpToDate => ("up_to_date", None),
        Detection::New(_) => ("new", None),
        Detection::Refreshed(_) => ("refreshed", None),
        Detection::Superseded { previous, .. } => ("superseded", Some(previous.clone())),
    };

    let detection = match found.into_record() {
        Some(record) => Some(ctx.store.save(&record)?),
        None => {
            if existing.is_some() {
                ctx.store.delete_detection(endpoint_id, product_id)?;
            }
            None
        }
    };

    Ok(DetectReport {
        outcome,
        superseded,
        detection,
    })
}
