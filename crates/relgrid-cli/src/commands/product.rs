use anyhow::anyhow;
use relgrid_core::{Product, ProductKind, ReleaseError, check_id};

use super::Context;

pub fn add(ctx: &Context, id: &str, name: &str, kind: ProductKind) -> anyhow::Result<Product> {
    check_id("product", id)?;
    let product = ctx.store.save(&Product::new(id, name, kind, ctx.now()))?;
    Ok(product)
}

pub fn list(ctx: &Context) -> anyhow::Result<Vec<Product>> {
    Ok(ctx.store.list_products()?)
}

/// Soft delete: the product stays, flagged inactive.
pub fn deactivate(ctx: &Context, id: &str) -> anyhow::Result<Product> {
    let mut product = load(ctx, id)?;
    product.active = false;
    Ok(ctx.store.save(&product)?)
}

pub fn load(ctx: &Context, id: &str) -> anyhow::Result<Product> {
    ctx.store
        .get_product(id)?
        .ok_or_else(|| anyhow!("product {id} not found"))
}

/// Load a product that may still receive versions and rollouts.
pub fn require_active(ctx: &Context, id: &str) -> anyhow::Result<Product> {
    let product = load(ctx, id)?;
    if !product.active {
        return Err(ReleaseError::ProductInactive(product.id).into());
    }
    Ok(product)
}
