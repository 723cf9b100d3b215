//! Merges the on-disk [`super::store`] catalog with the live
//! [`super::compose::ComposeLoader`] output into one flat, validated
//! snapshot. Built fresh for every request; never cached.

use crate::error::{AppError, AppResult};

use super::{Catalog, Service};

/// Merges config-sourced and compose-sourced services, rejecting name
/// collisions between the two sources (a collision within one source is
/// already rejected by [`Catalog::validate`]).
///
/// Callers typically obtain `compose_services` via
/// `ComposeLoader::services()` after a `sync` against the stored catalog's
/// registered projects.
pub fn build_snapshot(stored: Catalog, compose_services: Vec<Service>) -> AppResult<Catalog> {
    for service in &compose_services {
        if stored.find(&service.name).is_some() {
            return Err(AppError::validation(format!(
                "service '{}' is defined both in the catalog and a compose file",
                service.name
            )));
        }
    }

    let mut merged = stored;
    merged.services.extend(compose_services);
    merged.validate()?;
    Ok(merged)
}
