// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bundled adapter seeding at startup.
//!
//! Bundled descriptors are named `<platform>-<version>.json`, the exact
//! layout [`agp_adapters::write_bundled_adapters`] produces. Seeding reads
//! that directory, compares each file's version against the adapter's
//! current database row, and decides whether to (re)write the runtime copy
//! and hot-load it.

use crate::{AdapterRegistry, Scope};
use agp_adapter::DescriptorRunner;
use agp_core::adapter_record::SYSTEM_OWNER;
use agp_error::{AgpError, ErrorCode};
use agp_core::slug::is_strictly_newer;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

struct BundledFile {
    platform: String,
    version: String,
    descriptor_json: String,
}

fn parse_filename(file_name: &str) -> Option<(String, String)> {
    let stem = file_name.strip_suffix(".json")?;
    let (platform, version) = stem.rsplit_once('-')?;
    if platform.is_empty() || version.is_empty() {
        return None;
    }
    Some((platform.to_string(), version.to_string()))
}

fn scan_bundled_dir(bundled_dir: &std::path::Path) -> Result<Vec<BundledFile>, AgpError> {
    let read_dir = match std::fs::read_dir(bundled_dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(AgpError::new(ErrorCode::Internal, "failed to scan bundled adapter directory").with_source(e))
        }
    };

    let mut out = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| {
            AgpError::new(ErrorCode::Internal, "failed to read bundled directory entry").with_source(e)
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((platform, version)) = parse_filename(file_name) else {
            tracing::warn!(file = file_name, "bundled adapter filename does not match <platform>-<version>.json");
            continue;
        };
        let descriptor_json = std::fs::read_to_string(&path).map_err(|e| {
            AgpError::new(ErrorCode::Internal, "failed to read bundled adapter descriptor").with_source(e)
        })?;
        out.push(BundledFile { platform, version, descriptor_json });
    }
    Ok(out)
}

struct ExistingRow {
    id: String,
    owner_id: String,
    version: Option<String>,
}

async fn find_row(pool: &sqlx::SqlitePool, platform: &str) -> Result<Option<ExistingRow>, AgpError> {
    let row = sqlx::query(
        "SELECT id, owner_id, version FROM adapters WHERE platform = ?1
         ORDER BY (owner_id = 'system') DESC, created_at ASC LIMIT 1",
    )
    .bind(platform)
    .fetch_optional(pool)
    .await
    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to look up adapter row").with_source(e))?;

    Ok(row.map(|r| ExistingRow {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        version: r.get("version"),
    }))
}

/// Seed every bundled descriptor in `registry`'s bundled directory into the
/// runtime directory and the database, hot-loading whatever wins the
/// version comparison against the existing row.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] on filesystem/database failure, or
/// [`ErrorCode::Validation`] if a bundled descriptor fails to parse.
pub async fn seed_bundled_adapters(registry: &AdapterRegistry) -> Result<(), AgpError> {
    let files = scan_bundled_dir(registry.bundled_dir())?;
    for file in files {
        DescriptorRunner::from_json(&file.descriptor_json)?;
        seed_one(registry, &file).await?;
    }
    Ok(())
}

async fn seed_one(registry: &AdapterRegistry, file: &BundledFile) -> Result<(), AgpError> {
    let runtime_relative = format!("{}-public.json", file.platform);
    let runtime_path = registry.runtime_path(&runtime_relative)?;
    let file_path_str = runtime_path.to_string_lossy().into_owned();
    let existing = find_row(registry.pool(), &file.platform).await?;

    let should_write = match &existing {
        None => true,
        Some(row) if row.owner_id != SYSTEM_OWNER => true,
        Some(row) => {
            let current_version = row.version.as_deref().unwrap_or("0.0.0");
            is_strictly_newer(&file.version, current_version)
        }
    };
    if !should_write {
        return Ok(());
    }

    if let Some(parent) = runtime_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to create runtime directory").with_source(e))?;
    }
    std::fs::write(&runtime_path, &file.descriptor_json)
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to write bundled adapter to runtime").with_source(e))?;

    let now = Utc::now().to_rfc3339();
    match &existing {
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO adapters
                    (id, platform, owner_id, status, file_path, source_code, source_hash, version,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'public', ?4, ?5, ?6, ?7, ?8, ?8)",
            )
            .bind(&id)
            .bind(&file.platform)
            .bind(SYSTEM_OWNER)
            .bind(&file_path_str)
            .bind(&file.descriptor_json)
            .bind(source_hash(&file.descriptor_json))
            .bind(&file.version)
            .bind(&now)
            .execute(registry.pool())
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to insert bundled adapter").with_source(e))?;
        }
        Some(row) => {
            sqlx::query(
                "UPDATE adapters SET owner_id = ?1, status = 'public', file_path = ?2, source_code = ?3,
                    source_hash = ?4, version = ?5, updated_at = ?6
                 WHERE id = ?7",
            )
            .bind(SYSTEM_OWNER)
            .bind(&file_path_str)
            .bind(&file.descriptor_json)
            .bind(source_hash(&file.descriptor_json))
            .bind(&file.version)
            .bind(&now)
            .bind(&row.id)
            .execute(registry.pool())
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to update bundled adapter").with_source(e))?;
        }
    }

    registry.hot_load(&file.platform, Scope::Public, &runtime_path)?;
    Ok(())
}

fn source_hash(source: &str) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(source.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_filenames() {
        assert_eq!(
            parse_filename("stripe-1.0.0.json"),
            Some(("stripe".to_string(), "1.0.0".to_string()))
        );
    }

    #[test]
    fn rejects_filenames_without_a_version_separator() {
        assert_eq!(parse_filename("stripe.json"), None);
    }
}
