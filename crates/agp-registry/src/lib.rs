// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scoped adapter registry: an in-memory `platform -> (scope -> entry)` map
//! kept in sync with the `adapters` table, plus the bundled-seeding and
//! lifecycle-transition logic that mutates it.
//!
//! The registry never executes adapter code directly — every entry wraps a
//! [`DescriptorRunner`] built from the descriptor JSON stored in
//! `AdapterRecord::source_code`, per the hot-swap redesign: submitting,
//! generating, or promoting an adapter is nothing more than writing a new
//! descriptor file and re-registering it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Bundled descriptor seeding at startup.
pub mod bundled;
/// Lifecycle state transitions: submit/withdraw/reject/promote/demote/archive/restore.
pub mod lifecycle;

use agp_adapter::{Adapter, DescriptorRunner};
use agp_core::{AdapterRecord, AdapterStatus};
use agp_error::{AgpError, ErrorCode};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// The scope key used for the one shared public entry of a platform.
pub const PUBLIC_SCOPE: &str = "__public__";

/// Which bucket one registry entry lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Visible to every caller.
    Public,
    /// Visible only to its owner.
    Sandbox(String),
}

impl Scope {
    /// The string key this scope is stored under in the per-platform map.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Scope::Public => PUBLIC_SCOPE.to_string(),
            Scope::Sandbox(owner) => owner.clone(),
        }
    }
}

/// One loaded adapter: its running [`Adapter`] plus the provenance needed
/// to answer `listOAuthAdapters`/`getOAuthAdapter` without re-parsing the
/// descriptor on every call.
#[derive(Clone)]
pub struct AdapterEntry {
    /// The running adapter.
    pub adapter: Arc<dyn Adapter>,
    /// Scope this entry is registered under.
    pub scope: Scope,
    /// Absolute path of the descriptor file this entry was hot-loaded from.
    pub source_path: PathBuf,
}

type PlatformMap = HashMap<String, HashMap<String, AdapterEntry>>;

/// Directory-separated, scope-aware registry of live adapters, backed by
/// the `adapters` table for persistence across restarts.
///
/// Reads observe either the previous or the newly hot-loaded entry for a
/// given `(platform, scope)`, never a torn state, because replacement is a
/// single `HashMap` insert under one writer lock.
pub struct AdapterRegistry {
    pool: SqlitePool,
    bundled_dir: PathBuf,
    runtime_dir: PathBuf,
    entries: RwLock<PlatformMap>,
    fingerprints: RwLock<HashMap<String, String>>,
}

impl AdapterRegistry {
    /// Construct an empty registry. Call [`Self::restore_from_db`] and/or
    /// [`bundled::seed_bundled_adapters`] to populate it before serving
    /// traffic.
    #[must_use]
    pub fn new(pool: SqlitePool, bundled_dir: PathBuf, runtime_dir: PathBuf) -> Self {
        Self {
            pool,
            bundled_dir,
            runtime_dir,
            entries: RwLock::new(HashMap::new()),
            fingerprints: RwLock::new(HashMap::new()),
        }
    }

    /// The database pool backing this registry.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The read-only directory bundled adapter descriptors are seeded from.
    #[must_use]
    pub fn bundled_dir(&self) -> &Path {
        &self.bundled_dir
    }

    /// The writable directory every runtime mutation targets.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Resolve `target` against [`Self::runtime_dir`], rejecting any path
    /// that would escape it. This is the one gate every write path in the
    /// registry passes through, so DB restore or a compromised filename
    /// can never clobber files outside the runtime base.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Validation`] if `target` escapes the runtime
    /// directory.
    pub fn runtime_path(&self, relative: &str) -> Result<PathBuf, AgpError> {
        let candidate = self.runtime_dir.join(relative);
        let normalized = normalize_lexically(&candidate);
        let base = normalize_lexically(&self.runtime_dir);
        if !normalized.starts_with(&base) {
            return Err(AgpError::new(
                ErrorCode::Validation,
                "adapter path escapes the runtime directory",
            )
            .with_context("path", relative));
        }
        Ok(candidate)
    }

    /// Hot-load the descriptor at `source_path` into `scope`, replacing any
    /// existing entry for `(platform, scope)`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] if the file cannot be read, or
    /// [`ErrorCode::Validation`] if the descriptor does not parse.
    pub fn hot_load(&self, platform: &str, scope: Scope, source_path: &Path) -> Result<(), AgpError> {
        let raw = std::fs::read_to_string(source_path).map_err(|e| {
            AgpError::new(ErrorCode::Internal, "failed to read adapter descriptor").with_source(e)
        })?;
        let runner = DescriptorRunner::from_json(&raw)?;
        let entry = AdapterEntry {
            adapter: Arc::new(runner),
            scope: scope.clone(),
            source_path: source_path.to_path_buf(),
        };

        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries
            .entry(platform.to_string())
            .or_default()
            .insert(scope.key(), entry);
        Ok(())
    }

    /// Remove the entry registered for `(platform, scope)`, if any.
    pub fn unregister(&self, platform: &str, scope: &Scope) {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if let Some(bucket) = entries.get_mut(platform) {
            bucket.remove(&scope.key());
        }
    }

    /// Resolve an adapter for `platform`, preferring `owner_id`'s sandbox
    /// entry over the public one.
    #[must_use]
    pub fn resolve(&self, platform: &str, owner_id: Option<&str>) -> Option<AdapterEntry> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let bucket = entries.get(platform)?;
        if let Some(owner) = owner_id {
            if let Some(entry) = bucket.get(owner) {
                return Some(entry.clone());
            }
        }
        bucket.get(PUBLIC_SCOPE).cloned()
    }

    /// List every public adapter whose manifest declares OAuth
    /// (`auth.strategy` implies an `oauth` block).
    #[must_use]
    pub fn list_oauth_adapters(&self) -> Vec<AdapterEntry> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .values()
            .filter_map(|bucket| bucket.get(PUBLIC_SCOPE))
            .filter(|entry| entry.adapter.manifest().auth.oauth.is_some())
            .cloned()
            .collect()
    }

    /// Find the public adapter whose platform or configured
    /// `oauth_service` equals `service_or_platform`.
    #[must_use]
    pub fn get_oauth_adapter(&self, service_or_platform: &str) -> Option<AdapterEntry> {
        self.list_oauth_adapters().into_iter().find(|entry| {
            entry.adapter.platform() == service_or_platform
                || entry
                    .adapter
                    .manifest()
                    .auth
                    .oauth
                    .as_ref()
                    .is_some_and(|o| o.oauth_service == service_or_platform)
        })
    }

    /// List every entry currently registered, for diagnostics and the
    /// dynamic-directory fallback scan.
    #[must_use]
    pub fn all_entries(&self) -> Vec<(String, AdapterEntry)> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .iter()
            .flat_map(|(platform, bucket)| {
                bucket
                    .values()
                    .map(move |entry| (platform.clone(), entry.clone()))
            })
            .collect()
    }

    /// Fingerprint (`sha256(source) || ":" || status`) recorded for adapter
    /// row `id`, if tracked.
    #[must_use]
    pub fn fingerprint(&self, id: &str) -> Option<String> {
        self.fingerprints
            .read()
            .expect("fingerprint lock poisoned")
            .get(id)
            .cloned()
    }

    /// Record `fingerprint` for adapter row `id`.
    pub fn set_fingerprint(&self, id: &str, fingerprint: String) {
        self.fingerprints
            .write()
            .expect("fingerprint lock poisoned")
            .insert(id.to_string(), fingerprint);
    }

    /// Drop the tracked fingerprint for `id` (row no longer present).
    pub fn clear_fingerprint(&self, id: &str) {
        self.fingerprints
            .write()
            .expect("fingerprint lock poisoned")
            .remove(id);
    }

    /// Fingerprint combining source hash and status
    /// restore bookkeeping.
    #[must_use]
    pub fn compute_fingerprint(source: &str, status: AdapterStatus) -> String {
        use sha2::{Digest, Sha256};
        let hash = hex::encode(Sha256::digest(source.as_bytes()));
        format!("{hash}:{}", status_str(status))
    }

    /// Restore every adapter row's `source_code` to its `file_path` (after
    /// the runtime containment check), recording the resulting
    /// `(id -> fingerprint)` map. Does not hot-load — callers that also
    /// want the entries live should follow up with [`Self::hot_load`] per
    /// restored row, or call [`Self::sync_from_db`] which does both.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database or filesystem failure.
    pub async fn restore_from_db(&self) -> Result<Vec<AdapterRecord>, AgpError> {
        let records = load_all_records(&self.pool).await?;
        for record in &records {
            let Some(source) = &record.source_code else {
                continue;
            };
            let relative = relative_to_runtime(&record.file_path, &self.runtime_dir);
            let path = self.runtime_path(&relative)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AgpError::new(ErrorCode::Internal, "failed to create adapter directory").with_source(e)
                })?;
            }
            std::fs::write(&path, source).map_err(|e| {
                AgpError::new(ErrorCode::Internal, "failed to restore adapter source").with_source(e)
            })?;
            self.set_fingerprint(&record.id, Self::compute_fingerprint(source, record.status));
        }
        Ok(records)
    }

    /// Periodic DB sync: re-read every adapter row, restore and hot-load
    /// any whose fingerprint changed (or that are new), and drop tracked
    /// fingerprints for rows no longer present.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database or filesystem failure.
    pub async fn sync_from_db(&self) -> Result<(), AgpError> {
        let records = load_all_records(&self.pool).await?;
        let seen: std::collections::HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        for record in &records {
            let Some(source) = &record.source_code else {
                continue;
            };
            let fingerprint = Self::compute_fingerprint(source, record.status);
            if self.fingerprint(&record.id).as_deref() == Some(fingerprint.as_str()) {
                continue;
            }

            let relative = relative_to_runtime(&record.file_path, &self.runtime_dir);
            let path = self.runtime_path(&relative)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AgpError::new(ErrorCode::Internal, "failed to create adapter directory").with_source(e)
                })?;
            }
            std::fs::write(&path, source).map_err(|e| {
                AgpError::new(ErrorCode::Internal, "failed to restore adapter source").with_source(e)
            })?;

            if record.status == AdapterStatus::Public {
                self.hot_load(&record.platform, Scope::Public, &path)?;
            } else if record.status == AdapterStatus::Sandbox {
                self.hot_load(&record.platform, Scope::Sandbox(record.owner_id.clone()), &path)?;
            } else {
                // Reviewed, rejected, or archived: not directly servable,
                // make sure neither bucket still carries a stale entry.
                self.unregister(&record.platform, &Scope::Public);
                self.unregister(&record.platform, &Scope::Sandbox(record.owner_id.clone()));
            }

            self.set_fingerprint(&record.id, fingerprint);
        }

        let stale: Vec<String> = {
            let fingerprints = self.fingerprints.read().expect("fingerprint lock poisoned");
            fingerprints.keys().filter(|id| !seen.contains(*id)).cloned().collect()
        };
        for id in stale {
            self.clear_fingerprint(&id);
        }

        Ok(())
    }

    /// Dynamic-directory fallback: after DB-driven loads, hot-load any
    /// `.json` descriptor in the runtime directory that is not already
    /// registered, as a public adapter. This covers files dropped directly
    /// on disk outside the normal submit/promote flow.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] if the runtime directory cannot be
    /// scanned.
    pub fn load_untracked_runtime_files(&self) -> Result<(), AgpError> {
        let loaded_paths: std::collections::HashSet<PathBuf> = self
            .all_entries()
            .into_iter()
            .map(|(_, entry)| entry.source_path)
            .collect();

        let read_dir = match std::fs::read_dir(&self.runtime_dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(AgpError::new(ErrorCode::Internal, "failed to scan runtime directory").with_source(e))
            }
        };

        for entry in read_dir {
            let entry = entry.map_err(|e| {
                AgpError::new(ErrorCode::Internal, "failed to read runtime directory entry").with_source(e)
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if loaded_paths.contains(&path) {
                continue;
            }
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(runner) = DescriptorRunner::from_json(&raw) else {
                continue;
            };
            let platform = runner.platform().to_string();
            self.hot_load(&platform, Scope::Public, &path)?;
        }
        Ok(())
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn relative_to_runtime(file_path: &str, runtime_dir: &Path) -> String {
    let path = Path::new(file_path);
    match path.strip_prefix(runtime_dir) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string()),
    }
}

pub(crate) fn status_str(status: AdapterStatus) -> &'static str {
    match status {
        AdapterStatus::Sandbox => "sandbox",
        AdapterStatus::Review => "review",
        AdapterStatus::Public => "public",
        AdapterStatus::Rejected => "rejected",
        AdapterStatus::Archived => "archived",
    }
}

fn parse_status(raw: &str) -> AdapterStatus {
    match raw {
        "review" => AdapterStatus::Review,
        "public" => AdapterStatus::Public,
        "rejected" => AdapterStatus::Rejected,
        "archived" => AdapterStatus::Archived,
        _ => AdapterStatus::Sandbox,
    }
}

pub(crate) async fn load_record(
    pool: &SqlitePool,
    platform: &str,
    owner_id: &str,
) -> Result<Option<AdapterRecord>, AgpError> {
    let row = sqlx::query(
        "SELECT id, platform, owner_id, status, file_path, source_code, source_hash, version,
                submitted_at, reviewed_at, archived_at, review_message, review_feedback,
                promoted_by, created_at, updated_at
         FROM adapters WHERE platform = ?1 AND owner_id = ?2",
    )
    .bind(platform)
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load adapter record").with_source(e))?;

    row.map(row_to_record).transpose()
}

pub(crate) async fn load_public_record(pool: &SqlitePool, platform: &str) -> Result<Option<AdapterRecord>, AgpError> {
    let row = sqlx::query(
        "SELECT id, platform, owner_id, status, file_path, source_code, source_hash, version,
                submitted_at, reviewed_at, archived_at, review_message, review_feedback,
                promoted_by, created_at, updated_at
         FROM adapters WHERE platform = ?1 AND status = 'public'",
    )
    .bind(platform)
    .fetch_optional(pool)
    .await
    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load public adapter record").with_source(e))?;

    row.map(row_to_record).transpose()
}

async fn load_all_records(pool: &SqlitePool) -> Result<Vec<AdapterRecord>, AgpError> {
    let rows = sqlx::query(
        "SELECT id, platform, owner_id, status, file_path, source_code, source_hash, version,
                submitted_at, reviewed_at, archived_at, review_message, review_feedback,
                promoted_by, created_at, updated_at
         FROM adapters",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load adapter records").with_source(e))?;

    rows.into_iter().map(row_to_record).collect()
}

pub(crate) fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<AdapterRecord, AgpError> {
    let parse_ts = |raw: Option<String>| -> Option<chrono::DateTime<chrono::Utc>> {
        raw.as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    };
    let status_raw: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    Ok(AdapterRecord {
        id: row.get("id"),
        platform: row.get("platform"),
        owner_id: row.get("owner_id"),
        status: parse_status(&status_raw),
        file_path: row.get("file_path"),
        source_code: row.get("source_code"),
        source_hash: row.get("source_hash"),
        version: row.get("version"),
        submitted_at: parse_ts(row.get("submitted_at")),
        reviewed_at: parse_ts(row.get("reviewed_at")),
        archived_at: parse_ts(row.get("archived_at")),
        review_message: row.get("review_message"),
        review_feedback: row.get("review_feedback"),
        promoted_by: row.get("promoted_by"),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> AdapterRegistry {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .expect("lazy pool");
        AdapterRegistry::new(pool, PathBuf::from("/bundled"), PathBuf::from("/runtime"))
    }

    #[test]
    fn runtime_path_rejects_traversal() {
        let registry = test_registry();
        let err = registry.runtime_path("../../etc/passwd").unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn runtime_path_accepts_plain_relative_names() {
        let registry = test_registry();
        let path = registry.runtime_path("stripe-sandbox.json").unwrap();
        assert_eq!(path, PathBuf::from("/runtime/stripe-sandbox.json"));
    }

    #[test]
    fn scope_key_matches_public_constant() {
        assert_eq!(Scope::Public.key(), PUBLIC_SCOPE);
        assert_eq!(Scope::Sandbox("alice".into()).key(), "alice");
    }

    #[test]
    fn fingerprint_changes_with_status() {
        let a = AdapterRegistry::compute_fingerprint("{}", AdapterStatus::Sandbox);
        let b = AdapterRegistry::compute_fingerprint("{}", AdapterStatus::Public);
        assert_ne!(a, b);
    }
}
