// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter lifecycle transitions: submit, withdraw, reject, promote,
//! demote, archive, and restore.
//!
//! Every transition validates itself against
//! [`agp_core::AdapterStatus::can_transition_to`] before touching the
//! database or filesystem, except promote's side effect on a displaced
//! public adapter — moving it to `rejected` is an administrative
//! side-channel, not a state the owner can reach on their own.

use crate::{load_public_record, load_record, status_str, AdapterRegistry, Scope};
use agp_core::adapter_record::SYSTEM_OWNER;
use agp_core::{AdapterRecord, AdapterStatus};
use agp_error::{AgpError, ErrorCode};
use chrono::Utc;

fn illegal_transition(from: AdapterStatus, to: AdapterStatus) -> AgpError {
    AgpError::new(
        ErrorCode::Conflict,
        format!("cannot transition adapter from {} to {}", status_str(from), status_str(to)),
    )
}

async fn require_record(registry: &AdapterRegistry, platform: &str, owner_id: &str) -> Result<AdapterRecord, AgpError> {
    load_record(registry.pool(), platform, owner_id)
        .await?
        .ok_or_else(|| AgpError::new(ErrorCode::AdapterNotFound, "no adapter record for this platform/owner"))
}

async fn transition_status(
    registry: &AdapterRegistry,
    id: &str,
    to: AdapterStatus,
    extra: TransitionExtras,
) -> Result<(), AgpError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "UPDATE adapters SET status = ?1, updated_at = ?2, file_path = COALESCE(?3, file_path),
            submitted_at = COALESCE(?4, submitted_at), reviewed_at = COALESCE(?5, reviewed_at),
            archived_at = COALESCE(?6, archived_at), review_message = COALESCE(?7, review_message),
            review_feedback = COALESCE(?8, review_feedback), promoted_by = COALESCE(?9, promoted_by)
         WHERE id = ?10",
    )
    .bind(status_str(to))
    .bind(&now)
    .bind(extra.file_path)
    .bind(extra.submitted_at.then(|| now.clone()))
    .bind(extra.reviewed_at.then(|| now.clone()))
    .bind(extra.archived_at.then(|| now.clone()))
    .bind(extra.review_message)
    .bind(extra.review_feedback)
    .bind(extra.promoted_by)
    .bind(id)
    .execute(registry.pool())
    .await
    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to update adapter status").with_source(e))?;
    Ok(())
}

#[derive(Default)]
struct TransitionExtras {
    file_path: Option<String>,
    submitted_at: bool,
    reviewed_at: bool,
    archived_at: bool,
    review_message: Option<String>,
    review_feedback: Option<String>,
    promoted_by: Option<String>,
}

/// Submit a sandbox adapter for review, recording an optional message.
///
/// # Errors
///
/// Returns [`ErrorCode::AdapterNotFound`] if no sandbox record exists, or
/// [`ErrorCode::Conflict`] if it is not currently `sandbox`.
pub async fn submit(
    registry: &AdapterRegistry,
    platform: &str,
    owner_id: &str,
    message: Option<String>,
) -> Result<(), AgpError> {
    let record = require_record(registry, platform, owner_id).await?;
    if !record.status.can_transition_to(AdapterStatus::Review) {
        return Err(illegal_transition(record.status, AdapterStatus::Review));
    }
    transition_status(
        registry,
        &record.id,
        AdapterStatus::Review,
        TransitionExtras {
            submitted_at: true,
            review_message: message,
            ..Default::default()
        },
    )
    .await
}

/// Withdraw a submitted adapter back to `sandbox` (owner-initiated).
///
/// # Errors
///
/// Returns [`ErrorCode::AdapterNotFound`] or [`ErrorCode::Conflict`].
pub async fn withdraw(registry: &AdapterRegistry, platform: &str, owner_id: &str) -> Result<(), AgpError> {
    let record = require_record(registry, platform, owner_id).await?;
    if !record.status.can_transition_to(AdapterStatus::Sandbox) {
        return Err(illegal_transition(record.status, AdapterStatus::Sandbox));
    }
    transition_status(registry, &record.id, AdapterStatus::Sandbox, TransitionExtras::default()).await
}

/// Reject a submitted adapter back to `sandbox` with admin feedback.
///
/// # Errors
///
/// Returns [`ErrorCode::AdapterNotFound`] or [`ErrorCode::Conflict`].
pub async fn reject(
    registry: &AdapterRegistry,
    platform: &str,
    owner_id: &str,
    feedback: String,
) -> Result<(), AgpError> {
    let record = require_record(registry, platform, owner_id).await?;
    if !record.status.can_transition_to(AdapterStatus::Sandbox) {
        return Err(illegal_transition(record.status, AdapterStatus::Sandbox));
    }
    transition_status(
        registry,
        &record.id,
        AdapterStatus::Sandbox,
        TransitionExtras {
            reviewed_at: true,
            review_feedback: Some(feedback),
            ..Default::default()
        },
    )
    .await
}

/// Promote a `sandbox` or `review` adapter to `public`, displacing any
/// existing public adapter for the platform.
///
/// If a different owner's adapter currently holds `public`, it is moved to
/// a rejected-archive path, its status set to `rejected` directly (this is
/// a side effect of promotion, not a transition the displaced owner chose),
/// and its public scope entry removed.
///
/// # Errors
///
/// Returns [`ErrorCode::AdapterNotFound`] if no candidate record exists,
/// or [`ErrorCode::Conflict`] if the candidate cannot legally become
/// public.
pub async fn promote(
    registry: &AdapterRegistry,
    platform: &str,
    candidate_owner_id: &str,
    admin_id: &str,
) -> Result<(), AgpError> {
    let candidate = require_record(registry, platform, candidate_owner_id).await?;
    if !candidate.status.can_transition_to(AdapterStatus::Public) {
        return Err(illegal_transition(candidate.status, AdapterStatus::Public));
    }

    if let Some(incumbent) = load_public_record(registry.pool(), platform).await? {
        if incumbent.owner_id != candidate_owner_id {
            let archive_relative = format!("{platform}-rejected-{}.json", incumbent.owner_id);
            let archive_path = registry.runtime_path(&archive_relative)?;
            if let Some(source) = &incumbent.source_code {
                if let Some(parent) = archive_path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AgpError::new(ErrorCode::Internal, "failed to create archive directory").with_source(e)
                    })?;
                }
                std::fs::write(&archive_path, source).map_err(|e| {
                    AgpError::new(ErrorCode::Internal, "failed to archive displaced public adapter").with_source(e)
                })?;
            }
            let now = Utc::now().to_rfc3339();
            sqlx::query(
                "UPDATE adapters SET status = 'rejected', file_path = ?1, updated_at = ?2 WHERE id = ?3",
            )
            .bind(archive_path.to_string_lossy().as_ref())
            .bind(&now)
            .bind(&incumbent.id)
            .execute(registry.pool())
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to reject displaced public adapter").with_source(e))?;

            registry.unregister(platform, &Scope::Public);
        }
    }

    let public_relative = format!("{platform}-public.json");
    let public_path = registry.runtime_path(&public_relative)?;
    if let Some(source) = &candidate.source_code {
        if let Some(parent) = public_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to create runtime directory").with_source(e))?;
        }
        std::fs::write(&public_path, source)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to write promoted adapter").with_source(e))?;
    }

    transition_status(
        registry,
        &candidate.id,
        AdapterStatus::Public,
        TransitionExtras {
            file_path: Some(public_path.to_string_lossy().into_owned()),
            reviewed_at: true,
            promoted_by: Some(admin_id.to_string()),
            ..Default::default()
        },
    )
    .await?;

    registry.unregister(platform, &Scope::Sandbox(candidate_owner_id.to_string()));
    registry.hot_load(platform, Scope::Public, &public_path)?;
    Ok(())
}

/// Demote the current public adapter for `platform` back to its owner's
/// sandbox.
///
/// # Errors
///
/// Returns [`ErrorCode::AdapterNotFound`] if no public adapter exists for
/// `platform`, or [`ErrorCode::Conflict`] if it cannot legally demote.
pub async fn demote(registry: &AdapterRegistry, platform: &str) -> Result<(), AgpError> {
    let record = load_public_record(registry.pool(), platform)
        .await?
        .ok_or_else(|| AgpError::new(ErrorCode::AdapterNotFound, "no public adapter for this platform"))?;
    if !record.status.can_transition_to(AdapterStatus::Sandbox) {
        return Err(illegal_transition(record.status, AdapterStatus::Sandbox));
    }

    let sandbox_relative = format!("{platform}-{}.json", record.owner_id);
    let sandbox_path = registry.runtime_path(&sandbox_relative)?;
    if let Some(source) = &record.source_code {
        if let Some(parent) = sandbox_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to create runtime directory").with_source(e))?;
        }
        std::fs::write(&sandbox_path, source)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to write demoted adapter").with_source(e))?;
    }

    transition_status(
        registry,
        &record.id,
        AdapterStatus::Sandbox,
        TransitionExtras {
            file_path: Some(sandbox_path.to_string_lossy().into_owned()),
            ..Default::default()
        },
    )
    .await?;

    registry.unregister(platform, &Scope::Public);
    registry.hot_load(platform, Scope::Sandbox(record.owner_id.clone()), &sandbox_path)?;
    Ok(())
}

/// Archive an adapter (admin-initiated soft delete), from any status that
/// legally allows it.
///
/// # Errors
///
/// Returns [`ErrorCode::AdapterNotFound`] or [`ErrorCode::Conflict`].
pub async fn archive(registry: &AdapterRegistry, platform: &str, owner_id: &str) -> Result<(), AgpError> {
    let record = require_record(registry, platform, owner_id).await?;
    if !record.status.can_transition_to(AdapterStatus::Archived) {
        return Err(illegal_transition(record.status, AdapterStatus::Archived));
    }
    transition_status(
        registry,
        &record.id,
        AdapterStatus::Archived,
        TransitionExtras { archived_at: true, ..Default::default() },
    )
    .await?;

    let scope = if record.owner_id == SYSTEM_OWNER || record.status == AdapterStatus::Public {
        Scope::Public
    } else {
        Scope::Sandbox(record.owner_id.clone())
    };
    registry.unregister(platform, &scope);
    Ok(())
}

/// Hard-delete a `sandbox` adapter (non-admin delete). Removes the DB row
/// and descriptor file outright; does not go through `archived`.
///
/// # Errors
///
/// Returns [`ErrorCode::AdapterNotFound`] if none exists, or
/// [`ErrorCode::Conflict`] if the adapter is not currently `sandbox`.
pub async fn delete_sandbox(registry: &AdapterRegistry, platform: &str, owner_id: &str) -> Result<(), AgpError> {
    let record = require_record(registry, platform, owner_id).await?;
    if record.status != AdapterStatus::Sandbox {
        return Err(AgpError::new(
            ErrorCode::Conflict,
            "only a sandbox adapter can be hard-deleted by its owner",
        ));
    }

    sqlx::query("DELETE FROM adapters WHERE id = ?1")
        .bind(&record.id)
        .execute(registry.pool())
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to delete adapter record").with_source(e))?;
    let _ = std::fs::remove_file(&record.file_path);
    registry.unregister(platform, &Scope::Sandbox(owner_id.to_string()));
    registry.clear_fingerprint(&record.id);
    Ok(())
}

/// Restore an `archived` adapter back to `sandbox`. Requires the row's
/// `source_code` to have been preserved at archive time.
///
/// # Errors
///
/// Returns [`ErrorCode::AdapterNotFound`], [`ErrorCode::Conflict`] if not
/// archived or not transitionable, or [`ErrorCode::Validation`] if
/// `source_code` was not preserved (this is a caller-visible 400, not a
/// server fault — the adapter simply cannot be restored).
pub async fn restore(registry: &AdapterRegistry, platform: &str, owner_id: &str) -> Result<(), AgpError> {
    let record = require_record(registry, platform, owner_id).await?;
    if !record.status.can_transition_to(AdapterStatus::Sandbox) {
        return Err(illegal_transition(record.status, AdapterStatus::Sandbox));
    }
    let source = record.source_code.as_ref().ok_or_else(|| {
        AgpError::new(ErrorCode::Validation, "archived adapter has no preserved source to restore")
    })?;

    let sandbox_relative = format!("{platform}-{owner_id}.json");
    let sandbox_path = registry.runtime_path(&sandbox_relative)?;
    if let Some(parent) = sandbox_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to create runtime directory").with_source(e))?;
    }
    std::fs::write(&sandbox_path, source)
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to restore archived adapter").with_source(e))?;

    transition_status(
        registry,
        &record.id,
        AdapterStatus::Sandbox,
        TransitionExtras {
            file_path: Some(sandbox_path.to_string_lossy().into_owned()),
            ..Default::default()
        },
    )
    .await?;

    registry.hot_load(platform, Scope::Sandbox(owner_id.to_string()), &sandbox_path)?;
    Ok(())
}
