//! Pre-flight budget enforcement against per-connection rolling windows.

use time::{Duration as TimeDuration, OffsetDateTime};

use aihub_common::BudgetWindow;
use aihub_storage::{ConnectionRecord, Storage};

use crate::error::HubError;

/// Check every non-zero window of the primary connection. No locks are held
/// between this check and post-flight attribution; overshoot bounded by
/// concurrency is accepted.
pub async fn preflight(
    storage: &dyn Storage,
    connection: &ConnectionRecord,
    now: OffsetDateTime,
) -> Result<(), HubError> {
    if connection.override_active(now) {
        tracing::debug!(
            event = "budget_override_active",
            connection_id = connection.id,
            until = ?connection.budget_override_until,
        );
        return Ok(());
    }

    for window in BudgetWindow::ALL {
        let limit = connection.limit_for(window);
        if limit <= 0.0 {
            continue;
        }
        let spent = storage
            .aggregate_spend(connection.service.as_str(), window)
            .await?;
        if spent >= limit {
            tracing::warn!(
                event = "budget_blocked",
                connection_id = connection.id,
                window = window.as_str(),
                limit_usd = limit,
                spent_usd = spent,
            );
            return Err(HubError::BudgetExceeded {
                connection_id: connection.id,
                window,
                limit_usd: limit,
                spent_usd: spent,
            });
        }
    }
    Ok(())
}

/// Set `budget_override_until = now + duration`. Overrides are never
/// reversed; they expire on their own.
pub fn override_until(now: OffsetDateTime, duration: std::time::Duration) -> OffsetDateTime {
    now + TimeDuration::seconds(duration.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_expiry_behaves_like_never_set() {
        let now = OffsetDateTime::now_utc();
        let mut connection = sample_connection();

        // Active override.
        connection.budget_override_until =
            Some(override_until(now, std::time::Duration::from_secs(3600)));
        assert!(connection.override_active(now));

        // Expired override.
        connection.budget_override_until = Some(now - TimeDuration::minutes(1));
        assert!(!connection.override_active(now));

        // Never set.
        connection.budget_override_until = None;
        assert!(!connection.override_active(now));
    }

    fn sample_connection() -> ConnectionRecord {
        let now = OffsetDateTime::now_utc();
        ConnectionRecord {
            id: 1,
            name: "openai".to_string(),
            service: aihub_common::ServiceKind::OpenAi,
            category: None,
            base_url: None,
            api_key_enc: None,
            token_enc: None,
            credential_file_enc: None,
            default_model: None,
            enabled: true,
            is_default: false,
            daily_limit_usd: 1.0,
            weekly_limit_usd: 0.0,
            monthly_limit_usd: 0.0,
            budget_override_until: None,
            created_at: now,
            updated_at: now,
        }
    }
}
