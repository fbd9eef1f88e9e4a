//! Plan resolution
//!
//! The single authority for a principal's effective plan: the
//! highest-priority of the active subscription's plan, the ledger row's
//! tracked plan, and Free. Every metering decision consults this and
//! nothing else.

use serde::Serialize;
use sqlx::SqlitePool;

use super::{Plan, TokenLedger};
use crate::error::Result;
use crate::sessions::Principal;

/// Where the winning plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Subscription,
    Ledger,
    Default,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EffectivePlan {
    pub plan: Plan,
    pub source: PlanSource,
}

/// Resolve a principal's effective plan. Anonymous principals are always
/// Free.
pub async fn effective_plan(
    pool: &SqlitePool,
    ledger: &TokenLedger,
    principal: &Principal,
) -> Result<EffectivePlan> {
    let user_id = match principal {
        Principal::Anonymous(_) => {
            return Ok(EffectivePlan {
                plan: Plan::Free,
                source: PlanSource::Default,
            })
        }
        Principal::User(id) => *id,
    };

    let sub_plan = sqlx::query_scalar::<_, String>(
        r#"
        SELECT plan FROM subscriptions
        WHERE user_id = $1 AND status IN ('active', 'pending_cancellation')
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .map(|s| Plan::from_str(&s))
    .transpose()?;

    let ledger_plan = ledger.peek(&principal.user_ref()).await?.map(|a| a.plan);

    let mut winner = EffectivePlan {
        plan: Plan::Free,
        source: PlanSource::Default,
    };
    if let Some(plan) = ledger_plan {
        if plan.priority() > winner.plan.priority() {
            winner = EffectivePlan {
                plan,
                source: PlanSource::Ledger,
            };
        }
    }
    // Ties go to the subscription: it is the externally-billed authority
    if let Some(plan) = sub_plan {
        if plan.priority() >= winner.plan.priority() {
            winner = EffectivePlan {
                plan,
                source: PlanSource::Subscription,
            };
        }
    }

    Ok(winner)
}
