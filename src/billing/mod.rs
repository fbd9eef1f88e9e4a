//! Subscription state: types and the monotonic per-subscription state
//! machine the payment-gateway reconciler drives.

pub mod purchase;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tokens::Plan;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStatus {
    Pending,
    Active,
    PendingCancellation,
    Cancelled,
    Expired,
    PastDue,
}

impl SubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubStatus::Pending => "pending",
            SubStatus::Active => "active",
            SubStatus::PendingCancellation => "pending_cancellation",
            SubStatus::Cancelled => "cancelled",
            SubStatus::Expired => "expired",
            SubStatus::PastDue => "past_due",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SubStatus::Pending),
            "active" => Ok(SubStatus::Active),
            "pending_cancellation" => Ok(SubStatus::PendingCancellation),
            "cancelled" => Ok(SubStatus::Cancelled),
            "expired" => Ok(SubStatus::Expired),
            "past_due" => Ok(SubStatus::PastDue),
            other => Err(Error::Internal(format!("unknown subscription status {other:?}"))),
        }
    }

    /// Whether this status grants the subscription's plan for metering.
    pub fn grants_plan(&self) -> bool {
        matches!(self, SubStatus::Active | SubStatus::PendingCancellation)
    }

    /// Terminal statuses accept no further lifecycle events except their own
    /// replays.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubStatus::Cancelled | SubStatus::Expired)
    }
}

/// Internal subscription lifecycle events, mapped 1:1 from gateway event
/// codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubEvent {
    Created,
    Activated,
    PendingCancel,
    Cancelled,
    Expired,
    PaymentFailed,
}

impl SubEvent {
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "subscription.created" => Ok(SubEvent::Created),
            "subscription.activated" => Ok(SubEvent::Activated),
            "subscription.pending_cancel" => Ok(SubEvent::PendingCancel),
            "subscription.cancelled" => Ok(SubEvent::Cancelled),
            "subscription.expired" => Ok(SubEvent::Expired),
            "subscription.payment_failed" => Ok(SubEvent::PaymentFailed),
            other => Err(Error::Validation(format!("unknown webhook event {other:?}"))),
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            SubEvent::Created => "subscription.created",
            SubEvent::Activated => "subscription.activated",
            SubEvent::PendingCancel => "subscription.pending_cancel",
            SubEvent::Cancelled => "subscription.cancelled",
            SubEvent::Expired => "subscription.expired",
            SubEvent::PaymentFailed => "subscription.payment_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub external_ref: String,
    pub plan: Plan,
    pub status: SubStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Apply a lifecycle event to the current status (`None` = no subscription
/// row yet). `Ok(Some(next))` moves to `next`, `Ok(None)` is an accepted
/// no-op, `Err` rejects the event.
pub fn transition(current: Option<SubStatus>, event: SubEvent) -> Result<Option<SubStatus>> {
    use SubEvent as E;
    use SubStatus::*;

    let rejected = || {
        Err(Error::Validation(format!(
            "event {} is not valid for status {}",
            event.as_code(),
            current.map(|s| s.as_str()).unwrap_or("(none)"),
        )))
    };

    match (current, event) {
        (None, E::Created) => Ok(Some(Pending)),
        (None, _) => rejected(),

        (Some(Pending), E::Created) => Ok(Some(Pending)),
        (Some(Pending), E::Activated) => Ok(Some(Active)),
        (Some(Pending), E::Cancelled) => Ok(Some(Cancelled)),
        (Some(Pending), E::PaymentFailed) => Ok(Some(PastDue)),
        (Some(Pending), _) => rejected(),

        (Some(Active), E::Created) => Ok(Some(Active)),
        (Some(Active), E::Activated) => Ok(Some(Active)),
        (Some(Active), E::PendingCancel) => Ok(Some(PendingCancellation)),
        (Some(Active), E::Cancelled) => Ok(Some(Cancelled)),
        (Some(Active), E::Expired) => Ok(Some(Expired)),
        (Some(Active), E::PaymentFailed) => Ok(Some(PastDue)),

        (Some(PendingCancellation), E::Created) => Ok(None),
        (Some(PendingCancellation), E::Activated) => Ok(Some(Active)),
        (Some(PendingCancellation), E::PendingCancel) => Ok(Some(PendingCancellation)),
        (Some(PendingCancellation), E::Cancelled) => Ok(Some(Cancelled)),
        (Some(PendingCancellation), E::Expired) => Ok(Some(Expired)),
        (Some(PendingCancellation), E::PaymentFailed) => Ok(Some(PastDue)),

        (Some(PastDue), E::Created) => Ok(None),
        (Some(PastDue), E::Activated) => Ok(Some(Active)),
        (Some(PastDue), E::PendingCancel) => rejected(),
        (Some(PastDue), E::Cancelled) => Ok(Some(Cancelled)),
        (Some(PastDue), E::Expired) => Ok(Some(Expired)),
        (Some(PastDue), E::PaymentFailed) => Ok(Some(PastDue)),

        (Some(Cancelled), E::Cancelled) => Ok(None),
        (Some(Cancelled), E::Expired) => Ok(None),
        (Some(Cancelled), _) => rejected(),
        (Some(Expired), E::Cancelled) => Ok(None),
        (Some(Expired), E::Expired) => Ok(None),
        (Some(Expired), _) => rejected(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubEvent as E;
    use SubStatus::*;

    #[test]
    fn test_fresh_subscription_only_accepts_created() {
        assert_eq!(transition(None, E::Created).unwrap(), Some(Pending));
        for event in [
            E::Activated,
            E::PendingCancel,
            E::Cancelled,
            E::Expired,
            E::PaymentFailed,
        ] {
            assert!(transition(None, event).is_err());
        }
    }

    #[test]
    fn test_happy_path_lifecycle() {
        assert_eq!(transition(Some(Pending), E::Activated).unwrap(), Some(Active));
        assert_eq!(
            transition(Some(Active), E::PendingCancel).unwrap(),
            Some(PendingCancellation)
        );
        assert_eq!(
            transition(Some(PendingCancellation), E::Cancelled).unwrap(),
            Some(Cancelled)
        );
    }

    #[test]
    fn test_reactivation_from_winding_down() {
        assert_eq!(
            transition(Some(PendingCancellation), E::Activated).unwrap(),
            Some(Active)
        );
        assert_eq!(transition(Some(PastDue), E::Activated).unwrap(), Some(Active));
    }

    #[test]
    fn test_replays_are_idempotent() {
        assert_eq!(transition(Some(Active), E::Activated).unwrap(), Some(Active));
        assert_eq!(transition(Some(Pending), E::Created).unwrap(), Some(Pending));
        assert_eq!(transition(Some(Cancelled), E::Cancelled).unwrap(), None);
        assert_eq!(transition(Some(Expired), E::Expired).unwrap(), None);
    }

    #[test]
    fn test_terminal_states_reject_revival() {
        for terminal in [Cancelled, Expired] {
            for event in [E::Created, E::Activated, E::PendingCancel, E::PaymentFailed] {
                assert!(
                    transition(Some(terminal), event).is_err(),
                    "{terminal:?} must reject {event:?}"
                );
            }
        }
    }

    #[test]
    fn test_created_noop_in_intermediate_states() {
        assert_eq!(transition(Some(PendingCancellation), E::Created).unwrap(), None);
        assert_eq!(transition(Some(PastDue), E::Created).unwrap(), None);
    }

    #[test]
    fn test_past_due_rejects_pending_cancel() {
        assert!(transition(Some(PastDue), E::PendingCancel).is_err());
    }

    #[test]
    fn test_pending_rejects_expiry_and_pending_cancel() {
        assert!(transition(Some(Pending), E::Expired).is_err());
        assert!(transition(Some(Pending), E::PendingCancel).is_err());
    }
}
