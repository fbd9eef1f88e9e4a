//! Token economy: per-principal daily allocations plus a never-expiring
//! purchased balance.
//!
//! One ledger row per principal (`user_ref`), current plan tracked on the
//! row. The daily balance covers as much of a charge as it can and the
//! purchased balance covers the deficit; within the transaction the
//! purchased column is written first. `consumed_today` reflects only the
//! daily portion. Premium is unmetered: consume and refund never touch its
//! counters.

pub mod resolver;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::config::PlanLimits;
use crate::error::{Error, Result};

/// Maximum tokens in a single purchase.
pub const MAX_PURCHASE_AMOUNT: i64 = 10_000;

/// Metering tier. Priority: Premium > Plus > Standard > Free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Standard,
    Plus,
    Premium,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Standard => "standard",
            Plan::Plus => "plus",
            Plan::Premium => "premium",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(Plan::Free),
            "standard" => Ok(Plan::Standard),
            "plus" => Ok(Plan::Plus),
            "premium" => Ok(Plan::Premium),
            other => Err(Error::Validation(format!("unknown plan {other:?}"))),
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            Plan::Free => 0,
            Plan::Standard => 1,
            Plan::Plus => 2,
            Plan::Premium => 3,
        }
    }

    pub fn daily_limit(&self, limits: &PlanLimits) -> i64 {
        match self {
            Plan::Free => limits.free,
            Plan::Standard => limits.standard,
            Plan::Plus => limits.plus,
            Plan::Premium => limits.premium,
        }
    }

    /// Premium consumption never alters counters.
    pub fn is_unmetered(&self) -> bool {
        matches!(self, Plan::Premium)
    }
}

/// Ledger snapshot for a principal.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub user_ref: String,
    pub plan: Plan,
    pub daily_available: i64,
    pub purchased_available: i64,
    pub daily_limit: i64,
    pub consumed_today: i64,
    pub last_reset: DateTime<Utc>,
}

/// What a successful consume did, split by balance.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeReceipt {
    pub consumed: i64,
    pub daily_part: i64,
    pub purchased_part: i64,
    pub remaining_daily: i64,
    pub remaining_purchased: i64,
    pub daily_limit: i64,
}

/// Next UTC midnight, when daily balances refill.
pub fn next_reset_at(now: DateTime<Utc>) -> DateTime<Utc> {
    (now.date_naive() + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc()
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    user_ref: String,
    plan: String,
    daily_available: i64,
    purchased_available: i64,
    daily_limit: i64,
    consumed_today: i64,
    last_reset: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        Ok(Account {
            user_ref: self.user_ref,
            plan: Plan::from_str(&self.plan)?,
            daily_available: self.daily_available,
            purchased_available: self.purchased_available,
            daily_limit: self.daily_limit,
            consumed_today: self.consumed_today,
            last_reset: self.last_reset,
        })
    }
}

/// The token ledger. All operations are atomic at the row level: each runs
/// in its own transaction, and SQLite's single-writer model serializes
/// writers on the row.
#[derive(Clone)]
pub struct TokenLedger {
    pool: SqlitePool,
    limits: PlanLimits,
}

impl TokenLedger {
    pub fn new(pool: SqlitePool, limits: PlanLimits) -> Self {
        Self { pool, limits }
    }

    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    /// Load the account, creating it on first use, applying the daily reset
    /// and plan sync as a property of the read.
    pub async fn get_or_create(&self, user_ref: &str, plan: Plan) -> Result<Account> {
        let mut tx = self.pool.begin().await?;
        let account = self.load_or_init(&mut tx, user_ref, plan).await?;
        Self::persist(&mut tx, &account).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Atomically deduct `cost` tokens. The daily balance covers
    /// `min(daily_available, cost)`; the purchased balance covers the rest
    /// or the whole consume fails.
    pub async fn consume(&self, user_ref: &str, plan: Plan, cost: i64) -> Result<ConsumeReceipt> {
        if cost <= 0 {
            return Err(Error::Validation("consume amount must be positive".into()));
        }

        let mut tx = self.pool.begin().await?;
        let mut account = self.load_or_init(&mut tx, user_ref, plan).await?;

        if account.plan.is_unmetered() {
            Self::persist(&mut tx, &account).await?;
            tx.commit().await?;
            return Ok(ConsumeReceipt {
                consumed: cost,
                daily_part: 0,
                purchased_part: 0,
                remaining_daily: account.daily_available,
                remaining_purchased: account.purchased_available,
                daily_limit: account.daily_limit,
            });
        }

        let daily_part = cost.min(account.daily_available);
        let purchased_part = cost - daily_part;

        if purchased_part > account.purchased_available {
            let available = account.daily_available + account.purchased_available;
            // The reset the read observed still persists
            Self::persist(&mut tx, &account).await?;
            tx.commit().await?;
            return Err(Error::InsufficientTokens {
                available,
                required: cost,
                reset_at: next_reset_at(Utc::now()),
            });
        }

        // Purchased first, then daily
        account.purchased_available -= purchased_part;
        account.daily_available -= daily_part;
        account.consumed_today += daily_part;

        Self::persist(&mut tx, &account).await?;
        tx.commit().await?;

        tracing::debug!(
            user_ref,
            cost,
            daily_part,
            purchased_part,
            remaining_daily = account.daily_available,
            "tokens consumed"
        );

        Ok(ConsumeReceipt {
            consumed: cost,
            daily_part,
            purchased_part,
            remaining_daily: account.daily_available,
            remaining_purchased: account.purchased_available,
            daily_limit: account.daily_limit,
        })
    }

    /// Inverse of consume: restore up to `amount` to the daily balance
    /// (bounded by what was consumed today and by the daily cap), the rest
    /// to the purchased balance.
    pub async fn refund(&self, user_ref: &str, plan: Plan, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(Error::Validation("refund amount must be positive".into()));
        }
        let mut tx = self.pool.begin().await?;
        let account = self.load_or_init(&mut tx, user_ref, plan).await?;
        let daily_part = amount
            .min(account.consumed_today)
            .min(account.daily_limit - account.daily_available);
        let purchased_part = amount - daily_part;
        Self::apply_refund(&mut tx, account, daily_part, purchased_part).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Refund an exact consume split recorded at reservation time. A daily
    /// portion that no longer fits (the day rolled over and the balance
    /// refilled) is dropped rather than converted into purchased tokens.
    pub async fn refund_split(
        &self,
        user_ref: &str,
        plan: Plan,
        daily_part: i64,
        purchased_part: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let account = self.load_or_init(&mut tx, user_ref, plan).await?;
        let daily_part = daily_part.min(account.daily_limit - account.daily_available);
        Self::apply_refund(&mut tx, account, daily_part, purchased_part).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_refund(
        tx: &mut Transaction<'_, Sqlite>,
        mut account: Account,
        daily_part: i64,
        purchased_part: i64,
    ) -> Result<()> {
        if account.plan.is_unmetered() {
            Self::persist(tx, &account).await?;
            return Ok(());
        }
        account.daily_available += daily_part;
        account.consumed_today = (account.consumed_today - daily_part).max(0);
        account.purchased_available += purchased_part;
        Self::persist(tx, &account).await?;
        Ok(())
    }

    /// Credit purchased tokens. Purchased balances never reset.
    pub async fn add_purchased(&self, user_ref: &str, plan: Plan, amount: i64) -> Result<Account> {
        if amount <= 0 || amount > MAX_PURCHASE_AMOUNT {
            return Err(Error::Validation(format!(
                "purchase amount must be between 1 and {MAX_PURCHASE_AMOUNT}"
            )));
        }
        let mut tx = self.pool.begin().await?;
        let mut account = self.load_or_init(&mut tx, user_ref, plan).await?;
        account.purchased_available += amount;
        Self::persist(&mut tx, &account).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Align the tracked plan with a subscription transition: refill the
    /// daily balance to the new plan's limit. A no-op when nothing changes,
    /// so replayed webhooks leave the ledger untouched.
    pub async fn sync_plan(&self, user_ref: &str, plan: Plan) -> Result<Account> {
        let mut tx = self.pool.begin().await?;
        let mut account = self.load_or_init_untouched(&mut tx, user_ref, plan).await?;
        let limit = plan.daily_limit(&self.limits);

        if account.plan != plan || account.daily_limit != limit {
            account.plan = plan;
            account.daily_limit = limit;
            account.daily_available = limit;
            account.consumed_today = 0;
            account.last_reset = Utc::now();
            Self::persist(&mut tx, &account).await?;
            tracing::info!(user_ref, plan = plan.as_str(), "ledger plan synced");
        }

        tx.commit().await?;
        Ok(account)
    }

    /// Read the row without creating or resetting; used by the plan resolver.
    pub async fn peek(&self, user_ref: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT user_ref, plan, daily_available, purchased_available,
                   daily_limit, consumed_today, last_reset
            FROM token_accounts WHERE user_ref = $1
            "#,
        )
        .bind(user_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountRow::into_account).transpose()
    }

    /// Load within a transaction, creating a fresh account when absent and
    /// applying the daily reset and plan sync before the caller's effect.
    async fn load_or_init(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_ref: &str,
        plan: Plan,
    ) -> Result<Account> {
        let mut account = self.load_or_init_untouched(tx, user_ref, plan).await?;
        let now = Utc::now();

        // Plan drift: the resolver's effective plan is authoritative
        let limit = plan.daily_limit(&self.limits);
        if account.plan != plan {
            account.plan = plan;
            account.daily_limit = limit;
            account.daily_available = limit;
            account.consumed_today = 0;
            account.last_reset = now;
        }

        // Daily reset: a stale read refills before the operation's own effect
        if account.last_reset.date_naive() < now.date_naive() {
            account.daily_available = account.daily_limit;
            account.consumed_today = 0;
            account.last_reset = now;
        }

        Ok(account)
    }

    async fn load_or_init_untouched(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_ref: &str,
        plan: Plan,
    ) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT user_ref, plan, daily_available, purchased_available,
                   daily_limit, consumed_today, last_reset
            FROM token_accounts WHERE user_ref = $1
            "#,
        )
        .bind(user_ref)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = row {
            return row.into_account();
        }

        let now = Utc::now();
        let limit = plan.daily_limit(&self.limits);
        let account = Account {
            user_ref: user_ref.to_string(),
            plan,
            daily_available: limit,
            purchased_available: 0,
            daily_limit: limit,
            consumed_today: 0,
            last_reset: now,
        };
        let inserted = sqlx::query(
            r#"
            INSERT INTO token_accounts
                (user_ref, plan, daily_available, purchased_available, daily_limit,
                 consumed_today, last_reset, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (user_ref) DO NOTHING
            "#,
        )
        .bind(&account.user_ref)
        .bind(account.plan.as_str())
        .bind(account.daily_available)
        .bind(account.purchased_available)
        .bind(account.daily_limit)
        .bind(account.consumed_today)
        .bind(account.last_reset)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost a first-use race; read the winner's row
            let row = sqlx::query_as::<_, AccountRow>(
                r#"
                SELECT user_ref, plan, daily_available, purchased_available,
                       daily_limit, consumed_today, last_reset
                FROM token_accounts WHERE user_ref = $1
                "#,
            )
            .bind(user_ref)
            .fetch_one(&mut **tx)
            .await?;
            return row.into_account();
        }

        Ok(account)
    }

    async fn persist(tx: &mut Transaction<'_, Sqlite>, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE token_accounts SET
                plan = $1,
                daily_available = $2,
                purchased_available = $3,
                daily_limit = $4,
                consumed_today = $5,
                last_reset = $6,
                updated_at = $7
            WHERE user_ref = $8
            "#,
        )
        .bind(account.plan.as_str())
        .bind(account.daily_available)
        .bind(account.purchased_available)
        .bind(account.daily_limit)
        .bind(account.consumed_today)
        .bind(account.last_reset)
        .bind(Utc::now())
        .bind(&account.user_ref)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
