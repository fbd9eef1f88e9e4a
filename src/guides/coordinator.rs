//! Generation coordinator
//!
//! Drives lookup → rate-limit → reserve → lock → generate → persist with
//! at-most-once generation per fingerprint and a compensating refund on
//! every failure after the reserve. The post-reserve critical section runs
//! in a spawned task so a client disconnect cannot abandon a pending refund;
//! refunds are idempotent, keyed by the generation-attempt row.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::llm::LlmGateway;
use crate::sessions::Principal;
use crate::tokens::resolver::{effective_plan, EffectivePlan};
use crate::tokens::{ConsumeReceipt, Plan, TokenLedger};

use super::locks::KeyedLocks;
use super::ownership;
use super::rate_limit;
use super::store;
use super::{Artifact, InputKind, Language};

/// Total wall-clock budget for one generation, LLM retries included.
pub const GENERATION_BUDGET_SECS: u64 = 60;

/// Longest accepted raw input.
pub const MAX_INPUT_CHARS: usize = 500;

/// Token movement reported alongside a generation response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenSummary {
    pub consumed: i64,
    pub remaining_daily: i64,
    pub remaining_purchased: i64,
    pub daily_limit: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerateOutcome {
    pub artifact: Artifact,
    pub from_cache: bool,
    pub tokens: TokenSummary,
    #[serde(skip)]
    pub plan: EffectivePlan,
}

/// The generation coordinator and its collaborators.
#[derive(Clone)]
pub struct Generator {
    pool: SqlitePool,
    config: Arc<Config>,
    gateway: LlmGateway,
    ledger: TokenLedger,
    locks: KeyedLocks,
}

impl Generator {
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        gateway: LlmGateway,
        ledger: TokenLedger,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            pool,
            config,
            gateway,
            ledger,
            locks,
        }
    }

    /// Return the cached artifact for this input or generate it exactly once.
    /// Cache hits are free and unlimited; misses pay the language cost and
    /// count against the generation window.
    pub async fn get_or_create(
        &self,
        principal: Principal,
        input_kind: InputKind,
        raw_input: String,
        language: Language,
    ) -> Result<GenerateOutcome> {
        let trimmed = raw_input.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("input_value must not be empty".into()));
        }
        if trimmed.chars().count() > MAX_INPUT_CHARS {
            return Err(Error::Validation(format!(
                "input_value exceeds {MAX_INPUT_CHARS} characters"
            )));
        }

        let fp = fingerprint(input_kind.as_str(), trimmed, language.as_str());
        let resolved = effective_plan(&self.pool, &self.ledger, &principal).await?;

        // Fast path: cache hit consumes nothing and touches no ledger row
        if let Some(artifact) = store::find(&self.pool, &fp, language).await? {
            ownership::attach(&self.pool, &principal, artifact.id).await?;
            let tokens = self.read_only_summary(&principal, resolved.plan).await?;
            tracing::debug!(fingerprint = %fp, "cache hit");
            return Ok(GenerateOutcome {
                artifact,
                from_cache: true,
                tokens,
                plan: resolved,
            });
        }

        // Miss path: window check, then reserve tokens
        rate_limit::check_generation(&self.pool, &principal, resolved.plan).await?;
        let cost = language.cost(&self.config.costs);
        let receipt = self
            .ledger
            .consume(&principal.user_ref(), resolved.plan, cost)
            .await?;
        let attempt_id = self
            .record_attempt(&principal, &fp, language, cost, &receipt)
            .await?;

        // The critical section survives client disconnects: the request
        // future may be dropped, the spawned task keeps running until it has
        // either committed or refunded the reserve.
        let task = {
            let generator = self.clone();
            let raw_input = trimmed.to_string();
            tokio::spawn(async move {
                generator
                    .generate_under_lock(
                        principal,
                        input_kind,
                        raw_input,
                        language,
                        fp,
                        attempt_id,
                        resolved.plan,
                    )
                    .await
            })
        };

        let (artifact, from_cache) = match task.await {
            Ok(result) => result?,
            Err(join_error) => {
                // The task itself died; its refund may not have run
                self.refund_attempt(attempt_id, &principal, resolved.plan).await?;
                return Err(Error::Internal(format!("generation task failed: {join_error}")));
            }
        };

        let tokens = if from_cache {
            // Lost the race and was refunded: report the post-refund balances
            self.read_only_summary(&principal, resolved.plan).await?
        } else {
            TokenSummary {
                consumed: receipt.consumed,
                remaining_daily: receipt.remaining_daily,
                remaining_purchased: receipt.remaining_purchased,
                daily_limit: receipt.daily_limit,
            }
        };

        Ok(GenerateOutcome {
            artifact,
            from_cache,
            tokens,
            plan: resolved,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_under_lock(
        &self,
        principal: Principal,
        input_kind: InputKind,
        raw_input: String,
        language: Language,
        fp: String,
        attempt_id: Uuid,
        plan: Plan,
    ) -> Result<(Artifact, bool)> {
        let _guard = self.locks.acquire(&fp).await;

        // Re-check under the lock: another request may have just persisted it
        if let Some(artifact) = store::find(&self.pool, &fp, language).await? {
            self.refund_attempt(attempt_id, &principal, plan).await?;
            ownership::attach(&self.pool, &principal, artifact.id).await?;
            return Ok((artifact, true));
        }

        let budget = std::time::Duration::from_secs(GENERATION_BUDGET_SECS);
        let generated = tokio::time::timeout(
            budget,
            self.gateway.generate(input_kind, &raw_input, language),
        )
        .await;

        let content = match generated {
            Err(_elapsed) => {
                self.refund_attempt(attempt_id, &principal, plan).await?;
                return Err(Error::LlmUnavailable("generation budget exceeded".into()));
            }
            Ok(Err(e)) => {
                self.refund_attempt(attempt_id, &principal, plan).await?;
                return Err(e);
            }
            Ok(Ok(content)) => content,
        };

        let keep_input = !principal.is_anonymous() || self.config.retain_anonymous_inputs;
        let artifact = Artifact {
            id: Uuid::new_v4(),
            fingerprint: fp.clone(),
            input_kind,
            raw_input: keep_input.then(|| raw_input.clone()),
            language,
            content,
            created_at: Utc::now(),
        };

        match store::insert(&self.pool, &artifact).await {
            Ok(()) => {}
            Err(Error::Conflict(_)) => {
                // Lost a race despite the lock (another node, or a direct
                // insert): re-read and hand back the winner's artifact
                let artifact = store::find(&self.pool, &fp, language)
                    .await?
                    .ok_or_else(|| Error::Internal("artifact vanished after conflict".into()))?;
                self.refund_attempt(attempt_id, &principal, plan).await?;
                ownership::attach(&self.pool, &principal, artifact.id).await?;
                return Ok((artifact, true));
            }
            Err(e) => {
                self.refund_attempt(attempt_id, &principal, plan).await?;
                return Err(e);
            }
        }

        if let Err(e) = ownership::attach(&self.pool, &principal, artifact.id).await {
            // The artifact stays (it is globally useful); the charge does not
            self.refund_attempt(attempt_id, &principal, plan).await?;
            return Err(e);
        }

        self.commit_attempt(attempt_id).await?;
        tracing::info!(
            fingerprint = %artifact.fingerprint,
            language = language.as_str(),
            principal = %principal.user_ref(),
            "study guide generated"
        );
        Ok((artifact, false))
    }

    /// Ledger view that never writes, for cache-hit responses.
    async fn read_only_summary(&self, principal: &Principal, plan: Plan) -> Result<TokenSummary> {
        let summary = match self.ledger.peek(&principal.user_ref()).await? {
            Some(account) => {
                // Display a stale row as the reset would leave it, without
                // performing the reset
                let stale = account.last_reset.date_naive() < Utc::now().date_naive();
                TokenSummary {
                    consumed: 0,
                    remaining_daily: if stale { account.daily_limit } else { account.daily_available },
                    remaining_purchased: account.purchased_available,
                    daily_limit: account.daily_limit,
                }
            }
            None => {
                let limit = plan.daily_limit(self.ledger.limits());
                TokenSummary {
                    consumed: 0,
                    remaining_daily: limit,
                    remaining_purchased: 0,
                    daily_limit: limit,
                }
            }
        };
        Ok(summary)
    }

    async fn record_attempt(
        &self,
        principal: &Principal,
        fp: &str,
        language: Language,
        cost: i64,
        receipt: &ConsumeReceipt,
    ) -> Result<Uuid> {
        let attempt_id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO generation_attempts
                (id, principal, is_anonymous, fingerprint, language, cost,
                 daily_part, purchased_part, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'reserved', $9, $9)
            "#,
        )
        .bind(attempt_id.to_string())
        .bind(principal.user_ref())
        .bind(principal.is_anonymous())
        .bind(fp)
        .bind(language.as_str())
        .bind(cost)
        .bind(receipt.daily_part)
        .bind(receipt.purchased_part)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(attempt_id)
    }

    async fn commit_attempt(&self, attempt_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE generation_attempts SET state = 'committed', updated_at = $1 WHERE id = $2 AND state = 'reserved'",
        )
        .bind(Utc::now())
        .bind(attempt_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refund the reserve recorded for an attempt. Idempotent: only the
    /// transition out of `reserved` releases tokens, so duplicate cleanup
    /// firing is harmless.
    pub async fn refund_attempt(
        &self,
        attempt_id: Uuid,
        principal: &Principal,
        plan: Plan,
    ) -> Result<()> {
        let parts: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE generation_attempts SET state = 'refunded', updated_at = $1
            WHERE id = $2 AND state = 'reserved'
            RETURNING daily_part, purchased_part
            "#,
        )
        .bind(Utc::now())
        .bind(attempt_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        if let Some((daily_part, purchased_part)) = parts {
            self.ledger
                .refund_split(&principal.user_ref(), plan, daily_part, purchased_part)
                .await?;
            tracing::debug!(attempt_id = %attempt_id, daily_part, purchased_part, "reserve refunded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_database;
    use crate::llm::{LlmProvider, ProviderError, Prompt, Sampling};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Counts concurrent and total calls; optionally fails every call.
    struct CountingProvider {
        in_flight: Arc<AtomicU32>,
        max_in_flight: Arc<AtomicU32>,
        total: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn complete(
            &self,
            _prompt: &Prompt,
            _sampling: &Sampling,
        ) -> std::result::Result<String, ProviderError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            self.total.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(ProviderError::Transient("wired to fail".into()));
            }
            Ok(serde_json::json!({
                "summary": "s",
                "interpretation": "i",
                "context": "c",
                "related_verses": ["v"],
                "reflection_questions": ["q"],
                "prayer_points": ["p"]
            })
            .to_string())
        }
    }

    struct Harness {
        generator: Generator,
        total: Arc<AtomicU32>,
        max_in_flight: Arc<AtomicU32>,
    }

    async fn harness(fail: bool) -> Harness {
        let db = test_database().await;
        let config = Arc::new(Config::for_tests());
        let total = Arc::new(AtomicU32::new(0));
        let max_in_flight = Arc::new(AtomicU32::new(0));
        let provider = CountingProvider {
            in_flight: Arc::new(AtomicU32::new(0)),
            max_in_flight: max_in_flight.clone(),
            total: total.clone(),
            fail,
        };
        let gateway = LlmGateway::with_providers(vec![Box::new(provider)], Sampling::new(0.7));
        let ledger = TokenLedger::new(db.pool().clone(), config.plan_limits);
        let generator = Generator::new(
            db.pool().clone(),
            config,
            gateway,
            ledger,
            KeyedLocks::new(),
        );
        Harness {
            generator,
            total,
            max_in_flight,
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit_charges_once() {
        let h = harness(false).await;
        let user = Principal::User(Uuid::new_v4());
        h.generator
            .ledger
            .get_or_create(&user.user_ref(), Plan::Standard)
            .await
            .unwrap();

        let first = h
            .generator
            .get_or_create(user, InputKind::Scripture, "John 3:16".into(), Language::English)
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.tokens.consumed, 10);
        assert_eq!(first.tokens.remaining_daily, 10);
        assert_eq!(first.tokens.daily_limit, 20);

        let second_user = Principal::User(Uuid::new_v4());
        let second = h
            .generator
            .get_or_create(
                second_user,
                InputKind::Scripture,
                "  JOHN 3:16 ".into(),
                Language::English,
            )
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.artifact.id, first.artifact.id);
        assert_eq!(second.tokens.consumed, 0);
        assert_eq!(h.total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refund_on_llm_failure() {
        let h = harness(true).await;
        let user = Principal::User(Uuid::new_v4());
        let user_ref = user.user_ref();

        // Seed a known balance
        h.generator
            .ledger
            .get_or_create(&user_ref, Plan::Free)
            .await
            .unwrap();
        h.generator
            .ledger
            .add_purchased(&user_ref, Plan::Free, 10)
            .await
            .unwrap();

        let result = h
            .generator
            .get_or_create(user, InputKind::Topic, "Faith".into(), Language::English)
            .await;
        assert!(matches!(result, Err(Error::LlmUnavailable(_))));

        let account = h.generator.ledger.peek(&user_ref).await.unwrap().unwrap();
        assert_eq!(account.daily_available, 8);
        assert_eq!(account.purchased_available, 10);
        assert_eq!(account.consumed_today, 0);

        let state: String =
            sqlx::query_scalar("SELECT state FROM generation_attempts LIMIT 1")
                .fetch_one(&h.generator.pool)
                .await
                .unwrap();
        assert_eq!(state, "refunded");
    }

    #[tokio::test]
    async fn test_concurrent_requests_generate_once() {
        let h = harness(false).await;
        let a = Principal::User(Uuid::new_v4());
        let b = Principal::User(Uuid::new_v4());
        for p in [&a, &b] {
            h.generator
                .ledger
                .get_or_create(&p.user_ref(), Plan::Standard)
                .await
                .unwrap();
        }

        let ga = h.generator.clone();
        let gb = h.generator.clone();
        let (ra, rb) = tokio::join!(
            ga.get_or_create(a, InputKind::Scripture, "Romans 8:28".into(), Language::Hindi),
            gb.get_or_create(b, InputKind::Scripture, "Romans 8:28".into(), Language::Hindi),
        );
        let ra = ra.unwrap();
        let rb = rb.unwrap();

        assert_eq!(ra.artifact.id, rb.artifact.id);
        assert_eq!(h.max_in_flight.load(Ordering::SeqCst), 1, "no concurrent LLM calls");
        assert_eq!(h.total.load(Ordering::SeqCst), 1);
        // Exactly one of the two observed a fresh generation
        assert_eq!(
            [ra.from_cache, rb.from_cache].iter().filter(|c| !**c).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_insufficient_tokens_blocks_before_llm() {
        let h = harness(false).await;
        let anon_session = crate::sessions::create(&h.generator.pool, None).await.unwrap();
        let anon = Principal::Anonymous(anon_session.id);

        // Free plan has 8 daily tokens; Malayalam costs 20
        let result = h
            .generator
            .get_or_create(anon, InputKind::Topic, "Hope".into(), Language::Malayalam)
            .await;
        match result {
            Err(Error::InsufficientTokens { available, required, .. }) => {
                assert_eq!(available, 8);
                assert_eq!(required, 20);
            }
            other => panic!("expected InsufficientTokens, got {other:?}"),
        }
        assert_eq!(h.total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refund_attempt_is_idempotent() {
        let h = harness(true).await;
        let user = Principal::User(Uuid::new_v4());
        let user_ref = user.user_ref();
        h.generator
            .ledger
            .add_purchased(&user_ref, Plan::Free, 10)
            .await
            .unwrap();

        let _ = h
            .generator
            .get_or_create(user, InputKind::Topic, "Grace".into(), Language::English)
            .await;

        let attempt_id: String = sqlx::query_scalar("SELECT id FROM generation_attempts LIMIT 1")
            .fetch_one(&h.generator.pool)
            .await
            .unwrap();
        let attempt_id = Uuid::parse_str(&attempt_id).unwrap();

        // Duplicate cleanup firing must not double-credit
        h.generator
            .refund_attempt(attempt_id, &user, Plan::Free)
            .await
            .unwrap();
        let account = h.generator.ledger.peek(&user_ref).await.unwrap().unwrap();
        assert_eq!(account.daily_available, 8);
        assert_eq!(account.purchased_available, 10);
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected() {
        let h = harness(false).await;
        let user = Principal::User(Uuid::new_v4());
        let result = h
            .generator
            .get_or_create(user, InputKind::Topic, "   ".into(), Language::English)
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_anonymous_artifacts_drop_plaintext_input() {
        let h = harness(false).await;
        let session = crate::sessions::create(&h.generator.pool, None).await.unwrap();
        let anon = Principal::Anonymous(session.id);
        h.generator
            .ledger
            .add_purchased(&anon.user_ref(), Plan::Free, 20)
            .await
            .unwrap();

        let outcome = h
            .generator
            .get_or_create(anon, InputKind::Topic, "Peace".into(), Language::English)
            .await
            .unwrap();
        assert!(outcome.artifact.raw_input.is_none());
    }
}
