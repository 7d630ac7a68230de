//! Scoped units of work
//!
//! `atomically!(store, max_attempts, |unit| { ... })` opens a unit, runs the
//! body, and always releases the unit: commit when the body returns `Ok`,
//! rollback otherwise. A [`StoreError::Conflict`](crate::store::StoreError)
//! from the body or from commit restarts the whole body on a fresh unit, up to
//! `max_attempts` times, then surfaces [`SettlementError::Conflict`].
//!
//! Retries never sleep; the loop only yields to the scheduler between
//! attempts so the competing unit can finish.

use tracing::warn;

use crate::error::SettlementError;
use crate::store::LedgerUnit;

macro_rules! atomically {
    ($store:expr, $max_attempts:expr, |$unit:ident| $body:block) => {{
        let max_attempts: u32 = ::std::cmp::max($max_attempts, 1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            #[allow(unused_mut)]
            let mut $unit = match $store.begin_unit().await {
                Ok(unit) => unit,
                Err(e) => {
                    let err = $crate::error::SettlementError::from(e);
                    if err.is_conflict() && attempt < max_attempts {
                        ::tokio::task::yield_now().await;
                        continue;
                    }
                    break Err(err);
                }
            };
            let result: ::std::result::Result<_, $crate::error::SettlementError> =
                async { $body }.await;
            match $crate::atomic::finish_unit($unit, result).await {
                Err(err) if err.is_conflict() && attempt < max_attempts => {
                    ::tracing::debug!(
                        target: $crate::logging::UNIT_TRACE_TARGET,
                        attempt,
                        "Unit conflicted, retrying"
                    );
                    ::tokio::task::yield_now().await;
                }
                Err(err) if err.is_conflict() => {
                    ::tracing::warn!(attempts = attempt, "Conflict retry budget exhausted");
                    break Err($crate::error::SettlementError::Conflict { attempts: attempt });
                }
                other => break other,
            }
        }
    }};
}

/// Release a unit according to the body's outcome
pub(crate) async fn finish_unit<T>(
    unit: Box<dyn LedgerUnit>,
    result: Result<T, SettlementError>,
) -> Result<T, SettlementError> {
    match result {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = unit.rollback().await {
                warn!(error = %rollback_err, cause = %err, "Rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::error::SettlementError;
    use crate::models::User;
    use crate::store::{LedgerStore, LedgerUnit, MemoryLedgerStore, StoreError};

    /// Store whose units always fail to commit with a conflict
    struct AlwaysConflicting {
        inner: MemoryLedgerStore,
        begun: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for AlwaysConflicting {
        async fn begin_unit(&self) -> Result<Box<dyn LedgerUnit>, StoreError> {
            self.begun.fetch_add(1, Ordering::SeqCst);
            // Stage a write against a row another unit bumps before commit
            let mut unit = self.inner.begin_unit().await?;
            let mut user = unit.get_user(1).await?.ok_or(StoreError::Backend("seed".into()))?;
            user.balance_usd += dec!(1);
            unit.update_user(&user).await?;
            self.inner.insert_user(User::new(1, dec!(0), dec!(0))).await;
            Ok(unit)
        }
    }

    async fn run(store: &dyn LedgerStore, attempts: u32) -> Result<u32, SettlementError> {
        atomically!(store, attempts, |unit| {
            let user = unit.get_user(1).await?;
            Ok(user.map(|u| u.user_id as u32).unwrap_or(0))
        })
    }

    #[tokio::test]
    async fn test_commit_on_ok() {
        let store = MemoryLedgerStore::new();
        store.insert_user(User::new(1, dec!(5), dec!(0))).await;
        assert_eq!(run(&store, 3).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_on_err_leaves_state() {
        let store = MemoryLedgerStore::new();
        store.insert_user(User::new(1, dec!(5), dec!(0))).await;

        let result: Result<(), SettlementError> = atomically!(store, 3, |unit| {
            let mut user = unit.get_user(1).await?.ok_or(SettlementError::UserNotFound(1))?;
            user.balance_usd = dec!(0);
            unit.update_user(&user).await?;
            Err(SettlementError::InvalidAmount("abort".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.snapshot().await.users[&1].balance_usd, dec!(5));
    }

    #[tokio::test]
    async fn test_conflict_budget_exhausted() {
        let inner = MemoryLedgerStore::new();
        inner.insert_user(User::new(1, dec!(5), dec!(0))).await;
        let store = Arc::new(AlwaysConflicting {
            inner,
            begun: AtomicU32::new(0),
        });

        let err = run(store.as_ref(), 4).await.unwrap_err();
        assert_eq!(err, SettlementError::Conflict { attempts: 4 });
        assert_eq!(store.begun.load(Ordering::SeqCst), 4);
    }
}
