//! Kill switch: process-wide trading halt driven by risk conditions.

use crate::alerts::Notifier;
use crate::scheduler::{AlreadyRunning, BackgroundLoop};
use chrono::Utc;
use rust_decimal::Decimal;
use sentinel_data::{KillSwitchRepository, MetricsRepository, StoreError};
use sentinel_domain::entities::{KillSwitchCondition, KillSwitchEvent, KillSwitchState};
use sentinel_domain::enums::{KillSwitchStatus, KillSwitchTrigger};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const HISTORY_LIMIT: usize = 100;

/// Actor recorded for automatic recoveries.
pub const AUTO_RECOVERY_ACTOR: &str = "auto_recovery";
/// Actor recorded for condition-driven triggers.
pub const SYSTEM_ACTOR: &str = "system";

/// Configuration for the kill switch.
#[derive(Debug, Clone)]
pub struct KillSwitchConfig {
    /// Time between condition checks.
    pub monitor_interval: Duration,
    /// Delay before a triggered switch recovers on its own. Zero disables
    /// auto-recovery.
    pub cooldown_period: Duration,
    /// Key of the persisted state.
    pub state_key: String,
    /// Prefix of the metrics the conditions read.
    pub metrics_prefix: String,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(30),
            cooldown_period: Duration::from_secs(60 * 60),
            state_key: "sentinel:kill_switch".to_string(),
            metrics_prefix: "sentinel:metrics".to_string(),
        }
    }
}

/// Kill switch errors.
#[derive(Debug, thiserror::Error)]
pub enum KillSwitchError {
    #[error("kill switch already triggered")]
    AlreadyTriggered,
    #[error("kill switch is not triggered (status: {0})")]
    NotTriggered(KillSwitchStatus),
    #[error("cannot {action} kill switch while {from}")]
    InvalidTransition {
        from: KillSwitchStatus,
        action: &'static str,
    },
    #[error("unknown kill switch condition: {0}")]
    UnknownCondition(String),
    #[error("condition threshold must not be negative, got {0}")]
    InvalidThreshold(Decimal),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),
}

struct Inner {
    state: KillSwitchState,
    conditions: Vec<KillSwitchCondition>,
    history: VecDeque<KillSwitchEvent>,
}

impl Inner {
    fn record(&mut self, event: KillSwitchEvent) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

#[derive(Clone, Copy)]
enum Notice {
    Triggered,
    Recovered,
}

/// The single trading-halt switch of a process.
///
/// Transitions: Active -> Triggered -> Active (recover), Active -> Paused ->
/// Active (resume). Trading is allowed only while Active.
pub struct KillSwitch {
    inner: RwLock<Inner>,
    state_repo: KillSwitchRepository,
    metrics: MetricsRepository,
    notifier: Option<Arc<dyn Notifier>>,
    config: KillSwitchConfig,
    monitor: BackgroundLoop,
}

impl KillSwitch {
    /// Creates a switch in the `Active` state with the default conditions.
    pub fn new(
        state_repo: KillSwitchRepository,
        metrics: MetricsRepository,
        config: KillSwitchConfig,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: KillSwitchState::default(),
                conditions: KillSwitchCondition::defaults(),
                history: VecDeque::with_capacity(HISTORY_LIMIT),
            }),
            state_repo,
            metrics,
            notifier: None,
            config,
            monitor: BackgroundLoop::new("kill-switch-monitor"),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &KillSwitchConfig {
        &self.config
    }

    pub async fn is_trading_allowed(&self) -> bool {
        self.inner.read().await.state.is_trading_allowed()
    }

    pub async fn get_state(&self) -> KillSwitchState {
        self.inner.read().await.state.clone()
    }

    /// Halts trading.
    ///
    /// # Errors
    /// Fails if the switch is not `Active`; the state is left untouched.
    pub async fn trigger(
        &self,
        trigger: KillSwitchTrigger,
        by: &str,
        reason: &str,
    ) -> Result<KillSwitchState, KillSwitchError> {
        let state = {
            let mut inner = self.inner.write().await;
            match inner.state.status {
                KillSwitchStatus::Active => {}
                KillSwitchStatus::Triggered => return Err(KillSwitchError::AlreadyTriggered),
                from => {
                    return Err(KillSwitchError::InvalidTransition {
                        from,
                        action: "trigger",
                    });
                }
            }

            let now = Utc::now();
            let auto_recover_at = if self.config.cooldown_period.is_zero() {
                None
            } else {
                chrono::Duration::from_std(self.config.cooldown_period)
                    .ok()
                    .map(|cooldown| now + cooldown)
            };

            inner.state = KillSwitchState {
                status: KillSwitchStatus::Triggered,
                trigger: Some(trigger),
                triggered_at: Some(now),
                triggered_by: Some(by.to_string()),
                reason: Some(reason.to_string()),
                auto_recover_at,
                recovered_at: None,
                recovered_by: None,
            };
            inner.record(KillSwitchEvent {
                from: KillSwitchStatus::Active,
                to: KillSwitchStatus::Triggered,
                trigger: Some(trigger),
                by: by.to_string(),
                reason: Some(reason.to_string()),
                at: now,
            });
            inner.state.clone()
        };

        error!(
            trigger = trigger.as_str(),
            by = %by,
            reason = %reason,
            auto_recover_at = ?state.auto_recover_at,
            "Kill switch triggered"
        );
        self.persist(&state).await;
        self.notify(Notice::Triggered, &state);
        Ok(state)
    }

    /// Resumes trading after a trigger.
    ///
    /// # Errors
    /// Fails unless the switch is `Triggered`.
    pub async fn recover(&self, by: &str) -> Result<KillSwitchState, KillSwitchError> {
        let state = {
            let mut inner = self.inner.write().await;
            if inner.state.status != KillSwitchStatus::Triggered {
                return Err(KillSwitchError::NotTriggered(inner.state.status));
            }
            let now = Utc::now();
            let trigger = inner.state.trigger;
            inner.state = KillSwitchState {
                recovered_at: Some(now),
                recovered_by: Some(by.to_string()),
                ..KillSwitchState::default()
            };
            inner.record(KillSwitchEvent {
                from: KillSwitchStatus::Triggered,
                to: KillSwitchStatus::Active,
                trigger,
                by: by.to_string(),
                reason: None,
                at: now,
            });
            inner.state.clone()
        };

        info!(by = %by, "Kill switch recovered");
        self.persist(&state).await;
        self.notify(Notice::Recovered, &state);
        Ok(state)
    }

    /// Manual halt with no auto-recovery.
    ///
    /// # Errors
    /// Fails unless the switch is `Active`.
    pub async fn pause(&self, by: &str, reason: &str) -> Result<KillSwitchState, KillSwitchError> {
        let state = {
            let mut inner = self.inner.write().await;
            if inner.state.status != KillSwitchStatus::Active {
                return Err(KillSwitchError::InvalidTransition {
                    from: inner.state.status,
                    action: "pause",
                });
            }
            let now = Utc::now();
            inner.state = KillSwitchState {
                status: KillSwitchStatus::Paused,
                triggered_at: Some(now),
                triggered_by: Some(by.to_string()),
                reason: Some(reason.to_string()),
                ..KillSwitchState::default()
            };
            inner.record(KillSwitchEvent {
                from: KillSwitchStatus::Active,
                to: KillSwitchStatus::Paused,
                trigger: None,
                by: by.to_string(),
                reason: Some(reason.to_string()),
                at: now,
            });
            inner.state.clone()
        };

        warn!(by = %by, reason = %reason, "Kill switch paused");
        self.persist(&state).await;
        Ok(state)
    }

    /// Ends a manual pause.
    ///
    /// # Errors
    /// Fails unless the switch is `Paused`.
    pub async fn resume(&self, by: &str) -> Result<KillSwitchState, KillSwitchError> {
        let state = {
            let mut inner = self.inner.write().await;
            if inner.state.status != KillSwitchStatus::Paused {
                return Err(KillSwitchError::InvalidTransition {
                    from: inner.state.status,
                    action: "resume",
                });
            }
            let now = Utc::now();
            inner.state = KillSwitchState {
                recovered_at: Some(now),
                recovered_by: Some(by.to_string()),
                ..KillSwitchState::default()
            };
            inner.record(KillSwitchEvent {
                from: KillSwitchStatus::Paused,
                to: KillSwitchStatus::Active,
                trigger: None,
                by: by.to_string(),
                reason: None,
                at: now,
            });
            inner.state.clone()
        };

        info!(by = %by, "Kill switch resumed");
        self.persist(&state).await;
        Ok(state)
    }

    pub async fn conditions(&self) -> Vec<KillSwitchCondition> {
        self.inner.read().await.conditions.clone()
    }

    /// Changes the threshold and/or the enabled flag of one condition.
    ///
    /// # Errors
    /// Fails for an unknown id or a negative threshold.
    pub async fn update_condition(
        &self,
        id: &str,
        threshold: Option<Decimal>,
        is_active: Option<bool>,
    ) -> Result<KillSwitchCondition, KillSwitchError> {
        if let Some(t) = threshold
            && t < Decimal::ZERO
        {
            return Err(KillSwitchError::InvalidThreshold(t));
        }
        let updated = {
            let mut inner = self.inner.write().await;
            let condition = inner
                .conditions
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| KillSwitchError::UnknownCondition(id.to_string()))?;
            if let Some(t) = threshold {
                condition.threshold = t;
            }
            if let Some(active) = is_active {
                condition.is_active = active;
            }
            condition.clone()
        };
        info!(
            condition = %updated.id,
            threshold = %updated.threshold,
            active = updated.is_active,
            "Kill switch condition updated"
        );
        Ok(updated)
    }

    /// Transitions, oldest first.
    pub async fn history(&self) -> Vec<KillSwitchEvent> {
        self.inner.read().await.history.iter().cloned().collect()
    }

    /// Reads each active condition's metric and triggers on the first breach.
    ///
    /// Does nothing unless the switch is `Active`. Unreadable or missing
    /// metrics never trigger.
    pub async fn check_conditions(&self) -> Option<KillSwitchTrigger> {
        let conditions: Vec<KillSwitchCondition> = {
            let inner = self.inner.read().await;
            if inner.state.status != KillSwitchStatus::Active {
                return None;
            }
            inner
                .conditions
                .iter()
                .filter(|c| c.is_active)
                .cloned()
                .collect()
        };

        let mut checked = Vec::with_capacity(conditions.len());
        let mut breach = None;
        for condition in conditions {
            let value = match self.metrics.get_metric(&condition.metric).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!(metric = %condition.metric, "Metric not published, skipping");
                    checked.push(condition.id);
                    continue;
                }
                Err(e) => {
                    warn!(metric = %condition.metric, error = %e, "Metric read failed, treating as no breach");
                    continue;
                }
            };
            checked.push(condition.id.clone());
            if condition.is_breached(value) {
                breach = Some((condition, value));
                break;
            }
        }

        {
            let now = Utc::now();
            let mut inner = self.inner.write().await;
            for c in inner.conditions.iter_mut().filter(|c| checked.contains(&c.id)) {
                c.last_checked = Some(now);
            }
        }

        let (condition, value) = breach?;
        let reason = format!(
            "{}: {} = {} (threshold {})",
            condition.name, condition.metric, value, condition.threshold
        );
        match self.trigger(condition.trigger, SYSTEM_ACTOR, &reason).await {
            Ok(_) => Some(condition.trigger),
            Err(e) => {
                debug!(error = %e, "Condition breach ignored");
                None
            }
        }
    }

    /// Recovers a triggered switch whose cooldown has elapsed.
    pub async fn check_auto_recovery(&self) -> bool {
        let due = self.inner.read().await.state.auto_recovery_due(Utc::now());
        if !due {
            return false;
        }
        match self.recover(AUTO_RECOVERY_ACTOR).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Auto-recovery skipped");
                false
            }
        }
    }

    /// One monitor tick.
    pub async fn run_monitor_cycle(&self) {
        self.check_conditions().await;
        self.check_auto_recovery().await;
    }

    /// Replaces the in-memory state with the persisted one, if any.
    ///
    /// # Errors
    /// Fails if the store cannot be read.
    pub async fn load_persisted_state(&self) -> Result<bool, KillSwitchError> {
        let Some(state) = self.state_repo.load().await? else {
            return Ok(false);
        };
        info!(status = %state.status, "Restored kill switch state");
        self.inner.write().await.state = state;
        Ok(true)
    }

    /// Restores persisted state and starts the monitor loop.
    ///
    /// # Errors
    /// Fails if the monitor is already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), KillSwitchError> {
        if self.monitor.is_running().await {
            return Err(AlreadyRunning(self.monitor.name()).into());
        }
        if let Err(e) = self.load_persisted_state().await {
            warn!(error = %e, "Kill switch state not restored, starting Active");
        }
        let switch = Arc::clone(self);
        self.monitor
            .start(self.config.monitor_interval, move || {
                let switch = Arc::clone(&switch);
                async move { switch.run_monitor_cycle().await }
            })
            .await?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.monitor.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.monitor.is_running().await
    }

    async fn persist(&self, state: &KillSwitchState) {
        if let Err(e) = self.state_repo.save(state).await {
            warn!(error = %e, "Failed to persist kill switch state");
        }
    }

    fn notify(&self, notice: Notice, state: &KillSwitchState) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let state = state.clone();
        tokio::spawn(async move {
            let result = match notice {
                Notice::Triggered => notifier.notify_kill_switch_triggered(&state).await,
                Notice::Recovered => notifier.notify_kill_switch_recovered(&state).await,
            };
            if let Err(e) = result {
                warn!(error = %e, "Kill switch notification failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::NotifyError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use sentinel_data::{KeyValueStore, MemoryStore, Storage};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn switch_with(storage: &Storage, config: KillSwitchConfig) -> KillSwitch {
        KillSwitch::new(
            storage.kill_switch(config.state_key.clone()),
            storage.metrics(config.metrics_prefix.clone()),
            config,
        )
    }

    #[derive(Default)]
    struct Recorder {
        triggered: AtomicU32,
        recovered: AtomicU32,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify_kill_switch_triggered(&self, _: &KillSwitchState) -> Result<(), NotifyError> {
            self.triggered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_kill_switch_recovered(&self, _: &KillSwitchState) -> Result<(), NotifyError> {
            self.recovered.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError("pager offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_single_trigger() {
        let switch = switch_with(&Storage::in_memory(), KillSwitchConfig::default());
        assert!(switch.is_trading_allowed().await);

        let state = switch
            .trigger(KillSwitchTrigger::Manual, "ops", "incident")
            .await
            .unwrap();
        assert_eq!(state.status, KillSwitchStatus::Triggered);
        assert!(state.auto_recover_at.is_some());
        assert!(!switch.is_trading_allowed().await);

        let before = switch.get_state().await;
        let err = switch
            .trigger(KillSwitchTrigger::MaxDrawdown, "system", "again")
            .await
            .unwrap_err();
        assert!(matches!(err, KillSwitchError::AlreadyTriggered));
        assert_eq!(switch.get_state().await, before);
    }

    #[tokio::test]
    async fn test_recover_requires_triggered() {
        let switch = switch_with(&Storage::in_memory(), KillSwitchConfig::default());
        assert!(matches!(
            switch.recover("ops").await,
            Err(KillSwitchError::NotTriggered(KillSwitchStatus::Active))
        ));

        switch.trigger(KillSwitchTrigger::Manual, "ops", "x").await.unwrap();
        let state = switch.recover("ops").await.unwrap();
        assert_eq!(state.status, KillSwitchStatus::Active);
        assert_eq!(state.trigger, None);
        assert_eq!(state.auto_recover_at, None);
        assert_eq!(state.recovered_by.as_deref(), Some("ops"));
        assert!(switch.is_trading_allowed().await);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let switch = switch_with(&Storage::in_memory(), KillSwitchConfig::default());
        let paused = switch.pause("ops", "maintenance").await.unwrap();
        assert_eq!(paused.status, KillSwitchStatus::Paused);
        assert_eq!(paused.auto_recover_at, None);
        assert!(!switch.is_trading_allowed().await);

        assert!(matches!(
            switch.trigger(KillSwitchTrigger::Manual, "ops", "x").await,
            Err(KillSwitchError::InvalidTransition { .. })
        ));
        assert!(matches!(
            switch.recover("ops").await,
            Err(KillSwitchError::NotTriggered(KillSwitchStatus::Paused))
        ));

        switch.resume("ops").await.unwrap();
        switch.trigger(KillSwitchTrigger::Manual, "ops", "x").await.unwrap();
        let err = switch.pause("ops", "maintenance").await.unwrap_err();
        assert_eq!(err.to_string(), "cannot pause kill switch while triggered");

        let history = switch.history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].to, KillSwitchStatus::Triggered);
    }

    #[tokio::test]
    async fn test_zero_cooldown_disables_auto_recovery() {
        let config = KillSwitchConfig {
            cooldown_period: Duration::ZERO,
            ..Default::default()
        };
        let switch = switch_with(&Storage::in_memory(), config);
        let state = switch.trigger(KillSwitchTrigger::Manual, "ops", "x").await.unwrap();
        assert_eq!(state.auto_recover_at, None);
        assert!(!switch.check_auto_recovery().await);
    }

    #[tokio::test]
    async fn test_check_conditions_first_breach_wins() {
        let storage = Storage::in_memory();
        let config = KillSwitchConfig::default();
        let metrics = storage.metrics(config.metrics_prefix.clone());
        let switch = switch_with(&storage, config);

        assert_eq!(switch.check_conditions().await, None);

        metrics.set_metric("drawdown_pct", dec!(25)).await.unwrap();
        metrics.set_metric("daily_loss_pct", dec!(9)).await.unwrap();
        assert_eq!(
            switch.check_conditions().await,
            Some(KillSwitchTrigger::MaxDrawdown)
        );
        let state = switch.get_state().await;
        assert_eq!(state.triggered_by.as_deref(), Some(SYSTEM_ACTOR));

        // already triggered: skipped entirely
        assert_eq!(switch.check_conditions().await, None);
    }

    #[tokio::test]
    async fn test_unreadable_metric_does_not_trigger() {
        let store = Arc::new(MemoryStore::new());
        let storage = Storage::new(store.clone());
        let switch = switch_with(&storage, KillSwitchConfig::default());

        store
            .set("sentinel:metrics:drawdown_pct", "not-a-number")
            .await
            .unwrap();
        assert_eq!(switch.check_conditions().await, None);
        assert!(switch.is_trading_allowed().await);
    }

    #[tokio::test]
    async fn test_disabled_and_updated_conditions() {
        let storage = Storage::in_memory();
        let config = KillSwitchConfig::default();
        let metrics = storage.metrics(config.metrics_prefix.clone());
        let switch = switch_with(&storage, config);

        metrics.set_metric("volatility_pct", dec!(50)).await.unwrap();
        assert_eq!(switch.check_conditions().await, None);

        let updated = switch
            .update_condition("high_volatility", Some(dec!(40)), Some(true))
            .await
            .unwrap();
        assert_eq!(updated.threshold, dec!(40));
        assert!(matches!(
            switch.update_condition("nope", None, None).await,
            Err(KillSwitchError::UnknownCondition(_))
        ));
        assert!(matches!(
            switch.update_condition("high_volatility", Some(dec!(-1)), None).await,
            Err(KillSwitchError::InvalidThreshold(_))
        ));

        assert_eq!(
            switch.check_conditions().await,
            Some(KillSwitchTrigger::HighVolatility)
        );
        assert!(
            switch
                .conditions()
                .await
                .iter()
                .find(|c| c.id == "high_volatility")
                .unwrap()
                .last_checked
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let storage = Storage::in_memory();
        let first = switch_with(&storage, KillSwitchConfig::default());
        first
            .trigger(KillSwitchTrigger::DailyLossCap, "system", "loss")
            .await
            .unwrap();

        let second = switch_with(&storage, KillSwitchConfig::default());
        assert!(second.is_trading_allowed().await);
        assert!(second.load_persisted_state().await.unwrap());
        let state = second.get_state().await;
        assert_eq!(state.status, KillSwitchStatus::Triggered);
        assert_eq!(state.trigger, Some(KillSwitchTrigger::DailyLossCap));
    }

    #[tokio::test]
    async fn test_notifications_are_fire_and_forget() {
        let recorder = Arc::new(Recorder::default());
        let switch = switch_with(&Storage::in_memory(), KillSwitchConfig::default())
            .with_notifier(recorder.clone());

        switch.trigger(KillSwitchTrigger::Manual, "ops", "x").await.unwrap();
        // a failing notifier does not fail the transition
        switch.recover("ops").await.unwrap();

        for _ in 0..50 {
            if recorder.recovered.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(recorder.triggered.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.recovered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let switch = switch_with(&Storage::in_memory(), KillSwitchConfig::default());
        for _ in 0..60 {
            switch.pause("ops", "x").await.unwrap();
            switch.resume("ops").await.unwrap();
        }
        let history = switch.history().await;
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.last().unwrap().to, KillSwitchStatus::Active);
    }
}
