use std::time::Duration;

use rand::rngs::StdRng;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use bulb_common::{
    ActivationEffect, ActivationOutcome, ActuatorUpdate, Session, TickFlow, TickStart,
    WriteOutcome, ACTUATOR_ALIAS,
};

use crate::{platform::Platform, store::CredentialStore, ticker::Ticker};

/// Drives a [`Session`] against the platform: boot, then one tick at a
/// time until the tick budget runs out or shutdown is requested.
pub struct SessionController<P, S, T> {
    session: Session,
    platform: P,
    store: S,
    ticker: T,
    rng: StdRng,
    long_poll_timeout: Duration,
}

impl<P, S, T> SessionController<P, S, T>
where
    P: Platform,
    S: CredentialStore,
    T: Ticker,
{
    pub fn new(
        session: Session,
        platform: P,
        store: S,
        ticker: T,
        rng: StdRng,
        long_poll_timeout: Duration,
    ) -> Self {
        Self {
            session,
            platform,
            store,
            ticker,
            rng,
            long_poll_timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs until the session terminates. A shutdown signal drops whatever
    /// request is in flight.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interrupted = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => true,
            _ = self.boot() => false,
        };

        if !interrupted {
            info!("starting session loop");
            loop {
                let stop = tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => {
                        info!("shutdown requested");
                        true
                    }
                    running = self.run_tick() => !running,
                };
                if stop {
                    break;
                }
            }
        }

        self.session.terminate();
        info!(
            ticks = self.session.ticks(),
            reactivations = self.session.reactivations(),
            transitions = self.session.actuator_transitions(),
            "session terminated"
        );
    }

    #[instrument(skip_all, fields(device = %self.session.identity()))]
    pub async fn boot(&mut self) {
        let stored = self.store.load(self.session.identity()).await;
        self.session.boot(stored);

        if self.session.activation_due() {
            info!("no stored credential, trying to activate");
            self.activate().await;
        }
        if self.session.baseline_pending() {
            self.sync_baseline().await;
        }
    }

    /// One loop iteration: write, long-poll, then the activation check.
    /// Returns `false` once the session has terminated.
    pub async fn run_tick(&mut self) -> bool {
        if self.session.budget_exhausted() {
            self.session.terminate();
        }
        if self.session.is_terminated() {
            info!("auto stopping session loop");
            return false;
        }

        let uptime = self.ticker.tick().await;
        let Some(start) = self.session.begin_tick(uptime.as_secs()) else {
            info!("auto stopping session loop");
            return false;
        };

        self.report_progress(&start);
        self.persist_credential().await;

        if self.session.is_active() {
            self.sync_state().await;
        }

        if self.session.activation_due() {
            self.activate().await;
            if self.session.baseline_pending() {
                self.sync_baseline().await;
            }
        }

        true
    }

    async fn sync_state(&mut self) {
        if self.session.baseline_pending() && self.sync_baseline().await == TickFlow::SkipRest {
            return;
        }
        let Some(credential) = self.session.credential().cloned() else {
            return;
        };

        let payload = self.session.next_telemetry(&mut self.rng);
        let outcome = self.platform.write(&credential, &payload).await;
        if let WriteOutcome::Rejected(rejection) = &outcome {
            warn!("telemetry write failed: {rejection}");
        }
        if self.session.apply_write(&outcome) == TickFlow::SkipRest {
            return;
        }

        let watermark = self.session.watermark(ACTUATOR_ALIAS);
        let outcome = self
            .platform
            .long_poll_wait(&credential, ACTUATOR_ALIAS, watermark, self.long_poll_timeout)
            .await;

        match self.session.apply_long_poll(ACTUATOR_ALIAS, outcome) {
            ActuatorUpdate::Unchanged => {}
            ActuatorUpdate::Switched { to, .. } => info!("turn light bulb {}", to.as_str()),
            ActuatorUpdate::Confirmed(state) => debug!("light bulb already {}", state.as_str()),
            ActuatorUpdate::Undecodable(raw) => warn!("ignoring undecodable state value {raw:?}"),
            ActuatorUpdate::Rejected(rejection) => warn!("state long-poll failed: {rejection}"),
            ActuatorUpdate::ReactivationRequired => {
                warn!("credential rejected during long-poll, reactivation required")
            }
        }
    }

    async fn sync_baseline(&mut self) -> TickFlow {
        let Some(credential) = self.session.credential().cloned() else {
            return TickFlow::SkipRest;
        };

        let payload = self.session.baseline_payload();
        let outcome = self.platform.write(&credential, &payload).await;
        match &outcome {
            WriteOutcome::Written => info!(
                state = self.session.actuator().as_str(),
                "synchronized light bulb baseline"
            ),
            WriteOutcome::Rejected(rejection) => warn!("baseline write failed: {rejection}"),
        }
        self.session.apply_baseline_write(&outcome)
    }

    async fn activate(&mut self) {
        let identity = self.session.identity().clone();
        let outcome = self.platform.activate(&identity).await;

        match &outcome {
            ActivationOutcome::Issued(credential) => {
                info!("activation issued new credential: {}", credential.redacted())
            }
            ActivationOutcome::AlreadyActivated => {
                warn!("device already activated, there is no new credential")
            }
            ActivationOutcome::NotFound => error!(
                device = %identity,
                "activation not available for this identity, check the product id and device id"
            ),
            ActivationOutcome::TransientFailure(status) => {
                warn!("activation request failed with status {status}")
            }
            ActivationOutcome::Unreachable(reason) => warn!("activation request failed: {reason}"),
        }

        match self.session.apply_activation(outcome) {
            ActivationEffect::Activated => self.persist_credential().await,
            ActivationEffect::HeldOff(ticks) => info!("next activation attempt in {ticks} ticks"),
            ActivationEffect::StillPending => {}
        }
    }

    async fn persist_credential(&mut self) {
        let Some(credential) = self.session.unsaved_credential().cloned() else {
            return;
        };

        match self.store.save(self.session.identity(), &credential).await {
            Ok(()) => {
                info!("stored credential to non-volatile memory");
                self.session.mark_credential_saved();
            }
            Err(err) => error!("failed to store credential, keeping it in memory: {err}"),
        }
    }

    fn report_progress(&self, start: &TickStart) {
        if start.status_due {
            info!(
                uptime_secs = start.uptime_secs,
                phase = self.session.phase().as_str(),
                "running, light bulb {}",
                self.session.actuator().as_str()
            );
            if self.session.needs_activation() {
                warn!("device credential expired or not available, trying to activate");
            }
        }

        if let Some(remaining) = start.remaining_ticks {
            if remaining > 0 && remaining % 10 == 0 {
                info!("auto stopping session loop in ~{remaining} ticks");
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
