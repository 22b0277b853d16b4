use rand::Rng;

use crate::{
    alias::{AliasValues, ALIAS_HUMIDITY, ALIAS_STATE, ALIAS_TEMPERATURE, ALIAS_UPTIME},
    config::{RuntimeConfig, TelemetryConfig},
    types::{
        ActivationOutcome, ActuatorState, Credential, DeviceIdentity, LongPollOutcome,
        Rejection, SensorReading, WriteOutcome,
    },
    watermark::{Watermark, WatermarkTable},
};

/// Alias carrying the remotely controlled on/off state.
pub const ACTUATOR_ALIAS: &str = ALIAS_STATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Activating,
    Active,
    ReactivationPending,
    Terminated,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Activating => "ACTIVATING",
            Self::Active => "ACTIVE",
            Self::ReactivationPending => "REACTIVATION_PENDING",
            Self::Terminated => "TERMINATED",
        }
    }
}

/// Whether the rest of the current tick should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    SkipRest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickStart {
    pub tick: u64,
    pub uptime_secs: u64,
    pub status_due: bool,
    /// Ticks left before the auto-stop bound, if one is configured.
    pub remaining_ticks: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationEffect {
    Activated,
    /// No usable credential yet; retry on the next tick.
    StillPending,
    /// Identity rejected; no attempts for the given number of ticks.
    HeldOff(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorUpdate {
    Unchanged,
    Switched {
        from: ActuatorState,
        to: ActuatorState,
    },
    /// New data arrived but matches the local state.
    Confirmed(ActuatorState),
    Undecodable(String),
    Rejected(Rejection),
    ReactivationRequired,
}

/// Device session state machine. Performs no I/O: the caller executes
/// requests and feeds the outcomes back in.
#[derive(Debug, Clone)]
pub struct Session {
    identity: DeviceIdentity,
    telemetry: TelemetryConfig,

    phase: SessionPhase,
    credential: Option<Credential>,
    credential_unsaved: bool,
    baseline_pending: bool,

    actuator: ActuatorState,
    reading: SensorReading,
    watermarks: WatermarkTable,

    uptime_secs: u64,
    ticks: u64,
    max_ticks: u64,
    status_interval_secs: u64,
    last_status_bucket: Option<u64>,

    not_found_retry_ticks: u32,
    activation_holdoff: u32,

    reactivations: u64,
    actuator_transitions: u64,
}

impl Session {
    pub fn new(identity: DeviceIdentity, config: &RuntimeConfig) -> Self {
        let mut telemetry = config.telemetry.clone();
        telemetry.sanitize();
        let reading = SensorReading::initial(&telemetry);

        Self {
            identity,
            telemetry,
            phase: SessionPhase::Uninitialized,
            credential: None,
            credential_unsaved: false,
            baseline_pending: true,
            actuator: ActuatorState::OFF,
            reading,
            watermarks: WatermarkTable::new(),
            uptime_secs: 0,
            ticks: 0,
            max_ticks: config.device.max_ticks,
            status_interval_secs: config.device.status_interval_secs.max(1),
            last_status_bucket: None,
            not_found_retry_ticks: config.device.not_found_retry_ticks,
            activation_holdoff: 0,
            reactivations: 0,
            actuator_transitions: 0,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn actuator(&self) -> ActuatorState {
        self.actuator
    }

    pub fn reading(&self) -> SensorReading {
        self.reading
    }

    pub fn watermark(&self, target: &str) -> Option<Watermark> {
        self.watermarks.get(target)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.uptime_secs
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn reactivations(&self) -> u64 {
        self.reactivations
    }

    pub fn actuator_transitions(&self) -> u64 {
        self.actuator_transitions
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == SessionPhase::Terminated
    }

    pub fn needs_activation(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Activating | SessionPhase::ReactivationPending
        )
    }

    pub fn activation_due(&self) -> bool {
        self.needs_activation() && self.activation_holdoff == 0
    }

    pub fn baseline_pending(&self) -> bool {
        self.baseline_pending && self.is_active()
    }

    /// Credential issued but not yet persisted.
    pub fn unsaved_credential(&self) -> Option<&Credential> {
        if self.credential_unsaved {
            self.credential.as_ref()
        } else {
            None
        }
    }

    pub fn mark_credential_saved(&mut self) {
        self.credential_unsaved = false;
    }

    /// Leaves `Uninitialized` with whatever the credential store returned.
    pub fn boot(&mut self, stored: Option<Credential>) {
        if self.phase != SessionPhase::Uninitialized {
            return;
        }

        match stored.filter(|credential| !credential.is_empty()) {
            Some(credential) => {
                self.credential = Some(credential);
                self.phase = SessionPhase::Active;
            }
            None => self.phase = SessionPhase::Activating,
        }
    }

    /// True once the configured number of ticks has run.
    pub fn budget_exhausted(&self) -> bool {
        self.max_ticks > 0 && self.ticks >= self.max_ticks
    }

    /// Starts a tick. Returns `None` once the session is terminated, either
    /// earlier or because the tick budget is now exhausted.
    pub fn begin_tick(&mut self, uptime_secs: u64) -> Option<TickStart> {
        if self.is_terminated() {
            return None;
        }
        if self.budget_exhausted() {
            self.terminate();
            return None;
        }

        self.ticks += 1;
        self.uptime_secs = self.uptime_secs.max(uptime_secs);
        self.activation_holdoff = self.activation_holdoff.saturating_sub(1);

        let bucket = self.uptime_secs / self.status_interval_secs;
        let status_due = self.last_status_bucket != Some(bucket);
        self.last_status_bucket = Some(bucket);

        let remaining_ticks = (self.max_ticks > 0).then(|| self.max_ticks - self.ticks);

        Some(TickStart {
            tick: self.ticks,
            uptime_secs: self.uptime_secs,
            status_due,
            remaining_ticks,
        })
    }

    pub fn terminate(&mut self) {
        self.phase = SessionPhase::Terminated;
    }

    /// Advances the random walk and returns the telemetry payload.
    pub fn next_telemetry<R: Rng + ?Sized>(&mut self, rng: &mut R) -> AliasValues {
        self.reading = self.reading.step(rng, &self.telemetry);

        AliasValues::new()
            .with(ALIAS_TEMPERATURE, format!("{:.1}", self.reading.temperature))
            .with(ALIAS_HUMIDITY, format!("{:.1}", self.reading.humidity))
            .with(ALIAS_UPTIME, self.uptime_secs.to_string())
    }

    pub fn baseline_payload(&self) -> AliasValues {
        AliasValues::new().with(ACTUATOR_ALIAS, self.actuator.alias_value())
    }

    pub fn apply_activation(&mut self, outcome: ActivationOutcome) -> ActivationEffect {
        if !self.needs_activation() {
            return ActivationEffect::StillPending;
        }

        match outcome {
            ActivationOutcome::Issued(credential) if !credential.is_empty() => {
                self.credential = Some(credential);
                self.credential_unsaved = true;
                self.phase = SessionPhase::Active;
                self.activation_holdoff = 0;
                ActivationEffect::Activated
            }
            ActivationOutcome::NotFound => {
                self.activation_holdoff = self.not_found_retry_ticks;
                ActivationEffect::HeldOff(self.not_found_retry_ticks)
            }
            ActivationOutcome::Issued(_)
            | ActivationOutcome::AlreadyActivated
            | ActivationOutcome::TransientFailure(_)
            | ActivationOutcome::Unreachable(_) => ActivationEffect::StillPending,
        }
    }

    pub fn apply_baseline_write(&mut self, outcome: &WriteOutcome) -> TickFlow {
        match outcome {
            WriteOutcome::Written => {
                self.baseline_pending = false;
                TickFlow::Continue
            }
            WriteOutcome::Rejected(Rejection::Unreachable(_)) => TickFlow::SkipRest,
            WriteOutcome::Rejected(Rejection::Unauthorized) => {
                self.credential_rejected();
                TickFlow::SkipRest
            }
            WriteOutcome::Rejected(_) => {
                self.baseline_pending = false;
                TickFlow::Continue
            }
        }
    }

    pub fn apply_write(&mut self, outcome: &WriteOutcome) -> TickFlow {
        match outcome {
            WriteOutcome::Written => TickFlow::Continue,
            WriteOutcome::Rejected(Rejection::Unauthorized) => {
                self.credential_rejected();
                TickFlow::SkipRest
            }
            WriteOutcome::Rejected(Rejection::Unreachable(_)) => TickFlow::SkipRest,
            WriteOutcome::Rejected(_) => TickFlow::Continue,
        }
    }

    pub fn apply_long_poll(&mut self, target: &str, outcome: LongPollOutcome) -> ActuatorUpdate {
        match outcome {
            LongPollOutcome::Unchanged => ActuatorUpdate::Unchanged,
            LongPollOutcome::Rejected(Rejection::Unauthorized) => {
                self.credential_rejected();
                ActuatorUpdate::ReactivationRequired
            }
            LongPollOutcome::Rejected(rejection) => ActuatorUpdate::Rejected(rejection),
            LongPollOutcome::Changed { values, watermark } => {
                if let Some(watermark) = watermark {
                    self.watermarks.record(target, watermark);
                }

                let Some(raw) = values.get(target) else {
                    return ActuatorUpdate::Undecodable(values.encode());
                };
                let Some(next) = ActuatorState::parse_alias_value(raw) else {
                    return ActuatorUpdate::Undecodable(raw.to_string());
                };

                if next == self.actuator {
                    return ActuatorUpdate::Confirmed(next);
                }

                let from = self.actuator;
                self.actuator = next;
                self.actuator_transitions += 1;
                ActuatorUpdate::Switched { from, to: next }
            }
        }
    }

    /// Invalidates the credential after an auth failure. Only the first
    /// failure while active counts.
    pub fn credential_rejected(&mut self) {
        if self.phase != SessionPhase::Active {
            return;
        }

        self.credential = None;
        self.credential_unsaved = false;
        self.phase = SessionPhase::ReactivationPending;
        self.reactivations += 1;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn runtime() -> RuntimeConfig {
        let mut runtime = RuntimeConfig::default();
        runtime.device.product_id = "p1".to_string();
        runtime.device.max_ticks = 0;
        runtime
    }

    fn session() -> Session {
        Session::new(DeviceIdentity::new("p1", "000001"), &runtime())
    }

    fn active_session() -> Session {
        let mut session = session();
        session.boot(Some(Credential::new("stored-token")));
        session
    }

    fn changed(raw: &str, watermark: Option<&str>) -> LongPollOutcome {
        LongPollOutcome::Changed {
            values: AliasValues::parse(raw),
            watermark: watermark.map(|w| w.parse().unwrap()),
        }
    }

    #[test]
    fn boot_without_credential_enters_activating() {
        let mut session = session();
        session.boot(None);

        assert_eq!(session.phase(), SessionPhase::Activating);
        assert!(session.activation_due());
        assert!(!session.baseline_pending());
    }

    #[test]
    fn boot_ignores_blank_stored_credential() {
        let mut session = session();
        session.boot(Some(Credential::new("  ")));

        assert_eq!(session.phase(), SessionPhase::Activating);
    }

    #[test]
    fn issued_credential_activates_and_needs_saving() {
        let mut session = session();
        session.boot(None);

        let effect = session.apply_activation(ActivationOutcome::Issued(Credential::new("new")));

        assert_eq!(effect, ActivationEffect::Activated);
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.unsaved_credential(), Some(&Credential::new("new")));
        assert!(session.baseline_pending());
        assert_eq!(session.baseline_payload().encode(), "state=0");

        session.mark_credential_saved();
        assert_eq!(session.unsaved_credential(), None);
    }

    #[test]
    fn already_activated_keeps_session_pending() {
        let mut session = session();
        session.boot(None);

        let effect = session.apply_activation(ActivationOutcome::AlreadyActivated);

        assert_eq!(effect, ActivationEffect::StillPending);
        assert_eq!(session.phase(), SessionPhase::Activating);
        assert!(session.activation_due());
    }

    #[test]
    fn not_found_holds_off_activation() {
        let mut runtime = runtime();
        runtime.device.not_found_retry_ticks = 3;
        let mut session = Session::new(DeviceIdentity::new("p1", "000001"), &runtime);
        session.boot(None);

        assert_eq!(
            session.apply_activation(ActivationOutcome::NotFound),
            ActivationEffect::HeldOff(3)
        );
        assert!(!session.activation_due());

        session.begin_tick(1);
        session.begin_tick(2);
        assert!(!session.activation_due());
        session.begin_tick(3);
        assert!(session.activation_due());
    }

    #[test]
    fn unauthorized_write_requests_reactivation_once() {
        let mut session = active_session();
        let unauthorized = WriteOutcome::Rejected(Rejection::Unauthorized);

        assert_eq!(session.apply_write(&unauthorized), TickFlow::SkipRest);
        assert_eq!(session.phase(), SessionPhase::ReactivationPending);
        assert_eq!(session.credential(), None);

        let update = session.apply_long_poll(
            ACTUATOR_ALIAS,
            LongPollOutcome::Rejected(Rejection::Unauthorized),
        );
        assert_eq!(update, ActuatorUpdate::ReactivationRequired);
        assert_eq!(session.reactivations(), 1);
    }

    #[test]
    fn protocol_errors_on_write_continue_tick() {
        let mut session = active_session();

        for rejection in [
            Rejection::BadRequest,
            Rejection::MethodNotAllowed,
            Rejection::Other(500),
        ] {
            assert_eq!(
                session.apply_write(&WriteOutcome::Rejected(rejection)),
                TickFlow::Continue
            );
        }
        assert_eq!(
            session.apply_write(&WriteOutcome::Rejected(Rejection::Unreachable(
                "reset".to_string()
            ))),
            TickFlow::SkipRest
        );
        assert_eq!(session.phase(), SessionPhase::Active);
    }

    #[test]
    fn reactivation_preserves_reading_and_actuator() {
        let mut session = active_session();
        let mut rng = StdRng::seed_from_u64(9);
        session.next_telemetry(&mut rng);
        session.apply_long_poll(ACTUATOR_ALIAS, changed("state=1", None));
        let reading = session.reading();

        session.credential_rejected();
        session.apply_activation(ActivationOutcome::Issued(Credential::new("fresh")));

        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.reading(), reading);
        assert_eq!(session.actuator(), ActuatorState::ON);
    }

    #[test]
    fn changed_state_switches_actuator_once() {
        let mut session = active_session();

        assert_eq!(
            session.apply_long_poll(ACTUATOR_ALIAS, changed("state=1", None)),
            ActuatorUpdate::Switched {
                from: ActuatorState::OFF,
                to: ActuatorState::ON
            }
        );
        assert_eq!(
            session.apply_long_poll(ACTUATOR_ALIAS, changed("state=1", None)),
            ActuatorUpdate::Confirmed(ActuatorState::ON)
        );
        assert_eq!(session.actuator_transitions(), 1);
    }

    #[test]
    fn unchanged_poll_leaves_state_alone() {
        let mut session = active_session();

        assert_eq!(
            session.apply_long_poll(ACTUATOR_ALIAS, LongPollOutcome::Unchanged),
            ActuatorUpdate::Unchanged
        );
        assert_eq!(session.actuator(), ActuatorState::OFF);
        assert_eq!(session.actuator_transitions(), 0);
    }

    #[test]
    fn long_poll_errors_keep_state() {
        let mut session = active_session();
        session.apply_long_poll(
            ACTUATOR_ALIAS,
            changed("state=1", Some("Mon, 05 Jan 2026 10:00:01 GMT")),
        );
        let watermark = session.watermark(ACTUATOR_ALIAS);

        for rejection in [
            Rejection::BadRequest,
            Rejection::MethodNotAllowed,
            Rejection::Other(500),
            Rejection::Unreachable("timed out".to_string()),
        ] {
            let update =
                session.apply_long_poll(ACTUATOR_ALIAS, LongPollOutcome::Rejected(rejection.clone()));

            assert_eq!(update, ActuatorUpdate::Rejected(rejection));
            assert_eq!(session.phase(), SessionPhase::Active);
            assert_eq!(session.actuator(), ActuatorState::ON);
            assert_eq!(session.watermark(ACTUATOR_ALIAS), watermark);
        }
        assert_eq!(session.actuator_transitions(), 1);
        assert_eq!(session.reactivations(), 0);
    }

    #[test]
    fn undecodable_value_records_watermark_only() {
        let mut session = active_session();

        let update = session.apply_long_poll(
            ACTUATOR_ALIAS,
            changed("state=maybe", Some("Mon, 05 Jan 2026 10:00:01 GMT")),
        );

        assert_eq!(update, ActuatorUpdate::Undecodable("maybe".to_string()));
        assert_eq!(session.actuator(), ActuatorState::OFF);
        assert_eq!(
            session.watermark(ACTUATOR_ALIAS).map(|w| w.to_http_date()),
            Some("Mon, 05 Jan 2026 10:00:01 GMT".to_string())
        );
    }

    #[test]
    fn watermark_is_monotonic_across_polls() {
        let mut session = active_session();
        let polls = [
            "Mon, 05 Jan 2026 10:00:03 GMT",
            "Mon, 05 Jan 2026 10:00:01 GMT",
            "Mon, 05 Jan 2026 10:00:07 GMT",
        ];
        let mut previous: Option<Watermark> = None;

        for (index, watermark) in polls.iter().enumerate() {
            let raw = if index % 2 == 0 { "state=1" } else { "state=0" };
            session.apply_long_poll(ACTUATOR_ALIAS, changed(raw, Some(watermark)));
            let current = session.watermark(ACTUATOR_ALIAS);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn telemetry_payload_carries_readings_and_uptime() {
        let mut session = active_session();
        let mut rng = StdRng::seed_from_u64(5);
        session.begin_tick(12);

        let payload = session.next_telemetry(&mut rng);

        assert_eq!(payload.len(), 3);
        assert_eq!(payload.get(ALIAS_UPTIME), Some("12"));
        let temperature: f32 = payload.get(ALIAS_TEMPERATURE).unwrap().parse().unwrap();
        assert!((temperature - 70.0).abs() <= 0.25);
    }

    #[test]
    fn status_is_due_once_per_interval() {
        let mut session = active_session();

        let due: Vec<bool> = [0, 3, 9, 10, 11, 25]
            .into_iter()
            .map(|uptime| session.begin_tick(uptime).unwrap().status_due)
            .collect();

        assert_eq!(due, vec![true, false, false, true, false, true]);
    }

    #[test]
    fn tick_budget_terminates_session() {
        let mut runtime = runtime();
        runtime.device.max_ticks = 2;
        let mut session = Session::new(DeviceIdentity::new("p1", "000001"), &runtime);
        session.boot(None);

        assert_eq!(session.begin_tick(0).unwrap().remaining_ticks, Some(1));
        assert!(!session.budget_exhausted());
        assert_eq!(session.begin_tick(1).unwrap().remaining_ticks, Some(0));
        assert!(session.budget_exhausted());
        assert_eq!(session.begin_tick(2), None);
        assert_eq!(session.phase(), SessionPhase::Terminated);
        assert!(!session.activation_due());
    }

    #[test]
    fn baseline_unauthorized_keeps_baseline_pending() {
        let mut session = active_session();

        let flow = session.apply_baseline_write(&WriteOutcome::Rejected(Rejection::Unauthorized));
        assert_eq!(flow, TickFlow::SkipRest);
        assert_eq!(session.phase(), SessionPhase::ReactivationPending);

        session.apply_activation(ActivationOutcome::Issued(Credential::new("fresh")));
        assert!(session.baseline_pending());
        assert_eq!(session.apply_baseline_write(&WriteOutcome::Written), TickFlow::Continue);
        assert!(!session.baseline_pending());
    }
}
