use crate::database::models::{ControllerSession, ControllerStat, ControllerType};
use crate::error::PassError;
use crate::feed::Snapshot;
use crate::metrics::ControllerMetrics;
use crate::notify::{COLOR_BLUE, COLOR_RED, Channel, Dispatcher, Embed, Message};
use crate::store::Store;
use chrono::{DateTime, Utc};
use shared::vatsim::Controller;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, debug, event_enabled, info, instrument, trace, warn};
use uuid::Uuid;

/// Position types whose sessions are tracked. Anything else (`_OBS`, `_SUP`,
/// `_ATIS`, ...) is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionSuffix {
    Rmp,
    Del,
    Gnd,
    Twr,
    App,
    Dep,
    Ctr,
    Rdo,
    Fss,
    Tmu,
    Fmp,
}

impl FromStr for PositionSuffix {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RMP" => Ok(Self::Rmp),
            "DEL" => Ok(Self::Del),
            "GND" => Ok(Self::Gnd),
            "TWR" => Ok(Self::Twr),
            "APP" => Ok(Self::App),
            "DEP" => Ok(Self::Dep),
            "CTR" => Ok(Self::Ctr),
            "RDO" => Ok(Self::Rdo),
            "FSS" => Ok(Self::Fss),
            "TMU" => Ok(Self::Tmu),
            "FMP" => Ok(Self::Fmp),
            _ => Err(()),
        }
    }
}

/// Splits `DEN_1_TWR` into `("DEN", TWR)`. Returns `None` for callsigns
/// without an underscore or with an untracked suffix.
pub fn parse_position(callsign: &str) -> Option<(&str, PositionSuffix)> {
    let (prefix, _) = callsign.split_once('_')?;
    let (_, suffix) = callsign.rsplit_once('_')?;
    Some((prefix, suffix.parse().ok()?))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControllerPassReport {
    pub seen: usize,
    pub skipped: usize,
    pub opened: usize,
    pub updated: usize,
    pub failed: usize,
    pub retired: usize,
    pub retire_failed: usize,
}

pub struct ControllerReconciler {
    store: Arc<dyn Store>,
    notifications: Dispatcher,
    tracked_prefixes: HashSet<String>,
    controller_online: bool,
    metrics: ControllerMetrics,
}

impl ControllerReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        notifications: Dispatcher,
        tracked_prefixes: Vec<String>,
        controller_online: bool,
    ) -> Self {
        Self {
            store,
            notifications,
            tracked_prefixes: tracked_prefixes.into_iter().collect(),
            controller_online,
            metrics: ControllerMetrics::default(),
        }
    }

    fn is_tracked(&self, controller: &Controller) -> bool {
        if controller.is_observer() {
            return false;
        }
        parse_position(&controller.callsign)
            .is_some_and(|(prefix, _)| self.tracked_prefixes.contains(prefix))
    }

    #[instrument(skip_all, fields(taken_at = %snapshot.taken_at))]
    pub async fn reconcile(&self, snapshot: &Snapshot) -> Result<ControllerPassReport, PassError> {
        let generation = Uuid::now_v7();
        let now = snapshot.taken_at;
        let mut report = ControllerPassReport {
            seen: snapshot.controllers.len(),
            ..ControllerPassReport::default()
        };
        // Online this pass but not confirmed in the store; never retired
        let mut unconfirmed: Vec<String> = Vec::new();

        for controller in &snapshot.controllers {
            if !self.is_tracked(controller) {
                trace!(callsign = controller.callsign, "skipping untracked connection");
                report.skipped += 1;
                continue;
            }

            let existing = match self.store.find_controller_session(&controller.callsign).await {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(error = ?e, position = controller.callsign, "failed to look up controller session");
                    report.failed += 1;
                    unconfirmed.push(controller.callsign.clone());
                    continue;
                }
            };

            let session = if let Some(mut session) = existing {
                session.name.clone_from(&controller.name);
                session.frequency.clone_from(&controller.frequency);
                session.facility = controller.facility;
                session.generation = generation;
                session.last_seen = now;
                report.updated += 1;
                session
            } else {
                self.announce(controller).await;
                report.opened += 1;
                ControllerSession {
                    position: controller.callsign.clone(),
                    cid: controller.cid,
                    name: controller.name.clone(),
                    frequency: controller.frequency.clone(),
                    facility: controller.facility,
                    logon_time: controller.logon_time.unwrap_or(now),
                    last_seen: now,
                    generation,
                }
            };

            let saved = self.store.save_controller_session(&session).await;
            if let Err(e) = saved {
                warn!(error = ?e, position = session.position, "failed to save controller session");
                report.failed += 1;
                unconfirmed.push(session.position);
            }
        }

        self.retire_absent(generation, &unconfirmed, now, &mut report)
            .await?;

        self.metrics.opened.add(report.opened as u64, &[]);
        self.metrics.retired.add(report.retired as u64, &[]);
        self.metrics
            .active
            .record((report.opened + report.updated) as u64, &[]);
        info!(
            seen = report.seen,
            opened = report.opened,
            updated = report.updated,
            failed = report.failed,
            retired = report.retired,
            retire_failed = report.retire_failed,
            "controller pass complete"
        );

        Ok(report)
    }

    /// Converts every session the pass did not touch into a stat, skipping
    /// positions still online whose session could not be read or written. A
    /// session that fails to retire stays in place and is picked up by the next
    /// pass.
    async fn retire_absent(
        &self,
        generation: Uuid,
        unconfirmed: &[String],
        now: DateTime<Utc>,
        report: &mut ControllerPassReport,
    ) -> Result<(), PassError> {
        let absent = self
            .store
            .controller_sessions_outside_generation(generation, unconfirmed)
            .await?;

        for session in absent {
            let stat = ControllerStat::from_session(&session, now);
            match self.store.retire_controller_session(&session, &stat).await {
                Ok(()) => {
                    debug!(
                        position = session.position,
                        cid = session.cid,
                        duration_seconds = stat.duration_seconds,
                        "controller session closed"
                    );
                    report.retired += 1;
                }
                Err(e) => {
                    warn!(error = ?e, position = session.position, "failed to retire controller session");
                    report.retire_failed += 1;
                }
            }
        }

        Ok(())
    }

    /// Notification for a new session: staff are warned about connections by
    /// users who are not active controllers here.
    async fn announce(&self, controller: &Controller) {
        let user = match self.store.find_user(controller.cid).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = ?e, cid = controller.cid, "failed to look up controller user");
                None
            }
        };

        match user {
            Some(user) if user.controller_type != ControllerType::None => {
                if self.controller_online {
                    let description = format!(
                        "{} {} ({}) is now online as {}",
                        user.first_name,
                        user.last_name,
                        user.operating_initials.as_deref().unwrap_or("--"),
                        controller.callsign
                    );
                    let embed = Embed::new(
                        format!("{} is now online!", controller.callsign),
                        COLOR_BLUE,
                    )
                    .description(description);
                    self.notifications
                        .dispatch(Channel::Online, Message::embed(embed));
                }
            }
            _ => {
                if event_enabled!(Level::DEBUG) {
                    debug!(
                        cid = controller.cid,
                        position = controller.callsign,
                        "controller on position is not on the active roster"
                    );
                }
                let embed = Embed::new("Not active controller is on position", COLOR_RED)
                    .inline_field("CID", controller.cid)
                    .inline_field("Name", &controller.name)
                    .inline_field("Position", &controller.callsign);
                self.notifications
                    .dispatch(Channel::SeniorStaff, Message::embed(embed));
            }
        }
    }
}
