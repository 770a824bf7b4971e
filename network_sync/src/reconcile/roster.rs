//! Synchronizes local users with the facility roster-of-record.
//!
//! The roster is authoritative but never tells us who left. Every user seen in
//! a pass is stamped with that pass's generation; once the whole roster has
//! been applied, anyone still carrying an older generation is no longer on the
//! roster and is soft-removed: `controller_type` drops to `none` and their
//! operating initials are released, while the row, certifications and history
//! stay.

use crate::database::models::{ControllerType, Location, RosterUser};
use crate::error::PassError;
use crate::feed::{LocationLookup, NetworkFeed, RosterEntry};
use crate::metrics::RosterMetrics;
use crate::notify::{Channel, Dispatcher, Message};
use crate::store::Store;
use chrono::{DateTime, Utc};
use shared::vatusa::{Membership, NON_MEMBER_FACILITY};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RosterPassReport {
    pub seen: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub soft_removed: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VisitorRefreshReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct RosterReconciler {
    store: Arc<dyn Store>,
    notifications: Dispatcher,
    locations: Arc<dyn LocationLookup>,
    certifications: Vec<String>,
    metrics: RosterMetrics,
}

/// First letter of the first name followed by the first letter of the last
/// name, uppercased. `None` when either letter does not uppercase to a single
/// character, since initials are exactly two characters.
pub fn derive_initials(first_name: &str, last_name: &str) -> Option<String> {
    let first = first_name.trim().chars().next()?;
    let last = last_name.trim().chars().next()?;
    if !first.is_alphabetic() || !last.is_alphabetic() {
        return None;
    }
    let initials: String = first.to_uppercase().chain(last.to_uppercase()).collect();
    (initials.chars().count() == 2).then_some(initials)
}

impl RosterReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        notifications: Dispatcher,
        locations: Arc<dyn LocationLookup>,
        certifications: Vec<String>,
    ) -> Self {
        Self {
            store,
            notifications,
            locations,
            certifications,
            metrics: RosterMetrics::default(),
        }
    }

    /// Fetches the roster and applies it. A failed fetch changes nothing.
    pub async fn run(&self, feed: &dyn NetworkFeed) -> Result<RosterPassReport, PassError> {
        let roster = feed.fetch_roster().await?;
        self.reconcile(&roster, Utc::now()).await
    }

    #[instrument(skip_all, fields(entries = roster.len()))]
    pub async fn reconcile(
        &self,
        roster: &[RosterEntry],
        now: DateTime<Utc>,
    ) -> Result<RosterPassReport, PassError> {
        let generation = Uuid::now_v7();
        let mut report = RosterPassReport {
            seen: roster.len(),
            ..RosterPassReport::default()
        };
        // On the roster but not confirmed in the store; never soft-removed
        let mut unconfirmed: Vec<i32> = Vec::new();

        for entry in roster {
            let existing = match self.store.find_user(entry.cid).await {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(error = ?e, cid = entry.cid, "failed to look up roster user");
                    report.failed += 1;
                    unconfirmed.push(entry.cid);
                    continue;
                }
            };

            let created = existing.is_none();
            let mut user = match existing {
                Some(user) => {
                    if user.operating_initials.is_none()
                        && user.controller_type == ControllerType::None
                        && matches!(entry.membership, Membership::Home | Membership::Visit)
                    {
                        self.assign_initials(user, true).await
                    } else {
                        user
                    }
                }
                None => {
                    info!(cid = entry.cid, "new user on roster");
                    let user = RosterUser::new(
                        entry.cid,
                        &entry.fname,
                        &entry.lname,
                        &self.certifications,
                        now,
                    );
                    self.assign_initials(user, false).await
                }
            };

            self.apply_entry(&mut user, entry).await;
            user.generation = Some(generation);
            user.updated_at = now;

            match self.store.save_user(&user).await {
                Ok(()) if created => report.created += 1,
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(error = ?e, cid = entry.cid, "failed to save roster user");
                    report.failed += 1;
                    unconfirmed.push(entry.cid);
                }
            }
        }

        report.soft_removed = self
            .store
            .soft_remove_users_outside_generation(generation, &unconfirmed, now)
            .await?;

        self.metrics
            .saved
            .add((report.created + report.updated) as u64, &[]);
        self.metrics.soft_removed.add(report.soft_removed, &[]);
        info!(
            seen = report.seen,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            soft_removed = report.soft_removed,
            "roster pass complete"
        );

        Ok(report)
    }

    /// Gives `user` initials derived from their name, or leaves them without
    /// initials and asks staff to assign some when that pair is already taken.
    async fn assign_initials(&self, mut user: RosterUser, returning: bool) -> RosterUser {
        let initials = match derive_initials(&user.first_name, &user.last_name) {
            Some(initials) => match self.store.find_user_by_initials(&initials).await {
                Ok(None) => Some(initials),
                Ok(Some(holder)) => {
                    debug!(cid = user.cid, holder = holder.cid, %initials, "operating initials in use");
                    None
                }
                Err(e) => {
                    warn!(error = ?e, cid = user.cid, "failed to check operating initials");
                    None
                }
            },
            None => None,
        };

        if initials.is_none() {
            let content = if returning {
                format!(
                    "User {} {} ({}) is back on the roster, but auto-generated OI failed as their \
                     first initial + last initial was already in use. Please assign one.",
                    user.first_name, user.last_name, user.cid
                )
            } else {
                format!(
                    "New user on roster, {} {} ({}), needs to be assigned an OI",
                    user.first_name, user.last_name, user.cid
                )
            };
            self.notifications
                .dispatch(Channel::SeniorStaff, Message::text(content));
        }

        user.operating_initials = initials;
        user
    }

    async fn apply_entry(&self, user: &mut RosterUser, entry: &RosterEntry) {
        user.first_name.clone_from(&entry.fname);
        user.last_name.clone_from(&entry.lname);
        user.email.clone_from(&entry.email);
        user.rating.clone_from(&entry.rating_short);
        user.roster_join_date = entry
            .facility_join
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));

        match entry.membership {
            Membership::Home => {
                user.controller_type = ControllerType::Home;
                user.set_location(Location::usa(&entry.facility));
            }
            Membership::Visit => {
                user.controller_type = ControllerType::Visitor;
                if entry.facility == NON_MEMBER_FACILITY {
                    self.refresh_location(user).await;
                } else {
                    user.set_location(Location::usa(&entry.facility));
                }
            }
            Membership::Unknown => {
                warn!(cid = user.cid, "roster entry has unknown membership");
                user.controller_type = ControllerType::None;
                user.operating_initials = None;
            }
        }
    }

    /// Returns whether the user's location was updated.
    async fn refresh_location(&self, user: &mut RosterUser) -> bool {
        match self.locations.location(user.cid).await {
            Ok(location) => {
                if location.is_usa() {
                    // VATUSA lists them as a non-member while VATSIM places them in the division
                    warn!(
                        cid = user.cid,
                        subdivision = ?location.subdivision,
                        "foreign visitor is reported as a VATUSA member"
                    );
                }
                user.set_location(location);
                true
            }
            Err(e) => {
                warn!(error = ?e, cid = user.cid, "failed to look up visitor location");
                false
            }
        }
    }

    /// Re-resolves geography for every visitor recorded outside AMAS/USA.
    #[instrument(skip_all)]
    pub async fn refresh_foreign_visitors(&self) -> Result<VisitorRefreshReport, PassError> {
        let visitors = self.store.foreign_visitors().await?;
        let mut report = VisitorRefreshReport {
            checked: visitors.len(),
            ..VisitorRefreshReport::default()
        };

        for mut user in visitors {
            if !self.refresh_location(&mut user).await {
                report.failed += 1;
                continue;
            }
            user.updated_at = Utc::now();
            match self.store.save_user(&user).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(error = ?e, cid = user.cid, "failed to save visitor location");
                    report.failed += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            failed = report.failed,
            "foreign visitor refresh complete"
        );
        Ok(report)
    }

    /// Reminds staff about every active controller still missing initials.
    /// Returns how many reminders were sent.
    pub async fn nag_missing_initials(&self) -> Result<usize, PassError> {
        let users = self.store.users_missing_initials().await?;
        for user in &users {
            let content = format!(
                "User {} {} ({}) has no operating initials",
                user.first_name, user.last_name, user.cid
            );
            self.notifications
                .dispatch(Channel::SeniorStaff, Message::text(content));
        }
        Ok(users.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Certification;
    use crate::feed::testing::ScriptedFeed;
    use crate::notify::testing::RecordingNotifier;
    use crate::reconcile::testing::{at, roster_entry};
    use crate::store::memory::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        notifications: Dispatcher,
        feed: Arc<ScriptedFeed>,
        reconciler: RosterReconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let feed = Arc::new(ScriptedFeed::new());
        let notifications = Dispatcher::new(notifier.clone());
        let reconciler = RosterReconciler::new(
            store.clone(),
            notifications.clone(),
            feed.clone(),
            vec!["DEN_TWR".to_string(), "ZDV_CTR".to_string()],
        );
        Fixture {
            store,
            notifier,
            notifications,
            feed,
            reconciler,
        }
    }

    fn user(f: &Fixture, cid: i32) -> RosterUser {
        f.store.users().into_iter().find(|u| u.cid == cid).unwrap()
    }

    async fn staff_messages(f: &Fixture) -> Vec<String> {
        f.notifications.flush().await;
        f.notifier
            .sent_to(Channel::SeniorStaff)
            .into_iter()
            .filter_map(|m| m.content)
            .collect()
    }

    #[test]
    fn initials_are_uppercased_first_letters() {
        assert_eq!(derive_initials("jane", "doe").as_deref(), Some("JD"));
        assert_eq!(derive_initials(" Émile", "Zola").as_deref(), Some("ÉZ"));
        assert_eq!(derive_initials("", "Doe"), None);
        assert_eq!(derive_initials("1st", "Doe"), None);
        assert_eq!(derive_initials("ßandra", "Doe"), None);
    }

    #[tokio::test]
    async fn new_home_controller_is_created() {
        let f = fixture();
        let roster = vec![roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV")];

        let report = f.reconciler.reconcile(&roster, at("12:00:00")).await.unwrap();

        assert_eq!(report.created, 1);
        let jane = user(&f, 1_000_001);
        assert_eq!(jane.controller_type, ControllerType::Home);
        assert_eq!(jane.operating_initials.as_deref(), Some("JD"));
        assert_eq!(jane.region.as_deref(), Some("AMAS"));
        assert_eq!(jane.division.as_deref(), Some("USA"));
        assert_eq!(jane.subdivision.as_deref(), Some("ZDV"));
        assert_eq!(jane.rating, "C1");
        assert!(jane.roster_join_date.is_some());
        assert_eq!(jane.certifications.len(), 2);
        assert!(jane.certifications.values().all(|c| *c == Certification::None));
        assert!(staff_messages(&f).await.is_empty());
    }

    #[tokio::test]
    async fn initials_collision_leaves_initials_empty_and_notifies() {
        let f = fixture();
        let roster = vec![
            roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV"),
            roster_entry(1_000_002, "John", "Dover", Membership::Home, "ZDV"),
        ];

        f.reconciler.reconcile(&roster, at("12:00:00")).await.unwrap();

        assert_eq!(user(&f, 1_000_002).operating_initials, None);
        assert_eq!(
            staff_messages(&f).await,
            vec!["New user on roster, John Dover (1000002), needs to be assigned an OI"]
        );
    }

    #[tokio::test]
    async fn removed_user_is_soft_removed_and_keeps_history() {
        let f = fixture();
        let full = vec![
            roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV"),
            roster_entry(1_000_002, "Alex", "Smith", Membership::Home, "ZDV"),
        ];
        f.reconciler.reconcile(&full, at("12:00:00")).await.unwrap();
        let mut alex = user(&f, 1_000_002);
        alex.certifications.insert("DEN_TWR".to_string(), Certification::Certified);
        f.store.insert_user(alex);

        let report = f
            .reconciler
            .reconcile(&full[..1], at("12:10:00"))
            .await
            .unwrap();

        assert_eq!(report.soft_removed, 1);
        assert_eq!(f.store.users().len(), 2);
        let alex = user(&f, 1_000_002);
        assert_eq!(alex.controller_type, ControllerType::None);
        assert_eq!(alex.operating_initials, None);
        assert_eq!(alex.certifications["DEN_TWR"], Certification::Certified);
        assert_eq!(user(&f, 1_000_001).controller_type, ControllerType::Home);
    }

    #[tokio::test]
    async fn returning_user_gets_initials_back() {
        let f = fixture();
        let jane = vec![roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV")];
        f.reconciler.reconcile(&jane, at("12:00:00")).await.unwrap();
        f.reconciler
            .reconcile(&[roster_entry(1_000_009, "Sam", "Lee", Membership::Home, "ZDV")], at("12:10:00"))
            .await
            .unwrap();
        assert_eq!(user(&f, 1_000_001).operating_initials, None);

        f.reconciler.reconcile(&jane, at("12:20:00")).await.unwrap();

        let jane = user(&f, 1_000_001);
        assert_eq!(jane.controller_type, ControllerType::Home);
        assert_eq!(jane.operating_initials.as_deref(), Some("JD"));
    }

    #[tokio::test]
    async fn returning_user_with_taken_initials_notifies_staff() {
        let f = fixture();
        let jane = roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV");
        let john = roster_entry(1_000_002, "John", "Dover", Membership::Home, "ZDV");
        let sam = roster_entry(1_000_009, "Sam", "Lee", Membership::Home, "ZDV");

        f.reconciler.reconcile(&[jane.clone()], at("12:00:00")).await.unwrap();
        f.reconciler.reconcile(&[sam], at("12:10:00")).await.unwrap();
        f.reconciler.reconcile(&[john.clone()], at("12:20:00")).await.unwrap();
        assert_eq!(user(&f, 1_000_002).operating_initials.as_deref(), Some("JD"));
        assert!(staff_messages(&f).await.is_empty());

        f.reconciler.reconcile(&[jane, john], at("12:30:00")).await.unwrap();

        assert_eq!(user(&f, 1_000_001).operating_initials, None);
        assert_eq!(user(&f, 1_000_001).controller_type, ControllerType::Home);
        let messages = staff_messages(&f).await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("User Jane Doe (1000001) is back on the roster"));
    }

    #[tokio::test]
    async fn visitor_from_vatusa_facility_uses_roster_facility() {
        let f = fixture();
        f.reconciler
            .reconcile(&[roster_entry(1_000_003, "Vic", "Tor", Membership::Visit, "ZLC")], at("12:00:00"))
            .await
            .unwrap();

        let vic = user(&f, 1_000_003);
        assert_eq!(vic.controller_type, ControllerType::Visitor);
        assert_eq!(vic.subdivision.as_deref(), Some("ZLC"));
        assert_eq!(vic.region.as_deref(), Some("AMAS"));
    }

    #[tokio::test]
    async fn foreign_visitor_location_comes_from_lookup() {
        let f = fixture();
        f.feed.set_location(
            1_000_004,
            Location {
                region: "EMEA".to_string(),
                division: "GBR".to_string(),
                subdivision: None,
            },
        );
        let roster = vec![
            roster_entry(1_000_004, "Fay", "Reign", Membership::Visit, NON_MEMBER_FACILITY),
            roster_entry(1_000_005, "Lou", "Kup", Membership::Visit, NON_MEMBER_FACILITY),
        ];

        let report = f.reconciler.reconcile(&roster, at("12:00:00")).await.unwrap();

        assert_eq!(report.created, 2);
        let fay = user(&f, 1_000_004);
        assert_eq!(fay.region.as_deref(), Some("EMEA"));
        assert_eq!(fay.division.as_deref(), Some("GBR"));
        // lookup failed, the user is still saved as a visitor
        let lou = user(&f, 1_000_005);
        assert_eq!(lou.controller_type, ControllerType::Visitor);
        assert_eq!(lou.region, None);
    }

    #[tokio::test]
    async fn unknown_membership_is_not_a_controller() {
        let f = fixture();
        f.reconciler
            .reconcile(&[roster_entry(1_000_006, "Max", "Ment", Membership::Unknown, "ZDV")], at("12:00:00"))
            .await
            .unwrap();

        let max = user(&f, 1_000_006);
        assert_eq!(max.controller_type, ControllerType::None);
        assert_eq!(max.operating_initials, None);
    }

    #[tokio::test]
    async fn roster_fetch_failure_mutates_nothing() {
        let f = fixture();
        f.feed
            .push_roster(vec![roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV")]);
        f.reconciler.run(f.feed.as_ref()).await.unwrap();
        let before = f.store.users();

        f.feed.push_roster_error("roster unavailable");
        let err = f.reconciler.run(f.feed.as_ref()).await.unwrap_err();

        assert!(matches!(err, PassError::Fetch(_)));
        assert_eq!(f.store.users(), before);
    }

    #[tokio::test]
    async fn save_failure_is_skipped() {
        let f = fixture();
        f.store.fail_writes_for(1_000_002);
        let roster = vec![
            roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV"),
            roster_entry(1_000_002, "Alex", "Smith", Membership::Home, "ZDV"),
        ];

        let report = f.reconciler.reconcile(&roster, at("12:00:00")).await.unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(f.store.users().len(), 1);
    }

    #[tokio::test]
    async fn foreign_visitor_refresh_updates_only_foreign_visitors() {
        let f = fixture();
        let mut foreign = RosterUser::new(1_000_010, "Ana", "Ng", &[], at("00:00:00"));
        foreign.controller_type = ControllerType::Visitor;
        foreign.set_location(Location {
            region: "EMEA".to_string(),
            division: "GBR".to_string(),
            subdivision: None,
        });
        let mut domestic = RosterUser::new(1_000_011, "Bo", "Ho", &[], at("00:00:00"));
        domestic.controller_type = ControllerType::Visitor;
        domestic.set_location(Location::usa("ZLC"));
        f.store.insert_user(foreign);
        f.store.insert_user(domestic);
        f.feed.set_location(
            1_000_010,
            Location {
                region: "EMEA".to_string(),
                division: "EUD".to_string(),
                subdivision: Some("GER".to_string()),
            },
        );

        let report = f.reconciler.refresh_foreign_visitors().await.unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.updated, 1);
        let ana = user(&f, 1_000_010);
        assert_eq!(ana.division.as_deref(), Some("EUD"));
        assert_eq!(ana.subdivision.as_deref(), Some("GER"));
    }

    #[tokio::test]
    async fn nag_reminds_about_active_users_without_initials() {
        let f = fixture();
        f.reconciler
            .reconcile(
                &[
                    roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV"),
                    roster_entry(1_000_002, "John", "Dover", Membership::Home, "ZDV"),
                ],
                at("12:00:00"),
            )
            .await
            .unwrap();

        let sent = f.reconciler.nag_missing_initials().await.unwrap();

        assert_eq!(sent, 1);
        assert_eq!(
            staff_messages(&f).await.last().map(String::as_str),
            Some("User John Dover (1000002) has no operating initials")
        );
    }

    #[tokio::test]
    async fn user_that_failed_to_save_keeps_type_and_initials() {
        let f = fixture();
        let roster = vec![roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV")];
        f.reconciler.reconcile(&roster, at("12:00:00")).await.unwrap();

        f.store.fail_writes_for(1_000_001);
        let report = f.reconciler.reconcile(&roster, at("12:10:00")).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.soft_removed, 0);
        let jane = user(&f, 1_000_001);
        assert_eq!(jane.controller_type, ControllerType::Home);
        assert_eq!(jane.operating_initials.as_deref(), Some("JD"));
    }

    #[tokio::test]
    async fn user_whose_lookup_failed_is_not_soft_removed() {
        let f = fixture();
        let roster = vec![
            roster_entry(1_000_001, "Jane", "Doe", Membership::Home, "ZDV"),
            roster_entry(1_000_002, "Alex", "Smith", Membership::Home, "ZDV"),
        ];
        f.reconciler.reconcile(&roster, at("12:00:00")).await.unwrap();

        f.store.fail_lookups_for(1_000_001);
        let report = f
            .reconciler
            .reconcile(&roster[..1], at("12:10:00"))
            .await
            .unwrap();

        assert_eq!(report.soft_removed, 1);
        assert_eq!(user(&f, 1_000_001).operating_initials.as_deref(), Some("JD"));
        assert_eq!(user(&f, 1_000_002).controller_type, ControllerType::None);
    }
}
