use crate::database::models::Location;
use crate::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::vatsim::{Controller, Datafeed, Pilot, VatsimClient};
use shared::vatusa::{RosterController, RosterMembership, VatusaClient};
use tracing::{debug, instrument};

/// One network snapshot. `taken_at` is the feed's own update timestamp and is
/// used as the pass time by every reconciler that consumes the snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub pilots: Vec<Pilot>,
    pub controllers: Vec<Controller>,
}

impl From<Datafeed> for Snapshot {
    fn from(datafeed: Datafeed) -> Self {
        Self {
            taken_at: datafeed.general.update_timestamp,
            pilots: datafeed.pilots,
            controllers: datafeed.controllers,
        }
    }
}

pub type RosterEntry = RosterController;

#[async_trait]
pub trait NetworkFeed: Send + Sync + 'static {
    async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError>;

    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, FetchError>;
}

#[async_trait]
pub trait LocationLookup: Send + Sync + 'static {
    async fn location(&self, cid: i32) -> Result<Location, FetchError>;
}

/// Feed backed by the VATSIM datafeed and member API plus the VATUSA roster.
#[derive(Clone)]
pub struct HttpFeed {
    vatsim: VatsimClient,
    vatusa: VatusaClient,
}

impl HttpFeed {
    pub const fn new(vatsim: VatsimClient, vatusa: VatusaClient) -> Self {
        Self { vatsim, vatusa }
    }
}

#[async_trait]
impl NetworkFeed for HttpFeed {
    #[instrument(skip(self))]
    async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
        let datafeed = self.vatsim.fetch_datafeed().await?;
        debug!(
            update_timestamp = %datafeed.general.update_timestamp,
            pilots = datafeed.pilots.len(),
            controllers = datafeed.controllers.len(),
            "fetched datafeed"
        );
        Ok(datafeed.into())
    }

    #[instrument(skip(self))]
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, FetchError> {
        let roster = self
            .vatusa
            .get_facility_roster(RosterMembership::Both)
            .await?;
        // An empty roster would soft-remove every user
        if roster.is_empty() {
            return Err(FetchError::Payload("facility roster is empty".to_string()));
        }
        debug!(entries = roster.len(), "fetched facility roster");
        Ok(roster)
    }
}

#[async_trait]
impl LocationLookup for HttpFeed {
    async fn location(&self, cid: i32) -> Result<Location, FetchError> {
        let member = self.vatsim.get_member(cid).await?;
        let mut location = Location {
            region: member.region_id,
            division: member.division_id,
            subdivision: member.subdivision_id.filter(|s| !s.is_empty()),
        };

        // VATUSA does not report subdivisions to VATSIM
        if location.is_usa() {
            location.subdivision = Some(self.vatusa.get_user_facility(cid).await?);
        }

        Ok(location)
    }
}
