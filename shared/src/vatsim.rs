use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DATAFEED_URL: &str = "https://data.vatsim.net/v3/vatsim-data.json";
pub const API_BASE: &str = "https://api.vatsim.net/v2";

/// Facility type code the network assigns to observer connections.
pub const OBSERVER_FACILITY: i32 = 0;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Datafeed {
    pub general: General,
    #[serde(default)]
    pub pilots: Vec<Pilot>,
    #[serde(default)]
    pub controllers: Vec<Controller>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct General {
    pub update_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub connected_clients: u32,
    #[serde(default)]
    pub unique_users: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Pilot {
    pub cid: i32,
    #[serde(default)]
    pub name: String,
    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub groundspeed: i32,
    pub heading: i32,
    pub flight_plan: Option<FlightPlan>,
    pub logon_time: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct FlightPlan {
    pub aircraft_faa: String,
    pub departure: String,
    pub arrival: String,
    pub route: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Controller {
    pub cid: i32,
    #[serde(default)]
    pub name: String,
    pub callsign: String,
    pub frequency: String,
    pub facility: i32,
    pub rating: i32,
    pub logon_time: Option<DateTime<Utc>>,
}

impl Controller {
    pub const fn is_observer(&self) -> bool {
        self.facility == OBSERVER_FACILITY
    }
}

/// Subset of the member record returned by `/members/{cid}`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VatsimMember {
    pub id: i32,
    pub rating: i8,
    pub region_id: String,
    pub division_id: String,
    pub subdivision_id: Option<String>,
}

#[derive(Clone)]
pub struct VatsimClient {
    client: Client,
    datafeed_url: String,
    api_base: String,
}

impl VatsimClient {
    pub fn new_with_client(
        client: Client,
        datafeed_url: impl ToString,
        api_base: impl ToString,
    ) -> Self {
        Self {
            client,
            datafeed_url: datafeed_url.to_string(),
            api_base: api_base.to_string(),
        }
    }

    pub async fn fetch_datafeed(&self) -> Result<Datafeed, reqwest::Error> {
        self.client
            .get(&self.datafeed_url)
            .send()
            .await?
            .error_for_status()?
            .json::<Datafeed>()
            .await
    }

    pub async fn get_member(&self, cid: i32) -> Result<VatsimMember, reqwest::Error> {
        let url = format!("{}/members/{cid}", self.api_base);
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<VatsimMember>()
            .await
    }
}
