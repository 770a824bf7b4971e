use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub const API_BASE: &str = "https://api.vatusa.net/v2";

/// Facility code VATUSA uses for members of non-VATUSA divisions.
pub const NON_MEMBER_FACILITY: &str = "ZZN";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Home,
    Visit,
    #[serde(other)]
    Unknown,
}

pub enum RosterMembership {
    Home,
    Visit,
    Both,
}

impl Display for RosterMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Home => write!(f, "home"),
            Self::Visit => write!(f, "visit"),
            Self::Both => write!(f, "both"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RosterController {
    pub cid: i32,
    pub fname: String,
    pub lname: String,
    pub email: Option<String>,
    pub facility: String,
    pub rating: i32,
    pub rating_short: String,
    pub membership: Membership,
    pub facility_join: Option<String>,
}

#[derive(Deserialize)]
struct RosterResponse {
    data: Vec<RosterController>,
}

#[derive(Deserialize)]
struct UserResponse {
    data: UserFacility,
}

#[derive(Deserialize)]
struct UserFacility {
    facility: String,
}

#[derive(Clone)]
pub struct VatusaClient {
    client: Client,
    api_base: String,
    api_key: String,
    facility: String,
    test_mode: bool,
}

impl VatusaClient {
    pub fn new_with_client(
        client: Client,
        api_base: impl ToString,
        api_key: impl ToString,
        facility: impl ToString,
        test_mode: bool,
    ) -> Self {
        Self {
            client,
            api_base: api_base.to_string(),
            api_key: api_key.to_string(),
            facility: facility.to_string(),
            test_mode,
        }
    }

    pub async fn get_facility_roster(
        &self,
        membership: RosterMembership,
    ) -> Result<Vec<RosterController>, reqwest::Error> {
        let url = format!(
            "{}/facility/{}/roster/{membership}",
            self.api_base, self.facility
        );
        self.authenticated_get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<RosterResponse>()
            .await
            .map(|r| r.data)
    }

    /// Returns the VATUSA facility of a user. Users not assigned to a facility
    /// are reported as `ZAE`.
    pub async fn get_user_facility(&self, cid: i32) -> Result<String, reqwest::Error> {
        let url = format!("{}/user/{cid}", self.api_base);
        self.authenticated_get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<UserResponse>()
            .await
            .map(|r| r.data.facility)
    }

    fn authenticated_get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url).query(&[("apikey", &self.api_key)]);
        if self.test_mode {
            request.query(&[("test", "true")])
        } else {
            request
        }
    }
}
