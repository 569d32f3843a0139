//! HR system client (SuccessFactors OData v2).
//!
//! Token exchange via the OAuth SAML-bearer grant, then two read-only
//! queries: upcoming departures from `EmpJob`, and user/manager details
//! from `User`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::OffboardConfig;
use crate::error::{CliError, CliResult};

const SAML_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:saml2-bearer";

/// Client for the HR system's OData API.
pub struct HrmsClient {
    base_url: String,
    http: Client,
    token: Option<Token>,
}

#[derive(Debug, Deserialize)]
struct Token {
    access_token: String,
    token_type: String,
}

/// One upcoming departure row from `EmpJob`.
#[derive(Debug, Clone)]
pub struct Departure {
    pub user_id: String,
    pub manager_id: String,
    pub termination_date: DateTime<Utc>,
}

/// User detail record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HrmsUser {
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

impl HrmsClient {
    pub fn new(base_url: &str) -> CliResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("tabsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CliError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            token: None,
        })
    }

    /// Exchange the configured SAML assertion for a bearer token.
    pub async fn authenticate(&mut self, config: &OffboardConfig) -> CliResult<()> {
        let url = format!("{}/oauth/token", self.base_url);
        let resp = self
            .http
            .post(&url)
            .query(&[
                ("company_id", config.company_id.as_str()),
                ("client_id", config.client_id.as_str()),
                ("grant_type", SAML_BEARER_GRANT),
                ("assertion", config.assertion.as_str()),
            ])
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CliError::Hrms(format!(
                "token exchange failed with {status}: {body}"
            )));
        }
        self.token = Some(resp.json().await?);
        debug!("HR system token acquired");
        Ok(())
    }

    fn auth_header(&self) -> CliResult<String> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| CliError::Hrms("not authenticated".into()))?;
        Ok(format!("{} {}", token.token_type, token.access_token))
    }

    /// Users leaving inside the window `[now - lookback, now + lookahead]`.
    ///
    /// Rows with a missing or unparseable termination date are dropped:
    /// the notifier treats missing upstream data as a no-op.
    pub async fn leaving_users(
        &self,
        lookback: Duration,
        lookahead: Duration,
    ) -> CliResult<Vec<Departure>> {
        let now = Utc::now();
        let from = (now - lookback).date_naive();
        let to = (now + lookahead).date_naive().to_string();
        let url = format!("{}/odata/v2/EmpJob", self.base_url);
        let filter = format!(
            "customDate4 ge '{from}' and userNav/status in 't','f','T','F','e','d'"
        );

        let resp = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header()?)
            .header("Accept", "application/json")
            .query(&[
                ("format", "json"),
                ("$select", "userId,managerId,customDate4"),
                ("toDate", to.as_str()),
                ("$filter", filter.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: ODataEnvelope<EmpJobRow> = resp.json().await?;
        let departures = body
            .d
            .results
            .into_iter()
            .filter_map(|row| {
                let termination_date = parse_odata_date(row.custom_date4.as_deref()?)?;
                Some(Departure {
                    user_id: row.user_id,
                    manager_id: row.manager_id?,
                    termination_date,
                })
            })
            .collect();
        Ok(departures)
    }

    /// One user's detail record.
    pub async fn user(&self, user_id: &str) -> CliResult<HrmsUser> {
        let url = format!("{}/odata/v2/User('{user_id}')", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header()?)
            .header("Accept", "application/json")
            .query(&[
                ("format", "json"),
                ("$select", "userId,displayName,email,username"),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body: ODataSingle<HrmsUser> = resp.json().await?;
        Ok(body.d)
    }
}

#[derive(Debug, Deserialize)]
struct ODataEnvelope<T> {
    d: ODataResults<T>,
}

#[derive(Debug, Deserialize)]
struct ODataResults<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ODataSingle<T> {
    d: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmpJobRow {
    user_id: String,
    #[serde(default)]
    manager_id: Option<String>,
    #[serde(default)]
    custom_date4: Option<String>,
}

/// Parse the OData v2 date encoding `/Date(1638316800000)/` (with an
/// optional timezone suffix the epoch value already accounts for).
pub fn parse_odata_date(raw: &str) -> Option<DateTime<Utc>> {
    let start = raw.find('(')? + 1;
    let digits: String = raw[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    let millis: i64 = digits.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_odata_date() {
        let dt = parse_odata_date("/Date(1638316800000)/").unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-12-01T00:00:00+00:00");
    }

    #[test]
    fn parses_date_with_offset_suffix() {
        let dt = parse_odata_date("/Date(1638316800000+0000)/").unwrap();
        assert_eq!(dt.timestamp_millis(), 1_638_316_800_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_odata_date("2021-12-01").is_none());
        assert!(parse_odata_date("/Date(abc)/").is_none());
    }

    #[test]
    fn empjob_row_deserializes() {
        let row: EmpJobRow = serde_json::from_str(
            r#"{"userId":"1001","managerId":"2002","customDate4":"/Date(1638316800000)/"}"#,
        )
        .unwrap();
        assert_eq!(row.user_id, "1001");
        assert_eq!(row.manager_id.as_deref(), Some("2002"));
    }
}
