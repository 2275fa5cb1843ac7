// ABOUTME: Homeserver HTTP client acting as the application service for puppet users
// ABOUTME: Registration handshake at startup, puppet provisioning, room join and message send

use async_trait::async_trait;
use bridge_core::{BridgeError, BridgeResult, RoomClient};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// User namespace claimed by the bridge.
pub const USER_NAMESPACE: &str = "@irc.*";

/// Room alias namespace claimed by the bridge.
pub const ALIAS_NAMESPACE: &str = "#meta.*";

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    hs_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatrixErrorBody {
    #[serde(default)]
    errcode: String,
}

fn http_client() -> BridgeResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {e}")))
}

/// Register the bridge with the homeserver.
///
/// Announces the callback URL and the namespaces the bridge owns. Returns the
/// homeserver token if the server issued one.
pub async fn register(
    homeserver: &str,
    as_token: &str,
    bridge_url: &str,
) -> BridgeResult<Option<String>> {
    let url = format!("{}/_matrix/appservice/v1/register", homeserver);
    let body = json!({
        "as_token": as_token,
        "url": bridge_url,
        "namespaces": {
            "users": [{ "exclusive": true, "regex": USER_NAMESPACE }],
            "aliases": [{ "exclusive": false, "regex": ALIAS_NAMESPACE }],
        }
    });

    let response = http_client()?
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| BridgeError::Registration(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(BridgeError::Registration(format!(
            "homeserver answered {status}: {text}"
        )));
    }

    let parsed: RegisterResponse = response
        .json()
        .await
        .map_err(|e| BridgeError::Registration(format!("unreadable response: {e}")))?;

    tracing::info!(
        homeserver = %homeserver,
        callback = %bridge_url,
        hs_token = parsed.hs_token.is_some(),
        "Registered application service"
    );
    Ok(parsed.hs_token)
}

/// Client-server API calls for the single bridged room, authenticated with
/// the application-service token and masquerading as puppet users.
#[derive(Clone)]
pub struct AppServiceClient {
    http: reqwest::Client,
    homeserver: String,
    as_token: String,
    room_id: String,
}

impl std::fmt::Debug for AppServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServiceClient")
            .field("homeserver", &self.homeserver)
            .field("as_token", &"[REDACTED]")
            .field("room_id", &self.room_id)
            .finish()
    }
}

impl AppServiceClient {
    pub fn new(homeserver: &str, as_token: &str, room_id: &str) -> BridgeResult<Self> {
        Ok(Self {
            http: http_client()?,
            homeserver: homeserver.trim_end_matches('/').to_string(),
            as_token: as_token.to_string(),
            room_id: room_id.to_string(),
        })
    }

    fn room_url(&self, tail: &str) -> String {
        format!(
            "{}/_matrix/client/v3/rooms/{}/{}",
            self.homeserver,
            urlencoding::encode(&self.room_id),
            tail
        )
    }

    /// Create the puppet account if it does not exist yet.
    pub async fn ensure_registered(&self, user_id: &str) -> BridgeResult<()> {
        let localpart = bridge_core::identity::local_part(user_id);
        let response = self
            .http
            .post(format!("{}/_matrix/client/v3/register", self.homeserver))
            .bearer_auth(&self.as_token)
            .json(&json!({
                "type": "m.login.application_service",
                "username": localpart,
            }))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(user_id = %user_id, "Provisioned puppet user");
            return Ok(());
        }

        let body: MatrixErrorBody = response
            .json()
            .await
            .unwrap_or(MatrixErrorBody {
                errcode: String::new(),
            });
        if status == StatusCode::BAD_REQUEST && body.errcode == "M_USER_IN_USE" {
            return Ok(());
        }
        Err(BridgeError::Transport(format!(
            "registering {user_id} failed with {status} {}",
            body.errcode
        )))
    }

    async fn check(response: reqwest::Response, what: &str) -> BridgeResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(BridgeError::Transport(format!("{what} failed with {status}: {text}")))
    }
}

#[async_trait]
impl RoomClient for AppServiceClient {
    async fn join(&self, user_id: &str) -> BridgeResult<()> {
        self.ensure_registered(user_id).await?;

        let response = self
            .http
            .post(self.room_url("join"))
            .bearer_auth(&self.as_token)
            .query(&[("user_id", user_id)])
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        Self::check(response, "room join").await
    }

    async fn send_message(&self, user_id: &str, text: &str) -> BridgeResult<()> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .http
            .put(self.room_url(&format!("send/m.room.message/{txn_id}")))
            .bearer_auth(&self.as_token)
            .query(&[("user_id", user_id)])
            .json(&json!({
                "msgtype": "m.text",
                "body": text,
            }))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        Self::check(response, "message send").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_url_escapes_room_id() {
        let client =
            AppServiceClient::new("https://hs.example.org/", "token", "!room:example.org").unwrap();
        assert_eq!(
            client.room_url("join"),
            "https://hs.example.org/_matrix/client/v3/rooms/%21room%3Aexample.org/join"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let client =
            AppServiceClient::new("https://hs.example.org", "sekrit", "!room:example.org").unwrap();
        assert!(!format!("{client:?}").contains("sekrit"));
    }
}
