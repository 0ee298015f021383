//! Upstream authority bridge.
//!
//! The authority is the web service that issued the ticket. It approves the
//! start of each session (returning a correlation id), records its end, and
//! is told where the core's RPC listener lives once the core is ready.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tpcore_types::{AuthMode, AuthorityError, Protocol, SessionTicket, SysType};
use tracing::debug;

use crate::config::AuthorityConfig;

#[async_trait]
pub trait Authority: Send + Sync {
    /// Reports a session start. Returns the authority's correlation id.
    async fn session_begin(&self, ticket: &SessionTicket) -> Result<i64, AuthorityError>;

    /// Reports a session end with its result code.
    async fn session_end(&self, db_id: i64, result_code: i32) -> Result<(), AuthorityError>;

    /// Announces the core's inbound RPC address.
    async fn register_core(&self, rpc_url: &str) -> Result<(), AuthorityError>;
}

#[derive(Serialize)]
struct RpcCall<'a, P: Serialize> {
    method: &'a str,
    param: P,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Session start report. Carries every ticket field except the credential,
/// which the authority issued and never needs back. The authority's full-ticket
/// report deliberately has no `user_auth` field.
#[derive(Serialize)]
struct SessionBeginParam<'a> {
    sid: &'a str,
    auth_id: i64,
    account_name: &'a str,
    host_ip: &'a str,
    host_port: u16,
    protocol: Protocol,
    auth_mode: AuthMode,
    sys_type: SysType,
    user_name: &'a str,
    user_param: &'a str,
    ticket_start: DateTime<Utc>,
}

impl<'a> From<&'a SessionTicket> for SessionBeginParam<'a> {
    fn from(t: &'a SessionTicket) -> Self {
        Self {
            sid: t.id.as_str(),
            auth_id: t.auth_id,
            account_name: &t.account_name,
            host_ip: &t.host_ip,
            host_port: t.host_port,
            protocol: t.protocol,
            auth_mode: t.auth_mode,
            sys_type: t.sys_type,
            user_name: &t.user_name,
            user_param: &t.user_param,
            ticket_start: t.ticket_start,
        }
    }
}

/// JSON-over-HTTP authority client.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: Client,
    url: String,
}

impl HttpAuthority {
    pub fn new(config: &AuthorityConfig) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<P: Serialize + Send>(
        &self,
        method: &str,
        param: P,
    ) -> Result<Option<Value>, AuthorityError> {
        debug!(method, url = %self.url, "Calling authority");

        let response = self
            .client
            .post(&self.url)
            .json(&RpcCall { method, param })
            .send()
            .await
            .map_err(|e| AuthorityError::Unreachable(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthorityError::Unreachable(format!(
                "{method}: HTTP {status}"
            )));
        }

        let reply: RpcReply = response
            .json()
            .await
            .map_err(|e| AuthorityError::InvalidResponse(format!("{method}: {e}")))?;

        if reply.code != 0 {
            return Err(AuthorityError::Rejected {
                code: reply.code,
                message: reply.message.unwrap_or_default(),
            });
        }
        Ok(reply.data)
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn session_begin(&self, ticket: &SessionTicket) -> Result<i64, AuthorityError> {
        let data = self
            .call("session_begin", SessionBeginParam::from(ticket))
            .await?;
        data.as_ref()
            .and_then(|d| d.get("rid"))
            .and_then(Value::as_i64)
            .ok_or_else(|| AuthorityError::InvalidResponse("session_begin: missing rid".into()))
    }

    async fn session_end(&self, db_id: i64, result_code: i32) -> Result<(), AuthorityError> {
        self.call(
            "session_end",
            serde_json::json!({ "rid": db_id, "code": result_code }),
        )
        .await
        .map(|_| ())
    }

    async fn register_core(&self, rpc_url: &str) -> Result<(), AuthorityError> {
        self.call("register_core", serde_json::json!({ "rpc": rpc_url }))
            .await
            .map(|_| ())
    }
}
