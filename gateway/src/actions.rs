//! Gateway actions
//!
//! Every action holds the shared [`GatewayClient`] and reads the bearer
//! token from the user's [`GatewaySession`].

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::StatusCode;
use swarm_bench_core::{ActionError, ActionResult, UserAction, UserContext};

use crate::client::{expect_success, GatewayClient};

/// Per-user session state
#[derive(Debug, Clone, Default)]
pub struct GatewaySession {
    /// Bearer token obtained by the start hook
    pub token: Option<String>,
}

impl GatewaySession {
    fn bearer(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// Search terms drawn by [`Search`]
pub const SEARCH_TERMS: [&str; 4] = ["book", "movie", "music", "game"];

/// Endpoints hit by [`FloodRequests`]
pub const FLOOD_ENDPOINTS: [&str; 4] = [
    "/public/content",
    "/private/data",
    "/search?q=test",
    "/cached/content",
];

/// Requests sent by one [`RateLimitProbe`] call
pub const RATE_LIMIT_BURST: usize = 20;

/// Requests sent by one [`FloodRequests`] call
pub const FLOOD_REQUESTS: usize = 50;

/// Size of the oversized payload sent by [`ErrorConditions`]
pub const LARGE_PAYLOAD_BYTES: usize = 10_000;

macro_rules! gateway_action {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            client: Arc<GatewayClient>,
        }

        impl $name {
            /// Create the action over a shared client
            pub fn new(client: Arc<GatewayClient>) -> Self {
                Self { client }
            }
        }
    };
}

gateway_action!(
    /// Start hook: `POST /auth/login` and keep the access token
    Login
);
gateway_action!(
    /// `GET /public/content` without credentials
    PublicContent
);
gateway_action!(
    /// `GET /private/data` with the bearer token
    PrivateContent
);
gateway_action!(
    /// `POST /data` with a random record
    PostData
);
gateway_action!(
    /// `GET /search?q=<term>` with a random term
    Search
);
gateway_action!(
    /// `GET /cached/content`
    CachedContent
);
gateway_action!(
    /// Burst of `GET /api/limited`; 429 answers are expected
    RateLimitProbe
);
gateway_action!(
    /// Invalid token, unknown endpoint and oversized payload
    ///
    /// Succeeds when the gateway rejects each case the expected way.
    ErrorConditions
);
gateway_action!(
    /// Burst of unauthenticated requests to random endpoints
    FloodRequests
);

#[async_trait]
impl UserAction<GatewaySession> for Login {
    async fn call(&self, ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let token = self.client.login().await?;
        tracing::debug!(user_id = %ctx.user_id(), "Logged in");
        ctx.session.token = Some(token);
        Ok(())
    }
}

#[async_trait]
impl UserAction<GatewaySession> for PublicContent {
    async fn call(&self, _ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let status = self.client.get("/public/content", None).await?;
        expect_success(status, "public content")
    }
}

#[async_trait]
impl UserAction<GatewaySession> for PrivateContent {
    async fn call(&self, ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let status = self
            .client
            .get("/private/data", ctx.session.bearer())
            .await?;
        expect_success(status, "private data")
    }
}

#[async_trait]
impl UserAction<GatewaySession> for PostData {
    async fn call(&self, ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let payload = serde_json::json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "value": rand::thread_rng().gen_range(1..=1000),
        });
        let status = self
            .client
            .post_json("/data", &payload, ctx.session.bearer())
            .await?;
        expect_success(status, "post data")
    }
}

#[async_trait]
impl UserAction<GatewaySession> for Search {
    async fn call(&self, ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let term = SEARCH_TERMS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("book");
        let status = self
            .client
            .get(&format!("/search?q={}", term), ctx.session.bearer())
            .await?;
        expect_success(status, "search")
    }
}

#[async_trait]
impl UserAction<GatewaySession> for CachedContent {
    async fn call(&self, _ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let status = self.client.get("/cached/content", None).await?;
        expect_success(status, "cached content")
    }
}

#[async_trait]
impl UserAction<GatewaySession> for RateLimitProbe {
    async fn call(&self, ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let mut limited = 0;
        for _ in 0..RATE_LIMIT_BURST {
            let status = self.client.get("/api/limited", ctx.session.bearer()).await?;
            if status == StatusCode::TOO_MANY_REQUESTS {
                limited += 1;
            } else {
                expect_success(status, "rate limited endpoint")?;
            }
        }
        tracing::trace!(user_id = %ctx.user_id(), limited, "Rate limit probe done");
        Ok(())
    }
}

#[async_trait]
impl UserAction<GatewaySession> for ErrorConditions {
    async fn call(&self, ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let status = self.client.get("/private/data", Some("invalid")).await?;
        if !matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(ActionError::status(
                status.as_u16(),
                "invalid token was not rejected",
            ));
        }

        let status = self.client.get("/invalid/endpoint", None).await?;
        if status != StatusCode::NOT_FOUND {
            return Err(ActionError::status(
                status.as_u16(),
                "unknown endpoint did not answer 404",
            ));
        }

        let payload = serde_json::json!({ "data": "x".repeat(LARGE_PAYLOAD_BYTES) });
        let status = self
            .client
            .post_json("/data", &payload, ctx.session.bearer())
            .await?;
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Ok(());
        }
        expect_success(status, "large payload")
    }
}

#[async_trait]
impl UserAction<GatewaySession> for FloodRequests {
    async fn call(&self, _ctx: &mut UserContext<GatewaySession>) -> ActionResult {
        let mut failed = 0;
        let mut last_failure = None;
        for _ in 0..FLOOD_REQUESTS {
            let endpoint = FLOOD_ENDPOINTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("/public/content");
            let status = self.client.get(endpoint, None).await?;
            if !status.is_success() {
                failed += 1;
                last_failure = Some(status);
            }
        }
        match last_failure {
            Some(status) => Err(ActionError::status(
                status.as_u16(),
                format!("{} of {} flood requests failed", failed, FLOOD_REQUESTS),
            )),
            None => Ok(()),
        }
    }
}
