//! Today's events from the user's primary Google Calendar.

use chrono::{Local, NaiveDate};
use reqwest::header::AUTHORIZATION;
use serde_json::{Value, json};

use crate::auth::{AccessToken, AuthFlow, AuthorizationContext};
use crate::config::AppConfig;
use crate::error::ToolError;
use crate::tools::{MissingTokenPolicy, ToolOutcome, ToolSpec};

pub const GOOGLE_CALENDAR_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
pub const CALENDAR_PROVIDER: &str = "google-cal-provider";
pub const CALENDAR_SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/calendar.readonly"];

const AUTH_REQUIRED_MESSAGE: &str =
    "Google Calendar authentication is required. Please wait while we set up the authorization.";

pub const CALENDAR_SYSTEM_PROMPT: &str = "You are a helpful calendar assistant. Use the Get_calendar_events_today tool
to fetch the user's events for today. If the tool reports that authentication is required,
tell the user to open the authorization link that was shared with them and then ask again.";

/// Inclusive bounds of a calendar day, formatted for the `timeMin` and
/// `timeMax` query parameters.
pub fn day_window(date: NaiveDate) -> (String, String) {
    let day = date.format("%Y-%m-%d");
    (
        format!("{day}T00:00:00-00:00"),
        format!("{day}T23:59:59-00:00"),
    )
}

pub fn today_window() -> (String, String) {
    day_window(Local::now().date_naive())
}

#[derive(Debug, Clone)]
pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for CalendarClient {
    fn default() -> Self {
        Self::with_base_url(GOOGLE_CALENDAR_BASE_URL)
    }
}

impl CalendarClient {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetches single events between `time_min` and `time_max`, ordered by start.
    ///
    /// Always answers with an object carrying an `events` array; failures add
    /// an `error` field and leave the array empty.
    pub async fn events_between(
        &self,
        token: &AccessToken,
        time_min: &str,
        time_max: &str,
    ) -> Value {
        match self.fetch_events(token, time_min, time_max).await {
            Ok(items) => json!({ "events": items }),
            Err(message) => {
                tracing::warn!(error = %message, "calendar request failed");
                json!({ "error": message, "events": [] })
            }
        }
    }

    async fn fetch_events(
        &self,
        token: &AccessToken,
        time_min: &str,
        time_max: &str,
    ) -> Result<Value, String> {
        let response = self
            .http
            .get(format!("{}/calendars/primary/events", self.base_url))
            .query(&[
                ("timeMin", time_min),
                ("timeMax", time_max),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ])
            .header(AUTHORIZATION, format!("Bearer {}", token.secret()))
            .send()
            .await
            .map_err(|err| format!("Google Calendar request failed: {err}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "Google Calendar API error: {} - {body}",
                status.as_u16()
            ));
        }

        let mut payload = response
            .json::<Value>()
            .await
            .map_err(|err| format!("Google Calendar response invalid: {err}"))?;

        let items = payload
            .get_mut("items")
            .map(Value::take)
            .filter(Value::is_array)
            .unwrap_or_else(|| json!([]));
        Ok(items)
    }
}

pub fn calendar_events_today_tool(config: &AppConfig) -> ToolSpec {
    ToolSpec::new(
        "Get_calendar_events_today",
        "Retrieve today's events from the user's primary Google Calendar.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {},
        "required": [],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .requires_access(
        AuthorizationContext::new(CALENDAR_PROVIDER, config.callback_url.clone())
            .scopes(CALENDAR_SCOPES)
            .auth_flow(AuthFlow::UserFederation)
            .force_authentication(true),
        MissingTokenPolicy::report(AUTH_REQUIRED_MESSAGE),
    )
    .with_handler(|_args, ctx| async move {
        let Some(token) = ctx.access_token().cloned() else {
            return Err(ToolError::Execution(
                "Google Calendar access token was not injected".to_string(),
            ));
        };
        let client = ctx
            .dependency::<CalendarClient>()
            .map(|client| client.as_ref().clone())
            .unwrap_or_default();
        let (time_min, time_max) = today_window();
        Ok(ToolOutcome::Json(
            client.events_between(&token, &time_min, &time_max).await,
        ))
    })
}
