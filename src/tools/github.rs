//! Private repository listing for the signed-in GitHub user.

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{AccessToken, AuthFlow, AuthorizationContext};
use crate::config::AppConfig;
use crate::error::ToolError;
use crate::tools::{MissingTokenPolicy, ToolOutcome, ToolSpec};

pub const GITHUB_API_BASE_URL: &str = "https://api.github.com";
pub const GITHUB_PROVIDER: &str = "github-provider";
pub const GITHUB_SCOPES: [&str; 2] = ["repo", "read:user"];

const GITHUB_USER_AGENT: &str = concat!("outbound-auth-agents/", env!("CARGO_PKG_VERSION"));

const AUTH_REQUIRED_MESSAGE: &str =
    "GitHub authentication is required. Please wait while we set up the authorization.";

pub const GITHUB_SYSTEM_PROMPT: &str = "You are a GitHub assistant. Use the inspect_github_repos tool to fetch private repositories data.
The inspect_github_repos tool handles token exchange and proper authentication with the GitHub API
to obtain private information for the user.";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositorySearch {
    #[serde(default)]
    items: Vec<Repository>,
}

#[derive(Debug, thiserror::Error)]
enum GitHubError {
    #[error("GitHub API error: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("Error fetching GitHub repositories: {0}")]
    Other(String),
}

impl From<reqwest::Error> for GitHubError {
    fn from(err: reqwest::Error) -> Self {
        GitHubError::Other(err.to_string())
    }
}

/// Thin GitHub REST client. Register one as a dependency to point the tool at
/// another host.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::with_base_url(GITHUB_API_BASE_URL)
    }
}

impl GitHubClient {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Lists the user's repositories, rendered for the model. Failures are
    /// rendered too; this never errors.
    pub async fn inspect_repositories(&self, token: &AccessToken) -> String {
        match self.fetch_repositories(token).await {
            Ok((username, repos)) => format_repositories(&username, &repos),
            Err(err) => {
                tracing::warn!(error = %err, "GitHub request failed");
                err.to_string()
            }
        }
    }

    async fn fetch_repositories(
        &self,
        token: &AccessToken,
    ) -> Result<(String, Vec<Repository>), GitHubError> {
        let user: GitHubUser = self
            .get_json(&format!("{}/user", self.base_url), token, &[])
            .await?;
        let username = user.login.unwrap_or_else(|| "Unknown".to_string());
        tracing::info!("User: {username}");

        let query = format!("user:{username}");
        let search: RepositorySearch = self
            .get_json(
                &format!("{}/search/repositories", self.base_url),
                token,
                &[("q", query.as_str())],
            )
            .await?;
        tracing::info!("Found {} repositories", search.items.len());

        Ok((username, search.items))
    }

    async fn get_json<T>(
        &self,
        url: &str,
        token: &AccessToken,
        query: &[(&str, &str)],
    ) -> Result<T, GitHubError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .get(url)
            .query(query)
            .header(AUTHORIZATION, format!("Bearer {}", token.secret()))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, GITHUB_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

pub fn format_repositories(username: &str, repos: &[Repository]) -> String {
    if repos.is_empty() {
        return format!("No repositories found for {username}.");
    }

    let mut lines = vec![format!("GitHub repositories for {username}:\n")];
    for repo in repos {
        let mut line = format!("📁 {}", repo.name);
        if let Some(language) = repo.language.as_deref().filter(|l| !l.is_empty()) {
            line.push_str(&format!(" ({language})"));
        }
        line.push_str(&format!(" - ⭐ {}", repo.stargazers_count));
        lines.push(line);

        if let Some(description) = repo.description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("   {description}"));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

pub fn inspect_github_repos_tool(config: &AppConfig) -> ToolSpec {
    ToolSpec::new(
        "inspect_github_repos",
        "Inspect and list the user's private GitHub repositories.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {},
        "required": [],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .requires_access(
        AuthorizationContext::new(GITHUB_PROVIDER, config.callback_url.clone())
            .scopes(GITHUB_SCOPES)
            .auth_flow(AuthFlow::UserFederation)
            .force_authentication(false),
        MissingTokenPolicy::report(AUTH_REQUIRED_MESSAGE),
    )
    .with_handler(|_args, ctx| async move {
        // The gate only runs this body once a token was injected.
        let Some(token) = ctx.access_token().cloned() else {
            return Err(ToolError::Execution(
                "GitHub access token was not injected".to_string(),
            ));
        };
        let client = ctx
            .dependency::<GitHubClient>()
            .map(|client| client.as_ref().clone())
            .unwrap_or_default();
        Ok(ToolOutcome::Text(client.inspect_repositories(&token).await))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::{InMemoryTokenBroker, OAuthProviderConfig, TokenBroker};
    use crate::tools::DependencyMap;

    fn repo(name: &str, language: Option<&str>, stars: u64, description: Option<&str>) -> Repository {
        Repository {
            name: name.to_string(),
            language: language.map(str::to_string),
            stargazers_count: stars,
            description: description.map(str::to_string),
        }
    }

    fn deps_with_token(client: GitHubClient) -> DependencyMap {
        let broker = InMemoryTokenBroker::new()
            .with_provider(GITHUB_PROVIDER, OAuthProviderConfig::github("client"));
        broker.store_token(
            GITHUB_PROVIDER,
            &GITHUB_SCOPES,
            AuthFlow::UserFederation,
            AccessToken::new("gho_testtoken123"),
            None,
        );
        let deps = DependencyMap::new();
        deps.insert::<Arc<dyn TokenBroker>>(Arc::new(broker));
        deps.insert(client);
        deps
    }

    #[test]
    fn empty_listing_names_the_user() {
        assert_eq!(
            format_repositories("octocat", &[]),
            "No repositories found for octocat."
        );
    }

    #[test]
    fn listing_includes_language_stars_and_description() {
        let repos = vec![
            repo("relay", Some("Rust"), 42, Some("Streaming relay")),
            repo("notes", None, 0, Some("")),
        ];

        assert_eq!(
            format_repositories("octocat", &repos),
            "GitHub repositories for octocat:\n\n📁 relay (Rust) - ⭐ 42\n   Streaming relay\n\n📁 notes - ⭐ 0\n"
        );
    }

    #[test]
    fn tool_declares_github_authorization() {
        let tool = inspect_github_repos_tool(&AppConfig::new("https://app.test/cb"));
        let context = tool.authorization_context().expect("gated");
        assert_eq!(context.provider_name, "github-provider");
        assert_eq!(context.scopes, vec!["repo", "read:user"]);
        assert_eq!(context.callback_url, "https://app.test/cb");
        assert!(!context.force_authentication);
    }

    #[tokio::test]
    async fn zero_repositories_with_valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer gho_testtoken123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/repositories"))
            .and(query_param("q", "user:octocat"))
            .and(header("authorization", "Bearer gho_testtoken123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "items": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tool = inspect_github_repos_tool(&AppConfig::new("https://app.test/cb"));
        let deps = deps_with_token(GitHubClient::with_base_url(server.uri()));

        let outcome = tool.execute(json!({}), &deps).await.expect("executes");
        assert_eq!(
            outcome,
            ToolOutcome::Text("No repositories found for octocat.".to_string())
        );

        let requests = server.received_requests().await.expect("recording enabled");
        let paths = requests
            .iter()
            .map(|request| request.url.path().to_string())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["/user", "/search/repositories"]);
    }

    #[tokio::test]
    async fn repositories_are_listed_for_the_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/repositories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "name": "relay",
                    "language": "Rust",
                    "stargazers_count": 3,
                    "description": null
                }]
            })))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(server.uri());
        let rendered = client.inspect_repositories(&AccessToken::new("t")).await;
        assert_eq!(
            rendered,
            "GitHub repositories for octocat:\n\n📁 relay (Rust) - ⭐ 3\n"
        );
    }

    #[tokio::test]
    async fn http_failure_is_rendered_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"message":"Bad credentials"}"#),
            )
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(server.uri());
        let rendered = client
            .inspect_repositories(&AccessToken::new("expired"))
            .await;
        assert_eq!(
            rendered,
            r#"GitHub API error: 401 - {"message":"Bad credentials"}"#
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_rendered_as_fetch_error() {
        let client = GitHubClient::with_base_url("http://127.0.0.1:1");
        let rendered = client.inspect_repositories(&AccessToken::new("t")).await;
        assert!(rendered.starts_with("Error fetching GitHub repositories: "));
    }
}
