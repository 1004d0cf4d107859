//! Rewrite interceptor for rule-based payload modification

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smock_core::connection::{Payload, SharedConnection};
use smock_core::error::{ConfigError, SmockResult};
use smock_core::interceptor::{HookResult, Inbound, Interceptor, InterceptorStats};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

/// Which traffic a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Messages received from the server
    Inbound,
    /// Messages sent by the application
    Outbound,
    /// Both directions
    #[default]
    Both,
}

impl Direction {
    fn covers(self, other: Direction) -> bool {
        self == Direction::Both || self == other
    }
}

/// Operations a rule can perform on a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum RewriteOperation {
    /// Replace every occurrence of a literal string
    Replace { from: String, to: String },
    /// Replace every match of a regular expression
    RegexReplace { pattern: String, replacement: String },
    /// Uppercase the whole text
    Uppercase,
    /// Lowercase the whole text
    Lowercase,
    /// Replace the whole payload with a fixed text
    Set { value: String },
    /// Parse the text as JSON and set the field at a dotted path
    JsonSet { path: String, value: Value },
    /// Parse the text as JSON and remove the field at a dotted path
    JsonRemove { path: String },
    /// Drop the message (inbound only)
    Drop,
}

fn any_url() -> String {
    ".*".to_string()
}

/// A rule for rewriting payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteRule {
    /// Name of this rule
    pub name: String,
    /// URL pattern (regular expression) the rule applies to
    #[serde(default = "any_url")]
    pub url_pattern: String,
    /// Direction the rule applies to
    #[serde(default)]
    pub direction: Direction,
    /// Rewrite operation
    pub operation: RewriteOperation,
}

impl RewriteRule {
    /// Rule applying `operation` to every URL in both directions.
    pub fn new(name: impl Into<String>, operation: RewriteOperation) -> Self {
        Self {
            name: name.into(),
            url_pattern: any_url(),
            direction: Direction::Both,
            operation,
        }
    }

    /// Restrict the rule to URLs matching `pattern`.
    pub fn for_urls(mut self, pattern: impl Into<String>) -> Self {
        self.url_pattern = pattern.into();
        self
    }

    /// Restrict the rule to one direction.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    fn invalid(&self, parameter: &str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            parameter: format!("rules.{}.{}", self.name, parameter),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn compile(&self) -> SmockResult<CompiledRule> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                parameter: "rules.name".to_string(),
                value: String::new(),
                reason: "rule names must not be empty".to_string(),
            }
            .into());
        }

        let url = Regex::new(&self.url_pattern)
            .map_err(|e| self.invalid("url_pattern", &self.url_pattern, e.to_string()))?;

        let pattern = match &self.operation {
            RewriteOperation::RegexReplace { pattern, .. } => Some(
                Regex::new(pattern).map_err(|e| self.invalid("pattern", pattern, e.to_string()))?,
            ),
            RewriteOperation::Drop if self.direction.covers(Direction::Outbound) => {
                return Err(self
                    .invalid(
                        "direction",
                        "outbound",
                        "outbound messages cannot be dropped; use direction: inbound",
                    )
                    .into());
            }
            RewriteOperation::JsonSet { path, .. } | RewriteOperation::JsonRemove { path }
                if path.is_empty() =>
            {
                return Err(self.invalid("path", path, "JSON path must not be empty").into());
            }
            _ => None,
        };

        Ok(CompiledRule {
            rule: self.clone(),
            url,
            pattern,
        })
    }
}

/// Outcome of applying one rule.
enum Applied {
    Payload(Payload),
    Drop,
}

struct CompiledRule {
    rule: RewriteRule,
    url: Regex,
    pattern: Option<Regex>,
}

impl CompiledRule {
    fn applies(&self, url: &str, direction: Direction) -> bool {
        self.rule.direction.covers(direction) && self.url.is_match(url)
    }

    /// Apply this rule to a payload. Text operations leave binary payloads alone.
    fn apply(&self, payload: Payload) -> anyhow::Result<Applied> {
        if let RewriteOperation::Drop = self.rule.operation {
            return Ok(Applied::Drop);
        }

        let text = match payload {
            Payload::Text(text) => text,
            binary => return Ok(Applied::Payload(binary)),
        };

        let rewritten = match &self.rule.operation {
            RewriteOperation::Replace { from, to } => text.replace(from.as_str(), to),
            RewriteOperation::RegexReplace { replacement, .. } => match &self.pattern {
                Some(pattern) => pattern.replace_all(&text, replacement.as_str()).into_owned(),
                None => bail!("rule '{}' has no compiled pattern", self.rule.name),
            },
            RewriteOperation::Uppercase => text.to_uppercase(),
            RewriteOperation::Lowercase => text.to_lowercase(),
            RewriteOperation::Set { value } => value.clone(),
            RewriteOperation::JsonSet { path, value } => {
                let mut document = parse_json(&self.rule.name, &text)?;
                set_at_path(&mut document, &split_path(path), value.clone())?;
                serde_json::to_string(&document)?
            }
            RewriteOperation::JsonRemove { path } => {
                let mut document = parse_json(&self.rule.name, &text)?;
                remove_at_path(&mut document, &split_path(path))?;
                serde_json::to_string(&document)?
            }
            RewriteOperation::Drop => return Ok(Applied::Drop),
        };

        Ok(Applied::Payload(Payload::Text(rewritten)))
    }
}

fn parse_json(rule: &str, text: &str) -> anyhow::Result<Value> {
    serde_json::from_str(text).with_context(|| format!("rule '{}' expects a JSON payload", rule))
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

/// Set `new_value` at `path`, creating intermediate objects as needed.
fn set_at_path(value: &mut Value, path: &[&str], new_value: Value) -> anyhow::Result<()> {
    let (field, parents) = path.split_last().ok_or_else(|| anyhow!("empty path"))?;

    let mut current = value;
    for part in parents {
        let object = current
            .as_object_mut()
            .ok_or_else(|| anyhow!("cannot descend into non-object at '{}'", part))?;
        current = object
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    current
        .as_object_mut()
        .ok_or_else(|| anyhow!("cannot set field '{}' on non-object", field))?
        .insert(field.to_string(), new_value);
    Ok(())
}

/// Remove the field at `path`. A missing path is not an error.
fn remove_at_path(value: &mut Value, path: &[&str]) -> anyhow::Result<()> {
    let (field, parents) = path.split_last().ok_or_else(|| anyhow!("empty path"))?;

    let mut current = value;
    for part in parents {
        match current.get_mut(*part) {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }

    if let Some(object) = current.as_object_mut() {
        object.remove(*field);
    }
    Ok(())
}

/// Interceptor that applies rewrite rules to payloads
pub struct RewriteInterceptor {
    name: String,
    stats: Arc<RwLock<InterceptorStats>>,
    rules: Vec<CompiledRule>,
}

impl RewriteInterceptor {
    /// Create a rewrite interceptor, validating every rule.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` when a rule has an empty name, a regular
    /// expression that does not compile, an empty JSON path, or drops
    /// outbound messages.
    pub fn new(rules: Vec<RewriteRule>) -> SmockResult<Self> {
        let rules = rules
            .iter()
            .map(RewriteRule::compile)
            .collect::<SmockResult<Vec<_>>>()?;

        Ok(Self {
            name: "rewrite".to_string(),
            stats: Arc::new(RwLock::new(InterceptorStats::default())),
            rules,
        })
    }

    /// Set the name used in logs
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// List all rules
    pub fn list_rules(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.rule.name.clone()).collect()
    }

    /// Names of the rules that apply to `url`
    pub fn rules_for(&self, url: &str) -> Vec<String> {
        self.rules
            .iter()
            .filter(|r| r.url.is_match(url))
            .map(|r| r.rule.name.clone())
            .collect()
    }

    /// Statistics over message and send hooks
    pub async fn stats(&self) -> InterceptorStats {
        self.stats.read().await.clone()
    }

    async fn rewrite(&self, payload: Payload, url: &str, direction: Direction) -> HookResult<Applied> {
        let start = Instant::now();
        let original = payload.clone();
        let mut current = payload;

        for rule in self.rules.iter().filter(|r| r.applies(url, direction)) {
            match rule.apply(current)? {
                Applied::Payload(next) => {
                    debug!("[{}] Applied rule: {}", self.name, rule.rule.name);
                    current = next;
                }
                Applied::Drop => {
                    debug!("[{}] Rule '{}' dropped the message", self.name, rule.rule.name);
                    self.stats.write().await.record(start.elapsed(), false, true);
                    return Ok(Applied::Drop);
                }
            }
        }

        self.stats
            .write()
            .await
            .record(start.elapsed(), current != original, false);
        Ok(Applied::Payload(current))
    }
}

#[async_trait]
impl Interceptor for RewriteInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, url: &str) -> bool {
        self.rules.iter().any(|rule| rule.url.is_match(url))
    }

    async fn on_message(&self, payload: Payload, connection: &SharedConnection) -> HookResult<Inbound> {
        match self.rewrite(payload, &connection.url(), Direction::Inbound).await? {
            Applied::Payload(payload) => Ok(Inbound::Forward(payload)),
            Applied::Drop => Ok(Inbound::Drop),
        }
    }

    async fn on_send(&self, payload: Payload, connection: &SharedConnection) -> HookResult<Payload> {
        match self.rewrite(payload, &connection.url(), Direction::Outbound).await? {
            Applied::Payload(payload) => Ok(payload),
            Applied::Drop => bail!("outbound messages cannot be dropped"),
        }
    }
}

impl std::fmt::Debug for RewriteInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteInterceptor")
            .field("name", &self.name)
            .field("rules", &self.list_rules())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use smock_core::connection::{ConnectOptions, MemoryConnection};
    use smock_core::error::SmockError;

    fn connection(url: &str) -> SharedConnection {
        Arc::new(MemoryConnection::new(url, ConnectOptions::default()))
    }

    async fn send_through(rules: Vec<RewriteRule>, text: &str) -> Payload {
        let interceptor = RewriteInterceptor::new(rules).unwrap();
        interceptor
            .on_send(Payload::text(text), &connection("wss://x"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_text_operations_chain_in_order() {
        let out = send_through(
            vec![
                RewriteRule::new(
                    "swap",
                    RewriteOperation::Replace {
                        from: "cat".to_string(),
                        to: "dog".to_string(),
                    },
                ),
                RewriteRule::new(
                    "digits",
                    RewriteOperation::RegexReplace {
                        pattern: r"\d+".to_string(),
                        replacement: "#".to_string(),
                    },
                ),
                RewriteRule::new("shout", RewriteOperation::Uppercase),
            ],
            "cat 42 cat",
        )
        .await;

        assert_eq!(out, Payload::text("DOG # DOG"));
    }

    #[tokio::test]
    async fn test_json_set_and_remove() {
        let out = send_through(
            vec![
                RewriteRule::new(
                    "debug-flag",
                    RewriteOperation::JsonSet {
                        path: "meta.debug".to_string(),
                        value: json!(true),
                    },
                ),
                RewriteRule::new(
                    "strip-token",
                    RewriteOperation::JsonRemove {
                        path: "auth.token".to_string(),
                    },
                ),
            ],
            r#"{"auth":{"token":"secret","user":"u"}}"#,
        )
        .await;

        let value: Value = serde_json::from_str(out.as_text().unwrap()).unwrap();
        assert_eq!(value, json!({"auth": {"user": "u"}, "meta": {"debug": true}}));
    }

    #[tokio::test]
    async fn test_json_operation_on_plain_text_fails() {
        let interceptor = RewriteInterceptor::new(vec![RewriteRule::new(
            "needs-json",
            RewriteOperation::JsonRemove {
                path: "x".to_string(),
            },
        )])
        .unwrap();

        let err = interceptor
            .on_send(Payload::text("not json"), &connection("wss://x"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("expects a JSON payload"));
    }

    #[tokio::test]
    async fn test_direction_and_url_filtering() {
        let interceptor = RewriteInterceptor::new(vec![
            RewriteRule::new("in-only", RewriteOperation::Lowercase).direction(Direction::Inbound),
            RewriteRule::new(
                "chat-only",
                RewriteOperation::Set {
                    value: "replaced".to_string(),
                },
            )
            .for_urls("^wss://chat"),
        ])
        .unwrap();

        let feed = connection("wss://feed");
        assert_eq!(
            interceptor.on_send(Payload::text("ABC"), &feed).await.unwrap(),
            Payload::text("ABC")
        );
        assert_eq!(
            interceptor.on_message(Payload::text("ABC"), &feed).await.unwrap(),
            Inbound::Forward(Payload::text("abc"))
        );

        let chat = connection("wss://chat");
        assert_eq!(
            interceptor.on_send(Payload::text("ABC"), &chat).await.unwrap(),
            Payload::text("replaced")
        );
        assert_eq!(interceptor.rules_for("wss://chat"), vec!["in-only", "chat-only"]);
    }

    #[tokio::test]
    async fn test_drop_inbound() {
        let interceptor = RewriteInterceptor::new(vec![RewriteRule::new(
            "no-heartbeats",
            RewriteOperation::Drop,
        )
        .direction(Direction::Inbound)])
        .unwrap();

        let verdict = interceptor
            .on_message(Payload::text("heartbeat"), &connection("wss://x"))
            .await
            .unwrap();
        assert_eq!(verdict, Inbound::Drop);
        assert_eq!(interceptor.stats().await.total_dropped, 1);
    }

    #[tokio::test]
    async fn test_binary_payloads_skip_text_operations() {
        let out = RewriteInterceptor::new(vec![RewriteRule::new("shout", RewriteOperation::Uppercase)])
            .unwrap()
            .on_send(Payload::binary(vec![0x61u8]), &connection("wss://x"))
            .await
            .unwrap();
        assert_eq!(out, Payload::binary(vec![0x61u8]));
    }

    #[test]
    fn test_validation() {
        assert_matches!(
            RewriteInterceptor::new(vec![RewriteRule::new("drop-all", RewriteOperation::Drop)]),
            Err(SmockError::Config(ConfigError::InvalidValue { .. }))
        );
        assert_matches!(
            RewriteInterceptor::new(vec![RewriteRule::new("", RewriteOperation::Uppercase)]),
            Err(SmockError::Config(ConfigError::InvalidValue { .. }))
        );
        assert_matches!(
            RewriteInterceptor::new(vec![RewriteRule::new(
                "bad-regex",
                RewriteOperation::RegexReplace {
                    pattern: "(".to_string(),
                    replacement: String::new(),
                },
            )]),
            Err(SmockError::Config(ConfigError::InvalidValue { .. }))
        );
        assert!(RewriteInterceptor::new(vec![
            RewriteRule::new("u", RewriteOperation::Uppercase).for_urls("[")
        ])
        .is_err());
    }

    #[test]
    fn test_rule_deserialization() {
        let rule: RewriteRule = serde_json::from_value(json!({
            "name": "mask",
            "direction": "inbound",
            "operation": {"type": "regex_replace", "pattern": "\\d{4}", "replacement": "****"}
        }))
        .unwrap();

        assert_eq!(rule.url_pattern, ".*");
        assert_eq!(rule.direction, Direction::Inbound);
        assert_matches!(rule.operation, RewriteOperation::RegexReplace { .. });
    }
}
