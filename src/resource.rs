//! Topic-to-resource translation.
//!
//! Maps a raw MQTT topic into the `(action, resource path)` pair the policy
//! engine understands. The translation is a pure function of the topic and
//! the intent; it consults no state and is safe to call from any task.

use serde::{Deserialize, Serialize};

/// Namespace prefix of every resource path handed to the policy engine.
pub const NAMESPACE: &str = "dcd";

/// Pattern token the policy engine treats as open-ended.
pub const OPEN_WILDCARD: &str = "*";

/// Whether the client wants to publish to or subscribe on the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Publish,
    Subscribe,
}

/// Action requested against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Update,
    Read,
    Log,
    Reply,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Update => "update",
            Action::Read => "read",
            Action::Log => "log",
            Action::Reply => "reply",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource descriptor produced for a single authorization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub action: Action,
    pub resource: String,
}

/// Translate a topic into the action and resource path to check.
///
/// A trailing `log` or `reply` segment names the action explicitly;
/// otherwise the action follows the intent (`update` for publish, `read`
/// for subscribe). Remaining segments are joined with `:` under the
/// `dcd:` namespace. Topics sometimes carry fully-qualified entity ids in
/// their segments (`/things/dcd:things:ABC/...`); the embedded qualifier is
/// collapsed so the resource path names each entity once.
pub fn translate(topic: &str, intent: Intent) -> ResourceRequest {
    let mut segments: Vec<&str> = topic
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let action = match segments.last().copied() {
        Some("log") => {
            segments.pop();
            Action::Log
        }
        Some("reply") => {
            segments.pop();
            Action::Reply
        }
        _ => match intent {
            Intent::Publish => Action::Update,
            Intent::Subscribe => Action::Read,
        },
    };

    let mut parts: Vec<&str> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let collapsed = if i > 0 {
            strip_qualifier(segment, segments[i - 1])
        } else {
            None
        };
        parts.push(collapsed.unwrap_or(segment));
    }

    let mut resource = format!("{}:{}", NAMESPACE, parts.join(":"));

    // Some clients embed the doubled thing qualifier directly in one segment.
    let doubled = format!("{ns}:things:{ns}:things:", ns = NAMESPACE);
    let single = format!("{}:things:", NAMESPACE);
    while resource.contains(&doubled) {
        resource = resource.replace(&doubled, &single);
    }

    if intent == Intent::Subscribe {
        resource = resource.replace('#', OPEN_WILDCARD);
    }

    ResourceRequest { action, resource }
}

/// If `segment` is a fully-qualified id of the entity named by the previous
/// path segment (`dcd:<previous>:<id>`), return just the id.
fn strip_qualifier<'a>(segment: &'a str, previous: &str) -> Option<&'a str> {
    let rest = segment.strip_prefix(NAMESPACE)?.strip_prefix(':')?;
    let rest = rest.strip_prefix(previous)?.strip_prefix(':')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}
