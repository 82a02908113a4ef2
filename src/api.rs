//! Client side of the experiment server's node/info routes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::ConfigError;

/// Server-assigned node identifier.
pub type NodeId = u64;

/// Body of `POST /info/{node}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfoPost {
    /// JSON-encoded list of drawing responses.
    pub contents: String,
    pub info_type: String,
}

impl InfoPost {
    pub fn new(contents: String) -> Self {
        Self {
            contents,
            info_type: "Info".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// The server answered with a non-2xx status.
    Status { code: u16, body: String },
    /// Connection, DNS or TLS failure; no response was received.
    Transport(String),
    /// A 2xx response whose body did not have the expected shape.
    Decode(String),
}

impl ApiError {
    /// The `html` error page the server embeds in JSON error bodies, if any.
    pub fn error_html(&self) -> Option<String> {
        let ApiError::Status { body, .. } = self else {
            return None;
        };
        let value: Value = serde_json::from_str(body).ok()?;
        value.get("html")?.as_str().map(str::to_string)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Status { code, .. } => write!(f, "server responded with status {}", code),
            ApiError::Transport(e) => write!(f, "transport error: {}", e),
            ApiError::Decode(e) => write!(f, "unexpected response: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

/// The three routes a drawing session uses. Calls are made one at a time.
pub trait ExperimentApi {
    /// `POST /node/{participant}`: a new node for the participant.
    fn create_node(&mut self, participant_id: &str) -> Result<NodeId, ApiError>;
    /// `GET /node/{node}/received_infos`: the `contents` of the info sent to the node.
    fn received_infos(&mut self, node_id: NodeId) -> Result<String, ApiError>;
    /// `POST /info/{node}`.
    fn post_info(&mut self, node_id: NodeId, info: &InfoPost) -> Result<(), ApiError>;
}

/// `{"node": {"id": N}}`
pub fn parse_node_id(value: &Value) -> Result<NodeId, ApiError> {
    let id = value
        .get("node")
        .and_then(|n| n.get("id"))
        .ok_or_else(|| ApiError::Decode("missing node.id".to_string()))?;
    id.as_u64()
        .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| ApiError::Decode(format!("node.id is not an integer: {}", id)))
}

/// `{"info": {"contents": "..."}}`, or the first entry of an `infos` list.
pub fn parse_info_contents(value: &Value) -> Result<String, ApiError> {
    let info = value
        .get("info")
        .or_else(|| value.get("infos").and_then(|list| list.get(0)))
        .ok_or_else(|| ApiError::Decode("no info received".to_string()))?;
    info.get("contents")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::Decode("info has no string contents".to_string()))
}

/// Blocking HTTP implementation on top of `ureq`.
pub struct HttpExperimentApi {
    base: Url,
    agent: ureq::Agent,
}

impl HttpExperimentApi {
    /// `base` is the server root, e.g. `http://localhost:5000/`.
    pub fn new(base: &str) -> Result<Self, ConfigError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            agent: ureq::AgentBuilder::new().build(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `segments` are appended under the base path, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<String, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("{} cannot take a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }
}

fn check(result: Result<ureq::Response, ureq::Error>) -> Result<ureq::Response, ApiError> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(code, response)) => Err(ApiError::Status {
            code,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => Err(ApiError::Transport(transport.to_string())),
    }
}

fn read_json(response: ureq::Response) -> Result<Value, ApiError> {
    response
        .into_json::<Value>()
        .map_err(|e| ApiError::Decode(e.to_string()))
}

impl ExperimentApi for HttpExperimentApi {
    fn create_node(&mut self, participant_id: &str) -> Result<NodeId, ApiError> {
        let url = self.endpoint(&["node", participant_id])?;
        let response = check(self.agent.post(&url).call())?;
        parse_node_id(&read_json(response)?)
    }

    fn received_infos(&mut self, node_id: NodeId) -> Result<String, ApiError> {
        let id = node_id.to_string();
        let url = self.endpoint(&["node", id.as_str(), "received_infos"])?;
        let response = check(self.agent.get(&url).call())?;
        parse_info_contents(&read_json(response)?)
    }

    fn post_info(&mut self, node_id: NodeId, info: &InfoPost) -> Result<(), ApiError> {
        let id = node_id.to_string();
        let url = self.endpoint(&["info", id.as_str()])?;
        // The server reads request values, so the fields go form-encoded.
        check(self.agent.post(&url).send_form(&[
            ("contents", info.contents.as_str()),
            ("info_type", info.info_type.as_str()),
        ]))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_id_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_node_id(&json!({"node": {"id": 7}})).unwrap(), 7);
        assert_eq!(parse_node_id(&json!({"node": {"id": "12"}})).unwrap(), 12);
        assert!(matches!(
            parse_node_id(&json!({"status": "success"})),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn info_contents_from_either_shape() {
        let single = json!({"info": {"contents": "[1]"}});
        let list = json!({"status": "success", "infos": [{"contents": "[2]"}]});
        assert_eq!(parse_info_contents(&single).unwrap(), "[1]");
        assert_eq!(parse_info_contents(&list).unwrap(), "[2]");
        assert!(parse_info_contents(&json!({"infos": []})).is_err());
    }

    #[test]
    fn error_html_only_from_json_bodies() {
        let e = ApiError::Status {
            code: 403,
            body: r#"{"status":"error","html":"<p>no</p>"}"#.into(),
        };
        assert_eq!(e.error_html().as_deref(), Some("<p>no</p>"));
        let e = ApiError::Status {
            code: 500,
            body: "Internal Server Error".into(),
        };
        assert_eq!(e.error_html(), None);
        assert_eq!(ApiError::Transport("refused".into()).error_html(), None);
    }

    #[test]
    fn endpoints_resolve_under_the_base_path() {
        let api = HttpExperimentApi::new("http://localhost:5000/exp").unwrap();
        assert_eq!(api.base().as_str(), "http://localhost:5000/exp/");
        assert_eq!(
            api.endpoint(&["node", "3", "received_infos"]).unwrap(),
            "http://localhost:5000/exp/node/3/received_infos"
        );
        let root = HttpExperimentApi::new("http://localhost:5000").unwrap();
        assert_eq!(root.endpoint(&["info", "9"]).unwrap(), "http://localhost:5000/info/9");
        assert!(HttpExperimentApi::new("::bad::").is_err());
    }

    #[test]
    fn participant_ids_stay_one_segment() {
        let api = HttpExperimentApi::new("http://localhost:5000/").unwrap();
        assert_eq!(
            api.endpoint(&["node", "a/b?c#d"]).unwrap(),
            "http://localhost:5000/node/a%2Fb%3Fc%23d"
        );
    }

    #[test]
    fn info_post_defaults_to_info_type() {
        let p = InfoPost::new("[]".into());
        assert_eq!(p.info_type, "Info");
    }
}
