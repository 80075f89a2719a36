use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{
    error::{Error, Result},
    history::DEFAULT_HISTORY_LIMIT,
};

/// Configuration of a telnet channel, taken from the channel's `config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelnetConfig {
    /// Interface to listen on.
    pub host: String,

    /// Port to listen on. `0` picks a free port.
    pub port: u16,

    /// Name reported as the `to` address of inbound messages. Defaults to the
    /// bound `host:port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_name: Option<String>,

    /// Inbound and outbound messages remembered for replies and status
    /// lookups. Older ones are forgotten first.
    pub history_limit: usize,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            transport_name: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl TelnetConfig {
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Self::deserialize(value).map_err(Error::Config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[rstest]
    #[case::empty(json!({}), "127.0.0.1:0")]
    #[case::null(Value::Null, "127.0.0.1:0")]
    #[case::port(json!({"port": 9001}), "127.0.0.1:9001")]
    #[case::host(json!({"host": "0.0.0.0", "port": 23}), "0.0.0.0:23")]
    #[case::extra_keys_ignored(json!({"port": 1, "twitter_handle": "@x"}), "127.0.0.1:1")]
    fn parses(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(TelnetConfig::from_value(&value).unwrap().bind_addr(), expected);
    }

    #[test]
    fn history_limit() {
        assert_eq!(
            TelnetConfig::from_value(&json!({})).unwrap().history_limit,
            DEFAULT_HISTORY_LIMIT
        );
        assert_eq!(
            TelnetConfig::from_value(&json!({"history_limit": 5}))
                .unwrap()
                .history_limit,
            5
        );
    }

    #[rstest]
    #[case::port_as_string(json!({"port": "23"}))]
    #[case::port_out_of_range(json!({"port": 70000}))]
    #[case::not_an_object(json!([1, 2]))]
    fn rejects(#[case] value: Value) {
        assert!(matches!(
            TelnetConfig::from_value(&value),
            Err(Error::Config(_))
        ));
    }
}
