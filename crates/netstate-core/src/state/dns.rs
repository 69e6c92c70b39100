//! DNS resolver configuration

use super::merge::{inherit, Merge};
use serde::{Deserialize, Serialize};

/// Nameservers and search domains, both order-sensitive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<Vec<String>>,
}

impl DnsConfig {
    pub fn new<S: Into<String>>(
        server: impl IntoIterator<Item = S>,
        search: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            server: Some(server.into_iter().map(Into::into).collect()),
            search: Some(search.into_iter().map(Into::into).collect()),
        }
    }

    /// Omitted lists become empty
    pub fn normalized(&self) -> DnsConfig {
        DnsConfig {
            server: Some(self.server.clone().unwrap_or_default()),
            search: Some(self.search.clone().unwrap_or_default()),
        }
    }
}

impl Merge for DnsConfig {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.server, &current.server);
        inherit(&mut self.search, &current.search);
    }
}

/// `dns-resolver` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<DnsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<DnsConfig>,
}
