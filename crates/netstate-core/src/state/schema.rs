//! Schema identifiers and sentinel values shared by every state document.

/// Schema identifier accepted in the `schema-version` key
pub const SCHEMA_VERSION: &str = "1";

/// Route metric sentinel meaning "use the host default metric"
pub const USE_DEFAULT_METRIC: i64 = -1;

/// Route table sentinel meaning "use the host default table"
pub const USE_DEFAULT_ROUTE_TABLE: u32 = 0;

/// Route rule priority sentinel meaning "use the host default priority"
pub const USE_DEFAULT_PRIORITY: i64 = -1;

/// Default MTU filled into newly created interfaces
pub const DEFAULT_MTU: u32 = 1500;

/// Default UDP port for VXLAN tunnels (IANA)
pub const DEFAULT_VXLAN_PORT: u16 = 4789;

/// Default team runner
pub const DEFAULT_TEAM_RUNNER: &str = "roundrobin";

/// Section names used when claiming global resources and reporting divergence
pub mod section {
    pub const INTERFACES: &str = "interfaces";
    pub const ROUTES: &str = "routes";
    pub const ROUTE_RULES: &str = "route-rules";
    pub const DNS_RESOLVER: &str = "dns-resolver";
}
