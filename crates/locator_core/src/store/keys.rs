//! Key layout inside the location store.

use std::fmt::Display;

/// Continuous geo-index of every agent.
pub const GEO_INDEX_KEY: &str = "agents:geo";

/// Global set of currently available agents.
pub const AVAILABLE_AGENTS_KEY: &str = "agents:available";

/// Per fine-cell set of available agent ids.
pub fn cell_members_key(cell: impl Display) -> String {
    format!("h3:{cell}:agents")
}

/// JSON attribute record for one agent.
pub fn agent_record_key(agent_id: &str) -> String {
    format!("agent:{agent_id}:location")
}

/// Pub/sub channel carrying live location events for one agent.
pub fn agent_channel(agent_id: &str) -> String {
    format!("agent:{agent_id}:updates")
}

/// Per coarse-cell set of request ids searching for an agent.
pub fn zone_requests_key(cell: impl Display) -> String {
    format!("zone:{cell}:requests")
}

/// JSON demand marker for one request.
pub fn demand_marker_key(request_id: &str) -> String {
    format!("demand:{request_id}")
}

/// Cached surge zone for one coarse cell.
pub fn surge_zone_key(cell: impl Display) -> String {
    format!("surge:{cell}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_embed_identifiers() {
        assert_eq!(cell_members_key("88754e6499fffff"), "h3:88754e6499fffff:agents");
        assert_eq!(agent_record_key("drv-1"), "agent:drv-1:location");
        assert_eq!(agent_channel("drv-1"), "agent:drv-1:updates");
        assert_eq!(zone_requests_key("87754e64dffffff"), "zone:87754e64dffffff:requests");
        assert_eq!(demand_marker_key("req-7"), "demand:req-7");
        assert_eq!(surge_zone_key("87754e64dffffff"), "surge:87754e64dffffff");
    }
}
