use std::net::IpAddr;

use serde::Serialize;

pub const PAGEVIEW: &str = "pageview";

/// A pageview, with everything needed to report it to the collector.
///
/// `user_agent` and `remote_ip` are sent as request headers of the delivery
/// call and are not part of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageviewEvent {
    #[serde(skip)]
    pub user_agent: String,
    #[serde(skip)]
    pub remote_ip: IpAddr,

    pub domain: String,
    pub name: &'static str,
    pub url: String,
    #[serde(rename = "plausible-event-statuscode")]
    pub status_code: String,
}

impl PageviewEvent {
    pub fn new(
        user_agent: String,
        remote_ip: IpAddr,
        domain: String,
        url: String,
        status_code: u16,
    ) -> Self {
        Self {
            user_agent,
            remote_ip,
            domain,
            name: PAGEVIEW,
            url,
            status_code: status_code.to_string(),
        }
    }
}
