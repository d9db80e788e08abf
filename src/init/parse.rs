// SPDX-License-Identifier: Apache-2.0

use std::net::{SocketAddr, ToSocketAddrs};
use tower::BoxError;

/// Parse a listen endpoint such as `localhost:8080` or `0.0.0.0:8080`.
pub fn parse_endpoint(s: &str) -> Result<SocketAddr, BoxError> {
    // Use actual localhost address instead of localhost name
    let s = if s.starts_with("localhost:") {
        s.replace("localhost:", "127.0.0.1:")
    } else {
        s.to_string()
    };

    if let Ok(sa) = s.parse::<SocketAddr>() {
        return Ok(sa);
    }

    s.to_socket_addrs()
        .map_err(|e| format!("invalid endpoint '{}': {}", s, e))?
        .next()
        .ok_or_else(|| format!("endpoint '{}' did not resolve to an address", s).into())
}
