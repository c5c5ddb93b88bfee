use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;

use crate::config::Config;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns the address to check for a server listening on `config`.
///
/// Servers bound to an unspecified address are checked on loopback.
fn check_addr(config: &Config) -> SocketAddr {
    let host = match config.host {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(host, config.port)
}

/// Checks that the server accepts connections on the configured port.
///
/// Every path requires an assertion, so there is no endpoint that could be checked over HTTP.
pub async fn healthcheck(config: Config) -> Result<()> {
    let addr = check_addr(&config);

    tracing::debug!("connecting to {addr}");
    tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .context("timed out connecting to server")?
        .with_context(|| format!("failed to connect to {addr}"))?;

    tracing::info!("OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_loopback_for_unspecified_host() {
        let config = Config {
            port: 9090,
            ..Default::default()
        };
        assert_eq!(check_addr(&config), "127.0.0.1:9090".parse().unwrap());

        let config = Config {
            host: "10.1.2.3".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(check_addr(&config), "10.1.2.3:8080".parse().unwrap());
    }

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            host: "127.0.0.1".parse().unwrap(),
            port: listener.local_addr().unwrap().port(),
            ..Default::default()
        };

        healthcheck(config).await.unwrap();
    }
}
