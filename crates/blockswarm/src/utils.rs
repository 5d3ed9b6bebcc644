//! Utility functions
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::error::Error;

/// A size in bytes with binary units, `1536` is `1.50 KiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    format!("{value:.2} {}", UNITS[unit])
}

/// The address of the interface used to reach the outside world, which is the
/// address other peers can reach us on, in a LAN.
///
/// Connecting an UDP socket doesn't send anything, it only selects a route.
pub async fn local_ip() -> Result<IpAddr, Error> {
    let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await?;
    socket.connect("8.8.8.8:80").await?;
    Ok(socket.local_addr()?.ip())
}

/// A new, empty directory under the system temp dir.
#[cfg(test)]
pub(crate) fn test_dir() -> std::path::PathBuf {
    use rand::{distributions::Alphanumeric, Rng};

    let mut rng = rand::thread_rng();
    let name: String = (0..20).map(|_| rng.sample(Alphanumeric) as char).collect();
    let dir = std::env::temp_dir().join(format!("blockswarm-{name}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_of_blocks_and_files() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(4096), "4.00 KiB");
        assert_eq!(human_size(10_000), "9.77 KiB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(human_size(u64::MAX), "16.00 EiB");
    }
}
