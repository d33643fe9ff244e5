use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use tokio::net::UdpSocket;
use tracing::{info, trace};

use aircon_common::dns::{forge_redirect, MAX_DATAGRAM_LEN};

/// Answers every DNS query on the provisioning network with the portal address.
pub struct DnsResponder {
    socket: UdpSocket,
    answer_ip: Ipv4Addr,
}

impl DnsResponder {
    pub async fn bind(addr: SocketAddr, fallback_ip: Ipv4Addr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind dns responder at {addr}"))?;
        let answer_ip = match socket.local_addr()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => ip,
            _ => fallback_ip,
        };
        Ok(Self { socket, answer_ip })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn answer_ip(&self) -> Ipv4Addr {
        self.answer_ip
    }

    pub async fn run(self) {
        info!("dns responder answering with {}", self.answer_ip);
        let mut frame = [0u8; MAX_DATAGRAM_LEN];
        loop {
            self.process_next_request(&mut frame).await;
        }
    }

    /// Handles one datagram. Anything that is not a plain single-question
    /// query is dropped without a reply.
    pub async fn process_next_request(&self, frame: &mut [u8]) {
        let (len, remote) = match self.socket.recv_from(frame).await {
            Ok(received) => received,
            Err(err) => {
                trace!("dns receive failed: {err}");
                return;
            }
        };

        let response = match forge_redirect(&frame[..len], self.answer_ip) {
            Ok(response) => response,
            Err(err) => {
                trace!("dropping dns datagram from {remote}: {err}");
                return;
            }
        };

        if let Err(err) = self.socket.send_to(&response, remote).await {
            trace!("dns reply to {remote} failed: {err}");
        }
    }
}
