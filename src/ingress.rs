use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::watch;
use tracing::{error, info, trace, warn};

use crate::config::CaptureConfig;

/// Downstream stage of the receive loop. The pipeline driver implements this;
///  an alternate transport front-end delivering the same tuple would plug in
///  here unchanged.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketSink: Send + Sync + 'static {
    async fn on_packet(&self, packet_id: u32, port: u16, data: &[u8], src: Ipv4Addr);
}

/// Owns the two multicast receive sockets and drives the capture loop.
pub struct Ingress {
    sockets: [(UdpSocket, u16); 2],
    max_buf: usize,
    stop: watch::Receiver<bool>,
}

impl Ingress {
    /// Binds both ports and joins the multicast group on each socket.
    ///  Failures here are fatal - there is no point starting a capture
    ///  that cannot see the feed.
    pub fn new(config: &CaptureConfig, stop: watch::Receiver<bool>) -> anyhow::Result<Ingress> {
        let socket1 = create_multicast_socket(config.multicast_group, config.port1, config.recv_buffer_size)
            .with_context(|| format!("setting up receive socket on port {}", config.port1))?;
        let socket2 = create_multicast_socket(config.multicast_group, config.port2, config.recv_buffer_size)
            .with_context(|| format!("setting up receive socket on port {}", config.port2))?;

        // the actually bound ports, so records stay correct when a port was
        //  configured as 0 (ephemeral)
        let port1 = socket1.local_addr()?.port();
        let port2 = socket2.local_addr()?.port();

        Ok(Ingress {
            sockets: [(socket1, port1), (socket2, port2)],
            max_buf: config.max_buf,
            stop,
        })
    }

    /// The ports the two sockets are bound to.
    pub fn ports(&self) -> (u16, u16) {
        (self.sockets[0].1, self.sockets[1].1)
    }

    /// Receives from both sockets until the stop signal fires or a socket
    ///  fails hard. Every datagram gets the next `packet_id` (monotonic
    ///  across both ports, starting at 1) and is delivered synchronously to
    ///  the sink - the sink returns before the next datagram is read.
    pub async fn run(&mut self, sink: &dyn PacketSink) -> anyhow::Result<()> {
        info!("starting capture loop on ports {} and {}", self.sockets[0].1, self.sockets[1].1);

        let mut buf = vec![0u8; self.max_buf];
        let mut packet_id: u32 = 0;

        loop {
            // readiness first, then a non-blocking read, so one receive
            //  buffer serves both sockets
            let (ready, port) = select! {
                _ = self.stop.changed() => {
                    info!("stop requested, leaving capture loop");
                    return Ok(());
                }
                ready = self.sockets[0].0.readable() => (ready, self.sockets[0].1),
                ready = self.sockets[1].0.readable() => (ready, self.sockets[1].1),
            };
            if let Err(e) = ready {
                error!("socket error on port {}: {}", port, e);
                return Err(e).with_context(|| format!("waiting for data on port {}", port));
            }

            let socket = if port == self.sockets[0].1 { &self.sockets[0].0 } else { &self.sockets[1].0 };
            match socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    packet_id += 1;
                    trace!("packet #{}: {} bytes from {:?} on port {}", packet_id, len, from, port);
                    sink.on_packet(packet_id, port, &buf[..len], source_ip(from)).await;
                }
                Err(e) if is_transient(&e) => {
                    trace!("transient receive error on port {}: {}", port, e);
                }
                Err(e) => {
                    error!("socket error on port {}: {}", port, e);
                    return Err(e).with_context(|| format!("receiving on port {}", port));
                }
            }
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}

fn source_ip(from: SocketAddr) -> Ipv4Addr {
    match from.ip() {
        IpAddr::V4(ip) => ip,
        // cannot happen on an IPv4 socket; recorded as 0.0.0.0 rather than
        //  dropping the packet
        IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    }
}

/// The socket setup the feed requires: address reuse (multiple captures on
///  one host), a large receive buffer (bursts at the open overwhelm the
///  default), group membership on the any-address interface, non-blocking
///  for the tokio reactor.
fn create_multicast_socket(
    group: Ipv4Addr,
    port: u16,
    recv_buffer_size: usize,
) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
        warn!("failed to set receive buffer to {} bytes on port {}: {}", recv_buffer_size, port, e);
    }
    else {
        let granted = socket.recv_buffer_size()?;
        if granted < recv_buffer_size {
            warn!(
                "kernel granted a {} byte receive buffer on port {} ({} requested); expect drops under burst",
                granted, port, recv_buffer_size
            );
        }
    }

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("binding to {}", bind_addr))?;
    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .with_context(|| format!("joining multicast group {}", group))?;
    socket.set_nonblocking(true)?;

    info!("listening on port {}, joined {}", port, group);
    UdpSocket::from_std(socket.into()).context("registering socket with the runtime")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Loopback test of the capture loop: datagrams sent to the bound ports
    ///  are delivered to the sink with monotonic packet ids, and the stop
    ///  signal ends the loop. Needs a multicast-capable interface; skipped
    ///  where the environment has none.
    #[tokio::test]
    async fn test_capture_loop_delivers_and_stops() {
        let mut config = CaptureConfig::default_feed();
        config.port1 = 0;
        config.port2 = 0;
        config.recv_buffer_size = 1024 * 1024;

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut ingress = match Ingress::new(&config, stop_rx) {
            Ok(ingress) => ingress,
            Err(e) => {
                eprintln!("skipping capture loop test, no multicast-capable interface: {:#}", e);
                return;
            }
        };
        let (port1, port2) = ingress.ports();
        assert_ne!(port1, 0);
        assert_ne!(port2, 0);

        let seen: Arc<Mutex<Vec<(u32, u16)>>> = Default::default();
        let (delivered_tx, mut delivered_rx) = tokio::sync::mpsc::unbounded_channel();

        let mut sink = MockPacketSink::new();
        let seen_by_sink = seen.clone();
        sink.expect_on_packet()
            .times(2)
            .withf(|_, _, data, src| data == [1u8, 2, 3, 4] && src == &Ipv4Addr::new(127, 0, 0, 1))
            .returning(move |packet_id, port, _, _| {
                seen_by_sink.lock().unwrap().push((packet_id, port));
                delivered_tx.send(()).ok();
            });
        let sink = Arc::new(sink);

        let capture = {
            let sink = sink.clone();
            tokio::spawn(async move { ingress.run(sink.as_ref()).await })
        };

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[1, 2, 3, 4], ("127.0.0.1", port1)).unwrap();
        sender.send_to(&[1, 2, 3, 4], ("127.0.0.1", port2)).unwrap();

        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(5), delivered_rx.recv())
                .await
                .expect("datagram was not delivered to the sink")
                .unwrap();
        }

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), capture)
            .await
            .expect("capture loop did not observe the stop signal")
            .unwrap()
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|&(id, _)| id).collect::<Vec<_>>(), vec![1, 2]);
        let ports: Vec<u16> = seen.iter().map(|&(_, port)| port).collect();
        assert!(ports.contains(&port1) && ports.contains(&port2));
    }
}

