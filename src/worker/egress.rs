// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Frame transmission on the bridge's two links
//!
//! One AF_PACKET `SOCK_RAW` socket per interface. Frames arrive fully built
//! (link header included, or bare IP on L3 devices) and go out with a single
//! non-blocking `sendto`. A full device queue is reported as an error and
//! the frame is dropped; nothing is retried.

use anyhow::{Context, Result};
use socket2::{Domain, Socket, Type};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{InterfaceRole, Transmit};

/// Transmit side of one interface
pub struct EgressLink {
    name: String,
    ifindex: i32,
    socket: Socket,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl EgressLink {
    /// Open a send-only AF_PACKET socket for `name` (interface index `ifindex`).
    ///
    /// Protocol 0 on the socket means the kernel delivers no inbound
    /// traffic to it.
    pub fn open(name: &str, ifindex: i32) -> Result<Self> {
        let socket = Socket::new(Domain::PACKET, Type::RAW, None)
            .with_context(|| format!("Failed to create AF_PACKET send socket for {}", name))?;
        socket
            .set_nonblocking(true)
            .with_context(|| format!("Failed to make send socket for {} non-blocking", name))?;

        Ok(Self {
            name: name.to_string(),
            ifindex,
            socket,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        // SAFETY: sockaddr_ll is plain old data; zeroed is a valid value.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = (libc::ETH_P_IP as u16).to_be();
        addr.sll_ifindex = self.ifindex;

        // SAFETY: `frame` is valid for `frame.len()` bytes and `addr` lives
        // across the call.
        let ret = unsafe {
            libc::sendto(
                self.socket.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };

        if ret < 0 {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("sendto on {} failed", self.name));
        }
        if (ret as usize) != frame.len() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            anyhow::bail!(
                "Short send on {}: {} of {} bytes",
                self.name,
                ret,
                frame.len()
            );
        }

        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// (frames sent, frames failed)
    pub fn counters(&self) -> (u64, u64) {
        (
            self.sent.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// `Transmit` backed by one `EgressLink` per role
pub struct PacketTransmitter {
    upstream: EgressLink,
    downstream: EgressLink,
}

impl PacketTransmitter {
    pub fn new(upstream: EgressLink, downstream: EgressLink) -> Self {
        Self {
            upstream,
            downstream,
        }
    }

    pub fn link(&self, role: InterfaceRole) -> &EgressLink {
        match role {
            InterfaceRole::Upstream => &self.upstream,
            InterfaceRole::Downstream => &self.downstream,
        }
    }
}

impl Transmit for PacketTransmitter {
    fn transmit(&self, role: InterfaceRole, frame: &[u8]) -> Result<()> {
        self.link(role).send(frame)
    }
}
