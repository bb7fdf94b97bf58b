// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interface lookup and socket plumbing for the bridge.
//!
//! - `resolve_interface`: name → index, flags, MAC and IPv4 address (pnet)
//! - `CaptureSocket`: AF_PACKET `SOCK_DGRAM` receive socket for IPv4 on
//!   one interface, all-multicast enabled
//! - `SocketMembership`: host-stack group membership used to pull groups
//!   from the upstream router
//!
//! Everything here needs CAP_NET_RAW (or root) except interface lookup.

use anyhow::{Context, Result};
use pnet::util::MacAddr;
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use crate::logging::{Facility, Logger};
use crate::protocols::frame::{EthernetFrameBuilder, FrameBuilder, RawIpFrameBuilder};
use crate::{GroupMembership, InterfaceRole};

/// Linux interface flags (from if.h)
pub mod interface_flags {
    pub const IFF_UP: u32 = 0x1;
    pub const IFF_BROADCAST: u32 = 0x2;
    pub const IFF_LOOPBACK: u32 = 0x8;
    pub const IFF_POINTOPOINT: u32 = 0x10;
    pub const IFF_RUNNING: u32 = 0x40;
    pub const IFF_MULTICAST: u32 = 0x1000;
}

/// What the bridge needs to know about one of its interfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub flags: u32,
    pub mac: Option<MacAddr>,
    pub ipv4: Option<Ipv4Addr>,
}

impl InterfaceInfo {
    pub fn is_up(&self) -> bool {
        self.flags & interface_flags::IFF_UP != 0
    }

    pub fn is_running(&self) -> bool {
        self.flags & interface_flags::IFF_RUNNING != 0
    }

    pub fn is_multicast(&self) -> bool {
        self.flags & interface_flags::IFF_MULTICAST != 0
    }

    pub fn is_loopback(&self) -> bool {
        self.flags & interface_flags::IFF_LOOPBACK != 0
    }

    pub fn is_point_to_point(&self) -> bool {
        self.flags & interface_flags::IFF_POINTOPOINT != 0
    }

    /// Why multicast cannot be bridged over this interface, if it can't
    pub fn multicast_unsupported_reason(&self) -> Option<String> {
        if !self.is_up() {
            Some("interface is down".to_string())
        } else if !self.is_multicast() {
            if self.is_point_to_point() {
                Some("point-to-point interface without multicast support".to_string())
            } else {
                Some("interface lacks IFF_MULTICAST flag".to_string())
            }
        } else {
            None
        }
    }

    /// Kernel interface index in the form socket APIs take
    pub fn ifindex(&self) -> i32 {
        self.index as i32
    }

    /// Link framing for frames we transmit here: Ethernet when the device
    /// has a hardware address, bare IP on point-to-point (tun-style) links.
    pub fn frame_builder(&self) -> Arc<dyn FrameBuilder> {
        match self.mac {
            Some(mac) if !self.is_point_to_point() => Arc::new(EthernetFrameBuilder::new(mac)),
            _ => Arc::new(RawIpFrameBuilder),
        }
    }
}

impl std::fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut flags = Vec::new();
        if self.is_up() {
            flags.push("UP");
        }
        if self.is_running() {
            flags.push("RUNNING");
        }
        if self.is_multicast() {
            flags.push("MULTICAST");
        }
        if self.is_loopback() {
            flags.push("LOOPBACK");
        }
        if self.is_point_to_point() {
            flags.push("POINTOPOINT");
        }
        write!(f, "{}: <{}> index {}", self.name, flags.join(","), self.index)?;
        if let Some(ipv4) = self.ipv4 {
            write!(f, " inet {}", ipv4)?;
        }
        Ok(())
    }
}

/// Look up an interface by name without checking its capabilities
pub fn find_interface(name: &str) -> Option<InterfaceInfo> {
    pnet::datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .map(|iface| InterfaceInfo {
            ipv4: iface.ips.iter().find_map(|net| match net.ip() {
                IpAddr::V4(addr) => Some(addr),
                IpAddr::V6(_) => None,
            }),
            name: iface.name,
            index: iface.index,
            flags: iface.flags,
            mac: iface.mac,
        })
}

/// Look up an interface and require that it can carry multicast
pub fn resolve_interface(name: &str) -> Result<InterfaceInfo> {
    let info = find_interface(name).with_context(|| format!("Interface not found: {}", name))?;
    if let Some(reason) = info.multicast_unsupported_reason() {
        anyhow::bail!("Interface {} does not support multicast: {}", name, reason);
    }
    Ok(info)
}

/// `struct packet_mreq` from linux/if_packet.h
#[repr(C)]
struct PacketMreq {
    mr_ifindex: libc::c_int,
    mr_type: libc::c_ushort,
    mr_alen: libc::c_ushort,
    mr_address: [libc::c_uchar; 8],
}

const PACKET_MR_ALLMULTI: libc::c_ushort = 2;

/// Receive socket delivering every IPv4 datagram seen arriving on one
/// interface, link header already stripped.
///
/// All-multicast mode is tied to the socket: the kernel drops it when the
/// socket closes, so a crashed bridge leaves no interface flags behind.
pub struct CaptureSocket {
    name: String,
    socket: Socket,
}

impl CaptureSocket {
    /// Receive buffer requested for bursts of upstream multicast
    const RECV_BUFFER_SIZE: i32 = 4 * 1024 * 1024;

    pub fn open(info: &InterfaceInfo, logger: &Logger) -> Result<Self> {
        let protocol = Protocol::from(i32::from((libc::ETH_P_IP as u16).to_be()));
        let socket = Socket::new(Domain::PACKET, Type::DGRAM, Some(protocol))
            .with_context(|| format!("Failed to create AF_PACKET socket for {}", info.name))?;

        bind_to_interface(socket.as_raw_fd(), info.ifindex())
            .with_context(|| format!("Failed to bind AF_PACKET socket to {}", info.name))?;
        enable_allmulti(socket.as_raw_fd(), info.ifindex())
            .with_context(|| format!("Failed to enable all-multicast on {}", info.name))?;
        set_recv_buffer_size(socket.as_raw_fd(), Self::RECV_BUFFER_SIZE, logger);
        socket
            .set_nonblocking(true)
            .with_context(|| format!("Failed to make capture socket on {} non-blocking", info.name))?;

        log_debug!(logger, Facility::Network, "Capture socket open on {}", info);

        Ok(Self {
            name: info.name.clone(),
            socket,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the next datagram that arrived on the interface.
    ///
    /// Our own transmissions loop back to packet sockets as
    /// `PACKET_OUTGOING`; those are skipped. `WouldBlock` means the queue is
    /// drained.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: sockaddr_ll is plain old data; zeroed is a valid value.
            let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            let mut addr_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

            // SAFETY: `buf` and `addr` are valid for writes of the lengths
            // passed and outlive the call.
            let n = unsafe {
                libc::recvfrom(
                    self.socket.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };

            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            if addr.sll_pkttype == libc::PACKET_OUTGOING as u8 {
                continue;
            }
            return Ok(n as usize);
        }
    }
}

impl AsRawFd for CaptureSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

fn bind_to_interface(fd: RawFd, ifindex: i32) -> io::Result<()> {
    // SAFETY: sockaddr_ll is plain old data; zeroed is a valid value.
    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = (libc::ETH_P_IP as u16).to_be();
    addr.sll_ifindex = ifindex;

    // SAFETY: `addr` is a fully initialized sockaddr_ll and the length
    // matches it.
    let ret = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn enable_allmulti(fd: RawFd, ifindex: i32) -> io::Result<()> {
    let mreq = PacketMreq {
        mr_ifindex: ifindex,
        mr_type: PACKET_MR_ALLMULTI,
        mr_alen: 0,
        mr_address: [0; 8],
    };

    // SAFETY: `mreq` matches the kernel's packet_mreq layout and lives
    // across the call.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            libc::PACKET_ADD_MEMBERSHIP,
            &mreq as *const PacketMreq as *const libc::c_void,
            std::mem::size_of::<PacketMreq>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set SO_RCVBUF, logging what the kernel actually granted.
///
/// Failure is not fatal; the system default still works at modest rates.
pub fn set_recv_buffer_size(fd: RawFd, requested_size: i32, logger: &Logger) -> i32 {
    // SAFETY: `requested_size` is a valid c_int for the duration of the call.
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &requested_size as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    };

    if result < 0 {
        log_warning!(
            logger,
            Facility::Network,
            "Failed to set SO_RCVBUF to {}KB, using system default: {}",
            requested_size / 1024,
            io::Error::last_os_error()
        );
        return 0;
    }

    let mut actual_size: i32 = 0;
    let mut len = std::mem::size_of::<i32>() as libc::socklen_t;
    // SAFETY: `actual_size` and `len` are valid for writes.
    unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &mut actual_size as *mut i32 as *mut libc::c_void,
            &mut len,
        );
    }

    log_debug!(
        logger,
        Facility::Network,
        "SO_RCVBUF set to {}KB (requested {}KB)",
        actual_size / 1024,
        requested_size / 1024
    );
    actual_size
}

/// `GroupMembership` through the host IP stack.
///
/// Each membership gets its own UDP socket: the kernel caps memberships per
/// socket (`net.ipv4.igmp_max_memberships`, 20 by default), and closing the
/// socket is a guaranteed leave. The kernel sends the actual IGMP reports
/// and answers the upstream router's queries for as long as the socket is
/// open.
pub struct SocketMembership {
    upstream_index: u32,
    downstream_index: u32,
    sockets: Mutex<HashMap<(InterfaceRole, Ipv4Addr), Socket>>,
}

impl SocketMembership {
    pub fn new(upstream_index: u32, downstream_index: u32) -> Self {
        Self {
            upstream_index,
            downstream_index,
            sockets: Mutex::new(HashMap::new()),
        }
    }

    fn interface(&self, role: InterfaceRole) -> InterfaceIndexOrAddress {
        match role {
            InterfaceRole::Upstream => InterfaceIndexOrAddress::Index(self.upstream_index),
            InterfaceRole::Downstream => InterfaceIndexOrAddress::Index(self.downstream_index),
        }
    }

    /// Number of memberships currently held
    pub fn len(&self) -> usize {
        self.sockets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GroupMembership for SocketMembership {
    fn join(&self, role: InterfaceRole, group: Ipv4Addr) -> Result<()> {
        let mut sockets = self
            .sockets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if sockets.contains_key(&(role, group)) {
            return Ok(());
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("Failed to create membership socket")?;
        socket
            .join_multicast_v4_n(&group, &self.interface(role))
            .with_context(|| format!("IP_ADD_MEMBERSHIP {} on {} interface", group, role))?;

        sockets.insert((role, group), socket);
        Ok(())
    }

    fn leave(&self, role: InterfaceRole, group: Ipv4Addr) -> Result<()> {
        let socket = self
            .sockets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(role, group))
            .with_context(|| format!("Not a member of {} on {} interface", group, role))?;

        socket
            .leave_multicast_v4_n(&group, &self.interface(role))
            .with_context(|| format!("IP_DROP_MEMBERSHIP {} on {} interface", group, role))
    }
}
