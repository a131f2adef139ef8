use crate::AF_INET;

/// `struct sockaddr_in`: an IPv4 address with the port in network byte
/// order, laid out exactly as the kernel reads it.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SockAddrIn {
    family: u16,
    port_be: u16,
    addr: [u8; 4],
    zero: [u8; 8],
}

impl SockAddrIn {
    pub const LEN: u32 = core::mem::size_of::<Self>() as u32;

    #[must_use]
    pub fn new(ip: [u8; 4], port: u16) -> Self {
        Self {
            family: AF_INET,
            port_be: port.to_be(),
            addr: ip,
            zero: [0; 8],
        }
    }

    /// Builds an address from raw address bytes; IPv4 takes exactly four.
    #[must_use]
    pub fn from_bytes(ip: &[u8], port: u16) -> Option<Self> {
        let ip: [u8; 4] = ip.try_into().ok()?;
        Some(Self::new(ip, port))
    }

    #[must_use]
    pub fn family(&self) -> u16 {
        self.family
    }

    #[must_use]
    pub fn ip(&self) -> [u8; 4] {
        self.addr
    }

    /// Port in host byte order.
    #[must_use]
    pub fn port(&self) -> u16 {
        u16::from_be(self.port_be)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C) with no padding (2 + 2 + 4 + 8 bytes).
        unsafe {
            core::slice::from_raw_parts((self as *const Self).cast::<u8>(), Self::LEN as usize)
        }
    }

    /// Writable view, e.g. as the peer-address buffer of an accept.
    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; every bit pattern is a valid `SockAddrIn`.
        unsafe {
            core::slice::from_raw_parts_mut((self as *mut Self).cast::<u8>(), Self::LEN as usize)
        }
    }
}

impl From<rustix::net::SocketAddrV4> for SockAddrIn {
    fn from(a: rustix::net::SocketAddrV4) -> Self {
        Self::new(a.ip().octets(), a.port())
    }
}

impl From<SockAddrIn> for rustix::net::SocketAddrV4 {
    fn from(a: SockAddrIn) -> Self {
        Self::new(a.ip().into(), a.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_layout() {
        let a = SockAddrIn::new([127, 0, 0, 1], 8090);
        assert_eq!(SockAddrIn::LEN, 16);

        let b = a.as_bytes();
        assert_eq!(u16::from_ne_bytes([b[0], b[1]]), AF_INET);
        // 8090 = 0x1f9a, big-endian on the wire
        assert_eq!(&b[2..4], &[0x1f, 0x9a]);
        assert_eq!(&b[4..8], &[127, 0, 0, 1]);
        assert_eq!(&b[8..], &[0; 8]);
    }

    #[test]
    fn test_accessors() {
        let a = SockAddrIn::new([10, 1, 2, 3], 443);
        assert_eq!(a.family(), AF_INET);
        assert_eq!(a.ip(), [10, 1, 2, 3]);
        assert_eq!(a.port(), 443);
    }

    #[test]
    fn test_from_bytes_requires_four_octets() {
        assert!(SockAddrIn::from_bytes(&[127, 0, 0], 80).is_none());
        assert!(SockAddrIn::from_bytes(&[127, 0, 0, 1, 0], 80).is_none());
        assert_eq!(
            SockAddrIn::from_bytes(&[127, 0, 0, 1], 80),
            Some(SockAddrIn::new([127, 0, 0, 1], 80))
        );
    }

    #[test]
    fn test_socket_addr_v4_conversion() {
        let v4 = rustix::net::SocketAddrV4::new([192, 168, 0, 9].into(), 5000);
        let a = SockAddrIn::from(v4);
        assert_eq!(a.ip(), [192, 168, 0, 9]);
        assert_eq!(rustix::net::SocketAddrV4::from(a), v4);
    }
}
