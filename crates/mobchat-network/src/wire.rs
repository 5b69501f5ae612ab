//! Bounds-checked reading of fixed-layout binary fields, and the
//! [`Address`] wire type.

use crate::{NetworkError, NetworkResult, ADDRESS_LEN};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

/// Cursor over a byte slice. Every read checks the remaining length first.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> WireReader<'a> {
    /// Create a reader; `what` names the structure in error messages.
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take the next `n` bytes.
    pub fn take(&mut self, n: usize) -> NetworkResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(NetworkError::truncated(
                self.what,
                self.pos + n,
                self.buf.len(),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Take a fixed-size array.
    pub fn array<const N: usize>(&mut self) -> NetworkResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> NetworkResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> NetworkResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> NetworkResult<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    /// Everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

/// IPv4 address and port as carried on the wire.
///
/// Wire form is 4 address octets followed by an 8-byte big-endian port.
/// All-zero bytes mean "no address" (a rejected handshake). An address of
/// `0.0.0.0` with a port marks a server-capable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Address {
    /// The rejection sentinel.
    pub const ZERO: Address = Address {
        ip: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Server-capable address for a listener on `port`.
    pub fn server(port: u16) -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, port)
    }

    /// True for the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// True when the handshake carrying this address accepted the peer.
    pub fn is_connection(&self) -> bool {
        !self.is_zero()
    }

    /// True when the node accepts inbound connections.
    pub fn is_server(&self) -> bool {
        self.ip.is_unspecified() && self.port != 0
    }

    /// Socket address to dial. The server sentinel carries no routable
    /// address, so it resolves to the loopback interface.
    pub fn dial_addr(&self) -> SocketAddr {
        let ip = if self.ip.is_unspecified() {
            Ipv4Addr::LOCALHOST
        } else {
            self.ip
        };
        SocketAddr::V4(SocketAddrV4::new(ip, self.port))
    }

    pub fn serialize(&self) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        out[..4].copy_from_slice(&self.ip.octets());
        out[4..].copy_from_slice(&u64::from(self.port).to_be_bytes());
        out
    }

    pub fn deserialize(bytes: &[u8]) -> NetworkResult<Self> {
        Self::read(&mut WireReader::new(bytes, "address"))
    }

    pub fn read(reader: &mut WireReader<'_>) -> NetworkResult<Self> {
        let octets: [u8; 4] = reader.array()?;
        let port = reader.u64()?;
        let port = u16::try_from(port)
            .map_err(|_| NetworkError::MalformedInput(format!("port {port} out of range")))?;
        Ok(Self::new(Ipv4Addr::from(octets), port))
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for Address {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<SocketAddrV4>()
            .map(Address::from)
            .map_err(|e| NetworkError::Config(format!("invalid address '{s}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_layout() {
        let addr = Address::new(Ipv4Addr::new(10, 0, 0, 7), 9999);
        let bytes = addr.serialize();
        assert_eq!(&bytes[..4], &[10, 0, 0, 7]);
        assert_eq!(&bytes[4..], &9999u64.to_be_bytes());
        assert_eq!(Address::deserialize(&bytes).unwrap(), addr);
    }

    #[test]
    fn test_zero_address() {
        assert_eq!(Address::ZERO.serialize(), [0u8; ADDRESS_LEN]);
        assert!(Address::ZERO.is_zero());
        assert!(!Address::ZERO.is_connection());
        assert!(!Address::ZERO.is_server());
    }

    #[test]
    fn test_server_address() {
        let addr = Address::server(4000);
        assert!(addr.is_server());
        assert!(addr.is_connection());
        assert_eq!(addr.dial_addr(), "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn test_short_address_rejected() {
        assert!(matches!(
            Address::deserialize(&[1, 2, 3]),
            Err(NetworkError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_port_out_of_range() {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[4..].copy_from_slice(&70_000u64.to_be_bytes());
        assert!(Address::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_parse_address() {
        let addr: Address = "127.0.0.1:8888".parse().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8888");
        assert!("localhost".parse::<Address>().is_err());
    }

    #[test]
    fn test_reader_bounds() {
        let data = [0u8, 0, 0, 5, 9];
        let mut reader = WireReader::new(&data, "test");
        assert_eq!(reader.u32().unwrap(), 5);
        assert_eq!(reader.remaining(), 1);
        assert!(reader.u32().is_err());
        assert_eq!(reader.u8().unwrap(), 9);
        assert!(reader.rest().is_empty());
    }

    proptest::proptest! {
        #[test]
        fn prop_address_roundtrip(octets in proptest::array::uniform4(0u8..), port in 0u16..) {
            let addr = Address::new(Ipv4Addr::from(octets), port);
            proptest::prop_assert_eq!(Address::deserialize(&addr.serialize()).unwrap(), addr);
        }

        #[test]
        fn prop_reader_never_overruns(data in proptest::collection::vec(0u8.., 0..32), n in 0usize..40) {
            let mut reader = WireReader::new(&data, "prop");
            match reader.take(n) {
                Ok(bytes) => proptest::prop_assert_eq!(bytes.len(), n),
                Err(_) => proptest::prop_assert!(n > data.len()),
            }
        }
    }
}
