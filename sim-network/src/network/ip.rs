use crate::error::NetworkError;
use anyhow::{Context, anyhow, bail};
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 address together with the prefix length of its network
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    pub(crate) address: Ipv4Addr,
    pub(crate) network_prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, network_prefix: u8) -> Self {
        Self {
            address,
            network_prefix: network_prefix.min(32),
        }
    }

    /// Builds a cidr out of an address and a dotted network mask (e.g. `255.255.255.0`)
    pub fn from_mask(address: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, NetworkError> {
        let bits = mask.to_bits();
        let prefix = bits.leading_ones();
        if prefix + bits.trailing_zeros() != 32 {
            return Err(NetworkError::InvalidNetworkMask(mask));
        }

        Ok(Self {
            address,
            network_prefix: prefix as u8,
        })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn network_prefix(&self) -> u8 {
        self.network_prefix
    }

    /// The network this address belongs to, with host bits cleared
    pub fn network(&self) -> Ipv4Cidr {
        Ipv4Cidr {
            address: Ipv4Addr::from_bits(self.address.to_bits() & self.mask_bits()),
            network_prefix: self.network_prefix,
        }
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.address.to_bits() | !self.mask_bits())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        ip.to_bits() & self.mask_bits() == self.address.to_bits() & self.mask_bits()
    }

    fn mask_bits(&self) -> u32 {
        u32::MAX
            .checked_shl(32 - self.network_prefix as u32)
            .unwrap_or(0)
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.network_prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let base_ip: Ipv4Addr = parts
            .next()
            .ok_or(anyhow!("empty string"))?
            .parse()
            .context("invalid ipv4 address in cidr")?;

        // A missing network prefix is interpreted as /32 (i.e. a single address)
        let network_prefix: u8 = parts
            .next()
            .unwrap_or("32")
            .parse()
            .context("the provided network prefix is not a valid unsigned integer")?;
        if network_prefix == 0 {
            bail!("network prefix cannot be 0");
        }
        if network_prefix > 32 {
            bail!("network prefix cannot be higher than 32");
        }

        if parts.next().is_some() {
            bail!("cidr contains trailing characters");
        }

        Ok(Self {
            address: base_ip,
            network_prefix,
        })
    }
}

/// Hands out consecutive host addresses from a network
///
/// The first address handed out is the network address plus one. Setting a new base restarts
/// the sequence from the beginning of the new network.
#[derive(Clone, Debug)]
pub struct AddressBlock {
    network: Ipv4Cidr,
    next_host: u32,
}

impl AddressBlock {
    pub fn new(network: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, NetworkError> {
        Ok(Self {
            network: Ipv4Cidr::from_mask(network, mask)?.network(),
            next_host: 1,
        })
    }

    pub fn set_base(&mut self, network: Ipv4Addr, mask: Ipv4Addr) -> Result<(), NetworkError> {
        *self = Self::new(network, mask)?;
        Ok(())
    }

    /// Returns the next host address of the block, with the block's network prefix
    pub fn next_address(&mut self) -> Result<Ipv4Cidr, NetworkError> {
        let host_bits = !self.network.mask_bits();
        // The all-ones host is the broadcast address and is never handed out
        if self.next_host >= host_bits {
            return Err(NetworkError::AddressBlockExhausted(self.network));
        }

        let address = Ipv4Addr::from_bits(self.network.address.to_bits() | self.next_host);
        self.next_host += 1;
        Ok(Ipv4Cidr::new(address, self.network.network_prefix))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cidr_network_and_broadcast() {
        let cases = [
            ("10.0.0.0/24", "10.0.0.0", "10.0.0.255"),
            ("10.0.0.123/24", "10.0.0.0", "10.0.0.255"),
            ("10.0.0.0/8", "10.0.0.0", "10.255.255.255"),
            ("20.0.0.0/12", "20.0.0.0", "20.15.255.255"),
            ("10.1.2.7/32", "10.1.2.7", "10.1.2.7"),
        ];

        for (input, network, broadcast) in cases {
            let cidr = Ipv4Cidr::from_str(input).unwrap();
            assert_eq!(cidr.network().address().to_string(), network);
            assert_eq!(cidr.broadcast().to_string(), broadcast);
        }
    }

    #[test]
    fn test_cidr_parse_errors() {
        for input in ["", "10.0.0.0/0", "10.0.0.0/33", "10.0.0.0/24/1", "::1/64", "10.0.0/24"] {
            assert!(Ipv4Cidr::from_str(input).is_err(), "{input}");
        }
    }

    #[test]
    fn test_cidr_from_mask() {
        let cidr =
            Ipv4Cidr::from_mask(Ipv4Addr::new(10, 1, 1, 0), Ipv4Addr::new(255, 255, 255, 0))
                .unwrap();
        assert_eq!(cidr.network_prefix(), 24);
        assert!(cidr.contains(Ipv4Addr::new(10, 1, 1, 200)));
        assert!(!cidr.contains(Ipv4Addr::new(10, 1, 2, 1)));

        let err = Ipv4Cidr::from_mask(Ipv4Addr::new(10, 1, 1, 0), Ipv4Addr::new(255, 0, 255, 0));
        assert!(matches!(err, Err(NetworkError::InvalidNetworkMask(_))));
    }

    #[test]
    fn test_address_block_assigns_sequentially() {
        let mut block =
            AddressBlock::new(Ipv4Addr::new(10, 1, 1, 0), Ipv4Addr::new(255, 255, 255, 0))
                .unwrap();
        assert_eq!(block.next_address().unwrap().to_string(), "10.1.1.1/24");
        assert_eq!(block.next_address().unwrap().to_string(), "10.1.1.2/24");

        block
            .set_base(Ipv4Addr::new(10, 1, 2, 0), Ipv4Addr::new(255, 255, 255, 0))
            .unwrap();
        assert_eq!(block.next_address().unwrap().to_string(), "10.1.2.1/24");
    }

    #[test]
    fn test_address_block_exhaustion() {
        let mut block =
            AddressBlock::new(Ipv4Addr::new(10, 1, 3, 0), Ipv4Addr::new(255, 255, 255, 252))
                .unwrap();
        assert_eq!(block.next_address().unwrap().address(), Ipv4Addr::new(10, 1, 3, 1));
        assert_eq!(block.next_address().unwrap().address(), Ipv4Addr::new(10, 1, 3, 2));
        assert!(matches!(
            block.next_address(),
            Err(NetworkError::AddressBlockExhausted(_))
        ));
    }

    #[test]
    fn test_full_slash_24_holds_254_hosts() {
        let mut block =
            AddressBlock::new(Ipv4Addr::new(10, 1, 2, 0), Ipv4Addr::new(255, 255, 255, 0))
                .unwrap();
        let mut last = None;
        for _ in 0..254 {
            last = Some(block.next_address().unwrap());
        }

        assert_eq!(last.unwrap().address(), Ipv4Addr::new(10, 1, 2, 254));
        assert!(block.next_address().is_err());
    }
}
