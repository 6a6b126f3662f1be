//! Address configuration and its persistent backing store.
//!
//! The store is five 32-bit slots.  Addresses are kept with the first octet
//! in the most significant byte; the DHCP slot is "on" for any non-zero
//! value.  Only static configuration is ever written back: addresses learned
//! from a DHCP server live in RAM until the lease ends.

use core::fmt;

use picoeth_lib::klog_info;

use crate::types::{Ipv4Addr, MacAddr};

/// Subnet mask used when storage holds none.
pub const DEFAULT_SUBNET_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
/// Locally administered address the board ships with.
pub const DEFAULT_MAC: MacAddr = MacAddr([0x02, 0x03, 0x04, 0x05, 0x06, 0x88]);
/// Port of the TCP line service.
pub const DEFAULT_LISTEN_PORT: u16 = 23;

// =============================================================================
// Persistent storage
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigSlot {
    DhcpEnabled = 0,
    Ip = 1,
    Gateway = 2,
    Dns = 3,
    SubnetMask = 4,
}

pub const CONFIG_SLOT_COUNT: usize = 5;

impl ConfigSlot {
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Word-addressed non-volatile storage.
pub trait ConfigStore {
    fn load(&self, slot: ConfigSlot) -> u32;
    fn store(&mut self, slot: ConfigSlot, value: u32);
}

impl<C: ConfigStore + ?Sized> ConfigStore for &mut C {
    fn load(&self, slot: ConfigSlot) -> u32 {
        (**self).load(slot)
    }

    fn store(&mut self, slot: ConfigSlot, value: u32) {
        (**self).store(slot, value)
    }
}

/// Volatile stand-in for boards without non-volatile storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RamStore {
    slots: [u32; CONFIG_SLOT_COUNT],
}

impl RamStore {
    pub const fn new() -> Self {
        Self {
            slots: [0; CONFIG_SLOT_COUNT],
        }
    }
}

impl ConfigStore for RamStore {
    fn load(&self, slot: ConfigSlot) -> u32 {
        self.slots[slot.index()]
    }

    fn store(&mut self, slot: ConfigSlot, value: u32) {
        self.slots[slot.index()] = value;
    }
}

// =============================================================================
// StackConfig
// =============================================================================

/// Board-level settings fixed at construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackConfig {
    pub mac: MacAddr,
    /// Port the TCP responder listens on.
    pub listen_port: u16,
    /// First local sequence number handed out by the TCP responder.
    pub initial_isn: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            mac: DEFAULT_MAC,
            listen_port: DEFAULT_LISTEN_PORT,
            initial_isn: 0,
        }
    }
}

// =============================================================================
// AddressConfig
// =============================================================================

/// Which address `set` changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressField {
    Ip,
    Gateway,
    Dns,
    SubnetMask,
}

impl AddressField {
    pub const fn slot(self) -> ConfigSlot {
        match self {
            Self::Ip => ConfigSlot::Ip,
            Self::Gateway => ConfigSlot::Gateway,
            Self::Dns => ConfigSlot::Dns,
            Self::SubnetMask => ConfigSlot::SubnetMask,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Gateway => "gw",
            Self::Dns => "dns",
            Self::SubnetMask => "sn",
        }
    }
}

/// The host's addressing, as used by every classifier and builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressConfig {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub dhcp_enabled: bool,
}

impl AddressConfig {
    /// Unconfigured host: no address, default mask, DHCP off.
    pub const fn unconfigured(mac: MacAddr) -> Self {
        Self {
            mac,
            ip: Ipv4Addr::UNSPECIFIED,
            subnet_mask: DEFAULT_SUBNET_MASK,
            gateway: Ipv4Addr::UNSPECIFIED,
            dns: Ipv4Addr::UNSPECIFIED,
            dhcp_enabled: false,
        }
    }

    /// Read the whole configuration from `store`.
    pub fn load<C: ConfigStore + ?Sized>(store: &C, mac: MacAddr) -> Self {
        let mut cfg = Self::unconfigured(mac);
        cfg.reload_static(store);
        cfg.dhcp_enabled = store.load(ConfigSlot::DhcpEnabled) != 0;
        cfg
    }

    /// Replace the addresses with the stored static ones.  The DHCP flag is
    /// left alone.
    pub fn reload_static<C: ConfigStore + ?Sized>(&mut self, store: &C) {
        self.ip = Ipv4Addr::from_u32_be(store.load(ConfigSlot::Ip));
        self.gateway = Ipv4Addr::from_u32_be(store.load(ConfigSlot::Gateway));
        self.dns = Ipv4Addr::from_u32_be(store.load(ConfigSlot::Dns));
        self.subnet_mask = match store.load(ConfigSlot::SubnetMask) {
            0 => DEFAULT_SUBNET_MASK,
            raw => Ipv4Addr::from_u32_be(raw),
        };
    }

    pub fn get(&self, field: AddressField) -> Ipv4Addr {
        match field {
            AddressField::Ip => self.ip,
            AddressField::Gateway => self.gateway,
            AddressField::Dns => self.dns,
            AddressField::SubnetMask => self.subnet_mask,
        }
    }

    /// Change one address in RAM only.
    pub fn set(&mut self, field: AddressField, addr: Ipv4Addr) {
        match field {
            AddressField::Ip => self.ip = addr,
            AddressField::Gateway => self.gateway = addr,
            AddressField::Dns => self.dns = addr,
            AddressField::SubnetMask => self.subnet_mask = addr,
        }
    }

    /// Change one address and write it through to `store`.
    pub fn persist<C: ConfigStore + ?Sized>(&mut self, store: &mut C, field: AddressField, addr: Ipv4Addr) {
        self.set(field, addr);
        store.store(field.slot(), addr.to_u32_be());
        klog_info!("config: {} set to {}", field.name(), addr);
    }

    pub fn persist_dhcp_enabled<C: ConfigStore + ?Sized>(&mut self, store: &mut C, enabled: bool) {
        self.dhcp_enabled = enabled;
        store.store(ConfigSlot::DhcpEnabled, enabled as u32);
    }

    /// Directed broadcast address of the configured subnet.
    pub fn broadcast(&self) -> Ipv4Addr {
        let mask = self.subnet_mask.to_u32_be();
        Ipv4Addr::from_u32_be((self.ip.to_u32_be() & mask) | !mask)
    }

    /// Number of leading one bits in the subnet mask.
    pub fn prefix_len(&self) -> u32 {
        self.subnet_mask.to_u32_be().leading_ones()
    }

    pub fn has_address(&self) -> bool {
        !self.ip.is_unspecified()
    }
}

impl fmt::Display for AddressConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} gw {} dns {} ({})",
            self.ip,
            self.prefix_len(),
            self.gateway,
            self.dns,
            if self.dhcp_enabled { "dhcp" } else { "static" }
        )
    }
}
