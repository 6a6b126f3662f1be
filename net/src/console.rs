//! Operator commands accepted by the stack.
//!
//! Line editing and tokenising happen in the board's console driver; this
//! module only turns a complete line into a [`Command`] and formats the
//! `ifconfig` report.

use core::fmt;

use crate::config::{AddressConfig, AddressField};
use crate::dhcp::DhcpState;
use crate::stats::NetStats;
use crate::types::Ipv4Addr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpCommand {
    On,
    Off,
    Refresh,
    Release,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `set {ip|gw|dns|sn} a.b.c.d`
    Set { field: AddressField, addr: Ipv4Addr },
    /// `dhcp {on|off|refresh|release}`
    Dhcp(DhcpCommand),
    Ifconfig,
    Reboot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    InvalidCommand,
    /// `set` while addresses are managed by DHCP.
    DhcpModeOn,
    /// `dhcp refresh|release` while DHCP is off.
    DhcpModeOff,
}

impl ConsoleError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCommand => "Invalid command",
            Self::DhcpModeOn => "DHCP mode is on",
            Self::DhcpModeOff => "DHCP mode is off",
        }
    }
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Command {
    /// Parse one console line.  Keywords are case-insensitive; extra words
    /// are an error.
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let mut words = line.split_ascii_whitespace();
        let verb = words.next().ok_or(ConsoleError::InvalidCommand)?;
        let cmd = if verb.eq_ignore_ascii_case("set") {
            let field = parse_field(words.next().ok_or(ConsoleError::InvalidCommand)?)?;
            let addr = words
                .next()
                .ok_or(ConsoleError::InvalidCommand)?
                .parse::<Ipv4Addr>()
                .map_err(|_| ConsoleError::InvalidCommand)?;
            Command::Set { field, addr }
        } else if verb.eq_ignore_ascii_case("dhcp") {
            let arg = words.next().ok_or(ConsoleError::InvalidCommand)?;
            Command::Dhcp(parse_dhcp(arg)?)
        } else if verb.eq_ignore_ascii_case("ifconfig") {
            Command::Ifconfig
        } else if verb.eq_ignore_ascii_case("reboot") {
            Command::Reboot
        } else {
            return Err(ConsoleError::InvalidCommand);
        };
        if words.next().is_some() {
            return Err(ConsoleError::InvalidCommand);
        }
        Ok(cmd)
    }
}

fn parse_field(word: &str) -> Result<AddressField, ConsoleError> {
    const FIELDS: [(&str, AddressField); 4] = [
        ("ip", AddressField::Ip),
        ("gw", AddressField::Gateway),
        ("dns", AddressField::Dns),
        ("sn", AddressField::SubnetMask),
    ];
    FIELDS
        .iter()
        .find(|(name, _)| word.eq_ignore_ascii_case(name))
        .map(|&(_, field)| field)
        .ok_or(ConsoleError::InvalidCommand)
}

fn parse_dhcp(word: &str) -> Result<DhcpCommand, ConsoleError> {
    const ARGS: [(&str, DhcpCommand); 4] = [
        ("on", DhcpCommand::On),
        ("off", DhcpCommand::Off),
        ("refresh", DhcpCommand::Refresh),
        ("release", DhcpCommand::Release),
    ];
    ARGS.iter()
        .find(|(name, _)| word.eq_ignore_ascii_case(name))
        .map(|&(_, cmd)| cmd)
        .ok_or(ConsoleError::InvalidCommand)
}

/// Write the `ifconfig` report.
pub fn write_ifconfig<W: fmt::Write>(
    out: &mut W,
    cfg: &AddressConfig,
    dhcp: DhcpState,
    link_up: bool,
    stats: &NetStats,
) -> fmt::Result {
    writeln!(out, "HW:   {}", cfg.mac)?;
    writeln!(
        out,
        "IP:   {} ({})",
        cfg.ip,
        if cfg.dhcp_enabled { "dhcp" } else { "static" }
    )?;
    writeln!(out, "SN:   {}", cfg.subnet_mask)?;
    writeln!(out, "GW:   {}", cfg.gateway)?;
    writeln!(out, "DNS:  {}", cfg.dns)?;
    writeln!(out, "DHCP: {}", dhcp.name())?;
    writeln!(out, "Link: {}", if link_up { "up" } else { "down" })?;
    writeln!(out, "{}", stats)
}
