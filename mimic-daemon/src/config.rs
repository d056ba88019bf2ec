//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use mimic_dataplane::impairment::ImpairmentCfg;
use mimic_dataplane::shaper::ShaperCfg;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub router_id: Ipv4Addr,
    pub logging: Logging,
    pub interfaces: Vec<InterfaceConfig>,
    pub protocols: Protocols,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    #[default]
    Compact,
    Full,
    Json,
    Pretty,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
    pub address: Ipv4Network,
    pub mtu: u32,
    pub bandwidth_bps: u64,
    pub enabled: bool,
    pub shaping: Option<ShaperCfg>,
    pub impairments: Option<ImpairmentCfg>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Protocols {
    pub bgp: Option<mimic_bgp::instance::InstanceCfg>,
    pub ospf: Option<mimic_ospf::instance::InstanceCfg>,
    pub isis: Option<IsisConfig>,
}

// IS-IS section with the textual identifier forms used in configuration
// files.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsisConfig {
    pub system_id: String,
    pub area: String,
    #[serde(default)]
    pub level_type: mimic_isis::packet::LevelType,
    #[serde(default = "default_isis_hello")]
    pub hello_interval: u16,
    #[serde(default = "default_isis_hold_multiplier")]
    pub hold_multiplier: u16,
    #[serde(default)]
    pub interfaces: Vec<mimic_isis::instance::InterfaceCfg>,
}

fn default_isis_hello() -> u16 {
    10
}

fn default_isis_hold_multiplier() -> u16 {
    3
}

/// Semantic configuration failure, pointing at the offending field.
#[derive(Debug, Eq, PartialEq)]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

// ===== impl Config =====

impl Config {
    /// Parses and semantically validates a TOML configuration document.
    pub fn load(data: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(data).map_err(|error| ConfigError {
                field: "config".to_owned(),
                reason: error.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router_id.is_unspecified() {
            return Err(ConfigError::new("router_id", "must be set"));
        }

        for iface in &self.interfaces {
            let field = format!("interfaces.{}", iface.name);
            if iface.name.is_empty() {
                return Err(ConfigError::new("interfaces.name", "empty"));
            }
            if iface.mtu < 68 {
                return Err(ConfigError::new(
                    &field,
                    "MTU below the IPv4 minimum of 68",
                ));
            }
            if iface.bandwidth_bps == 0 {
                return Err(ConfigError::new(
                    &field,
                    "bandwidth must be greater than zero",
                ));
            }
            if let Some(shaping) = &iface.shaping {
                shaping.validate().map_err(|error| {
                    ConfigError::new(&format!("{field}.shaping"), &error.to_string())
                })?;
            }
            if let Some(impairments) = &iface.impairments {
                impairments.validate().map_err(|error| {
                    ConfigError::new(
                        &format!("{field}.impairments"),
                        &error.to_string(),
                    )
                })?;
            }
        }

        if let Some(bgp) = &self.protocols.bgp {
            if bgp.asn == 0 {
                return Err(ConfigError::new(
                    "protocols.bgp.asn",
                    "AS number must be within [1, 4294967295]",
                ));
            }
            if bgp.hold_time != 0 && bgp.hold_time < 3 {
                return Err(ConfigError::new(
                    "protocols.bgp.hold_time",
                    "must be zero or at least three seconds",
                ));
            }
            for nbr in &bgp.neighbors {
                if nbr.remote_asn == 0 {
                    return Err(ConfigError::new(
                        "protocols.bgp.neighbors.remote_asn",
                        "AS number must be within [1, 4294967295]",
                    ));
                }
                if !self.has_interface(&nbr.ifname) {
                    return Err(ConfigError::new(
                        "protocols.bgp.neighbors.ifname",
                        &format!("unknown interface {}", nbr.ifname),
                    ));
                }
            }
        }

        if let Some(ospf) = &self.protocols.ospf {
            if ospf.spf_hold == 0 {
                return Err(ConfigError::new(
                    "protocols.ospf.spf_hold",
                    "must be greater than zero",
                ));
            }
            for iface in &ospf.interfaces {
                if !self.has_interface(&iface.name) {
                    return Err(ConfigError::new(
                        "protocols.ospf.interfaces.name",
                        &format!("unknown interface {}", iface.name),
                    ));
                }
                if iface.hello_interval == 0 {
                    return Err(ConfigError::new(
                        "protocols.ospf.interfaces.hello_interval",
                        "must be greater than zero",
                    ));
                }
                if iface.dead_interval
                    <= iface.hello_interval as u32
                {
                    return Err(ConfigError::new(
                        "protocols.ospf.interfaces.dead_interval",
                        "must exceed the hello interval",
                    ));
                }
            }
        }

        if let Some(isis) = &self.protocols.isis {
            isis.to_instance_cfg()?;
            for iface in &isis.interfaces {
                if !self.has_interface(&iface.name) {
                    return Err(ConfigError::new(
                        "protocols.isis.interfaces.name",
                        &format!("unknown interface {}", iface.name),
                    ));
                }
            }
        }

        Ok(())
    }

    fn has_interface(&self, ifname: &str) -> bool {
        self.interfaces.iter().any(|iface| iface.name == ifname)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            router_id: Ipv4Addr::UNSPECIFIED,
            logging: Default::default(),
            interfaces: Default::default(),
            protocols: Default::default(),
        }
    }
}

impl Default for Logging {
    fn default() -> Logging {
        Logging {
            style: Default::default(),
            colors: true,
            show_thread_id: false,
            show_source: false,
        }
    }
}

impl Default for InterfaceConfig {
    fn default() -> InterfaceConfig {
        InterfaceConfig {
            name: String::new(),
            address: Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap(),
            mtu: 1500,
            bandwidth_bps: 1_000_000_000,
            enabled: true,
            shaping: None,
            impairments: None,
        }
    }
}

// ===== impl IsisConfig =====

impl IsisConfig {
    /// Converts the textual identifiers into the typed instance
    /// configuration.
    pub fn to_instance_cfg(
        &self,
    ) -> Result<mimic_isis::instance::InstanceCfg, ConfigError> {
        let system_id = self.system_id.parse().map_err(|_| {
            ConfigError::new(
                "protocols.isis.system_id",
                &format!("invalid system ID {}", self.system_id),
            )
        })?;
        let area_addr = self.area.parse().map_err(|_| {
            ConfigError::new(
                "protocols.isis.area",
                &format!("invalid area address {}", self.area),
            )
        })?;
        Ok(mimic_isis::instance::InstanceCfg {
            system_id,
            area_addr,
            level_type: self.level_type,
            hello_interval: self.hello_interval,
            hold_multiplier: self.hold_multiplier,
            interfaces: self.interfaces.clone(),
        })
    }
}

// ===== impl ConfigError =====

impl ConfigError {
    pub fn new(field: &str, reason: &str) -> ConfigError {
        ConfigError {
            field: field.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration: {}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        router_id = "1.1.1.1"

        [[interfaces]]
        name = "eth0"
        address = "10.0.0.1/24"

        [[interfaces]]
        name = "eth1"
        address = "10.1.0.1/24"
        bandwidth_bps = 100000000

        [interfaces.shaping]
        algorithm = "token-bucket"
        rate_bps = 1000000
        burst_bytes = 10000

        [interfaces.impairments]
        delay_ms = 100
        jitter_ms = 10
        distribution = "normal"

        [protocols.bgp]
        asn = 65001

        [[protocols.bgp.neighbors]]
        remote_addr = "10.0.0.2"
        remote_asn = 65002
        ifname = "eth0"
        local_addr = "10.0.0.1"

        [protocols.isis]
        system_id = "0000.0000.0001"
        area = "49.0001"

        [[protocols.isis.interfaces]]
        name = "eth1"
        addr = "10.1.0.1/24"
    "#;

    #[test]
    fn load_full_config() {
        let config = Config::load(CONFIG).unwrap();
        assert_eq!(config.router_id, Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(config.interfaces.len(), 2);
        assert!(config.interfaces[1].shaping.is_some());
        assert!(config.interfaces[1].impairments.is_some());
        let bgp = config.protocols.bgp.as_ref().unwrap();
        assert_eq!(bgp.asn, 65001);
        assert_eq!(bgp.hold_time, 180);
        let isis = config.protocols.isis.as_ref().unwrap();
        assert!(isis.to_instance_cfg().is_ok());
    }

    #[test]
    fn reject_zero_asn() {
        let data = CONFIG.replace("asn = 65001", "asn = 0");
        let error = Config::load(&data).unwrap_err();
        assert_eq!(error.field, "protocols.bgp.asn");
    }

    #[test]
    fn reject_unknown_neighbor_interface() {
        let data = CONFIG.replace("ifname = \"eth0\"", "ifname = \"eth9\"");
        let error = Config::load(&data).unwrap_err();
        assert_eq!(error.field, "protocols.bgp.neighbors.ifname");
    }

    #[test]
    fn reject_out_of_range_percentage() {
        let data =
            CONFIG.replace("delay_ms = 100", "loss_pct = 150.0");
        let error = Config::load(&data).unwrap_err();
        assert!(error.field.ends_with("impairments"));
    }

    #[test]
    fn reject_bad_system_id() {
        let data = CONFIG
            .replace("system_id = \"0000.0000.0001\"", "system_id = \"zz\"");
        let error = Config::load(&data).unwrap_err();
        assert_eq!(error.field, "protocols.isis.system_id");
    }
}
