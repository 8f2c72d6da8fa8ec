//! Partitions: the grouping keys that split a metric into independent tracks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Fuel-tech groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FueltechGroup {
    Coal,
    Gas,
    Wind,
    Solar,
    Hydro,
    Bioenergy,
    Distillate,
    BatteryCharging,
    BatteryDischarging,
    Pumps,
}

impl FueltechGroup {
    pub const ALL: [FueltechGroup; 10] = [
        FueltechGroup::Coal,
        FueltechGroup::Gas,
        FueltechGroup::Wind,
        FueltechGroup::Solar,
        FueltechGroup::Hydro,
        FueltechGroup::Bioenergy,
        FueltechGroup::Distillate,
        FueltechGroup::BatteryCharging,
        FueltechGroup::BatteryDischarging,
        FueltechGroup::Pumps,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FueltechGroup::Coal => "coal",
            FueltechGroup::Gas => "gas",
            FueltechGroup::Wind => "wind",
            FueltechGroup::Solar => "solar",
            FueltechGroup::Hydro => "hydro",
            FueltechGroup::Bioenergy => "bioenergy",
            FueltechGroup::Distillate => "distillate",
            FueltechGroup::BatteryCharging => "battery_charging",
            FueltechGroup::BatteryDischarging => "battery_discharging",
            FueltechGroup::Pumps => "pumps",
        }
    }
}

impl fmt::Display for FueltechGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FueltechGroup {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FueltechGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| CoreError::Parse(format!("Unknown fueltech group '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Partition shapes
// ---------------------------------------------------------------------------

/// The six grouping shapes, without their values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    Network,
    NetworkRegion,
    NetworkFueltech,
    NetworkRenewable,
    NetworkRegionFueltech,
    NetworkRegionRenewable,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 6] = [
        PartitionKind::Network,
        PartitionKind::NetworkRegion,
        PartitionKind::NetworkFueltech,
        PartitionKind::NetworkRenewable,
        PartitionKind::NetworkRegionFueltech,
        PartitionKind::NetworkRegionRenewable,
    ];

    /// Whether the shape splits by fuel tech (directly or via the
    /// renewable flag, which is derived from fuel tech).
    pub fn is_fueltech_based(self) -> bool {
        !matches!(self, PartitionKind::Network | PartitionKind::NetworkRegion)
    }
}

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// A concrete grouping key. Each variant carries only its own fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Partition {
    Network {
        network: String,
    },
    NetworkRegion {
        network: String,
        region: String,
    },
    NetworkFueltech {
        network: String,
        fueltech_group: FueltechGroup,
    },
    NetworkRenewable {
        network: String,
        renewable: bool,
    },
    NetworkRegionFueltech {
        network: String,
        region: String,
        fueltech_group: FueltechGroup,
    },
    NetworkRegionRenewable {
        network: String,
        region: String,
        renewable: bool,
    },
}

impl Partition {
    pub fn kind(&self) -> PartitionKind {
        match self {
            Partition::Network { .. } => PartitionKind::Network,
            Partition::NetworkRegion { .. } => PartitionKind::NetworkRegion,
            Partition::NetworkFueltech { .. } => PartitionKind::NetworkFueltech,
            Partition::NetworkRenewable { .. } => PartitionKind::NetworkRenewable,
            Partition::NetworkRegionFueltech { .. } => PartitionKind::NetworkRegionFueltech,
            Partition::NetworkRegionRenewable { .. } => PartitionKind::NetworkRegionRenewable,
        }
    }

    pub fn network(&self) -> &str {
        match self {
            Partition::Network { network }
            | Partition::NetworkRegion { network, .. }
            | Partition::NetworkFueltech { network, .. }
            | Partition::NetworkRenewable { network, .. }
            | Partition::NetworkRegionFueltech { network, .. }
            | Partition::NetworkRegionRenewable { network, .. } => network,
        }
    }

    pub fn region(&self) -> Option<&str> {
        match self {
            Partition::NetworkRegion { region, .. }
            | Partition::NetworkRegionFueltech { region, .. }
            | Partition::NetworkRegionRenewable { region, .. } => Some(region),
            _ => None,
        }
    }

    pub fn fueltech_group(&self) -> Option<FueltechGroup> {
        match self {
            Partition::NetworkFueltech { fueltech_group, .. }
            | Partition::NetworkRegionFueltech { fueltech_group, .. } => Some(*fueltech_group),
            _ => None,
        }
    }

    pub fn renewable(&self) -> Option<bool> {
        match self {
            Partition::NetworkRenewable { renewable, .. }
            | Partition::NetworkRegionRenewable { renewable, .. } => Some(*renewable),
            _ => None,
        }
    }

    /// Canonical `key=value;...` form used as the natural-key component in
    /// the store. Fields always appear in the same order.
    pub fn descriptor(&self) -> String {
        let mut out = format!("network={}", self.network());
        if let Some(region) = self.region() {
            out.push_str(";region=");
            out.push_str(region);
        }
        if let Some(group) = self.fueltech_group() {
            out.push_str(";fueltech_group=");
            out.push_str(group.as_str());
        }
        if let Some(renewable) = self.renewable() {
            out.push_str(if renewable {
                ";renewable=true"
            } else {
                ";renewable=false"
            });
        }
        out
    }

    /// Short human label, e.g. `NEM NSW1 coal` or `WEM renewable`.
    pub fn label(&self) -> String {
        let mut parts = vec![self.network().to_string()];
        if let Some(region) = self.region() {
            parts.push(region.to_string());
        }
        if let Some(group) = self.fueltech_group() {
            parts.push(group.as_str().replace('_', " "));
        }
        match self.renewable() {
            Some(true) => parts.push("renewable".into()),
            Some(false) => parts.push("non-renewable".into()),
            None => {}
        }
        parts.join(" ")
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl FromStr for Partition {
    type Err = CoreError;

    /// Parse a [`Partition::descriptor`] string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut network = None;
        let mut region = None;
        let mut fueltech_group = None;
        let mut renewable = None;

        for field in s.split(';').filter(|f| !f.is_empty()) {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| CoreError::Parse(format!("Malformed partition field '{field}'")))?;
            if value.is_empty() {
                return Err(CoreError::Parse(format!("Empty value for '{key}'")));
            }
            match key {
                "network" => network = Some(value.to_string()),
                "region" => region = Some(value.to_string()),
                "fueltech_group" => fueltech_group = Some(value.parse::<FueltechGroup>()?),
                "renewable" => {
                    renewable = Some(value.parse::<bool>().map_err(|_| {
                        CoreError::Parse(format!("Invalid renewable flag '{value}'"))
                    })?)
                }
                other => {
                    return Err(CoreError::Parse(format!("Unknown partition field '{other}'")));
                }
            }
        }

        let network =
            network.ok_or_else(|| CoreError::Parse(format!("Partition '{s}' has no network")))?;

        match (region, fueltech_group, renewable) {
            (None, None, None) => Ok(Partition::Network { network }),
            (Some(region), None, None) => Ok(Partition::NetworkRegion { network, region }),
            (None, Some(fueltech_group), None) => Ok(Partition::NetworkFueltech {
                network,
                fueltech_group,
            }),
            (None, None, Some(renewable)) => Ok(Partition::NetworkRenewable { network, renewable }),
            (Some(region), Some(fueltech_group), None) => Ok(Partition::NetworkRegionFueltech {
                network,
                region,
                fueltech_group,
            }),
            (Some(region), None, Some(renewable)) => Ok(Partition::NetworkRegionRenewable {
                network,
                region,
                renewable,
            }),
            (_, Some(_), Some(_)) => Err(CoreError::Parse(format!(
                "Partition '{s}' cannot combine fueltech_group and renewable"
            ))),
        }
    }
}
