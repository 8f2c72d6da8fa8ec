//! Partition Catalog: the single source of truth for which tracks exist.
//!
//! Compatibility rules:
//! - `power` is tracked at `interval` only.
//! - `energy` and `emissions` are tracked at every period except `interval`.
//! - `price` and `demand` are tracked at every period, but only per network
//!   and per region, never split by fuel tech or renewable flag.

use std::collections::{BTreeMap, BTreeSet};

use crate::calendar::PeriodCalendar;
use crate::config::{CatalogConfig, NetworkConfig};
use crate::error::CoreError;
use crate::metric::Metric;
use crate::partition::{FueltechGroup, Partition, PartitionKind};
use crate::period::Period;
use crate::track::{Track, TrackRules};

const INTERVAL_ONLY: &[Period] = &[Period::Interval];

const NON_INTERVAL: &[Period] = &[
    Period::Day,
    Period::Week,
    Period::Month,
    Period::Quarter,
    Period::Season,
    Period::Year,
    Period::FinancialYear,
];

const MARKET_PARTITIONS: &[PartitionKind] = &[PartitionKind::Network, PartitionKind::NetworkRegion];

/// Validated network catalog. Build once at startup and share.
#[derive(Debug, Clone)]
pub struct PartitionCatalog {
    networks: Vec<NetworkConfig>,
    fueltech_groups: Vec<FueltechGroup>,
    calendars: BTreeMap<String, PeriodCalendar>,
}

impl PartitionCatalog {
    pub fn new(config: CatalogConfig) -> Result<Self, CoreError> {
        if config.networks.is_empty() {
            return Err(CoreError::Validation(
                "Catalog must contain at least one network".to_string(),
            ));
        }
        if config.fueltech_groups.is_empty() {
            return Err(CoreError::Validation(
                "Catalog must contain at least one fueltech group".to_string(),
            ));
        }
        let mut seen_groups = BTreeSet::new();
        for group in &config.fueltech_groups {
            if !seen_groups.insert(*group) {
                return Err(CoreError::Validation(format!(
                    "Duplicate fueltech group: {group}"
                )));
            }
        }

        let mut calendars = BTreeMap::new();
        for network in &config.networks {
            validate_network(network)?;
            let calendar = PeriodCalendar::for_network(network)?;
            if calendars.insert(network.code.clone(), calendar).is_some() {
                return Err(CoreError::Validation(format!(
                    "Duplicate network code: {}",
                    network.code
                )));
            }
        }

        Ok(Self {
            networks: config.networks,
            fueltech_groups: config.fueltech_groups,
            calendars,
        })
    }

    pub fn networks(&self) -> &[NetworkConfig] {
        &self.networks
    }

    pub fn network(&self, code: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.code == code)
    }

    pub fn calendar(&self, code: &str) -> Result<PeriodCalendar, CoreError> {
        self.calendars
            .get(code)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("Unknown network '{code}'")))
    }

    /// Periods a metric is tracked at.
    pub fn periods_for(metric: Metric) -> &'static [Period] {
        match metric {
            Metric::Power => INTERVAL_ONLY,
            Metric::Energy | Metric::Emissions => NON_INTERVAL,
            Metric::Price | Metric::Demand => &Period::ALL,
        }
    }

    /// Partition shapes a metric is tracked by.
    pub fn partition_kinds_for(metric: Metric) -> &'static [PartitionKind] {
        if metric.is_market() {
            MARKET_PARTITIONS
        } else {
            &PartitionKind::ALL
        }
    }

    /// Every concrete partition of `kind` within a network.
    pub fn partitions(&self, network: &NetworkConfig, kind: PartitionKind) -> Vec<Partition> {
        let code = network.code.as_str();
        match kind {
            PartitionKind::Network => vec![Partition::Network { network: code.to_string() }],
            PartitionKind::NetworkRegion => network
                .regions
                .iter()
                .map(|region| Partition::NetworkRegion {
                    network: code.to_string(),
                    region: region.clone(),
                })
                .collect(),
            PartitionKind::NetworkFueltech => self
                .fueltech_groups
                .iter()
                .map(|group| Partition::NetworkFueltech {
                    network: code.to_string(),
                    fueltech_group: *group,
                })
                .collect(),
            PartitionKind::NetworkRenewable => [true, false]
                .into_iter()
                .map(|renewable| Partition::NetworkRenewable {
                    network: code.to_string(),
                    renewable,
                })
                .collect(),
            PartitionKind::NetworkRegionFueltech => network
                .regions
                .iter()
                .flat_map(|region| {
                    self.fueltech_groups
                        .iter()
                        .map(move |group| Partition::NetworkRegionFueltech {
                            network: code.to_string(),
                            region: region.clone(),
                            fueltech_group: *group,
                        })
                })
                .collect(),
            PartitionKind::NetworkRegionRenewable => network
                .regions
                .iter()
                .flat_map(|region| {
                    [true, false]
                        .into_iter()
                        .map(move |renewable| Partition::NetworkRegionRenewable {
                            network: code.to_string(),
                            region: region.clone(),
                            renewable,
                        })
                })
                .collect(),
        }
    }

    /// Every `(period, partition)` a metric must be tracked for, across all
    /// networks.
    pub fn valid_tracks(&self, metric: Metric) -> Vec<(Period, Partition)> {
        let mut out = Vec::new();
        for network in &self.networks {
            for period in Self::periods_for(metric) {
                for kind in Self::partition_kinds_for(metric) {
                    for partition in self.partitions(network, *kind) {
                        out.push((*period, partition));
                    }
                }
            }
        }
        out
    }

    pub fn tracks(&self, metric: Metric) -> Vec<Track> {
        self.valid_tracks(metric)
            .into_iter()
            .map(|(period, partition)| Track::new(metric, period, partition))
            .collect()
    }

    /// Every track of every metric for one network at one period.
    pub fn tracks_for_period(&self, network: &str, period: Period) -> Vec<Track> {
        let Some(config) = self.network(network) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for metric in Metric::ALL {
            if !Self::periods_for(metric).contains(&period) {
                continue;
            }
            for kind in Self::partition_kinds_for(metric) {
                for partition in self.partitions(config, *kind) {
                    out.push(Track::new(metric, period, partition));
                }
            }
        }
        out
    }

    /// Reject tracks the catalog does not define, before any work starts.
    pub fn validate_track(&self, track: &Track) -> Result<(), CoreError> {
        let unsupported = || CoreError::UnsupportedTrack {
            metric: track.metric.to_string(),
            period: track.period.to_string(),
            partition: track.partition.descriptor(),
        };

        if !Self::periods_for(track.metric).contains(&track.period) {
            return Err(unsupported());
        }
        if !Self::partition_kinds_for(track.metric).contains(&track.partition.kind()) {
            return Err(unsupported());
        }

        let network = self.network(track.partition.network()).ok_or_else(|| {
            CoreError::Validation(format!("Unknown network '{}'", track.partition.network()))
        })?;
        if let Some(region) = track.partition.region() {
            if !network.regions.iter().any(|r| r == region) {
                return Err(CoreError::Validation(format!(
                    "Unknown region '{region}' in network '{}'",
                    network.code
                )));
            }
        }
        if let Some(group) = track.partition.fueltech_group() {
            if !self.fueltech_groups.contains(&group) {
                return Err(CoreError::Validation(format!(
                    "Fueltech group '{group}' is not configured"
                )));
            }
        }
        Ok(())
    }

    /// Tracker parameters for a validated track.
    pub fn rules(&self, track: &Track) -> Result<TrackRules, CoreError> {
        self.validate_track(track)?;
        let network = self.network(track.partition.network()).ok_or_else(|| {
            CoreError::Validation(format!("Unknown network '{}'", track.partition.network()))
        })?;
        Ok(TrackRules {
            completeness_threshold: network.threshold(track.period),
            allow_non_positive: track.metric.allows_non_positive(),
        })
    }
}

/// Codes are embedded in partition descriptors, so they cannot contain the
/// descriptor separators.
fn is_descriptor_safe(code: &str) -> bool {
    !code.contains([';', '='])
}

fn validate_network(network: &NetworkConfig) -> Result<(), CoreError> {
    if network.code.trim().is_empty() {
        return Err(CoreError::Validation(
            "Network code must not be empty".to_string(),
        ));
    }
    if !is_descriptor_safe(&network.code) {
        return Err(CoreError::Validation(format!(
            "Network code '{}' must not contain ';' or '='",
            network.code
        )));
    }
    let mut seen = BTreeSet::new();
    for region in &network.regions {
        if region.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Network '{}' has an empty region code",
                network.code
            )));
        }
        if !is_descriptor_safe(region) {
            return Err(CoreError::Validation(format!(
                "Region '{region}' in network '{}' must not contain ';' or '='",
                network.code
            )));
        }
        if !seen.insert(region.as_str()) {
            return Err(CoreError::Validation(format!(
                "Duplicate region '{region}' in network '{}'",
                network.code
            )));
        }
    }
    if let Some((period, _)) = network.thresholds.iter().find(|(_, v)| **v == 0) {
        return Err(CoreError::Validation(format!(
            "Threshold for {period} in network '{}' must be positive",
            network.code
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn catalog() -> PartitionCatalog {
        PartitionCatalog::new(CatalogConfig::default()).unwrap()
    }

    // NEM: 1 + 5 regions + 10 groups + 2 flags + 50 + 10 = 78
    // WEM: 1 + 1 region  + 10 groups + 2 flags + 10 + 2  = 26
    const ALL_PARTITIONS: usize = 78 + 26;
    // NEM: 1 + 5, WEM: 1 + 1
    const MARKET_PARTITIONS_TOTAL: usize = 6 + 2;

    #[test]
    fn power_is_interval_only() {
        let tracks = catalog().valid_tracks(Metric::Power);
        assert_eq!(tracks.len(), ALL_PARTITIONS);
        assert!(tracks.iter().all(|(p, _)| *p == Period::Interval));
    }

    #[test]
    fn energy_and_emissions_skip_interval() {
        for metric in [Metric::Energy, Metric::Emissions] {
            let tracks = catalog().valid_tracks(metric);
            assert_eq!(tracks.len(), 7 * ALL_PARTITIONS);
            assert!(tracks.iter().all(|(p, _)| *p != Period::Interval));
        }
    }

    #[test]
    fn market_metrics_never_split_by_fueltech() {
        for metric in [Metric::Price, Metric::Demand] {
            let tracks = catalog().valid_tracks(metric);
            assert_eq!(tracks.len(), 8 * MARKET_PARTITIONS_TOTAL);
            assert!(tracks.iter().all(|(_, p)| !p.kind().is_fueltech_based()));
        }
    }

    #[test]
    fn tracks_for_period_covers_every_metric_valid_there() {
        let cat = catalog();
        let interval = cat.tracks_for_period("WEM", Period::Interval);
        // power (26) + price (2) + demand (2)
        assert_eq!(interval.len(), 26 + 2 + 2);

        let day = cat.tracks_for_period("WEM", Period::Day);
        // energy (26) + emissions (26) + price (2) + demand (2)
        assert_eq!(day.len(), 26 + 26 + 2 + 2);

        assert!(cat.tracks_for_period("SWIS", Period::Day).is_empty());
    }

    #[test]
    fn every_enumerated_track_validates() {
        let cat = catalog();
        for metric in Metric::ALL {
            for track in cat.tracks(metric) {
                cat.validate_track(&track).unwrap();
            }
        }
    }

    #[test]
    fn rejects_market_metric_with_fueltech_partition() {
        let track = Track::new(
            Metric::Price,
            Period::Day,
            Partition::NetworkFueltech {
                network: "NEM".into(),
                fueltech_group: FueltechGroup::Coal,
            },
        );
        assert_matches!(
            catalog().validate_track(&track),
            Err(CoreError::UnsupportedTrack { .. })
        );
    }

    #[test]
    fn rejects_power_at_day_and_energy_at_interval() {
        let nem = Partition::Network {
            network: "NEM".into(),
        };
        for (metric, period) in [(Metric::Power, Period::Day), (Metric::Energy, Period::Interval)] {
            let track = Track::new(metric, period, nem.clone());
            assert_matches!(
                catalog().validate_track(&track),
                Err(CoreError::UnsupportedTrack { .. })
            );
        }
    }

    #[test]
    fn rejects_unknown_network_and_region() {
        let cat = catalog();
        let unknown_network = Track::new(
            Metric::Energy,
            Period::Day,
            Partition::Network {
                network: "ERCOT".into(),
            },
        );
        assert_matches!(
            cat.validate_track(&unknown_network),
            Err(CoreError::Validation(_))
        );

        let unknown_region = Track::new(
            Metric::Energy,
            Period::Day,
            Partition::NetworkRegion {
                network: "WEM".into(),
                region: "NSW1".into(),
            },
        );
        assert_matches!(
            cat.validate_track(&unknown_region),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn rules_resolve_threshold_and_sign_flag() {
        let cat = catalog();
        let nem = Partition::Network {
            network: "NEM".into(),
        };
        let energy = cat
            .rules(&Track::new(Metric::Energy, Period::Month, nem.clone()))
            .unwrap();
        assert_eq!(energy.completeness_threshold, 8_000);
        assert!(!energy.allow_non_positive);

        let price = cat
            .rules(&Track::new(Metric::Price, Period::Interval, nem))
            .unwrap();
        assert_eq!(price.completeness_threshold, 1);
        assert!(price.allow_non_positive);
    }

    #[test]
    fn rejects_invalid_configs() {
        let mut dup = CatalogConfig::default();
        dup.networks.push(dup.networks[0].clone());
        assert_matches!(PartitionCatalog::new(dup), Err(CoreError::Validation(_)));

        let mut bad_interval = CatalogConfig::default();
        bad_interval.networks[0].interval_minutes = 7;
        assert_matches!(
            PartitionCatalog::new(bad_interval),
            Err(CoreError::Validation(_))
        );

        let mut dup_region = CatalogConfig::default();
        dup_region.networks[1].regions.push("WEM".into());
        assert_matches!(
            PartitionCatalog::new(dup_region),
            Err(CoreError::Validation(_))
        );

        let mut no_groups = CatalogConfig::default();
        no_groups.fueltech_groups.clear();
        assert_matches!(
            PartitionCatalog::new(no_groups),
            Err(CoreError::Validation(_))
        );

        let mut zero_threshold = CatalogConfig::default();
        zero_threshold.networks[0].thresholds.insert(Period::Day, 0);
        assert_matches!(
            PartitionCatalog::new(zero_threshold),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn rejects_codes_that_break_descriptors() {
        for bad in ["NSW1;x", "region=NSW1"] {
            let mut config = CatalogConfig::default();
            config.networks[0].regions.push(bad.into());
            assert_matches!(PartitionCatalog::new(config), Err(CoreError::Validation(_)));
        }

        let mut bad_network = CatalogConfig::default();
        bad_network.networks[0].code = "NEM;WEM".into();
        assert_matches!(
            PartitionCatalog::new(bad_network),
            Err(CoreError::Validation(_))
        );
    }
}
