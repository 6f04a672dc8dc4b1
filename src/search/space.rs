//! Search space definitions: the allowed structure of architectures per sector.

use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::{
    Activation, ConfigError, ConnectionKind, EngineConfig, LayerKind, Param, Sector, SectorConfig,
};

/// Resolved, validated search space for one sector.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    sector: Sector,
    config: SectorConfig,
}

impl SearchSpace {
    /// Validate a sector configuration. Inconsistent bounds fail here, never clamped.
    pub fn new(sector: Sector, config: SectorConfig) -> Result<Self, ConfigError> {
        config.validate(&sector)?;
        Ok(Self { sector, config })
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn config(&self) -> &SectorConfig {
        &self.config
    }

    pub fn layer_kinds(&self) -> &[LayerKind] {
        &self.config.layer_kinds
    }

    pub fn connection_kinds(&self) -> &[ConnectionKind] {
        &self.config.connection_kinds
    }

    pub fn activations(&self) -> &[Activation] {
        &self.config.activations
    }

    /// Inclusive (min, max) layer count.
    pub fn layer_bounds(&self) -> (usize, usize) {
        (self.config.min_layers, self.config.max_layers)
    }

    pub fn target_accuracy(&self) -> f64 {
        self.config.target_accuracy
    }

    pub fn allows_connection(&self, kind: ConnectionKind) -> bool {
        self.config.connection_kinds.contains(&kind)
    }

    /// Range random sampling draws from, before sector clamps.
    pub fn sampling_range(&self, param: Param) -> (f64, f64) {
        self.config.param_ranges.bounds(param)
    }

    /// Range a parameter must stay inside, after sector clamps.
    pub fn valid_range(&self, param: Param) -> (f64, f64) {
        self.config.valid_range(param)
    }
}

/// Read-only catalog of configured search spaces, shared by all sessions.
#[derive(Debug, Clone)]
pub struct SearchSpaceRegistry {
    spaces: HashMap<Sector, Arc<SearchSpace>>,
    fallback: SectorConfig,
}

impl SearchSpaceRegistry {
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut spaces = HashMap::with_capacity(config.sectors.len());
        for (sector, sector_config) in &config.sectors {
            let space = SearchSpace::new(sector.clone(), sector_config.clone())?;
            spaces.insert(sector.clone(), Arc::new(space));
        }

        let fallback = config
            .sectors
            .get(&Sector::General)
            .cloned()
            .unwrap_or_default();

        Ok(Self { spaces, fallback })
    }

    /// Configured space for a sector.
    pub fn get(&self, sector: &Sector) -> Option<Arc<SearchSpace>> {
        self.spaces.get(sector).cloned()
    }

    /// Configured space for a sector, or the general space relabelled for it.
    pub fn resolve(&self, sector: &Sector) -> Arc<SearchSpace> {
        self.get(sector).unwrap_or_else(|| {
            Arc::new(SearchSpace {
                sector: sector.clone(),
                config: self.fallback.clone(),
            })
        })
    }

    pub fn is_configured(&self, sector: &Sector) -> bool {
        self.spaces.contains_key(sector)
    }

    pub fn sectors(&self) -> impl Iterator<Item = &Sector> {
        self.spaces.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_default_config() {
        let registry = SearchSpaceRegistry::from_config(&EngineConfig::default()).unwrap();
        assert!(registry.is_configured(&Sector::Ferpa));
        assert_eq!(registry.sectors().count(), 4);

        let fisma = registry.get(&Sector::Fisma).unwrap();
        assert_eq!(fisma.valid_range(Param::DenseUnits).0, 128.0);
        assert_eq!(fisma.sampling_range(Param::DenseUnits).0, 32.0);
    }

    #[test]
    fn test_unknown_sector_falls_back_to_general() {
        let registry = SearchSpaceRegistry::from_config(&EngineConfig::default()).unwrap();
        let lab = Sector::from("lab");

        assert!(registry.get(&lab).is_none());
        let space = registry.resolve(&lab);
        assert_eq!(space.sector(), &lab);
        assert_eq!(space.layer_bounds(), (5, 50));
    }

    #[test]
    fn test_invalid_space_fails_fast() {
        let config = SectorConfig {
            min_layers: 12,
            max_layers: 4,
            ..Default::default()
        };
        assert!(SearchSpace::new(Sector::General, config).is_err());
    }
}
