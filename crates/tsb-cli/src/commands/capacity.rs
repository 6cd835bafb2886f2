use super::{format_bytes, json_pretty, label, open_store, EXIT_SUCCESS};
use serde::Serialize;
use tsb_store::{Store, StoreConfig};

#[derive(Debug, Serialize)]
pub struct CapacityReport {
    pub location: String,
    pub min_free_percentage: u32,
    pub max_capacity_mib: u32,
    pub capacity: u64,
    pub available: u64,
    pub active_generation: u32,
    pub flush_generation: u32,
}

impl CapacityReport {
    fn from_store(store: &Store, config: &StoreConfig) -> Self {
        Self {
            location: store.location().display().to_string(),
            min_free_percentage: config.min_free_percentage,
            max_capacity_mib: config.max_capacity_mib,
            capacity: store.capacity(),
            available: store.available(),
            active_generation: store.active_generation(),
            flush_generation: store.flush_generation(),
        }
    }
}

pub fn run(config: &StoreConfig, json: bool) -> Result<u8, String> {
    let store = open_store(config)?;
    let report = CapacityReport::from_store(&store, config);
    drop(store);

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("{} {}", label("location:"), report.location);
        println!(
            "{} {} ({} bytes; {}% kept free, at most {} MiB)",
            label("capacity:"),
            format_bytes(report.capacity),
            report.capacity,
            report.min_free_percentage,
            report.max_capacity_mib
        );
        println!(
            "{} {} ({} bytes)",
            label("available:"),
            format_bytes(report.available),
            report.available
        );
        println!(
            "{} active {}, flush {}",
            label("generations:"),
            report.active_generation,
            report.flush_generation
        );
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsb_store::BYTES_IN_MIB;

    #[test]
    fn report_reflects_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path(), 5, 2);
        let store = open_store(&config).unwrap();
        let report = CapacityReport::from_store(&store, &config);

        assert_eq!(report.location, dir.path().display().to_string());
        assert!(report.capacity <= 2 * BYTES_IN_MIB);
        assert_eq!(report.available, report.capacity);
        assert_eq!(report.active_generation, 1);
        assert_eq!(report.max_capacity_mib, 2);
    }
}
