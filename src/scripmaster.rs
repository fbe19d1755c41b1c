//! Scrip master directory
//!
//! CSV-backed instrument catalogue: code -> name lookup and the CE/PE
//! candidate lists the rebalance replacement scan walks.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::broker::InstrumentDirectory;
use crate::types::{Instrument, OptionSide};

#[derive(Debug, Deserialize)]
struct ScripRow {
    #[serde(rename = "ScripCode")]
    scrip_code: u32,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ScripType")]
    scrip_type: String,
}

/// In-memory scrip master loaded once at startup (or on manual refresh)
pub struct ScripMaster {
    by_code: HashMap<u32, Instrument>,
    ce: Vec<Instrument>,
    pe: Vec<Instrument>,
}

impl ScripMaster {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open scrip master {}", path.display()))?;

        let mut by_code = HashMap::new();
        let mut ce = Vec::new();
        let mut pe = Vec::new();

        for row in reader.deserialize::<ScripRow>() {
            // Tolerate malformed rows; the master file is vendor-generated
            let row = match row {
                Ok(r) => r,
                Err(_) => continue,
            };
            let side = match OptionSide::from_str(&row.scrip_type) {
                Some(s) => s,
                None => continue,
            };
            let instrument = Instrument {
                code: row.scrip_code,
                name: row.name,
                side,
            };
            match side {
                OptionSide::Ce => ce.push(instrument.clone()),
                OptionSide::Pe => pe.push(instrument.clone()),
            }
            by_code.insert(instrument.code, instrument);
        }

        info!(
            path = %path.display(),
            ce = ce.len(),
            pe = pe.len(),
            "Scrip master loaded"
        );
        Ok(Self { by_code, ce, pe })
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

impl InstrumentDirectory for ScripMaster {
    fn name_of(&self, instrument_code: u32) -> Option<String> {
        self.by_code.get(&instrument_code).map(|i| i.name.clone())
    }

    fn candidates(&self, side: OptionSide) -> Vec<Instrument> {
        match side {
            OptionSide::Ce => self.ce.clone(),
            OptionSide::Pe => self.pe.clone(),
        }
    }
}
