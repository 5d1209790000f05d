//! The `aptitude catalog` command.

use anyhow::Result;
use comfy_table::{Cell, Table};

use aptitude_core::catalog::{AptitudeCatalog, PercentileBand};

use crate::console::band_cell;

pub fn execute() -> Result<()> {
    let catalog = AptitudeCatalog::default();

    let mut table = Table::new();
    table.set_header(vec!["Code", "Aptitude", "Indices"]);
    for def in catalog.definitions() {
        let tags = def
            .group_tags
            .iter()
            .map(|t| t.label())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(&def.code),
            Cell::new(&def.display_name),
            Cell::new(tags),
        ]);
    }
    println!("{table}");

    let mut bands = Table::new();
    bands.set_header(vec!["Band", "Percentiles"]);
    for band in PercentileBand::all() {
        let (low, high) = band.range();
        bands.add_row(vec![band_cell(Some(*band)), Cell::new(format!("{low:.0}-{high:.0}"))]);
    }
    println!("\n{bands}");
    Ok(())
}
