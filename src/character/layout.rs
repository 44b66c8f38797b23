//! Minimum "visible rows" per repeatable list.
//!
//! The printed sheet has a fixed number of ruled lines for every list; a record
//! always carries at least that many rows so the form never looks empty.

use serde::{Deserialize, Serialize};

use super::ListKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMinimums {
    #[serde(default = "default_weapons")]
    pub weapons: usize,
    #[serde(default = "default_ammo")]
    pub ammo: usize,
    #[serde(default = "default_equipment")]
    pub equipment: usize,
    #[serde(default = "default_perks")]
    pub perks: usize,
}

fn default_weapons() -> usize {
    6
}

fn default_ammo() -> usize {
    6
}

fn default_equipment() -> usize {
    14
}

fn default_perks() -> usize {
    10
}

impl Default for ListMinimums {
    fn default() -> Self {
        Self {
            weapons: default_weapons(),
            ammo: default_ammo(),
            equipment: default_equipment(),
            perks: default_perks(),
        }
    }
}

impl ListMinimums {
    pub fn min_rows(&self, kind: ListKind) -> usize {
        match kind {
            ListKind::Weapons => self.weapons,
            ListKind::Ammo => self.ammo,
            ListKind::Equipment => self.equipment,
            ListKind::Perks => self.perks,
        }
    }

    /// Same minimum for every list. Handy in tests.
    pub fn uniform(rows: usize) -> Self {
        Self {
            weapons: rows,
            ammo: rows,
            equipment: rows,
            perks: rows,
        }
    }
}
