//! Closed 1000 Genomes phase 3 population set and per-population storage.

use std::ops::{Index, IndexMut};

use serde::Serialize;
use serde::ser::SerializeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Population {
    All,
    Afr,
    Amr,
    Eas,
    Eur,
    Sas,
}

impl Population {
    pub const VALUES: [Population; 6] = [
        Population::All,
        Population::Afr,
        Population::Amr,
        Population::Eas,
        Population::Eur,
        Population::Sas,
    ];

    /// Column order of the export table.
    pub const TABLE_ORDER: [Population; 6] = [
        Population::All,
        Population::Afr,
        Population::Eur,
        Population::Amr,
        Population::Eas,
        Population::Sas,
    ];

    fn index(self) -> usize {
        match self {
            Self::All => 0,
            Self::Afr => 1,
            Self::Amr => 2,
            Self::Eas => 3,
            Self::Eur => 4,
            Self::Sas => 5,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Afr => "AFR",
            Self::Amr => "AMR",
            Self::Eas => "EAS",
            Self::Eur => "EUR",
            Self::Sas => "SAS",
        }
    }

    /// Population identifier as Ensembl reports it.
    pub fn label(self) -> &'static str {
        match self {
            Self::All => "1000GENOMES:phase_3:ALL",
            Self::Afr => "1000GENOMES:phase_3:AFR",
            Self::Amr => "1000GENOMES:phase_3:AMR",
            Self::Eas => "1000GENOMES:phase_3:EAS",
            Self::Eur => "1000GENOMES:phase_3:EUR",
            Self::Sas => "1000GENOMES:phase_3:SAS",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::All => "Total",
            Self::Afr => "African",
            Self::Amr => "American",
            Self::Eas => "East Asian",
            Self::Eur => "European",
            Self::Sas => "South Asian",
        }
    }

    /// Exact match against an upstream population identifier.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::VALUES.into_iter().find(|p| p.label() == label)
    }
}

/// One slot per [`Population`], always fully populated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PopulationTable<T> {
    slots: [T; 6],
}

impl<T> PopulationTable<T> {
    pub fn get(&self, population: Population) -> &T {
        &self.slots[population.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Population, &T)> {
        Population::VALUES.into_iter().map(|p| (p, self.get(p)))
    }

    pub fn map<U, F>(self, f: F) -> PopulationTable<U>
    where
        F: FnMut(T) -> U,
    {
        PopulationTable {
            slots: self.slots.map(f),
        }
    }
}

impl<T> Index<Population> for PopulationTable<T> {
    type Output = T;

    fn index(&self, population: Population) -> &T {
        self.get(population)
    }
}

impl<T> IndexMut<Population> for PopulationTable<T> {
    fn index_mut(&mut self, population: Population) -> &mut T {
        &mut self.slots[population.index()]
    }
}

impl<T: Serialize> Serialize for PopulationTable<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.slots.len()))?;
        for (population, value) in self.iter() {
            map.serialize_entry(population.code(), value)?;
        }
        map.end()
    }
}

/// Minor/major allele frequency pair; `None` renders as "NA".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AlleleFrequency {
    pub minor: Option<f64>,
    pub major: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenotypeClass {
    Heterozygous,
    MinorHomozygous,
    MajorHomozygous,
}

/// Genotype frequencies for one population; unseen categories stay at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GenotypeFrequencies {
    pub heterozygous: f64,
    pub minor_homozygous: f64,
    pub major_homozygous: f64,
}

impl GenotypeFrequencies {
    pub fn add(&mut self, class: GenotypeClass, frequency: f64) {
        match class {
            GenotypeClass::Heterozygous => self.heterozygous += frequency,
            GenotypeClass::MinorHomozygous => self.minor_homozygous += frequency,
            GenotypeClass::MajorHomozygous => self.major_homozygous += frequency,
        }
    }
}
