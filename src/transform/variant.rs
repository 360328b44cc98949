//! Extraction of summary, phenotype, population and genotype data from
//! Ensembl variation records.

use crate::entities::population::{
    AlleleFrequency, GenotypeClass, GenotypeFrequencies, Population, PopulationTable,
};
use crate::entities::variant::{GenotypeRow, PhenotypeRow, PopulationRow, VariantId, VariantSummary};
use crate::sources::ensembl::{
    EnsemblMapping, EnsemblPhenotype, EnsemblPopulationFrequency, EnsemblPopulationGenotype,
    EnsemblVariation,
};

/// Genes and traits gathered from a variant's phenotype list.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PhenotypeDigest {
    pub genes: Vec<String>,
    /// Lower-cased traits whose risk allele is the minor allele.
    pub risk_traits: Vec<String>,
    /// `<allele>-><trait>` entries whose risk allele differs.
    pub other_traits: Vec<String>,
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn digest_phenotypes(
    phenotypes: &[EnsemblPhenotype],
    minor_allele: Option<&str>,
) -> PhenotypeDigest {
    let mut digest = PhenotypeDigest::default();

    for phenotype in phenotypes {
        let Some(risk_allele) = non_empty(phenotype.risk_allele.as_deref()) else {
            continue;
        };

        for gene in phenotype.genes.values() {
            let gene = gene.trim();
            if !gene.is_empty() {
                push_unique(&mut digest.genes, gene.to_string());
            }
        }

        let Some(trait_name) = non_empty(phenotype.trait_name.as_deref()) else {
            continue;
        };
        let trait_name = trait_name.to_lowercase();
        if Some(risk_allele) == minor_allele {
            push_unique(&mut digest.risk_traits, trait_name);
        } else {
            push_unique(
                &mut digest.other_traits,
                format!("{risk_allele}->{trait_name}"),
            );
        }
    }

    digest
}

pub(crate) fn summary_from_variation(id: VariantId, variation: &EnsemblVariation) -> VariantSummary {
    let minor_allele = non_empty(variation.minor_allele.as_deref()).map(str::to_string);
    let digest = digest_phenotypes(&variation.phenotypes, minor_allele.as_deref());

    VariantSummary {
        id,
        name: non_empty(variation.name.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| id.rsid()),
        minor_allele,
        sequence: variation
            .mappings
            .first()
            .and_then(|m| non_empty(m.allele_string.as_deref()))
            .map(str::to_string),
        genes: digest.genes,
        consequence: non_empty(variation.most_severe_consequence.as_deref()).map(str::to_string),
        risk_traits: digest.risk_traits,
        other_traits: digest.other_traits,
        clinical_significance: variation.clinical_significance.clone(),
    }
}

pub(crate) fn phenotype_row(id: VariantId, variation: Option<&EnsemblVariation>) -> PhenotypeRow {
    let Some(variation) = variation else {
        return PhenotypeRow::empty(id);
    };
    let minor_allele = non_empty(variation.minor_allele.as_deref());
    let digest = digest_phenotypes(&variation.phenotypes, minor_allele);

    PhenotypeRow {
        id,
        consequence: non_empty(variation.most_severe_consequence.as_deref()).map(str::to_string),
        genes: digest.genes,
        risk_traits: digest.risk_traits,
        other_traits: digest.other_traits,
        clinical_significance: variation.clinical_significance.clone().unwrap_or_default(),
    }
}

/// Location and major allele resolved from a variant's genomic mappings.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct AlleleRoles {
    pub chromosome: Option<String>,
    pub position: Option<String>,
    pub major_allele: Option<String>,
}

/// Major allele from an `A/B` allele string: the first allele unless it is
/// the minor allele, in which case the second.
fn major_from_allele_string(allele_string: &str, minor_allele: Option<&str>) -> Option<String> {
    let mut alleles = allele_string.split('/').map(str::trim);
    let first = alleles.next().filter(|a| !a.is_empty())?;
    if Some(first) != minor_allele {
        return Some(first.to_string());
    }
    alleles.next().filter(|a| !a.is_empty()).map(str::to_string)
}

fn roles_from_mapping(
    mapping: &EnsemblMapping,
    minor_allele: Option<&str>,
    ancestral_fallback: bool,
) -> AlleleRoles {
    let location = non_empty(mapping.location.as_deref());
    let chromosome = location
        .and_then(|loc| loc.split(':').next())
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let position = location
        .and_then(|loc| loc.split('-').nth(1))
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let major_allele = match non_empty(mapping.allele_string.as_deref()) {
        // Longer than "A/B": multi-allelic, use the ancestral allele instead.
        Some(alleles) if ancestral_fallback && alleles.len() > 3 => {
            non_empty(mapping.ancestral_allele.as_deref()).map(str::to_string)
        }
        Some(alleles) => major_from_allele_string(alleles, minor_allele),
        None => None,
    };

    AlleleRoles {
        chromosome,
        position,
        major_allele,
    }
}

/// Only the first mapping is consulted; the ancestral-allele fallback is
/// reserved for variants with exactly one mapping.
pub(crate) fn allele_roles(mappings: &[EnsemblMapping], minor_allele: Option<&str>) -> AlleleRoles {
    match mappings {
        [] => AlleleRoles::default(),
        [only] => roles_from_mapping(only, minor_allele, true),
        [first, ..] => roles_from_mapping(first, minor_allele, false),
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FrequencyRange {
    min: Option<f64>,
    max: Option<f64>,
}

impl FrequencyRange {
    fn observe(&mut self, frequency: f64) {
        self.min = Some(self.min.map_or(frequency, |m| m.min(frequency)));
        self.max = Some(self.max.map_or(frequency, |m| m.max(frequency)));
    }

    /// A minimum of exactly 1 means only the major allele was observed.
    fn reduce(self) -> AlleleFrequency {
        AlleleFrequency {
            minor: self.min.map(|m| if m == 1.0 { 0.0 } else { m }),
            major: self.max,
        }
    }
}

pub(crate) fn population_frequencies(
    frequencies: &[EnsemblPopulationFrequency],
) -> PopulationTable<AlleleFrequency> {
    let mut ranges = PopulationTable::<FrequencyRange>::default();
    for entry in frequencies {
        let Some(population) = entry.population.as_deref().and_then(Population::from_label) else {
            continue;
        };
        let Some(frequency) = entry.frequency else {
            continue;
        };
        ranges[population].observe(frequency);
    }
    ranges.map(FrequencyRange::reduce)
}

pub(crate) fn population_row(id: VariantId, variation: Option<&EnsemblVariation>) -> PopulationRow {
    let Some(variation) = variation else {
        return PopulationRow::empty(id);
    };
    let minor_allele = non_empty(variation.minor_allele.as_deref());
    let roles = allele_roles(&variation.mappings, minor_allele);

    PopulationRow {
        id,
        chromosome: roles.chromosome,
        position: roles.position,
        minor_allele: minor_allele.map(str::to_string),
        major_allele: roles.major_allele,
        frequencies: population_frequencies(&variation.populations),
    }
}

/// Classifies an `allele|allele` genotype against the minor allele.
///
/// Unphased `A/B` strings are accepted as well; a single allele (haploid
/// call) counts as both copies.
pub(crate) fn classify_genotype(genotype: &str, minor_allele: Option<&str>) -> GenotypeClass {
    let mut alleles = genotype.split(['|', '/']).map(str::trim);
    let first = alleles.next().unwrap_or_default();
    let second = alleles.next().unwrap_or(first);

    let minor_copies = [first, second]
        .into_iter()
        .filter(|allele| Some(*allele) == minor_allele)
        .count();
    match minor_copies {
        2 => GenotypeClass::MinorHomozygous,
        0 => GenotypeClass::MajorHomozygous,
        _ => GenotypeClass::Heterozygous,
    }
}

pub(crate) fn genotype_frequencies(
    genotypes: &[EnsemblPopulationGenotype],
    minor_allele: Option<&str>,
) -> PopulationTable<GenotypeFrequencies> {
    let mut table = PopulationTable::<GenotypeFrequencies>::default();
    for entry in genotypes {
        let Some(population) = entry.population.as_deref().and_then(Population::from_label) else {
            continue;
        };
        let (Some(genotype), Some(frequency)) = (non_empty(entry.genotype.as_deref()), entry.frequency)
        else {
            continue;
        };
        table[population].add(classify_genotype(genotype, minor_allele), frequency);
    }
    table
}

pub(crate) fn genotype_row(id: VariantId, variation: Option<&EnsemblVariation>) -> GenotypeRow {
    let Some(variation) = variation else {
        return GenotypeRow::empty(id);
    };
    let minor_allele = non_empty(variation.minor_allele.as_deref());

    GenotypeRow {
        id,
        frequencies: genotype_frequencies(&variation.population_genotypes, minor_allele),
    }
}
