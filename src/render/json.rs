use serde::Serialize;

use crate::error::SnpFinderError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, SnpFinderError> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::to_pretty;
    use crate::entities::search::DiscoveryPage;
    use crate::entities::variant::{GenotypeRow, PhenotypeRow, PopulationRow, VariantId};

    #[test]
    fn discovery_page_serializes_rsids() {
        let page = DiscoveryPage {
            ids: vec![VariantId::new(3), VariantId::new(7)],
            total: 120,
        };
        let json = to_pretty(&page).expect("json");
        assert!(json.contains('\n'));
        assert!(json.contains("\"rs3\""));
        assert!(json.contains("\"total\": 120"));
    }

    #[test]
    fn table_serializes_population_keys() {
        let id = VariantId::new(5);
        let table = crate::entities::table::merge(
            &[id],
            vec![PopulationRow::empty(id)],
            vec![PhenotypeRow::empty(id)],
            vec![GenotypeRow::empty(id)],
        )
        .expect("merge");
        let json = to_pretty(&table).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["records"][0]["id"], "rs5");
        assert!(value["records"][0]["allele_frequencies"]["EUR"]["minor"].is_null());
        assert_eq!(
            value["records"][0]["genotype_frequencies"]["SAS"]["heterozygous"],
            0.0
        );
    }
}
