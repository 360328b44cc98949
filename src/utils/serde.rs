use serde::{Deserialize, Deserializer};

/// Ensembl reports `genes` on a phenotype as either a single string or a list.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrVec {
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::None => Vec::new(),
            Self::Single(value) => vec![value.as_str()],
            Self::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Treats an explicit JSON `null` the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Integer(i64),
    Float(f64),
    String(String),
}

pub(crate) fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberLike>::deserialize(deserializer)?;
    Ok(match value {
        Some(NumberLike::Float(v)) => Some(v),
        Some(NumberLike::Integer(v)) => Some(v as f64),
        Some(NumberLike::String(v)) => v.trim().parse::<f64>().ok(),
        None => None,
    })
}

/// E-utilities sends counts as strings (`"120"`); accept bare numbers too.
pub(crate) fn de_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberLike>::deserialize(deserializer)?;
    Ok(match value {
        Some(NumberLike::Integer(v)) => u64::try_from(v).ok(),
        Some(NumberLike::Float(v)) if v >= 0.0 && v.fract() == 0.0 => Some(v as u64),
        Some(NumberLike::Float(_)) => None,
        Some(NumberLike::String(v)) => v.trim().parse::<u64>().ok(),
        None => None,
    })
}
