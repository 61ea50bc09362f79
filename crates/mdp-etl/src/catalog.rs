//! Dataset catalog
//!
//! Static mapping from dataset kind to warehouse column schema. The set of
//! kinds is closed: anything outside it is rejected when the kind is parsed,
//! never discovered mid-run by an unmatched string branch.

use mdp_common::{EtlError, Result};
use serde::{Deserialize, Serialize};

/// Logical column type in the warehouse schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Date,
}

/// One column in a dataset schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub required: bool,
}

impl ColumnSpec {
    pub const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    pub const fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

const MOVIES_SCHEMA: &[ColumnSpec] = &[
    ColumnSpec::required("identifier", ColumnType::Text),
    ColumnSpec::nullable("genres", ColumnType::Text),
    ColumnSpec::nullable("image_url", ColumnType::Text),
    ColumnSpec::nullable("imdb_id", ColumnType::Text),
    ColumnSpec::nullable("imdb_link", ColumnType::Text),
    ColumnSpec::nullable("movie_id", ColumnType::Text),
    ColumnSpec::nullable("movie_title", ColumnType::Text),
    ColumnSpec::nullable("original_language", ColumnType::Text),
    ColumnSpec::nullable("overview", ColumnType::Text),
    ColumnSpec::nullable("popularity", ColumnType::Float),
    ColumnSpec::nullable("production_countries", ColumnType::Text),
    ColumnSpec::nullable("release_date", ColumnType::Date),
    ColumnSpec::nullable("runtime", ColumnType::Float),
    ColumnSpec::nullable("spoken_languages", ColumnType::Text),
    ColumnSpec::nullable("external_id", ColumnType::Text),
    ColumnSpec::nullable("external_link", ColumnType::Text),
    ColumnSpec::nullable("vote_average", ColumnType::Float),
    ColumnSpec::nullable("vote_count", ColumnType::Integer),
    ColumnSpec::nullable("year_released", ColumnType::Integer),
];

const RATINGS_SCHEMA: &[ColumnSpec] = &[
    ColumnSpec::required("identifier", ColumnType::Text),
    ColumnSpec::nullable("movie_id", ColumnType::Text),
    ColumnSpec::nullable("rating_value", ColumnType::Integer),
    ColumnSpec::nullable("user_id", ColumnType::Text),
];

const USERS_SCHEMA: &[ColumnSpec] = &[
    ColumnSpec::required("identifier", ColumnType::Text),
    ColumnSpec::nullable("display_name", ColumnType::Text),
    ColumnSpec::nullable("num_rating_pages", ColumnType::Float),
    ColumnSpec::nullable("num_reviews", ColumnType::Integer),
    ColumnSpec::nullable("username", ColumnType::Text),
];

/// The closed set of dataset kinds the pipeline moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Movies,
    Ratings,
    Users,
}

impl DatasetKind {
    /// All kinds, in load order.
    pub const ALL: [DatasetKind; 3] = [DatasetKind::Movies, DatasetKind::Ratings, DatasetKind::Users];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Movies => "movies",
            DatasetKind::Ratings => "ratings",
            DatasetKind::Users => "users",
        }
    }

    /// Declared warehouse column schema for this kind.
    pub fn schema(&self) -> &'static [ColumnSpec] {
        match self {
            DatasetKind::Movies => MOVIES_SCHEMA,
            DatasetKind::Ratings => RATINGS_SCHEMA,
            DatasetKind::Users => USERS_SCHEMA,
        }
    }

    /// Name of the staging table in the warehouse.
    pub fn staging_table(&self) -> String {
        format!("stg_{}", self.as_str())
    }

    /// Deterministic object-store key for the staged artifact. The same kind
    /// always maps to the same key; re-uploads overwrite.
    pub fn remote_key(&self) -> String {
        format!("data/{}.parquet", self.as_str())
    }

    /// File name of the staged artifact in the local data directory.
    pub fn local_filename(&self) -> String {
        format!("{}.parquet", self.as_str())
    }
}

impl std::str::FromStr for DatasetKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "movies" => Ok(DatasetKind::Movies),
            "ratings" => Ok(DatasetKind::Ratings),
            "users" => Ok(DatasetKind::Users),
            other => Err(EtlError::UnknownDataset(other.to_string())),
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_kinds() {
        assert_eq!("movies".parse::<DatasetKind>().unwrap(), DatasetKind::Movies);
        assert_eq!(" Ratings ".parse::<DatasetKind>().unwrap(), DatasetKind::Ratings);
        assert_eq!("users".parse::<DatasetKind>().unwrap(), DatasetKind::Users);
    }

    #[test]
    fn unknown_kind_is_construction_error() {
        let err = "reviews".parse::<DatasetKind>().unwrap_err();
        assert!(matches!(err, EtlError::UnknownDataset(k) if k == "reviews"));
    }

    #[test]
    fn schemas_have_required_identifier() {
        for kind in DatasetKind::ALL {
            let first = &kind.schema()[0];
            assert_eq!(first.name, "identifier");
            assert!(first.required);
        }
    }

    #[test]
    fn deterministic_paths() {
        assert_eq!(DatasetKind::Movies.remote_key(), "data/movies.parquet");
        assert_eq!(DatasetKind::Ratings.staging_table(), "stg_ratings");
        assert_eq!(DatasetKind::Users.local_filename(), "users.parquet");
    }
}
