//! Source fetcher
//!
//! Retrieves a raw tabular dataset from an opaque source locator: an
//! `http(s)://` URL or a local file path. The only format assumption is
//! CSV-like with a header row. Transport failures are classified as
//! [`EtlError::SourceUnavailable`], the single error class the orchestrator
//! retries automatically.

use std::time::Duration;

use mdp_common::{EtlError, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::dataset::{CellValue, RawDataset};

/// Default request timeout for source downloads.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;

/// Fetches raw datasets from remote or local sources.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("mdp-etl/0.1")
            .build()
            .map_err(|e| EtlError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Fetch the source into memory and decode it as CSV with a header row.
    ///
    /// A successful fetch with zero data rows is not an error.
    #[instrument(skip(self))]
    pub async fn fetch(&self, source_ref: &str) -> Result<RawDataset> {
        let bytes = if source_ref.starts_with("http://") || source_ref.starts_with("https://") {
            self.fetch_url(source_ref).await?
        } else {
            self.fetch_file(source_ref).await?
        };

        debug!(source = source_ref, bytes = bytes.len(), "Downloaded source");

        let dataset = decode_csv(&bytes)?;
        info!(
            source = source_ref,
            rows = dataset.num_rows(),
            columns = dataset.num_columns(),
            "Fetched dataset"
        );

        Ok(dataset)
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EtlError::SourceUnavailable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(EtlError::SourceUnavailable(format!(
                "{}: HTTP {}",
                url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EtlError::SourceUnavailable(format!("{}: {}", url, e)))?;

        Ok(bytes.to_vec())
    }

    async fn fetch_file(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| EtlError::SourceUnavailable(format!("{}: {}", path, e)))
    }
}

/// Decode CSV bytes into a dataset. Every field lands as `Text`; empty fields
/// become `Null`. Typing happens later in the transformer.
fn decode_csv(bytes: &[u8]) -> Result<RawDataset> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| EtlError::Parse(format!("missing header row: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut dataset = RawDataset::new(headers);

    for record in reader.records() {
        let record = record.map_err(|e| EtlError::Parse(format!("bad CSV record: {}", e)))?;
        let row = record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    CellValue::Null
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect();
        dataset.push_row(row)?;
    }

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_csv_with_header() {
        let data = b"identifier,movie_id,rating_value\nr1,m1,8\nr2,m2,\n";
        let ds = decode_csv(data).unwrap();
        assert_eq!(ds.columns, vec!["identifier", "movie_id", "rating_value"]);
        assert_eq!(ds.num_rows(), 2);
        assert_eq!(ds.rows[0][2], CellValue::Text("8".into()));
        assert_eq!(ds.rows[1][2], CellValue::Null);
    }

    #[test]
    fn decode_csv_zero_rows_is_ok() {
        let ds = decode_csv(b"identifier,username\n").unwrap();
        assert!(ds.is_empty());
        assert_eq!(ds.num_columns(), 2);
    }

    #[test]
    fn decode_csv_ragged_row_is_parse_error() {
        let err = decode_csv(b"a,b\n1,2,3\n").unwrap_err();
        assert!(matches!(err, EtlError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let fetcher = Fetcher::new().unwrap();
        let err = fetcher.fetch("/nonexistent/source.csv").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn fetch_from_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        std::fs::write(&path, "identifier,username\nu1,alice\n").unwrap();

        let fetcher = Fetcher::new().unwrap();
        let ds = fetcher.fetch(path.to_str().unwrap()).await.unwrap();
        assert_eq!(ds.num_rows(), 1);
        assert_eq!(ds.rows[0][1], CellValue::Text("alice".into()));
    }
}
