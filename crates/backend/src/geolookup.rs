//! ASN and country lookups over gzipped MMDB databases.

use common::error::GeoError;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;

/// Country code reported when the lookup fails.
pub const DEFAULT_PROBE_CC: &str = "ZZ";

/// ASN reported when the lookup fails.
pub const DEFAULT_PROBE_ASN: &str = "AS0";

#[derive(Debug, Deserialize)]
struct CountryRecord {
    country: Option<Country>,
}

#[derive(Debug, Deserialize)]
struct Country {
    iso_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsnRecord {
    autonomous_system_number: Option<u32>,
    autonomous_system_organization: Option<String>,
}

/// Open a gzip-compressed MMDB database.
///
/// The whole stream is decompressed up front so that the trailing CRC
/// is verified: a truncated or corrupted database fails here instead
/// of producing bogus lookups later.
async fn open_database(path: &Path) -> Result<maxminddb::Reader<Vec<u8>>, GeoError> {
    let display = path.display().to_string();
    let compressed = tokio::fs::read(path)
        .await
        .map_err(|source| GeoError::DatabaseRead {
            path: display.clone(),
            source,
        })?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .map_err(|source| GeoError::Gunzip {
            path: display,
            source,
        })?;
    maxminddb::Reader::from_source(data).map_err(|e| GeoError::Lookup {
        source: Box::new(e),
    })
}

fn parse_ip(ip: &str) -> Result<IpAddr, GeoError> {
    ip.parse().map_err(|_| GeoError::InvalidIp {
        value: ip.to_string(),
    })
}

/// Look up the probe country code. Callers fall back to
/// [`DEFAULT_PROBE_CC`] when this fails.
pub async fn get_cc(path: &Path, ip: &str) -> Result<String, GeoError> {
    let reader = open_database(path).await?;
    let record: CountryRecord =
        reader
            .lookup(parse_ip(ip)?)
            .map_err(|e| GeoError::Lookup {
                source: Box::new(e),
            })?;
    Ok(record
        .country
        .and_then(|c| c.iso_code)
        .unwrap_or_else(|| DEFAULT_PROBE_CC.to_string()))
}

/// Look up the probe ASN and the organization owning it. Callers fall
/// back to [`DEFAULT_PROBE_ASN`] and an empty organization when this
/// fails.
pub async fn get_asn(path: &Path, ip: &str) -> Result<(String, String), GeoError> {
    let reader = open_database(path).await?;
    let record: AsnRecord = reader
        .lookup(parse_ip(ip)?)
        .map_err(|e| GeoError::Lookup {
            source: Box::new(e),
        })?;
    let asn = format!("AS{}", record.autonomous_system_number.unwrap_or(0));
    let org = record.autonomous_system_organization.unwrap_or_default();
    Ok((asn, org))
}
