//! Country-code lookup tables for geo-targeted redirects.
//!
//! `CONTINENTS` and `REGIONS` map lower-cased names to the ISO 3166-1
//! alpha-2 codes they contain. They are consumed only when a redirect rule
//! declares a `geo_target` map.

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{RutaError, RutaResult};

pub static CONTINENTS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    m.insert(
        "africa",
        &[
            "AO", "BF", "BI", "BJ", "BW", "CD", "CF", "CG", "CI", "CM", "CV", "DJ", "DZ", "EG",
            "EH", "ER", "ET", "GA", "GH", "GM", "GN", "GQ", "GW", "KE", "KM", "LR", "LS", "LY",
            "MA", "MG", "ML", "MR", "MU", "MW", "MZ", "NA", "NE", "NG", "RE", "RW", "SC", "SD",
            "SH", "SL", "SN", "SO", "SS", "ST", "SZ", "TD", "TG", "TN", "TZ", "UG", "YT", "ZA",
            "ZM", "ZW",
        ][..],
    );
    m.insert("antarctica", &["AQ", "BV", "GS", "HM", "TF"][..]);
    m.insert(
        "asia",
        &[
            "AE", "AF", "AM", "AZ", "BD", "BH", "BN", "BT", "CN", "CY", "GE", "HK", "ID", "IL",
            "IN", "IO", "IQ", "IR", "JO", "JP", "KG", "KH", "KP", "KR", "KW", "KZ", "LA", "LB",
            "LK", "MM", "MN", "MO", "MV", "MY", "NP", "OM", "PH", "PK", "PS", "QA", "SA", "SG",
            "SY", "TH", "TJ", "TL", "TM", "TR", "TW", "UZ", "VN", "YE",
        ][..],
    );
    m.insert(
        "europe",
        &[
            "AD", "AL", "AT", "AX", "BA", "BE", "BG", "BY", "CH", "CZ", "DE", "DK", "EE", "ES",
            "FI", "FO", "FR", "GB", "GG", "GI", "GR", "HR", "HU", "IE", "IM", "IS", "IT", "JE",
            "LI", "LT", "LU", "LV", "MC", "MD", "ME", "MK", "MT", "NL", "NO", "PL", "PT", "RO",
            "RS", "RU", "SE", "SI", "SJ", "SK", "SM", "UA", "VA", "XK",
        ][..],
    );
    m.insert(
        "northamerica",
        &[
            "AG", "AI", "AW", "BB", "BL", "BM", "BS", "BZ", "CA", "CR", "CU", "CW", "DM", "DO",
            "GD", "GL", "GP", "GT", "HN", "HT", "JM", "KN", "KY", "LC", "MF", "MQ", "MS", "MX",
            "NI", "PA", "PM", "PR", "SV", "SX", "TC", "TT", "US", "VC", "VG", "VI",
        ][..],
    );
    m.insert(
        "oceania",
        &[
            "AS", "AU", "CK", "FJ", "FM", "GU", "KI", "MH", "MP", "NC", "NF", "NR", "NU", "NZ",
            "PF", "PG", "PN", "PW", "SB", "TK", "TO", "TV", "UM", "VU", "WF", "WS",
        ][..],
    );
    m.insert(
        "southamerica",
        &[
            "AR", "BO", "BR", "CL", "CO", "EC", "FK", "GF", "GY", "PE", "PY", "SR", "UY", "VE",
        ][..],
    );
    m
});

pub static REGIONS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    m.insert("nordics", &["DK", "FI", "IS", "NO", "SE"][..]);
    m.insert("dach", &["AT", "CH", "DE"][..]);
    m.insert("benelux", &["BE", "LU", "NL"][..]);
    m.insert("iberia", &["ES", "PT"][..]);
    m.insert("baltics", &["EE", "LT", "LV"][..]);
    m.insert(
        "balkans",
        &["AL", "BA", "BG", "HR", "ME", "MK", "RS", "SI", "XK"][..],
    );
    m.insert(
        "middleeast",
        &[
            "AE", "BH", "CY", "EG", "IL", "IQ", "JO", "KW", "LB", "OM", "PS", "QA", "SA", "SY",
            "TR", "YE",
        ][..],
    );
    m.insert("gulf", &["AE", "BH", "KW", "OM", "QA", "SA"][..]);
    m.insert("maghreb", &["DZ", "EH", "LY", "MA", "MR", "TN"][..]);
    m.insert(
        "latam",
        &[
            "AR", "BO", "BR", "CL", "CO", "CR", "CU", "DO", "EC", "GT", "HN", "MX", "NI", "PA",
            "PE", "PR", "PY", "SV", "UY", "VE",
        ][..],
    );
    m.insert(
        "caribbean",
        &[
            "AG", "AI", "AW", "BB", "BS", "CU", "CW", "DM", "DO", "GD", "GP", "HT", "JM", "KN",
            "KY", "LC", "MF", "MQ", "MS", "PR", "SX", "TC", "TT", "VC", "VG", "VI",
        ][..],
    );
    m.insert(
        "centralamerica",
        &["BZ", "CR", "GT", "HN", "NI", "PA", "SV"][..],
    );
    m.insert(
        "southeastasia",
        &["BN", "ID", "KH", "LA", "MM", "MY", "PH", "SG", "TH", "TL", "VN"][..],
    );
    m.insert(
        "eastasia",
        &["CN", "HK", "JP", "KP", "KR", "MN", "MO", "TW"][..],
    );
    m.insert(
        "southasia",
        &["AF", "BD", "BT", "IN", "LK", "MV", "NP", "PK"][..],
    );
    m.insert("centralasia", &["KG", "KZ", "TJ", "TM", "UZ"][..]);
    m.insert("anz", &["AU", "NZ"][..]);
    m
});

/// Expand a declared geo-target map into an ordered country-code lookup
/// table. Direct 2-letter codes take precedence, then named regions, then
/// continents; within each class keys are visited in sorted order so the
/// expansion is deterministic. The first URL bound to a code wins.
pub fn expand_geo_target(map: &HashMap<String, String>) -> RutaResult<Vec<(String, String)>> {
    let sorted: BTreeMap<&str, &str> = map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let mut entries: Vec<(String, String)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |code: &str, url: &str, entries: &mut Vec<(String, String)>| {
        if seen.insert(code.to_string()) {
            entries.push((code.to_string(), url.to_string()));
        }
    };

    for (key, url) in &sorted {
        if key.len() == 2 && key.chars().all(|c| c.is_ascii_alphabetic()) {
            push(&key.to_uppercase(), url, &mut entries);
        }
    }
    for (key, url) in &sorted {
        if let Some(codes) = REGIONS.get(key.to_lowercase().as_str()) {
            for code in *codes {
                push(code, url, &mut entries);
            }
        }
    }
    for (key, url) in &sorted {
        if let Some(codes) = CONTINENTS.get(key.to_lowercase().as_str()) {
            for code in *codes {
                push(code, url, &mut entries);
            }
        }
    }

    for key in sorted.keys() {
        let is_code = key.len() == 2 && key.chars().all(|c| c.is_ascii_alphabetic());
        let lower = key.to_lowercase();
        if !is_code && !REGIONS.contains_key(lower.as_str()) && !CONTINENTS.contains_key(lower.as_str())
        {
            return Err(RutaError::config(format!(
                "unknown geo target '{}' (expected a country code, region or continent)",
                key
            )));
        }
    }

    Ok(entries)
}
