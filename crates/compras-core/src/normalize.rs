//! Release normalizer: raw upstream record → [`CanonicalRelease`].
//!
//! The upstream API is inconsistent about whether a record is flat or nested
//! under a `release` key, and about which of several synonymous fields
//! carries data. Every canonical field is therefore resolved through an
//! ordered chain of JSON pointers, evaluated by one generic helper
//! ([`resolve`]) that returns the first non-empty value. When nothing in the
//! chain has data the field takes its typed default.
//!
//! Normalization is pure: no I/O, no clock, no randomness.

use serde_json::Value;
use thiserror::Error;

use crate::models::{
    Address, Amount, Buyer, CanonicalRelease, ContactPoint, Document, Identifier, Party, Period,
    RawRecord, Tender,
};

pub const DEFAULT_CURRENCY: &str = "DOP";
pub const DEFAULT_LANGUAGE: &str = "es";
pub const DEFAULT_COUNTRY: &str = "Dominican Republic";
pub const UNSPECIFIED_BUYER: &str = "Entidad no especificada";
pub const UNSPECIFIED: &str = "No especificado";
pub const UNKNOWN_STATUS: &str = "unknown";
pub const MISSING_TITLE: &str = "Título no disponible";
pub const MISSING_DESCRIPTION: &str = "Descripción no disponible";
pub const UNNAMED_PARTY: &str = "Unnamed party";
pub const UNKNOWN_DOCUMENT_TYPE: &str = "Unknown type";
pub const UNTITLED_DOCUMENT: &str = "Untitled document";
/// Key reported for records that carry neither `ocid` nor `id`.
pub const UNKNOWN_KEY: &str = "unknown";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("release {key} is not a JSON object")]
    NotAnObject { key: String },
}

/// Ordered accessor chains, one per canonical field. Earlier entries win.
pub mod chains {
    pub type Chain = &'static [&'static str];

    pub const ID: Chain = &["/id", "/release/id"];
    pub const OCID: Chain = &["/ocid", "/release/ocid"];
    pub const DATE: Chain = &["/date", "/release/date"];
    pub const PUBLISHED_DATE: Chain = &["/publishedDate", "/release/publishedDate", "/date"];
    pub const TAG: Chain = &["/tag", "/release/tag"];
    pub const INITIATION_TYPE: Chain = &["/initiationType", "/release/initiationType"];
    pub const LANGUAGE: Chain = &["/language", "/release/language"];

    pub const BUYER_ID: Chain = &["/buyer/id", "/release/buyer/id"];
    pub const BUYER_NAME: Chain = &[
        "/buyer/name",
        "/release/buyer/name",
        "/tender/procuringEntity/name",
        "/release/tender/procuringEntity/name",
    ];
    pub const PARTIES: Chain = &["/parties", "/release/parties"];

    pub const TENDER_ID: Chain = &["/tender/id", "/release/tender/id"];
    pub const TITLE: Chain = &["/tender/title", "/release/tender/title", "/title"];
    pub const DESCRIPTION: Chain = &[
        "/tender/description",
        "/release/tender/description",
        "/description",
    ];
    pub const STATUS: Chain = &["/tender/status", "/release/tender/status"];
    pub const PROCUREMENT_METHOD: Chain = &[
        "/tender/procurementMethodDetails",
        "/release/tender/procurementMethodDetails",
        "/tender/procurementMethod",
        "/release/tender/procurementMethod",
    ];
    pub const PROCUREMENT_METHOD_DETAILS: Chain = &[
        "/tender/procurementMethodDetails",
        "/release/tender/procurementMethodDetails",
    ];
    pub const MAIN_CATEGORY: Chain = &[
        "/tender/mainProcurementCategory",
        "/release/tender/mainProcurementCategory",
    ];
    pub const SUBMISSION_METHOD: Chain =
        &["/tender/submissionMethod", "/release/tender/submissionMethod"];
    pub const SUBMISSION_METHOD_DETAILS: Chain = &[
        "/tender/submissionMethodDetails",
        "/release/tender/submissionMethodDetails",
    ];
    pub const TENDER_START: Chain = &[
        "/tender/tenderPeriod/startDate",
        "/release/tender/tenderPeriod/startDate",
        "/date",
    ];
    pub const TENDER_END: Chain = &[
        "/tender/tenderPeriod/endDate",
        "/release/tender/tenderPeriod/endDate",
    ];
    pub const ENQUIRY_START: Chain = &[
        "/tender/enquiryPeriod/startDate",
        "/release/tender/enquiryPeriod/startDate",
    ];
    pub const ENQUIRY_END: Chain = &[
        "/tender/enquiryPeriod/endDate",
        "/release/tender/enquiryPeriod/endDate",
    ];
    pub const HAS_ENQUIRIES: Chain = &["/tender/hasEnquiries", "/release/tender/hasEnquiries"];
    pub const ELIGIBILITY: Chain = &[
        "/tender/eligibilityCriteria",
        "/release/tender/eligibilityCriteria",
    ];
    pub const AWARD_CRITERIA: Chain = &["/tender/awardCriteria", "/release/tender/awardCriteria"];
    pub const AWARD_CRITERIA_DETAILS: Chain = &[
        "/tender/awardCriteriaDetails",
        "/release/tender/awardCriteriaDetails",
    ];
    pub const AMOUNT: Chain = &[
        "/tender/value/amount",
        "/release/tender/value/amount",
        "/planning/budget/amount/amount",
        "/release/planning/budget/amount/amount",
    ];
    pub const CURRENCY: Chain = &[
        "/tender/value/currency",
        "/release/tender/value/currency",
        "/planning/budget/amount/currency",
        "/release/planning/budget/amount/currency",
    ];
    pub const DOCUMENTS: Chain = &["/tender/documents", "/release/tender/documents"];
    pub const AWARDS: Chain = &["/awards", "/release/awards"];
    pub const CONTRACTS: Chain = &["/contracts", "/release/contracts"];

    pub const KEY: Chain = &["/ocid", "/release/ocid", "/id", "/release/id"];
}

/// Evaluates `chain` against `record` and returns the first value `extract`
/// accepts. Extractors return `None` for empty or mistyped values, which
/// moves resolution on to the next path.
pub fn resolve<'a, T>(
    record: &'a Value,
    chain: &[&str],
    extract: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    chain
        .iter()
        .filter_map(|path| record.pointer(path))
        .find_map(extract)
}

/// Non-empty string. Numbers are rendered, since some upstream ids are numeric.
fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Non-zero amount; numeric strings are accepted.
fn amount(v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|a| *a != 0.0 && a.is_finite())
}

fn non_empty_array(v: &Value) -> Option<&Vec<Value>> {
    v.as_array().filter(|a| !a.is_empty())
}

fn string_list(v: &Value) -> Option<Vec<String>> {
    let items: Vec<String> = non_empty_array(v)?.iter().filter_map(text).collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn truthy(v: &Value) -> Option<bool> {
    v.as_bool().filter(|b| *b)
}

fn text_or(record: &Value, chain: &[&str], default: &str) -> String {
    resolve(record, chain, text).unwrap_or_else(|| default.to_string())
}

fn field(v: &Value, path: &str) -> String {
    v.pointer(path).and_then(text).unwrap_or_default()
}

/// Some endpoints wrap a single release in a package; operate on its first
/// element when `releases` is a non-empty array.
pub fn unwrap_package(raw: &RawRecord) -> &Value {
    raw.get("releases")
        .and_then(non_empty_array)
        .and_then(|releases| releases.first())
        .unwrap_or(raw)
}

/// Identification key for a raw record: `ocid`, then `id`, else `"unknown"`.
pub fn record_key(raw: &RawRecord) -> String {
    resolve(unwrap_package(raw), chains::KEY, text)
        .or_else(|| resolve(raw, chains::KEY, text))
        .unwrap_or_else(|| UNKNOWN_KEY.to_string())
}

/// Normalize one raw upstream record.
///
/// Fails only when the record, after unwrapping, is not a JSON object.
pub fn normalize(raw: &RawRecord) -> Result<CanonicalRelease, NormalizeError> {
    let r = unwrap_package(raw);
    if !r.is_object() {
        return Err(NormalizeError::NotAnObject {
            key: record_key(raw),
        });
    }

    let parties: Vec<Party> = resolve(r, chains::PARTIES, non_empty_array)
        .map(|items| items.iter().map(party).collect())
        .unwrap_or_default();

    let documents: Vec<Document> = resolve(r, chains::DOCUMENTS, non_empty_array)
        .map(|items| items.iter().map(document).collect())
        .unwrap_or_default();

    let buyer_name = resolve(r, chains::BUYER_NAME, text)
        .or_else(|| resolve(r, chains::PARTIES, buyer_party_name))
        .unwrap_or_else(|| UNSPECIFIED_BUYER.to_string());

    let buyer_id = resolve(r, chains::BUYER_ID, text)
        .or_else(|| resolve(r, chains::PARTIES, buyer_party_id))
        .unwrap_or_default();

    let tender = Tender {
        id: text_or(r, chains::TENDER_ID, ""),
        title: text_or(r, chains::TITLE, MISSING_TITLE),
        description: text_or(r, chains::DESCRIPTION, MISSING_DESCRIPTION),
        status: text_or(r, chains::STATUS, UNKNOWN_STATUS),
        procurement_method: text_or(r, chains::PROCUREMENT_METHOD, UNSPECIFIED),
        procurement_method_details: text_or(r, chains::PROCUREMENT_METHOD_DETAILS, ""),
        main_procurement_category: text_or(r, chains::MAIN_CATEGORY, UNSPECIFIED),
        submission_method: resolve(r, chains::SUBMISSION_METHOD, string_list).unwrap_or_default(),
        submission_method_details: text_or(r, chains::SUBMISSION_METHOD_DETAILS, ""),
        tender_period: Period {
            start_date: text_or(r, chains::TENDER_START, ""),
            end_date: text_or(r, chains::TENDER_END, ""),
        },
        enquiry_period: Period {
            start_date: text_or(r, chains::ENQUIRY_START, ""),
            end_date: text_or(r, chains::ENQUIRY_END, ""),
        },
        has_enquiries: resolve(r, chains::HAS_ENQUIRIES, truthy).unwrap_or(false),
        eligibility_criteria: text_or(r, chains::ELIGIBILITY, ""),
        award_criteria: text_or(r, chains::AWARD_CRITERIA, ""),
        award_criteria_details: text_or(r, chains::AWARD_CRITERIA_DETAILS, ""),
        value: Amount {
            amount: resolve(r, chains::AMOUNT, amount).unwrap_or(0.0),
            currency: text_or(r, chains::CURRENCY, DEFAULT_CURRENCY),
        },
        documents,
    };

    Ok(CanonicalRelease {
        id: text_or(r, chains::ID, ""),
        ocid: text_or(r, chains::OCID, ""),
        date: text_or(r, chains::DATE, ""),
        published_date: text_or(r, chains::PUBLISHED_DATE, ""),
        tag: resolve(r, chains::TAG, string_list).unwrap_or_default(),
        initiation_type: text_or(r, chains::INITIATION_TYPE, ""),
        language: text_or(r, chains::LANGUAGE, DEFAULT_LANGUAGE),
        buyer: Buyer {
            id: buyer_id,
            name: buyer_name,
        },
        tender,
        parties,
        awards: resolve(r, chains::AWARDS, non_empty_array)
            .cloned()
            .unwrap_or_default(),
        contracts: resolve(r, chains::CONTRACTS, non_empty_array)
            .cloned()
            .unwrap_or_default(),
    })
}

fn first_buyer(parties: &Value) -> Option<&Value> {
    non_empty_array(parties)?.iter().find(|p| {
        p.get("roles")
            .and_then(Value::as_array)
            .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some("buyer")))
    })
}

fn buyer_party_name(parties: &Value) -> Option<String> {
    first_buyer(parties)?.get("name").and_then(text)
}

fn buyer_party_id(parties: &Value) -> Option<String> {
    first_buyer(parties)?.get("id").and_then(text)
}

fn party(p: &Value) -> Party {
    let mut roles: Vec<String> = Vec::new();
    for role in p
        .get("roles")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(text)
    {
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    let locality = field(p, "/address/locality");
    let region = p
        .pointer("/address/region")
        .and_then(text)
        .or_else(|| Some(locality.clone()).filter(|l| !l.is_empty()))
        .unwrap_or_else(|| UNSPECIFIED.to_string());

    Party {
        id: field(p, "/id"),
        name: p
            .get("name")
            .and_then(text)
            .unwrap_or_else(|| UNNAMED_PARTY.to_string()),
        identifier: Identifier {
            scheme: field(p, "/identifier/scheme"),
            id: field(p, "/identifier/id"),
            legal_name: field(p, "/identifier/legalName"),
        },
        address: Address {
            locality,
            region,
            country_name: p
                .pointer("/address/countryName")
                .and_then(text)
                .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
        },
        contact_point: ContactPoint {
            name: field(p, "/contactPoint/name"),
            email: field(p, "/contactPoint/email"),
            telephone: field(p, "/contactPoint/telephone"),
        },
        roles,
    }
}

fn document(d: &Value) -> Document {
    let or = |path: &str, default: &str| {
        d.pointer(path)
            .and_then(text)
            .unwrap_or_else(|| default.to_string())
    };
    Document {
        id: field(d, "/id"),
        document_type: or("/documentType", UNKNOWN_DOCUMENT_TYPE),
        title: or("/title", UNTITLED_DOCUMENT),
        description: field(d, "/description"),
        url: field(d, "/url"),
        date_published: field(d, "/datePublished"),
        date_modified: field(d, "/dateModified"),
        format: field(d, "/format"),
        language: or("/language", DEFAULT_LANGUAGE),
    }
}
