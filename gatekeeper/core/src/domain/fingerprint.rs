// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Request Fingerprints
//!
//! A [`RequestFingerprint`] summarizes the parts of an HTTP request that the
//! policy service decides on. It is only ever used as a decision-cache key and
//! is never persisted.
//!
//! Query parameters are serialized in key order, so two requests carrying the
//! same parameters in a different order share one fingerprint.

use crate::proto::AppGuardHttpRequest;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint {
    method: String,
    query: String,
    source_ip: String,
    original_url: String,
    user_agent: String,
}

impl RequestFingerprint {
    pub fn from_request(request: &AppGuardHttpRequest) -> Self {
        let source_ip = request
            .tcp_info
            .as_ref()
            .and_then(|info| info.connection.as_ref())
            .and_then(|connection| connection.source_ip.clone())
            .unwrap_or_default();

        let user_agent = request
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        Self {
            method: request.method.clone(),
            query: serialize_query(&request.query),
            source_ip,
            original_url: request.original_url.clone(),
            user_agent,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn original_url(&self) -> &str {
        &self.original_url
    }
}

fn serialize_query(query: &HashMap<String, String>) -> String {
    let ordered: BTreeMap<&str, &str> = query
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    ordered
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Split the query string of `uri` into parameters.
///
/// Pairs split on the first `=`; a bare key maps to an empty value and a
/// repeated key keeps its last value.
pub fn parse_query_parameters(uri: &str) -> HashMap<String, String> {
    let Some((_, query)) = uri.split_once('?') else {
        return HashMap::new();
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
