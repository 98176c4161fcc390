// Copyright 2025 Neutree Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Kubernetes resource quantity parsing.
//!
//! https://kubernetes.io/docs/reference/kubernetes-api/common-definitions/quantity/

use crate::types::v1::resource::GIB;

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parses a quantity such as `500m`, `8Gi` or `1e3` into its base unit.
/// Anything unparseable is `0`.
pub fn parse(quantity: &str) -> f64 {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return 0.0;
    }

    let (number, multiplier) = BINARY_SUFFIXES
        .iter()
        .chain(DECIMAL_SUFFIXES)
        .find_map(|(suffix, multiplier)| {
            quantity
                .strip_suffix(suffix)
                .map(|number| (number, *multiplier))
        })
        .unwrap_or((quantity, 1.0));

    number
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v * multiplier)
        .unwrap_or(0.0)
}

/// Parses a memory quantity into GiB.
pub fn parse_gib(quantity: &str) -> f64 {
    parse(quantity) / GIB
}

/// Formats a GiB amount the way requests are written, e.g. `8Gi`.
pub fn format_gib(gib: f64) -> String {
    format!("{gib}Gi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_decimal() {
        assert_eq!(parse("2"), 2.0);
        assert_eq!(parse(" 1.5 "), 1.5);
        assert_eq!(parse("500m"), 0.5);
        assert_eq!(parse("2k"), 2000.0);
        assert_eq!(parse("1e3"), 1000.0);
    }

    #[test]
    fn test_parse_binary() {
        assert_eq!(parse("512Mi"), 512.0 * 1024.0 * 1024.0);
        assert_eq!(parse_gib("8Gi"), 8.0);
        assert_eq!(parse_gib("1024Mi"), 1.0);
    }

    #[test]
    fn test_parse_garbage_is_zero() {
        assert_eq!(parse(""), 0.0);
        assert_eq!(parse("abc"), 0.0);
        assert_eq!(parse("Gi"), 0.0);
    }

    #[test]
    fn test_format_gib() {
        assert_eq!(format_gib(8.0), "8Gi");
        assert_eq!(format_gib(0.5), "0.5Gi");
    }
}
